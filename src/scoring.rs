//! Page quality weight and description synthesis.

/// Minimum words a body line needs before it can stand in for a description.
pub const MIN_DESCRIPTION_WORDS: usize = 8;
/// Upper bound on synthesized description length, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 200;

/// Word count as the ranking signal defines it: the number of space characters.
pub fn word_count(text: &str) -> usize {
    text.matches(' ').count()
}

/// Derives the integer quality weight of a page.
///
/// Metadata completeness sets the base (3 with title and description, 2 without
/// a description, 1 without a title, 0 with neither). A page whose main content
/// is thinner than its boilerplate, or that has no line usable as a
/// description, loses one more point, which can take the weight below zero.
pub fn score(title: &str, description: &str, body: &str, boilerplate: &str) -> i64 {
    let mut weight = 3;
    if title.is_empty() && description.is_empty() {
        weight = 0;
    } else if title.is_empty() {
        weight = 1;
    } else if description.is_empty() {
        weight = 2;
    }

    if word_count(body) < word_count(boilerplate) || create_description(body).is_none() {
        weight -= 1;
    }
    weight
}

/// Picks the first body line long enough to describe the page, cut on a word
/// boundary to [`MAX_DESCRIPTION_CHARS`].
pub fn create_description(body: &str) -> Option<String> {
    let line = body
        .lines()
        .map(str::trim)
        .find(|line| line.split_whitespace().count() >= MIN_DESCRIPTION_WORDS)?;

    if line.chars().count() <= MAX_DESCRIPTION_CHARS {
        return Some(line.to_string());
    }

    let mut out = String::new();
    for word in line.split_whitespace() {
        let extra = if out.is_empty() { 0 } else { 1 };
        if out.chars().count() + extra + word.chars().count() > MAX_DESCRIPTION_CHARS {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        // A single oversized token; hard-cut it.
        out = line.chars().take(MAX_DESCRIPTION_CHARS).collect();
    }
    Some(out)
}
