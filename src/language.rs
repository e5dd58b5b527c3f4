//! Supported content languages and the backend analyzers that index them.

use reqwest::header::{HeaderMap, CONTENT_LANGUAGE};

/// Language used when a page declares nothing.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Language codes accepted for indexing, paired with the backend text analyzer
/// configured for their `web-<code>` collection.
const LANGUAGES: &[(&str, &str)] = &[
    ("ar", "arabic"),
    ("hy", "armenian"),
    ("eu", "basque"),
    ("pt-br", "brazilian"),
    ("bg", "bulgarian"),
    ("ca", "catalan"),
    ("zh", "cjk"),
    ("ja", "cjk"),
    ("ko", "cjk"),
    ("cs", "czech"),
    ("da", "danish"),
    ("nl", "dutch"),
    ("en", "english"),
    ("fi", "finnish"),
    ("fr", "french"),
    ("gl", "galician"),
    ("de", "german"),
    ("el", "greek"),
    ("hi", "hindi"),
    ("hu", "hungarian"),
    ("id", "indonesian"),
    ("ga", "irish"),
    ("it", "italian"),
    ("lv", "latvian"),
    ("lt", "lithuanian"),
    ("no", "norwegian"),
    ("fa", "persian"),
    ("pt", "portuguese"),
    ("ro", "romanian"),
    ("ru", "russian"),
    ("ckb", "sorani"),
    ("es", "spanish"),
    ("sv", "swedish"),
    ("tr", "turkish"),
    ("th", "thai"),
];

/// Returns the analyzer for a supported language code.
pub fn analyzer(code: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(lang, _)| *lang == code)
        .map(|(_, analyzer)| *analyzer)
}

/// True when pages in `code` can be indexed.
pub fn is_supported(code: &str) -> bool {
    analyzer(code).is_some()
}

/// Reduces a BCP 47 tag to the code used for collection names.
///
/// Only the primary subtag is kept (`en-US` becomes `en`), except Brazilian
/// Portuguese which has a dedicated analyzer.
pub fn canonical_code(tag: &str) -> Option<String> {
    let tag = tag.trim().to_ascii_lowercase().replace('_', "-");
    if tag.is_empty() {
        return None;
    }
    if tag == "pt-br" {
        return Some(tag);
    }
    tag.split('-')
        .next()
        .filter(|primary| !primary.is_empty() && primary.chars().all(|c| c.is_ascii_alphabetic()))
        .map(str::to_string)
}

/// Picks the page language from the markup attribute, then the
/// `Content-Language` header, then `fallback`.
pub fn detect(html_lang: Option<&str>, headers: &HeaderMap, fallback: &str) -> String {
    html_lang
        .and_then(canonical_code)
        .or_else(|| {
            headers
                .get(CONTENT_LANGUAGE)
                .and_then(|value| value.to_str().ok())
                // Content-Language may list several tags; the first one wins.
                .and_then(|value| value.split(',').next())
                .and_then(canonical_code)
        })
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn canonicalizes_region_tags() {
        assert_eq!(canonical_code("en-US").as_deref(), Some("en"));
        assert_eq!(canonical_code(" FR ").as_deref(), Some("fr"));
        assert_eq!(canonical_code("pt_BR").as_deref(), Some("pt-br"));
        assert_eq!(canonical_code("pt-PT").as_deref(), Some("pt"));
        assert_eq!(canonical_code(""), None);
        assert_eq!(canonical_code("*"), None);
    }

    #[test]
    fn markup_attribute_beats_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LANGUAGE, HeaderValue::from_static("de-DE, en"));
        assert_eq!(detect(Some("fr"), &headers, "en"), "fr");
        assert_eq!(detect(None, &headers, "en"), "de");
        assert_eq!(detect(Some(""), &HeaderMap::new(), "en"), "en");
    }

    #[test]
    fn knows_analyzers() {
        assert_eq!(analyzer("en"), Some("english"));
        assert_eq!(analyzer("pt-br"), Some("brazilian"));
        assert!(!is_supported("xx"));
    }
}
