//! Turns fetched HTML into indexable text: title, description, language,
//! main content and boilerplate.

use crate::language::{self, DEFAULT_LANGUAGE};
use reqwest::header::{HeaderMap, HeaderName, CONTENT_TYPE, LOCATION};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::borrow::Cow;
use thiserror::Error;
use url::Url;

/// Raw page bytes plus fetch metadata awaiting normalization.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL the response was fetched from.
    pub url: Url,
    /// Link distance from the crawl seed.
    pub depth: u8,
    /// HTTP response status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw response body bytes.
    pub body: Vec<u8>,
}

impl FetchedPage {
    /// Builds a new fetched page payload.
    pub fn new(url: Url, depth: u8, status: u16, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            url,
            depth,
            status,
            headers,
            body,
        }
    }

    /// `Location` header value, if the response carried one.
    pub fn location(&self) -> Option<String> {
        header_to_string(&self.headers, LOCATION)
    }

    /// `Content-Type` header value, if the response carried one.
    pub fn content_type(&self) -> Option<String> {
        header_to_string(&self.headers, CONTENT_TYPE)
    }
}

fn header_to_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Fully normalized representation of a fetched page.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedPage {
    /// Trimmed `<title>` text, empty when absent.
    pub title: String,
    /// Trimmed `meta[name=description]` content, empty when absent.
    pub description: String,
    /// Supported language code the page is indexed under.
    pub language: String,
    /// Main content, one block per line.
    pub body: String,
    /// Navigation and other chrome text, one block per line.
    pub boilerplate: String,
}

/// Normalization tuning knobs.
#[derive(Debug, Clone)]
pub struct NormalizationConfig {
    /// Language assumed when neither markup nor headers declare one.
    pub default_language: String,
    /// Cap on the number of recorded blocks to avoid runaway memory use.
    pub max_blocks: usize,
    /// Share of a block's text inside links above which it counts as boilerplate.
    pub max_link_density: f32,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            default_language: DEFAULT_LANGUAGE.to_string(),
            max_blocks: 8192,
            max_link_density: 0.5,
        }
    }
}

/// Reasons a page cannot be indexed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// Empty body or a payload without HTML markup (feeds, JSON, plain text).
    #[error("not indexable: {0}")]
    NotIndexable(String),
    /// The detected language has no configured analyzer.
    #[error("language not supported: {0}")]
    UnsupportedLanguage(String),
}

/// Stateless HTML normalization service.
#[derive(Clone)]
pub struct Normalizer {
    config: NormalizationConfig,
    selectors: PageSelectors,
}

impl Normalizer {
    /// Builds a new normalizer instance.
    pub fn new(config: NormalizationConfig) -> Self {
        Self {
            config,
            selectors: PageSelectors::new(),
        }
    }

    /// Normalizes a fetched page into title, description, main content and
    /// boilerplate.
    ///
    /// An HTML `Content-Type` is enough to accept the page. Without the header
    /// the raw text must open a document (`<!doctype html`, `<html`, `<head`
    /// or `<body`).
    pub fn normalize(&self, page: &FetchedPage) -> Result<NormalizedPage, NormalizeError> {
        if page.body.is_empty() {
            return Err(NormalizeError::NotIndexable("empty body".into()));
        }
        let declared_html = match page.content_type() {
            Some(content_type) if !content_type.to_ascii_lowercase().contains("html") => {
                return Err(NormalizeError::NotIndexable(content_type));
            }
            Some(_) => true,
            None => false,
        };

        let (decoded, lossy) = decode_body(&page.body);
        if lossy {
            tracing::debug!(url = %page.url, "body is not valid utf-8, decoded lossily");
        }
        if !declared_html && !looks_like_html(&decoded) {
            return Err(NormalizeError::NotIndexable("no html document markup".into()));
        }
        let document = Html::parse_document(&decoded);

        let html_lang = document.root_element().value().attr("lang");
        let language = language::detect(html_lang, &page.headers, &self.config.default_language);
        if !language::is_supported(&language) {
            return Err(NormalizeError::UnsupportedLanguage(language));
        }

        let title = self
            .selectors
            .first_text(&document, &self.selectors.title)
            .unwrap_or_default();
        let description = document
            .select(&self.selectors.description)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .map(collapse_whitespace)
            .unwrap_or_default();

        let root = document
            .select(&self.selectors.body)
            .next()
            .unwrap_or_else(|| document.root_element());
        let mut collector = BlockCollector::new(&self.config);
        collector.walk(root);
        let (body, boilerplate) = collector.finish();

        Ok(NormalizedPage {
            title,
            description,
            language,
            body,
            boilerplate,
        })
    }
}

#[derive(Clone)]
struct PageSelectors {
    title: Selector,
    description: Selector,
    body: Selector,
}

impl PageSelectors {
    fn new() -> Self {
        Self {
            title: Selector::parse("title").expect("title selector"),
            description: Selector::parse("meta[name=description]").expect("description selector"),
            body: Selector::parse("body").expect("body selector"),
        }
    }

    fn first_text(&self, document: &Html, selector: &Selector) -> Option<String> {
        document
            .select(selector)
            .next()
            .map(|element| extract_text(&element))
    }
}

fn decode_body(bytes: &[u8]) -> (Cow<'_, str>, bool) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (Cow::Borrowed(text), false),
        Err(_) => (
            Cow::Owned(String::from_utf8_lossy(bytes).into_owned()),
            true,
        ),
    }
}

const DOCUMENT_MARKERS: &[&[u8]] = &[b"<!doctype html", b"<html", b"<head", b"<body"];

// html5ever synthesizes <html> for any input, so the check runs on the raw text.
fn looks_like_html(text: &str) -> bool {
    let bytes = text.as_bytes();
    DOCUMENT_MARKERS.iter().any(|marker| {
        bytes
            .windows(marker.len())
            .any(|window| window.eq_ignore_ascii_case(marker))
    })
}

const IGNORED_TAGS: &[&str] = &["script", "style", "template", "noscript", "svg"];
const CHROME_TAGS: &[&str] = &["nav", "header", "footer", "aside", "form", "menu"];
const CHROME_MARKERS: &[&str] = &[
    "nav",
    "menu",
    "footer",
    "sidebar",
    "breadcrumb",
    "cookie",
];
const BLOCK_TAGS: &[&str] = &[
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "p",
    "li",
    "blockquote",
    "pre",
    "td",
    "dd",
    "dt",
];

struct BlockCollector<'cfg> {
    config: &'cfg NormalizationConfig,
    body: Vec<String>,
    boilerplate: Vec<String>,
}

impl<'cfg> BlockCollector<'cfg> {
    fn new(config: &'cfg NormalizationConfig) -> Self {
        Self {
            config,
            body: Vec::new(),
            boilerplate: Vec::new(),
        }
    }

    fn walk(&mut self, root: ElementRef<'_>) {
        for element in root.descendent_elements() {
            if self.body.len() + self.boilerplate.len() >= self.config.max_blocks {
                break;
            }
            self.maybe_record(element);
        }
    }

    fn maybe_record(&mut self, element: ElementRef<'_>) {
        let tag = element.value().name();
        if !BLOCK_TAGS.contains(&tag) {
            return;
        }

        let mut in_chrome = is_chrome(&element);
        for ancestor in element.ancestors().filter_map(ElementRef::wrap) {
            let name = ancestor.value().name();
            if IGNORED_TAGS.contains(&name) {
                return;
            }
            // Nested blocks (a <p> inside an <li>) are emitted by the outer block.
            if BLOCK_TAGS.contains(&name) {
                return;
            }
            in_chrome |= is_chrome(&ancestor);
        }

        let text = extract_text(&element);
        if text.is_empty() {
            return;
        }

        if in_chrome || link_density(&element, &text) > self.config.max_link_density {
            self.boilerplate.push(text);
        } else {
            self.body.push(text);
        }
    }

    fn finish(self) -> (String, String) {
        (self.body.join("\n"), self.boilerplate.join("\n"))
    }
}

fn is_chrome(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    if CHROME_TAGS.contains(&value.name()) {
        return true;
    }
    if value.attr("role") == Some("navigation") {
        return true;
    }
    let markers = [value.attr("class"), value.id()];
    markers.into_iter().flatten().any(|attr| {
        let attr = attr.to_ascii_lowercase();
        CHROME_MARKERS.iter().any(|marker| attr.contains(marker))
    })
}

fn link_density(element: &ElementRef<'_>, text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let linked: usize = element
        .descendent_elements()
        .filter(|child| child.value().name() == "a")
        .map(|anchor| extract_text(&anchor).chars().count())
        .sum();
    linked as f32 / total as f32
}

fn extract_text(element: &ElementRef<'_>) -> String {
    let mut raw = String::new();
    for piece in element.text() {
        raw.push_str(piece);
    }
    collapse_whitespace(&raw)
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}
