//! Streaming link discovery built on `lol_html`.

use lol_html::{element, HtmlRewriter, OutputSink, Settings};
use std::cell::RefCell;
use thiserror::Error;
use url::Url;

/// Anchor found on a page, resolved against the page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLink {
    /// Absolute target with the fragment removed.
    pub url: Url,
    /// The anchor carries `rel="nofollow"`.
    pub nofollow: bool,
}

/// Errors surfaced while scanning HTML.
#[derive(Debug, Error)]
pub enum HtmlError {
    /// The rewriter rejected the markup.
    #[error("html rewrite error: {0}")]
    Rewrite(#[from] lol_html::errors::RewritingError),
}

/// Collects up to `limit` anchors from `body` that pass `accept`, resolving
/// each `href` against `base` (or the document's `<base href>` when present).
/// Hrefs that do not resolve to http(s) URLs and links `accept` rejects are
/// dropped and do not count against `limit`.
pub fn extract_links<F>(
    body: &[u8],
    base: &Url,
    limit: usize,
    accept: F,
) -> Result<Vec<DiscoveredLink>, HtmlError>
where
    F: Fn(&DiscoveredLink) -> bool,
{
    if limit == 0 {
        return Ok(Vec::new());
    }

    let links = RefCell::new(Vec::new());
    let base = RefCell::new(base.clone());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("base[href]", |el| {
                    if let Some(href) = el.get_attribute("href") {
                        let joined = base.borrow().join(&href);
                        if let Ok(resolved) = joined {
                            *base.borrow_mut() = resolved;
                        }
                    }
                    Ok(())
                }),
                element!("a[href]", |el| {
                    let mut entries = links.borrow_mut();
                    if entries.len() >= limit {
                        return Ok(());
                    }
                    let Some(href) = el.get_attribute("href") else {
                        return Ok(());
                    };
                    let nofollow = el
                        .get_attribute("rel")
                        .map(|rel| {
                            rel.split_ascii_whitespace()
                                .any(|token| token.eq_ignore_ascii_case("nofollow"))
                        })
                        .unwrap_or(false);
                    if let Some(url) = resolve_href(&base.borrow(), &href) {
                        let link = DiscoveredLink { url, nofollow };
                        if accept(&link) {
                            entries.push(link);
                        }
                    }
                    Ok(())
                }),
            ],
            ..Settings::default()
        },
        NoopSink,
    );

    rewriter.write(body)?;
    rewriter.end()?;

    Ok(links.into_inner())
}

fn resolve_href(base: &Url, href: &str) -> Option<Url> {
    let mut url = base.join(href.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

struct NoopSink;

impl OutputSink for NoopSink {
    fn handle_chunk(&mut self, _chunk: &[u8]) {}
}
