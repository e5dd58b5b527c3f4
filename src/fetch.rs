//! Page transport: the fetch seam, its reqwest implementation and seed
//! resolution.

use crate::normalizer::FetchedPage;
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Statuses handed to the indexer instead of being followed by the transport.
pub const REDIRECT_STATUSES: [u16; 3] = [301, 302, 303];

/// Hops followed while resolving a seed before giving up.
pub const MAX_RESOLVE_HOPS: usize = 5;

// Resolution follows every redirect status, as a browser would.
const RESOLVE_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// A single page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Target URL.
    pub url: Url,
    /// Link distance from the crawl seed.
    pub depth: u8,
    /// Whether the transport may follow redirects on its own.
    pub follow_redirects: bool,
    /// Redirect statuses returned to the caller as pages.
    pub redirect_statuses: Vec<u16>,
}

impl FetchRequest {
    /// Request at depth 0 with transport redirects disabled.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            depth: 0,
            follow_redirects: false,
            redirect_statuses: REDIRECT_STATUSES.to_vec(),
        }
    }

    /// Request for a link discovered on a page fetched by `self`.
    pub fn child(&self, url: Url) -> Self {
        Self {
            url,
            depth: self.depth.saturating_add(1),
            follow_redirects: self.follow_redirects,
            redirect_statuses: self.redirect_statuses.clone(),
        }
    }

    /// Follow-up for a redirect: same depth, same allow-list, no transport redirects.
    pub fn redirect_to(&self, url: Url) -> Self {
        Self {
            url,
            depth: self.depth,
            follow_redirects: false,
            redirect_statuses: self.redirect_statuses.clone(),
        }
    }

    /// True when `status` is an allow-listed redirect.
    pub fn is_redirect_status(&self, status: u16) -> bool {
        self.redirect_statuses.contains(&status)
    }
}

/// Errors raised by the page transport.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure.
    #[error("fetch {url} failed: {source}")]
    Http {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The URL could not be parsed or has no host.
    #[error("invalid url {0}")]
    InvalidUrl(String),
    /// The server answered with a status the crawl does not handle.
    #[error("{url} answered {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// Resolution kept redirecting past the hop limit.
    #[error("{url} redirected more than {hops} times")]
    TooManyRedirects {
        /// Last URL reached.
        url: String,
        /// Hops followed.
        hops: usize,
    },
}

/// Fetches pages for the crawl engine.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches one page. Any HTTP status is returned as a page; transport
    /// failures are errors.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError>;
}

/// reqwest-backed [`PageFetcher`].
pub struct HttpFetcher {
    manual: Client,
    following: Client,
}

impl HttpFetcher {
    /// Builds the transport with the given user agent and per-fetch timeout.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let build = |policy: Policy| {
            Client::builder()
                .user_agent(user_agent)
                .redirect(policy)
                .timeout(timeout)
                .build()
                .map_err(|source| FetchError::Http {
                    url: String::new(),
                    source,
                })
        };
        Ok(Self {
            manual: build(Policy::none())?,
            following: build(Policy::limited(10))?,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.manual
        };
        let http_err = |source: reqwest::Error| FetchError::Http {
            url: request.url.to_string(),
            source,
        };
        let response = client
            .get(request.url.clone())
            .send()
            .await
            .map_err(http_err)?;
        let url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(http_err)?;
        Ok(FetchedPage::new(url, request.depth, status, headers, body.to_vec()))
    }
}

/// Parses a user-supplied URL, accepting only http(s) with a host.
pub fn parse_seed(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|_| FetchError::InvalidUrl(raw.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(FetchError::InvalidUrl(raw.to_string()));
    }
    Ok(url)
}

/// Follows redirects from `raw` to its final address.
///
/// Non-redirect statuses, errors included, end resolution at the current URL;
/// only transport failures, unusable URLs and redirect chains longer than
/// [`MAX_RESOLVE_HOPS`] leave the seed unresolved.
pub async fn resolve(fetcher: &dyn PageFetcher, raw: &str) -> Result<Url, FetchError> {
    let mut request = FetchRequest::new(parse_seed(raw)?);
    request.redirect_statuses = RESOLVE_STATUSES.to_vec();
    for hop in 0..=MAX_RESOLVE_HOPS {
        let page = fetcher.fetch(&request).await?;
        let next = page
            .location()
            .filter(|_| request.is_redirect_status(page.status))
            .and_then(|location| page.url.join(&location).ok());
        match next {
            Some(next) => {
                tracing::debug!(from = %page.url, to = %next, hop, "seed redirect");
                request = request.redirect_to(next);
            }
            None => return Ok(page.url),
        }
    }
    Err(FetchError::TooManyRedirects {
        url: request.url.to_string(),
        hops: MAX_RESOLVE_HOPS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, LOCATION};
    use std::collections::HashMap;

    struct Redirects(HashMap<String, String>);

    #[async_trait]
    impl PageFetcher for Redirects {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
            let mut headers = HeaderMap::new();
            let status = match self.0.get(request.url.as_str()) {
                Some(target) => {
                    headers.insert(LOCATION, HeaderValue::from_str(target).unwrap());
                    301
                }
                None => 200,
            };
            Ok(FetchedPage::new(request.url.clone(), request.depth, status, headers, Vec::new()))
        }
    }

    fn chain(pairs: &[(&str, &str)]) -> Redirects {
        Redirects(
            pairs
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn resolves_relative_redirects() {
        let fetcher = chain(&[
            ("http://example.com/", "https://example.com/"),
            ("https://example.com/", "/home"),
        ]);
        let resolved = resolve(&fetcher, "http://example.com").await.unwrap();
        assert_eq!(resolved.as_str(), "https://example.com/home");
    }

    #[tokio::test]
    async fn gives_up_on_redirect_loops() {
        let fetcher = chain(&[
            ("https://a.test/", "https://b.test/"),
            ("https://b.test/", "https://a.test/"),
        ]);
        let err = resolve(&fetcher, "https://a.test/").await.unwrap_err();
        assert!(matches!(err, FetchError::TooManyRedirects { hops: MAX_RESOLVE_HOPS, .. }));
    }

    #[tokio::test]
    async fn rejects_non_http_seeds() {
        let fetcher = chain(&[]);
        for raw in ["ftp://example.com/", "not a url", "mailto:me@example.com"] {
            assert!(matches!(
                resolve(&fetcher, raw).await,
                Err(FetchError::InvalidUrl(_))
            ));
        }
    }

    #[test]
    fn child_requests_keep_redirect_policy() {
        let seed = FetchRequest::new(Url::parse("https://example.com/").unwrap());
        let child = seed.child(Url::parse("https://example.com/a").unwrap());
        assert_eq!(child.depth, 1);
        assert!(!child.follow_redirects);
        assert!(child.is_redirect_status(302));
        assert!(!child.is_redirect_status(307));
    }
}
