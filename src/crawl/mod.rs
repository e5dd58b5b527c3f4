//! Crawl jobs: the bounded engine and the supervisor that runs each job in
//! its own execution context.

pub mod engine;
pub mod supervisor;

use crate::controls::CrawlControls;
use crate::fetch::{FetchError, HttpFetcher, PageFetcher};
use crate::store::{DocumentStore, ElasticConfig, ElasticStore, StoreError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

pub use engine::CrawlEngine;
pub use supervisor::CrawlSupervisor;

/// How far a job may wander from its seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    /// Only the seed and its redirect hops.
    SinglePage,
    /// Every reachable page on the seed's host, up to the page budget.
    Site,
}

/// Parameters of one crawl job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlJob {
    /// Resolved seed URL.
    pub seed: Url,
    /// Host every followed link must match.
    pub allowed_domain: String,
    /// Maximum pages fetched.
    pub page_budget: usize,
    /// Crawl extent.
    pub mode: CrawlMode,
}

impl CrawlJob {
    /// Job confined to the host of `seed`.
    pub fn new(seed: Url, mode: CrawlMode, page_budget: usize) -> Self {
        Self {
            allowed_domain: crate::document::domain_of(&seed),
            seed,
            page_budget: page_budget.max(1),
            mode,
        }
    }
}

/// Counters reported by a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    /// Resolved seed URL.
    pub seed: String,
    /// Responses received, redirects included.
    pub pages_fetched: usize,
    /// Pages written to the store.
    pub pages_indexed: usize,
    /// Pages rejected by the normalizer.
    pub pages_skipped: usize,
    /// Redirect follow-ups queued.
    pub redirects_followed: usize,
    /// Fetches that failed or answered an unusable status.
    pub fetch_errors: usize,
    /// URLs refused by robots.txt.
    pub robots_blocked: usize,
    /// New same-host URLs queued from page links.
    pub links_queued: usize,
}

/// Terminal failures of a crawl job.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The seed URL could not be resolved to a final address.
    #[error("could not resolve {url}: {reason}")]
    RedirectUnresolved {
        /// URL as supplied by the caller.
        url: String,
        /// Why resolution failed.
        reason: String,
    },
    /// The isolated crawl context failed; the message is the original error.
    #[error("crawl failed: {0}")]
    CrawlContextFailure(String),
    /// The isolated crawl context could not be started.
    #[error("could not start crawl context: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors raised while building a context's collaborators.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The store client could not be built.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The page transport could not be built.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Store and transport owned by one crawl context.
pub struct Collaborators {
    /// Document and domain store.
    pub store: Arc<dyn DocumentStore>,
    /// Page transport.
    pub fetcher: Arc<dyn PageFetcher>,
}

/// Builds fresh collaborators inside each crawl context, so no client
/// crosses from one runtime to another.
pub trait Connector: Send + Sync {
    /// Creates the store and transport for one context.
    fn connect(&self, controls: &CrawlControls) -> Result<Collaborators, ConnectError>;
}

/// Connector for the Elasticsearch backend and the reqwest transport.
#[derive(Debug, Clone)]
pub struct ElasticConnector {
    config: ElasticConfig,
}

impl ElasticConnector {
    /// Connector using `config` for every context.
    pub fn new(config: ElasticConfig) -> Self {
        Self { config }
    }
}

impl Connector for ElasticConnector {
    fn connect(&self, controls: &CrawlControls) -> Result<Collaborators, ConnectError> {
        let store = ElasticStore::connect(&self.config)?;
        let fetcher = HttpFetcher::new(controls.user_agent(), controls.fetch_timeout())?;
        Ok(Collaborators {
            store: Arc::new(store),
            fetcher: Arc::new(fetcher),
        })
    }
}
