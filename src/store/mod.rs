//! Search backend seam: the document store trait, the query shapes the core
//! sends to it, and the responses it gets back.

pub mod elastic;
pub mod memory;
pub mod templates;

use crate::document::{Document, DomainPatch, DomainRecord, IndexAck};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

pub use elastic::{ElasticConfig, ElasticStore};
pub use memory::MemoryStore;

/// Errors raised while talking to the search backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level failure.
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The backend answered with a payload we could not interpret.
    #[error("unexpected backend response: {0}")]
    Decode(String),
    /// The backend connection parameters are unusable.
    #[error("invalid backend configuration: {0}")]
    Config(String),
}

/// Backend query shapes, one per planned search strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendQuery {
    /// Free text restricted to one domain, ranked by relevance and weight.
    DomainExpression {
        /// Domain filter.
        domain: String,
        /// Free-text expression.
        expression: String,
    },
    /// Every page of one domain in backend default order.
    Domain {
        /// Domain filter.
        domain: String,
    },
    /// Free text across the corpus, keeping the best hit of each domain.
    PerDomainTop {
        /// Free-text expression.
        expression: String,
        /// Maximum number of domain buckets returned.
        buckets: usize,
    },
    /// Title match re-scored by vector similarity, keeping the best hit of
    /// each domain.
    Similarity {
        /// Free-text expression matched against titles.
        expression: String,
        /// Stored vector field compared against.
        field: String,
        /// Query embedding.
        vector: Vec<f32>,
        /// Maximum number of domain buckets returned.
        buckets: usize,
    },
    /// Every expression term must appear in the title.
    TitleTerms {
        /// Free-text expression.
        expression: String,
    },
}

impl BackendQuery {
    /// True for shapes answered through per-domain buckets instead of hits.
    pub fn is_aggregated(&self) -> bool {
        matches!(self, Self::PerDomainTop { .. } | Self::Similarity { .. })
    }
}

/// One search call against a collection (or collection pattern).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Collection name or wildcard pattern such as `web-*`.
    pub collection: String,
    /// Query shape.
    pub query: BackendQuery,
    /// Offset of the first hit (ignored by aggregated shapes).
    pub from: usize,
    /// Number of hits (ignored by aggregated shapes).
    pub size: usize,
}

/// A matching document with its backend score and highlight fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Backend relevance score.
    pub score: f64,
    /// Stored document.
    pub source: Document,
    /// Highlighted fragments keyed by field name.
    pub highlight: BTreeMap<String, Vec<String>>,
}

/// Aggregation bucket for one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainBucket {
    /// Domain key.
    pub domain: String,
    /// Matching documents in the domain.
    pub doc_count: u64,
    /// Best hits of the domain, at most one for the shapes used here.
    pub top: Vec<Hit>,
}

/// Backend answer to a [`SearchRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    /// Total matching documents reported by the backend.
    pub total: u64,
    /// Page of hits (empty for aggregated shapes).
    pub hits: Vec<Hit>,
    /// Per-domain buckets (empty for non-aggregated shapes).
    pub buckets: Vec<DomainBucket>,
}

/// The document store the core reads from and writes to.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Writes `document` keyed by its URL, replacing any previous version.
    async fn upsert_document(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<IndexAck, StoreError>;

    /// Merges `patch` into the domain registry and returns the stored record.
    async fn merge_domain(&self, patch: DomainPatch) -> Result<DomainRecord, StoreError>;

    /// Runs a search request.
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError>;

    /// Returns up to `limit` documents that have no value for `field`.
    async fn documents_missing_vector(
        &self,
        collection: &str,
        field: &str,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError>;

    /// Stores `vector` under `field` on the document keyed by `url`.
    async fn set_vector(
        &self,
        collection: &str,
        url: &str,
        field: &str,
        vector: &[f32],
    ) -> Result<(), StoreError>;
}
