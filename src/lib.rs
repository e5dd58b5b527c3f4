#![warn(missing_docs)]
//! Core library for the fastindex site crawler and search service.
//!
//! Pages are crawled in isolated jobs, scored and normalized, then stored in
//! per-language collections of an Elasticsearch-style backend. Searches run
//! through a small query planner and a ranking layer that keeps the best page
//! of each domain for corpus-wide text queries.

pub mod api;
pub mod controls;
pub mod crawl;
pub mod document;
pub mod embedder;
pub mod fetch;
pub mod html;
pub mod indexer;
pub mod language;
pub mod normalizer;
pub mod planner;
pub mod ranking;
pub mod robots;
pub mod scoring;
pub mod store;
pub mod vector;

pub use api::{router, ApiError, AppState};
pub use controls::{CrawlArgs, CrawlControls};
pub use crawl::{
    CrawlError, CrawlJob, CrawlMode, CrawlReport, CrawlSupervisor, Connector, ElasticConnector,
};
pub use document::{Document, DomainPatch, DomainRecord, IndexAck};
pub use fetch::{FetchError, FetchRequest, HttpFetcher, PageFetcher};
pub use indexer::{DocumentIndexer, IndexOutcome};
pub use normalizer::{FetchedPage, NormalizationConfig, NormalizeError, NormalizedPage, Normalizer};
pub use planner::{Query, QueryPlan};
pub use ranking::{RankingAggregator, ScoredResult, SearchPage};
pub use store::{DocumentStore, ElasticConfig, ElasticStore, MemoryStore, StoreError};
pub use vector::{SimilarityQuery, VectorSpace};
