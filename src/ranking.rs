//! Executes query plans against the store and shapes the result page.

use crate::document::{collection_for, ALL_DOCUMENT_COLLECTIONS};
use crate::planner::QueryPlan;
use crate::scoring::{create_description, MAX_DESCRIPTION_CHARS};
use crate::store::{BackendQuery, DocumentStore, Hit, SearchRequest, SearchResponse, StoreError};
use crate::vector::SimilarityQuery;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default cap on per-domain buckets requested from the backend.
pub const DEFAULT_MAX_BUCKETS: usize = 1000;

/// One displayed search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredResult {
    /// Page title, or its domain when the page has none.
    pub title: String,
    /// Highlighted or synthesized snippet, never empty.
    pub description: String,
    /// Page URL.
    pub url: String,
    /// Optional thumbnail reference.
    pub thumbnail: Option<String>,
    /// Backend score used for ordering; not sent to clients.
    #[serde(skip)]
    pub score: f64,
}

/// A page of results plus the total they were cut from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchPage {
    /// Matching results across all pages.
    pub total: u64,
    /// Results in `[offset, offset + limit)`.
    pub results: Vec<ScoredResult>,
}

/// Runs planned searches and deduplicates corpus-wide results per domain.
#[derive(Clone)]
pub struct RankingAggregator {
    store: Arc<dyn DocumentStore>,
    default_collection: String,
    max_buckets: usize,
}

impl RankingAggregator {
    /// Aggregator searching `web-<default_language>` for unscoped text.
    pub fn new(store: Arc<dyn DocumentStore>, default_language: &str, max_buckets: usize) -> Self {
        Self {
            store,
            default_collection: collection_for(default_language),
            max_buckets: max_buckets.max(1),
        }
    }

    /// Executes `plan` and returns results `[offset, offset + limit)`.
    ///
    /// Domain-scoped plans paginate in the backend. Unscoped text keeps the
    /// best hit of each domain, orders those by score (stable on ties) and
    /// paginates locally, so `total` counts domains, not pages.
    pub async fn execute(
        &self,
        plan: &QueryPlan,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, StoreError> {
        let (collection, query) = match plan {
            QueryPlan::Empty => return Ok(SearchPage::default()),
            QueryPlan::DomainAndExpression { domain, expression } => (
                ALL_DOCUMENT_COLLECTIONS.to_string(),
                BackendQuery::DomainExpression {
                    domain: domain.clone(),
                    expression: expression.clone(),
                },
            ),
            QueryPlan::DomainOnly { domain } => (
                ALL_DOCUMENT_COLLECTIONS.to_string(),
                BackendQuery::Domain {
                    domain: domain.clone(),
                },
            ),
            QueryPlan::ExpressionOnly { expression } => (
                self.default_collection.clone(),
                BackendQuery::PerDomainTop {
                    expression: expression.clone(),
                    buckets: self.max_buckets,
                },
            ),
        };
        tracing::debug!(?plan, %collection, offset, limit, "executing search");
        self.run(collection, query, offset, limit).await
    }

    /// Title match re-scored by vector similarity, deduplicated per domain.
    pub async fn execute_similarity(
        &self,
        query: &SimilarityQuery,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, StoreError> {
        let backend = BackendQuery::Similarity {
            expression: query.expression.clone(),
            field: query.space.field().to_string(),
            vector: query.vector.clone(),
            buckets: self.max_buckets,
        };
        self.run(self.default_collection.clone(), backend, offset, limit)
            .await
    }

    /// Pages whose titles contain every term of `expression`.
    pub async fn execute_title_terms(
        &self,
        expression: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, StoreError> {
        let backend = BackendQuery::TitleTerms {
            expression: expression.to_string(),
        };
        self.run(self.default_collection.clone(), backend, offset, limit)
            .await
    }

    async fn run(
        &self,
        collection: String,
        query: BackendQuery,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, StoreError> {
        let aggregated = query.is_aggregated();
        let request = SearchRequest {
            collection,
            query,
            from: offset,
            size: limit,
        };
        let response = self.store.search(&request).await?;
        Ok(if aggregated {
            per_domain_page(response, offset, limit)
        } else {
            SearchPage {
                total: response.total,
                results: response.hits.into_iter().map(format_hit).collect(),
            }
        })
    }
}

fn per_domain_page(response: SearchResponse, offset: usize, limit: usize) -> SearchPage {
    let mut candidates: Vec<ScoredResult> = response
        .buckets
        .into_iter()
        .flat_map(|bucket| bucket.top)
        .map(format_hit)
        .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    SearchPage {
        total: candidates.len() as u64,
        results: candidates.into_iter().skip(offset).take(limit).collect(),
    }
}

fn first_fragment(highlight: &BTreeMap<String, Vec<String>>, field: &str) -> Option<String> {
    highlight
        .get(field)
        .and_then(|fragments| fragments.first())
        .filter(|fragment| !fragment.is_empty())
        .map(|fragment| format!("{fragment}..."))
}

/// Display fields for a hit: highlighted snippet first, stored description
/// next, then text synthesized from the body.
pub fn format_hit(hit: Hit) -> ScoredResult {
    let doc = hit.source;
    let mut description = first_fragment(&hit.highlight, "description")
        .or_else(|| first_fragment(&hit.highlight, "body"))
        .unwrap_or(doc.description);
    if description.trim().is_empty() {
        description = fallback_description(&doc.body, &doc.url);
    }
    let title = if doc.title.trim().is_empty() {
        doc.domain
    } else {
        doc.title
    };
    ScoredResult {
        title,
        description,
        url: doc.url,
        thumbnail: doc.thumbnail,
        score: hit.score,
    }
}

fn fallback_description(body: &str, url: &str) -> String {
    if let Some(description) = create_description(body) {
        return format!("{description}...");
    }
    let head: String = body.trim().chars().take(MAX_DESCRIPTION_CHARS).collect();
    if head.is_empty() {
        url.to_string()
    } else {
        format!("{}...", head.trim_end())
    }
}
