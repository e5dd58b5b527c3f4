//! In-process [`DocumentStore`] with the same query semantics as the
//! Elasticsearch templates, used by tests and local runs.

use super::{
    templates::SIMILARITY_BIAS, BackendQuery, DocumentStore, DomainBucket, Hit, SearchRequest,
    SearchResponse, StoreError,
};
use crate::document::{Document, DomainPatch, DomainRecord, IndexAck};
use crate::vector::cosine;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};

const FRAGMENT_WORDS: usize = 20;

/// Document collections and domain registry held in memory.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Vec<Document>>>,
    domains: RwLock<BTreeMap<String, DomainRecord>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a collection in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Stored registry record for `domain`.
    pub fn domain(&self, domain: &str) -> Option<DomainRecord> {
        self.domains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(domain)
            .cloned()
    }

    /// Names of the collections holding at least one document.
    pub fn collection_names(&self) -> Vec<String> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn matching_documents(&self, pattern: &str) -> Vec<Document> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections
            .iter()
            .filter(|(name, _)| matches_pattern(pattern, name))
            .flat_map(|(_, docs)| docs.iter().cloned())
            .collect()
    }
}

fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert_document(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<IndexAck, StoreError> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let docs = collections.entry(collection.to_string()).or_default();
        let replaced = match docs.iter_mut().find(|doc| doc.url == document.url) {
            Some(existing) => {
                *existing = document.clone();
                true
            }
            None => {
                docs.push(document.clone());
                false
            }
        };
        Ok(IndexAck {
            collection: collection.to_string(),
            url: document.url.clone(),
            replaced,
        })
    }

    async fn merge_domain(&self, patch: DomainPatch) -> Result<DomainRecord, StoreError> {
        let mut domains = self.domains.write().unwrap_or_else(PoisonError::into_inner);
        let key = patch.domain.clone();
        let merged = patch.apply(domains.remove(&key));
        domains.insert(key, merged.clone());
        Ok(merged)
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError> {
        let docs = self.matching_documents(&request.collection);
        let hits: Vec<Hit> = match &request.query {
            BackendQuery::DomainExpression { domain, expression } => {
                let terms = tokens(expression);
                docs.into_iter()
                    .filter(|doc| &doc.domain == domain)
                    .filter_map(|doc| text_hit(doc, &terms, true))
                    .collect()
            }
            BackendQuery::Domain { domain } => docs
                .into_iter()
                .filter(|doc| &doc.domain == domain)
                .map(|doc| Hit {
                    score: 1.0,
                    source: doc,
                    highlight: BTreeMap::new(),
                })
                .collect(),
            BackendQuery::PerDomainTop { expression, .. } => {
                let terms = tokens(expression);
                docs.into_iter()
                    .filter_map(|doc| text_hit(doc, &terms, true))
                    .collect()
            }
            BackendQuery::Similarity {
                expression,
                field,
                vector,
                ..
            } => {
                let terms = tokens(expression);
                docs.into_iter()
                    .filter_map(|doc| similarity_hit(doc, &terms, field, vector))
                    .collect()
            }
            BackendQuery::TitleTerms { expression } => {
                let terms = tokens(expression);
                docs.into_iter()
                    .filter(|doc| {
                        let title: HashSet<String> = tokens(&doc.title).into_iter().collect();
                        !terms.is_empty() && terms.iter().all(|term| title.contains(term))
                    })
                    .map(|doc| Hit {
                        score: 1.0,
                        source: doc,
                        highlight: BTreeMap::new(),
                    })
                    .collect()
            }
        };

        let mut hits = hits;
        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        let total = hits.len() as u64;

        match &request.query {
            BackendQuery::PerDomainTop { buckets, .. } | BackendQuery::Similarity { buckets, .. } => {
                Ok(SearchResponse {
                    total,
                    hits: Vec::new(),
                    buckets: bucketize(hits, (*buckets).max(1)),
                })
            }
            _ => Ok(SearchResponse {
                total,
                hits: hits.into_iter().skip(request.from).take(request.size).collect(),
                buckets: Vec::new(),
            }),
        }
    }

    async fn documents_missing_vector(
        &self,
        collection: &str,
        field: &str,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .matching_documents(collection)
            .into_iter()
            .filter(|doc| !doc.vectors.contains_key(field))
            .take(limit)
            .collect())
    }

    async fn set_vector(
        &self,
        collection: &str,
        url: &str,
        field: &str,
        vector: &[f32],
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|doc| doc.url == url))
            .ok_or_else(|| StoreError::Status {
                status: 404,
                body: format!("document {url} not found in {collection}"),
            })?;
        doc.vectors.insert(field.to_string(), vector.to_vec());
        Ok(())
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn field_score(field: &str, terms: &[String]) -> f64 {
    let present: HashSet<String> = tokens(field).into_iter().collect();
    terms.iter().filter(|term| present.contains(*term)).count() as f64
}

fn text_hit(doc: Document, terms: &[String], weighted: bool) -> Option<Hit> {
    let relevance = 3.0 * field_score(&doc.title, terms)
        + 2.0 * field_score(&doc.description, terms)
        + field_score(&doc.body, terms);
    if relevance == 0.0 {
        return None;
    }
    let boost = if weighted {
        (2.0 + doc.weight as f64).max(1.0).log10()
    } else {
        0.0
    };
    let mut highlight = BTreeMap::new();
    for (name, text) in [("description", &doc.description), ("body", &doc.body)] {
        if let Some(fragment) = highlight_fragment(text, terms) {
            highlight.insert(name.to_string(), vec![fragment]);
        }
    }
    Some(Hit {
        score: relevance + boost,
        source: doc,
        highlight,
    })
}

fn similarity_hit(doc: Document, terms: &[String], field: &str, vector: &[f32]) -> Option<Hit> {
    if field_score(&doc.title, terms) == 0.0 {
        return None;
    }
    let stored = doc.vectors.get(field)?;
    let score = cosine(stored, vector) + SIMILARITY_BIAS;
    let mut highlight = BTreeMap::new();
    for (name, text) in [("description", &doc.description), ("body", &doc.body)] {
        if let Some(fragment) = highlight_fragment(text, terms) {
            highlight.insert(name.to_string(), vec![fragment]);
        }
    }
    Some(Hit {
        score,
        source: doc,
        highlight,
    })
}

fn highlight_fragment(text: &str, terms: &[String]) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let is_match = |word: &str| tokens(word).iter().any(|token| terms.contains(token));
    let first = words.iter().position(|word| is_match(word))?;
    let start = first.saturating_sub(FRAGMENT_WORDS / 4);
    let end = (start + FRAGMENT_WORDS).min(words.len());
    let fragment = words[start..end]
        .iter()
        .map(|word| {
            if is_match(word) {
                format!("<em>{word}</em>")
            } else {
                (*word).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    Some(fragment)
}

fn bucketize(hits: Vec<Hit>, cap: usize) -> Vec<DomainBucket> {
    let mut buckets: Vec<DomainBucket> = Vec::new();
    for hit in hits {
        match buckets.iter_mut().find(|bucket| bucket.domain == hit.source.domain) {
            Some(bucket) => bucket.doc_count += 1,
            None => buckets.push(DomainBucket {
                domain: hit.source.domain.clone(),
                doc_count: 1,
                top: vec![hit],
            }),
        }
    }
    buckets.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then_with(|| a.domain.cmp(&b.domain)));
    buckets.truncate(cap);
    buckets
}
