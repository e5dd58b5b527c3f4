//! Vector spaces, cosine similarity and the backfill job that embeds stored
//! page titles.

use crate::document::Document;
use crate::embedder::{EmbedError, Embedder};
use crate::store::{DocumentStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Titles longer than this are replaced by [`PLACEHOLDER_TITLE`] before embedding.
pub const MAX_TITLE_CHARS: usize = 200;
/// Text embedded for documents without a usable title.
pub const PLACEHOLDER_TITLE: &str = "N/A";

/// Embedding model families with a stored vector field each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VectorSpace {
    /// BERT sentence vectors, 768 dimensions.
    Bert,
    /// LASER sentence vectors, 1024 dimensions.
    Laser,
}

impl VectorSpace {
    /// Every supported space.
    pub const ALL: [VectorSpace; 2] = [VectorSpace::Bert, VectorSpace::Laser];

    /// Document field holding vectors of this space.
    pub fn field(self) -> &'static str {
        match self {
            Self::Bert => "bert_vector",
            Self::Laser => "laser_vector",
        }
    }

    /// Vector length of this space.
    pub fn dimensions(self) -> usize {
        match self {
            Self::Bert => 768,
            Self::Laser => 1024,
        }
    }

    /// `(field, dimensions)` pairs for collection mappings.
    pub fn mapping_fields() -> Vec<(&'static str, usize)> {
        Self::ALL
            .iter()
            .map(|space| (space.field(), space.dimensions()))
            .collect()
    }
}

/// Errors raised by vector operations.
#[derive(Debug, Error)]
pub enum VectorError {
    /// The backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The embedding service failed.
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// A vector does not fit its space.
    #[error("{field} expects {expected} dimensions, got {actual}")]
    Dimensions {
        /// Vector field.
        field: &'static str,
        /// Dimensions of the space.
        expected: usize,
        /// Dimensions received.
        actual: usize,
    },
    /// The blocking embedding task died.
    #[error("embedding task failed: {0}")]
    Task(String),
}

/// A lexical title match re-scored by similarity to `vector`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityQuery {
    /// Free text matched against titles.
    pub expression: String,
    /// Space of `vector`.
    pub space: VectorSpace,
    /// Query embedding.
    pub vector: Vec<f32>,
}

impl SimilarityQuery {
    /// Builds a query, checking the vector length against the space.
    pub fn new(
        expression: impl Into<String>,
        space: VectorSpace,
        vector: Vec<f32>,
    ) -> Result<Self, VectorError> {
        check_dimensions(space, &vector)?;
        Ok(Self {
            expression: expression.into(),
            space,
            vector,
        })
    }
}

fn check_dimensions(space: VectorSpace, vector: &[f32]) -> Result<(), VectorError> {
    if vector.len() != space.dimensions() {
        return Err(VectorError::Dimensions {
            field: space.field(),
            expected: space.dimensions(),
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Text embedded for a document title.
pub fn embedding_input(title: &str) -> &str {
    if title.trim().is_empty() || title.chars().count() > MAX_TITLE_CHARS {
        PLACEHOLDER_TITLE
    } else {
        title
    }
}

/// Cosine similarity in `[-1, 1]`; 0 for empty, zero-norm or mismatched vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Outcome of a [`backfill`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Documents that received a vector.
    pub embedded: usize,
    /// Pages of missing documents processed.
    pub rounds: usize,
}

/// Embeds the title of every document in `collection` that lacks a
/// `space` vector, `page_size` documents per backend round trip.
///
/// Stops when the backend reports no missing documents, or only ones this
/// run already updated (the backend may not have refreshed yet).
pub async fn backfill(
    store: &dyn DocumentStore,
    embedder: Arc<dyn Embedder>,
    collection: &str,
    space: VectorSpace,
    page_size: usize,
) -> Result<BackfillReport, VectorError> {
    let mut report = BackfillReport::default();
    let mut done: HashSet<String> = HashSet::new();
    loop {
        let pending: Vec<Document> = store
            .documents_missing_vector(collection, space.field(), page_size.max(1))
            .await?
            .into_iter()
            .filter(|doc| !done.contains(&doc.url))
            .collect();
        if pending.is_empty() {
            break;
        }
        report.rounds += 1;

        for chunk in pending.chunks(embedder.batch_size().max(1)) {
            let inputs: Vec<String> = chunk
                .iter()
                .map(|doc| embedding_input(&doc.title).to_string())
                .collect();
            let worker = Arc::clone(&embedder);
            let vectors = tokio::task::spawn_blocking(move || {
                let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
                worker.embed_batch(&refs)
            })
            .await
            .map_err(|err| VectorError::Task(err.to_string()))??;

            for (doc, vector) in chunk.iter().zip(vectors) {
                check_dimensions(space, &vector)?;
                store
                    .set_vector(collection, &doc.url, space.field(), &vector)
                    .await?;
                done.insert(doc.url.clone());
                report.embedded += 1;
            }
        }
        tracing::info!(
            collection,
            field = space.field(),
            embedded = report.embedded,
            round = report.rounds,
            "vector backfill progress"
        );
    }
    Ok(report)
}
