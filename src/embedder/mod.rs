//! Embedding model clients used by the offline vector tools.

pub mod http;

use clap::Args;
use std::time::Duration;
use thiserror::Error;

pub use http::HttpEmbedder;

/// Errors raised while computing embeddings.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The client could not be configured.
    #[error("invalid embedder configuration: {0}")]
    Config(String),
    /// Transport-level failure after retries.
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The service answered with a non-success status after retries.
    #[error("embedding service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The service answered with the wrong number or shape of vectors.
    #[error("unexpected embedding response: {0}")]
    Shape(String),
}

/// Turns short texts into dense vectors.
pub trait Embedder: Send + Sync {
    /// Largest number of inputs accepted by one [`Embedder::embed_batch`] call.
    fn batch_size(&self) -> usize;

    /// Embeds `inputs`, returning one vector per input in input order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Embedding service arguments shared by the offline vector tools.
#[derive(Args, Debug, Clone)]
pub struct EmbedderArgs {
    /// Optional bearer token for the embedding service
    #[arg(long, env = "FASTINDEX_EMBED_API_KEY", hide_env_values = true)]
    pub embed_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible embedding service
    #[arg(long, env = "FASTINDEX_EMBED_BASE", default_value = "http://localhost:8000/v1")]
    pub embed_base_url: String,

    /// Model identifier sent with every request
    #[arg(long, env = "FASTINDEX_EMBED_MODEL")]
    pub embed_model: Option<String>,

    /// Max titles per embedding request
    #[arg(long, env = "FASTINDEX_EMBED_BATCH", default_value_t = 32)]
    pub embed_batch_size: usize,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "FASTINDEX_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    pub embed_timeout_secs: u64,

    /// Number of attempts for rate limits or transient errors
    #[arg(long, env = "FASTINDEX_EMBED_MAX_RETRIES", default_value_t = 5)]
    pub embed_max_retries: usize,
}

impl EmbedderArgs {
    /// Builds an [`HttpEmbedder`] asking for `dimensions`-long vectors.
    ///
    /// Builds a blocking client; do not call from async code.
    pub fn build(&self, dimensions: usize) -> Result<HttpEmbedder, EmbedError> {
        HttpEmbedder::new(
            self.embed_api_key.clone(),
            &self.embed_base_url,
            self.embed_model.clone().unwrap_or_default(),
            Some(dimensions),
            Duration::from_secs(self.embed_timeout_secs.max(1)),
            self.embed_max_retries,
            self.embed_batch_size,
        )
    }
}
