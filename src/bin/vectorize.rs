use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fastindex::document::collection_for;
use fastindex::embedder::{Embedder, EmbedderArgs};
use fastindex::language::DEFAULT_LANGUAGE;
use fastindex::vector::{self, VectorSpace};
use fastindex::{ElasticConfig, ElasticStore};
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "fastindex-vectorize",
    about = "Embed the titles of stored pages that have no vector yet"
)]
struct VectorizeCli {
    /// Vector space to fill.
    #[arg(long, value_enum, env = "FASTINDEX_VECTOR_SPACE", default_value = "bert")]
    space: VectorSpace,

    /// Language of the document collection to process.
    #[arg(long, env = "FASTINDEX_VECTORIZE_LANGUAGE", default_value = DEFAULT_LANGUAGE)]
    language: String,

    /// Documents fetched from the backend per round.
    #[arg(long, env = "FASTINDEX_VECTORIZE_PAGE_SIZE", default_value_t = 200)]
    page_size: usize,

    #[command(flatten)]
    elastic: ElasticConfig,

    #[command(flatten)]
    embedder: EmbedderArgs,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = VectorizeCli::parse();
    let embedder: Arc<dyn Embedder> = Arc::new(
        cli.embedder
            .build(cli.space.dimensions())
            .context("failed to build embedding client")?,
    );
    let store = ElasticStore::connect(&cli.elastic)
        .with_context(|| format!("invalid backend configuration for {}", cli.elastic.url))?;
    let collection = collection_for(&cli.language);

    let runtime = Runtime::new().context("failed to start tokio runtime")?;
    let report = runtime.block_on(vector::backfill(
        &store,
        Arc::clone(&embedder),
        &collection,
        cli.space,
        cli.page_size,
    ))?;
    tracing::info!(
        collection = %collection,
        space = ?cli.space,
        embedded = report.embedded,
        rounds = report.rounds,
        "vectorization finished"
    );
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
