use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fastindex::language::{self, DEFAULT_LANGUAGE};
use fastindex::ranking::DEFAULT_MAX_BUCKETS;
use fastindex::{
    router, AppState, CrawlArgs, CrawlSupervisor, ElasticConfig, ElasticConnector, ElasticStore,
    NormalizationConfig, RankingAggregator,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "fastindex-api",
    about = "HTTP front end for site crawling, indexing and per-domain search"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "FASTINDEX_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Language collection searched by queries without a `site:` operator.
    #[arg(long, env = "FASTINDEX_DEFAULT_LANGUAGE", default_value = DEFAULT_LANGUAGE)]
    default_language: String,

    /// Maximum per-domain buckets requested for corpus-wide queries.
    #[arg(long, env = "FASTINDEX_MAX_BUCKETS", default_value_t = DEFAULT_MAX_BUCKETS)]
    max_buckets: usize,

    /// Skip creating missing collections at startup.
    #[arg(long, default_value_t = false)]
    skip_setup: bool,

    #[command(flatten)]
    elastic: ElasticConfig,

    #[command(flatten)]
    crawl: CrawlArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = ApiCli::parse();
    anyhow::ensure!(
        language::is_supported(&cli.default_language),
        "unsupported default language {}",
        cli.default_language
    );

    let store = Arc::new(
        ElasticStore::connect(&cli.elastic)
            .with_context(|| format!("invalid backend configuration for {}", cli.elastic.url))?,
    );
    if !cli.skip_setup {
        store
            .ensure_collections(&cli.default_language)
            .await
            .context("failed to create collections")?;
    }

    let normalization = NormalizationConfig {
        default_language: cli.default_language.clone(),
        ..NormalizationConfig::default()
    };
    let supervisor = CrawlSupervisor::new(
        Arc::new(ElasticConnector::new(cli.elastic.clone())),
        cli.crawl.build_controls(),
        normalization,
    );
    let ranking = RankingAggregator::new(store, &cli.default_language, cli.max_buckets);
    let app = router(AppState::new(supervisor, ranking));

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    tracing::info!(%addr, backend = %cli.elastic.url, "fastindex-api listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}
