use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use fastindex::embedder::{Embedder, EmbedderArgs};
use fastindex::language::DEFAULT_LANGUAGE;
use fastindex::ranking::DEFAULT_MAX_BUCKETS;
use fastindex::{
    ElasticConfig, ElasticStore, RankingAggregator, SearchPage, SimilarityQuery, VectorSpace,
};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "fastindex-eval",
    about = "Run a query set against the index and report the top titles per query"
)]
struct EvalCli {
    /// Path to the evaluation JSONL file (one `{"query": ...}` per line).
    #[arg(long, env = "FASTINDEX_EVAL_DATA", default_value = "data/queries.jsonl")]
    cases: PathBuf,

    /// Retrieval strategy under evaluation.
    #[arg(long, value_enum, default_value = "term")]
    search_type: SearchType,

    /// Language collection searched.
    #[arg(long, env = "FASTINDEX_DEFAULT_LANGUAGE", default_value = DEFAULT_LANGUAGE)]
    language: String,

    /// Results kept per query.
    #[arg(long, default_value_t = 10)]
    top_k: usize,

    /// Maximum per-domain buckets requested for similarity queries.
    #[arg(long, env = "FASTINDEX_MAX_BUCKETS", default_value_t = DEFAULT_MAX_BUCKETS)]
    max_buckets: usize,

    /// Optional JSON report output path; stdout when absent.
    #[arg(long, env = "FASTINDEX_EVAL_REPORT")]
    report_json: Option<PathBuf>,

    #[command(flatten)]
    elastic: ElasticConfig,

    #[command(flatten)]
    embedder: EmbedderArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
enum SearchType {
    /// Every query term must appear in the title.
    Term,
    /// Title match re-scored by BERT vector similarity.
    Bert,
    /// Title match re-scored by LASER vector similarity.
    Laser,
}

impl SearchType {
    fn space(self) -> Option<VectorSpace> {
        match self {
            Self::Term => None,
            Self::Bert => Some(VectorSpace::Bert),
            Self::Laser => Some(VectorSpace::Laser),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct EvalCase {
    query: String,
    #[serde(default)]
    relevant_urls: Vec<String>,
}

struct PreparedCase {
    case: EvalCase,
    similarity: Option<SimilarityQuery>,
}

#[derive(Debug, Serialize)]
struct CaseReport {
    query: String,
    total: u64,
    titles: Vec<String>,
    urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    best_rank: Option<usize>,
    latency_ms: f64,
    #[serde(skip)]
    labeled: bool,
}

#[derive(Debug, Serialize)]
struct EvalSummary {
    total_cases: usize,
    labeled_cases: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    hit_rate: Option<f64>,
    avg_latency_ms: f64,
    top_k: usize,
}

#[derive(Debug, Serialize)]
struct EvalReport {
    search_type: SearchType,
    language: String,
    summary: EvalSummary,
    cases: Vec<CaseReport>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = EvalCli::parse();
    let cases = load_cases(&cli.cases)?;
    anyhow::ensure!(!cases.is_empty(), "evaluation file contains no cases");

    let prepared = match cli.search_type.space() {
        Some(space) => {
            let embedder = cli
                .embedder
                .build(space.dimensions())
                .context("failed to build embedding client")?;
            embed_cases(cases, &embedder, space)?
        }
        None => cases
            .into_iter()
            .map(|case| PreparedCase {
                case,
                similarity: None,
            })
            .collect(),
    };

    let store = Arc::new(
        ElasticStore::connect(&cli.elastic)
            .with_context(|| format!("invalid backend configuration for {}", cli.elastic.url))?,
    );
    let ranking = RankingAggregator::new(store, &cli.language, cli.max_buckets);
    let top_k = cli.top_k.max(1);
    let runtime = Runtime::new().context("failed to start tokio runtime")?;
    let case_reports = runtime.block_on(run_evaluation(&ranking, prepared, top_k))?;

    let report = EvalReport {
        search_type: cli.search_type,
        language: cli.language,
        summary: summarize(&case_reports, top_k),
        cases: case_reports,
    };
    render_summary(&report.summary);
    match cli.report_json {
        Some(path) => {
            write_report(&report, &path)?;
            eprintln!("wrote JSON report to {:?}", path);
        }
        None => {
            serde_json::to_writer_pretty(io::stdout().lock(), &report)
                .context("failed to write JSON report")?;
            println!();
        }
    }
    Ok(())
}

fn load_cases(path: &Path) -> Result<Vec<EvalCase>> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let mut cases = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read evaluation line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let case: EvalCase = serde_json::from_str(&line)
            .with_context(|| format!("invalid evaluation record at line {}", idx + 1))?;
        cases.push(case);
    }
    Ok(cases)
}

fn embed_cases(
    cases: Vec<EvalCase>,
    embedder: &dyn Embedder,
    space: VectorSpace,
) -> Result<Vec<PreparedCase>> {
    let mut prepared = Vec::with_capacity(cases.len());
    for chunk in cases.chunks(embedder.batch_size().max(1)) {
        let inputs: Vec<&str> = chunk.iter().map(|case| case.query.as_str()).collect();
        let embeddings = embedder.embed_batch(&inputs)?;
        anyhow::ensure!(
            embeddings.len() == inputs.len(),
            "embedding batch returned mismatched length"
        );
        for (case, embedding) in chunk.iter().cloned().zip(embeddings) {
            let similarity = SimilarityQuery::new(case.query.clone(), space, embedding)?;
            prepared.push(PreparedCase {
                case,
                similarity: Some(similarity),
            });
        }
    }
    Ok(prepared)
}

async fn run_evaluation(
    ranking: &RankingAggregator,
    prepared: Vec<PreparedCase>,
    top_k: usize,
) -> Result<Vec<CaseReport>> {
    let total = prepared.len();
    let mut reports = Vec::with_capacity(total);
    for (idx, PreparedCase { case, similarity }) in prepared.into_iter().enumerate() {
        let started = Instant::now();
        let page = match &similarity {
            Some(query) => ranking.execute_similarity(query, 0, top_k).await,
            None => ranking.execute_title_terms(&case.query, 0, top_k).await,
        }
        .with_context(|| format!("search failed for {:?}", case.query))?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        reports.push(case_report(case, page, latency_ms));
        render_eval_progress(idx + 1, total);
    }
    if total > 0 {
        eprintln!();
    }
    Ok(reports)
}

fn case_report(case: EvalCase, page: SearchPage, latency_ms: f64) -> CaseReport {
    let best_rank = page
        .results
        .iter()
        .position(|result| case.relevant_urls.iter().any(|url| url == &result.url))
        .map(|idx| idx + 1);
    CaseReport {
        query: case.query,
        total: page.total,
        titles: page.results.iter().map(|result| result.title.clone()).collect(),
        urls: page.results.into_iter().map(|result| result.url).collect(),
        best_rank,
        latency_ms,
        labeled: !case.relevant_urls.is_empty(),
    }
}

fn summarize(cases: &[CaseReport], top_k: usize) -> EvalSummary {
    let total_cases = cases.len();
    let labeled: Vec<&CaseReport> = cases.iter().filter(|case| case.labeled).collect();
    let hits = labeled.iter().filter(|case| case.best_rank.is_some()).count();
    let avg_latency_ms = if total_cases == 0 {
        0.0
    } else {
        cases.iter().map(|case| case.latency_ms).sum::<f64>() / total_cases as f64
    };
    EvalSummary {
        total_cases,
        labeled_cases: labeled.len(),
        hit_rate: (!labeled.is_empty()).then(|| hits as f64 / labeled.len() as f64),
        avg_latency_ms,
        top_k,
    }
}

fn render_summary(summary: &EvalSummary) {
    eprintln!("--- Relevance Evaluation Summary ---");
    eprintln!("cases: {}", summary.total_cases);
    eprintln!("top_k: {}", summary.top_k);
    match summary.hit_rate {
        Some(rate) => eprintln!("hit rate: {:.3} over {} labeled", rate, summary.labeled_cases),
        None => eprintln!("hit rate: n/a"),
    }
    eprintln!("avg search latency (ms): {:.2}", summary.avg_latency_ms);
}

fn write_report(report: &EvalReport, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    serde_json::to_writer_pretty(file, report).context("failed to write JSON report")?;
    Ok(())
}

fn render_eval_progress(done: usize, total: usize) {
    if total == 0 {
        return;
    }
    let pct = (done as f64 / total as f64) * 100.0;
    eprint!("\rEvaluating {done}/{total} ({pct:.1}%)");
    let _ = io::stderr().flush();
}
