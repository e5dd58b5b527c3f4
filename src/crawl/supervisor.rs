//! Blocking front door for crawl jobs.
//!
//! Each call spawns a dedicated OS thread that owns a fresh current-thread
//! runtime and `LocalSet`, builds its own collaborators, runs exactly one job
//! and reports back over a one-shot channel. Contexts are never reused.

use super::{CrawlEngine, CrawlError, CrawlJob, CrawlMode, CrawlReport, Collaborators, Connector};
use crate::controls::CrawlControls;
use crate::document::{DomainPatch, DomainRecord};
use crate::fetch::{self, MAX_RESOLVE_HOPS};
use crate::indexer::DocumentIndexer;
use crate::normalizer::{NormalizationConfig, Normalizer};
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::runtime::Builder;
use tokio::sync::oneshot;
use tokio::task::LocalSet;
use url::Url;

static CONTEXT_IDS: AtomicUsize = AtomicUsize::new(0);

/// Runs crawl jobs, one isolated context per call.
///
/// Every method blocks the calling thread until the job reports; call it
/// from a plain thread or a blocking task, never from async code.
#[derive(Clone)]
pub struct CrawlSupervisor {
    connector: Arc<dyn Connector>,
    controls: CrawlControls,
    normalization: NormalizationConfig,
}

impl CrawlSupervisor {
    /// Supervisor building each context's collaborators through `connector`.
    pub fn new(
        connector: Arc<dyn Connector>,
        controls: CrawlControls,
        normalization: NormalizationConfig,
    ) -> Self {
        Self {
            connector,
            controls,
            normalization,
        }
    }

    /// Indexes the page behind `url` after resolving its redirects.
    ///
    /// An unresolvable URL is not an error: it yields `Ok(None)`.
    pub fn index_page(&self, url: &str) -> Result<Option<CrawlReport>, CrawlError> {
        let raw = url.to_string();
        let controls = self.controls.clone();
        let normalization = self.normalization.clone();
        self.run_isolated(move |collaborators| async move {
            let Some(seed) = resolve_or_log(&collaborators, &raw).await else {
                return Ok(None);
            };
            let job = CrawlJob::new(seed, CrawlMode::SinglePage, MAX_RESOLVE_HOPS + 1);
            run_engine(job, controls, normalization, collaborators)
                .await
                .map(Some)
        })
    }

    /// Resolves `url`, records the crawl on its domain and indexes every
    /// reachable page of the resolved host.
    pub fn explore(&self, url: &str) -> Result<CrawlReport, CrawlError> {
        let raw = url.to_string();
        let controls = self.controls.clone();
        let normalization = self.normalization.clone();
        self.run_isolated(move |collaborators| async move {
            let seed = fetch::resolve(collaborators.fetcher.as_ref(), &raw)
                .await
                .map_err(|err| CrawlError::RedirectUnresolved {
                    url: raw.clone(),
                    reason: err.to_string(),
                })?;
            let record = collaborators
                .store
                .merge_domain(DomainPatch::crawled(&seed, Utc::now()))
                .await
                .map_err(context_failure)?;
            tracing::info!(domain = %record.domain, homepage = %record.homepage, "exploring site");
            let job = CrawlJob::new(seed, CrawlMode::Site, controls.page_budget());
            run_engine(job, controls, normalization, collaborators).await
        })
    }

    /// Resolves `url` and records `email` as the contact for its domain.
    ///
    /// An unresolvable URL yields `Ok(None)`.
    pub fn reference(&self, url: &str, email: &str) -> Result<Option<DomainRecord>, CrawlError> {
        let raw = url.to_string();
        let email = email.to_string();
        self.run_isolated(move |collaborators| async move {
            let Some(homepage) = resolve_or_log(&collaborators, &raw).await else {
                return Ok(None);
            };
            let record = collaborators
                .store
                .merge_domain(DomainPatch::referenced(&homepage, email))
                .await
                .map_err(context_failure)?;
            tracing::info!(domain = %record.domain, "site referenced");
            Ok(Some(record))
        })
    }

    fn run_isolated<T, F, Fut>(&self, job: F) -> Result<T, CrawlError>
    where
        T: Send + 'static,
        F: FnOnce(Collaborators) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, CrawlError>> + 'static,
    {
        let id = CONTEXT_IDS.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel::<Result<T, CrawlError>>();
        let connector = Arc::clone(&self.connector);
        let controls = self.controls.clone();

        let handle = thread::Builder::new()
            .name(format!("fastindex-crawl-{id}"))
            .spawn(move || {
                let outcome = (|| {
                    let rt = Builder::new_current_thread().enable_all().build()?;
                    let local = LocalSet::new();
                    let collaborators = connector.connect(&controls).map_err(context_failure)?;
                    rt.block_on(local.run_until(job(collaborators)))
                })();
                // The receiver only disappears if the supervisor thread died.
                let _ = tx.send(outcome);
            })?;

        let outcome = rx.blocking_recv().unwrap_or_else(|_| {
            Err(CrawlError::CrawlContextFailure(format!(
                "crawl context {id} exited without reporting"
            )))
        });
        if handle.join().is_err() {
            tracing::error!(context = id, "crawl context panicked");
        }
        if let Err(err) = &outcome {
            tracing::warn!(context = id, error = %err, "crawl job failed");
        }
        outcome
    }
}

async fn resolve_or_log(collaborators: &Collaborators, raw: &str) -> Option<Url> {
    match fetch::resolve(collaborators.fetcher.as_ref(), raw).await {
        Ok(url) => Some(url),
        Err(err) => {
            tracing::info!(url = raw, error = %err, "url unreachable, nothing to do");
            None
        }
    }
}

async fn run_engine(
    job: CrawlJob,
    controls: CrawlControls,
    normalization: NormalizationConfig,
    collaborators: Collaborators,
) -> Result<CrawlReport, CrawlError> {
    let indexer = DocumentIndexer::new(Normalizer::new(normalization), collaborators.store);
    CrawlEngine::new(job, controls, collaborators.fetcher, indexer)
        .run()
        .await
        .map_err(context_failure)
}

fn context_failure(err: impl std::fmt::Display) -> CrawlError {
    CrawlError::CrawlContextFailure(err.to_string())
}
