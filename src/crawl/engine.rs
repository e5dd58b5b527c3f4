//! Sequential, single-site crawl loop.

use super::{CrawlJob, CrawlMode, CrawlReport};
use crate::controls::CrawlControls;
use crate::document::domain_of;
use crate::fetch::{FetchError, FetchRequest, PageFetcher};
use crate::html::{extract_links, DiscoveredLink};
use crate::indexer::{DocumentIndexer, IndexOutcome};
use crate::normalizer::FetchedPage;
use crate::robots::{robots_url, RobotsPolicy};
use crate::store::StoreError;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::time::sleep;
use url::Url;

// Binary payloads never worth fetching.
const IGNORED_EXTENSIONS: &[&str] = &[
    "7z", "avi", "bin", "css", "dmg", "doc", "docx", "exe", "gif", "gz", "ico", "iso", "jpeg",
    "jpg", "js", "mov", "mp3", "mp4", "pdf", "png", "ppt", "pptx", "rar", "svg", "tar", "tgz",
    "ttf", "wav", "webm", "webp", "woff", "woff2", "xls", "xlsx", "zip",
];

/// One crawl: a FIFO frontier over the job's host, fed through the indexer.
///
/// Per-page fetch failures are counted and skipped. Store failures end the
/// crawl with an error.
pub struct CrawlEngine {
    job: CrawlJob,
    controls: CrawlControls,
    fetcher: Arc<dyn PageFetcher>,
    indexer: DocumentIndexer,
}

struct Frontier {
    queue: VecDeque<FetchRequest>,
    seen: HashSet<String>,
}

impl Frontier {
    fn new(seed: FetchRequest) -> Self {
        let mut frontier = Self {
            queue: VecDeque::new(),
            seen: HashSet::new(),
        };
        frontier.seen.insert(seed.url.to_string());
        frontier.queue.push_back(seed);
        frontier
    }

    fn push_back(&mut self, request: FetchRequest) -> bool {
        if !self.seen.insert(request.url.to_string()) {
            return false;
        }
        self.queue.push_back(request);
        true
    }

    fn push_front(&mut self, request: FetchRequest) -> bool {
        if !self.seen.insert(request.url.to_string()) {
            return false;
        }
        self.queue.push_front(request);
        true
    }
}

impl CrawlEngine {
    /// Engine for `job`, fetching through `fetcher` and writing through `indexer`.
    pub fn new(
        job: CrawlJob,
        controls: CrawlControls,
        fetcher: Arc<dyn PageFetcher>,
        indexer: DocumentIndexer,
    ) -> Self {
        Self {
            job,
            controls,
            fetcher,
            indexer,
        }
    }

    /// Runs until the page budget is spent or the frontier is empty.
    pub async fn run(self) -> Result<CrawlReport, StoreError> {
        let mut report = CrawlReport {
            seed: self.job.seed.to_string(),
            ..CrawlReport::default()
        };
        let robots = self.load_robots().await;
        let mut seed = self.job.seed.clone();
        seed.set_fragment(None);
        let mut frontier = Frontier::new(FetchRequest::new(seed));

        tracing::info!(
            seed = %self.job.seed,
            mode = ?self.job.mode,
            budget = self.job.page_budget,
            "crawl started"
        );

        while let Some(request) = frontier.queue.pop_front() {
            if report.pages_fetched >= self.job.page_budget {
                tracing::debug!(budget = self.job.page_budget, "page budget reached");
                break;
            }
            if !robots.allows(&request.url) {
                tracing::debug!(url = %request.url, "blocked by robots.txt");
                report.robots_blocked += 1;
                continue;
            }
            let delay = self.controls.politeness_delay();
            if report.pages_fetched > 0 && !delay.is_zero() {
                sleep(delay).await;
            }

            let page = match self.fetcher.fetch(&request).await {
                Ok(page) => page,
                Err(err) => {
                    tracing::warn!(url = %request.url, error = %err, "fetch failed");
                    report.fetch_errors += 1;
                    continue;
                }
            };
            report.pages_fetched += 1;
            tracing::debug!(url = %page.url, status = page.status, depth = request.depth, "fetched");

            if !(200..300).contains(&page.status) && !request.is_redirect_status(page.status) {
                let err = FetchError::Status {
                    url: page.url.to_string(),
                    status: page.status,
                };
                tracing::warn!(error = %err, "unusable response");
                report.fetch_errors += 1;
                continue;
            }

            match self.indexer.index_response(&request, &page).await? {
                IndexOutcome::Redirect(next) => {
                    if self.redirect_in_scope(&next.url) && frontier.push_front(next) {
                        report.redirects_followed += 1;
                    }
                    continue;
                }
                IndexOutcome::Indexed(_) => report.pages_indexed += 1,
                IndexOutcome::Skipped(_) => report.pages_skipped += 1,
            }

            if self.job.mode == CrawlMode::Site {
                report.links_queued += self.enqueue_links(&request, &page, &mut frontier);
            }
        }

        tracing::info!(
            seed = %report.seed,
            fetched = report.pages_fetched,
            indexed = report.pages_indexed,
            skipped = report.pages_skipped,
            errors = report.fetch_errors,
            "crawl finished"
        );
        Ok(report)
    }

    async fn load_robots(&self) -> RobotsPolicy {
        if self.job.mode != CrawlMode::Site || !self.controls.obey_robots() {
            return RobotsPolicy::allow_all();
        }
        let Some(url) = robots_url(&self.job.seed) else {
            return RobotsPolicy::allow_all();
        };
        let mut request = FetchRequest::new(url);
        request.follow_redirects = true;
        match self.fetcher.fetch(&request).await {
            Ok(page) if (200..300).contains(&page.status) => {
                RobotsPolicy::parse(&String::from_utf8_lossy(&page.body), self.controls.user_agent())
            }
            Ok(page) => {
                tracing::debug!(url = %request.url, status = page.status, "no robots.txt");
                RobotsPolicy::allow_all()
            }
            Err(err) => {
                tracing::warn!(url = %request.url, error = %err, "robots.txt unavailable");
                RobotsPolicy::allow_all()
            }
        }
    }

    fn redirect_in_scope(&self, url: &Url) -> bool {
        match self.job.mode {
            CrawlMode::SinglePage => true,
            CrawlMode::Site => domain_of(url) == self.job.allowed_domain,
        }
    }

    fn enqueue_links(
        &self,
        request: &FetchRequest,
        page: &FetchedPage,
        frontier: &mut Frontier,
    ) -> usize {
        if page
            .content_type()
            .is_some_and(|content_type| !content_type.to_ascii_lowercase().contains("html"))
        {
            return 0;
        }
        let queueable = |link: &DiscoveredLink| {
            !link.nofollow
                && domain_of(&link.url) == self.job.allowed_domain
                && !has_ignored_extension(&link.url)
        };
        let links = match extract_links(
            &page.body,
            &page.url,
            self.controls.max_links_per_page(),
            queueable,
        ) {
            Ok(links) => links,
            Err(err) => {
                tracing::warn!(url = %page.url, error = %err, "link extraction failed");
                return 0;
            }
        };
        let mut queued = 0;
        for link in links {
            if frontier.push_back(request.child(link.url)) {
                queued += 1;
            }
        }
        queued
    }
}

fn has_ignored_extension(url: &Url) -> bool {
    url.path()
        .rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .is_some_and(|(_, ext)| IGNORED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}
