use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fastindex::crawl::{Collaborators, ConnectError};
use fastindex::document::{Document, DomainPatch, DomainRecord, IndexAck};
use fastindex::fetch::{FetchError, FetchRequest, PageFetcher};
use fastindex::store::{SearchRequest, SearchResponse};
use fastindex::{
    Connector, CrawlControls, CrawlError, CrawlSupervisor, DocumentStore, FetchedPage,
    MemoryStore, NormalizationConfig, StoreError,
};
use reqwest::header::{HeaderMap, HeaderValue, LOCATION};

#[derive(Default)]
struct StaticSite {
    pages: HashMap<String, (u16, Option<&'static str>, String)>,
}

impl StaticSite {
    fn page(mut self, url: &str, body: String) -> Self {
        self.pages.insert(url.into(), (200, None, body));
        self
    }

    fn redirect(mut self, url: &str, to: &'static str) -> Self {
        self.pages.insert(url.into(), (301, Some(to), String::new()));
        self
    }
}

#[async_trait]
impl PageFetcher for StaticSite {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
        if request.url.host_str() == Some("down.test") {
            return Err(FetchError::InvalidUrl(request.url.to_string()));
        }
        let (status, location, body) = self
            .pages
            .get(request.url.as_str())
            .cloned()
            .unwrap_or((404, None, String::new()));
        let mut headers = HeaderMap::new();
        if let Some(location) = location {
            headers.insert(LOCATION, HeaderValue::from_static(location));
        }
        Ok(FetchedPage::new(
            request.url.clone(),
            request.depth,
            status,
            headers,
            body.into_bytes(),
        ))
    }
}

struct Shared {
    store: Arc<dyn DocumentStore>,
    site: Arc<dyn PageFetcher>,
    connections: AtomicUsize,
}

impl Connector for Shared {
    fn connect(&self, _: &CrawlControls) -> Result<Collaborators, ConnectError> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Collaborators {
            store: self.store.clone(),
            fetcher: self.site.clone(),
        })
    }
}

/// Fetcher that panics inside the crawl context.
struct Exploding;

#[async_trait]
impl PageFetcher for Exploding {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
        panic!("fetcher blew up on {}", request.url);
    }
}

/// Store whose document writes always fail.
struct BrokenStore(MemoryStore);

#[async_trait]
impl DocumentStore for BrokenStore {
    async fn upsert_document(&self, _: &str, _: &Document) -> Result<IndexAck, StoreError> {
        Err(StoreError::Status {
            status: 503,
            body: "cluster unavailable".into(),
        })
    }

    async fn merge_domain(&self, patch: DomainPatch) -> Result<DomainRecord, StoreError> {
        self.0.merge_domain(patch).await
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError> {
        self.0.search(request).await
    }

    async fn documents_missing_vector(
        &self,
        collection: &str,
        field: &str,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        self.0.documents_missing_vector(collection, field, limit).await
    }

    async fn set_vector(
        &self,
        collection: &str,
        url: &str,
        field: &str,
        vector: &[f32],
    ) -> Result<(), StoreError> {
        self.0.set_vector(collection, url, field, vector).await
    }
}

fn html(title: &str, links: &str) -> String {
    format!(
        "<html lang=\"en\"><head><title>{title}</title></head><body>\
         <p>{title} is a page with enough words to build a proper description line.</p>\
         {links}</body></html>"
    )
}

fn site() -> StaticSite {
    StaticSite::default()
        .redirect("http://example.com/", "https://example.com/")
        .page(
            "https://example.com/",
            html("Home", r#"<a href="/recipes">Recipes</a><a href="https://other.test/">Out</a>"#),
        )
        .page("https://example.com/recipes", html("Recipes", r#"<a href="/">Home</a>"#))
        .page("https://other.test/", html("Other", ""))
}

fn supervisor(store: Arc<dyn DocumentStore>) -> (CrawlSupervisor, Arc<Shared>) {
    supervisor_with(store, Arc::new(site()))
}

fn supervisor_with(
    store: Arc<dyn DocumentStore>,
    site: Arc<dyn PageFetcher>,
) -> (CrawlSupervisor, Arc<Shared>) {
    let connector = Arc::new(Shared {
        store,
        site,
        connections: AtomicUsize::new(0),
    });
    let controls = CrawlControls::default().with_politeness_delay(Duration::ZERO);
    let supervisor = CrawlSupervisor::new(connector.clone(), controls, NormalizationConfig::default());
    (supervisor, connector)
}

#[test]
fn explore_indexes_the_resolved_host_and_records_the_crawl() {
    let store = Arc::new(MemoryStore::new());
    let (supervisor, connector) = supervisor(store.clone());

    let report = supervisor.explore("http://example.com/").unwrap();
    assert_eq!(report.seed, "https://example.com/");
    assert_eq!(report.pages_indexed, 2);
    assert_eq!(report.links_queued, 1);

    let mut urls: Vec<String> = store.documents("web-en").into_iter().map(|d| d.url).collect();
    urls.sort();
    assert_eq!(urls, ["https://example.com/", "https://example.com/recipes"]);

    let record = store.domain("example.com").unwrap();
    assert_eq!(record.homepage, "https://example.com/");
    assert!(record.last_crawl.is_some());
    assert_eq!(connector.connections.load(Ordering::SeqCst), 1);
}

#[test]
fn every_call_gets_a_fresh_context() {
    let store = Arc::new(MemoryStore::new());
    let (supervisor, connector) = supervisor(store.clone());
    supervisor.index_page("https://example.com/recipes").unwrap();
    supervisor.index_page("https://example.com/recipes").unwrap();
    supervisor.explore("https://example.com/").unwrap();
    assert_eq!(connector.connections.load(Ordering::SeqCst), 3);
    assert_eq!(store.documents("web-en").len(), 2);
}

#[test]
fn index_page_follows_the_seed_redirect_only() {
    let store = Arc::new(MemoryStore::new());
    let (supervisor, _) = supervisor(store.clone());
    let report = supervisor.index_page("http://example.com").unwrap().unwrap();
    assert_eq!(report.seed, "https://example.com/");
    assert_eq!(report.pages_indexed, 1);
    assert_eq!(report.links_queued, 0);
    assert!(store.domain("example.com").is_none());
}

#[test]
fn unresolvable_urls() {
    let store = Arc::new(MemoryStore::new());
    let (supervisor, _) = supervisor(store.clone());

    assert!(supervisor.index_page("https://down.test/").unwrap().is_none());
    assert!(supervisor.reference("https://down.test/", "owner@down.test").unwrap().is_none());
    match supervisor.explore("https://down.test/") {
        Err(CrawlError::RedirectUnresolved { url, .. }) => assert_eq!(url, "https://down.test/"),
        other => panic!("expected RedirectUnresolved, got {other:?}"),
    }
    assert!(store.documents("web-en").is_empty());
    assert!(store.domain("down.test").is_none());
}

#[test]
fn reference_keeps_the_crawl_timestamp() {
    let store = Arc::new(MemoryStore::new());
    let (supervisor, _) = supervisor(store.clone());
    supervisor.explore("https://example.com/").unwrap();
    let crawled = store.domain("example.com").unwrap().last_crawl;

    let record = supervisor
        .reference("http://example.com/", "owner@example.com")
        .unwrap()
        .unwrap();
    assert_eq!(record.email.as_deref(), Some("owner@example.com"));
    assert_eq!(record.homepage, "https://example.com/");
    assert_eq!(record.last_crawl, crawled);
    assert_eq!(store.domain("example.com").unwrap(), record);
}

#[test]
fn store_failure_surfaces_once_as_context_failure() {
    let store: Arc<dyn DocumentStore> = Arc::new(BrokenStore(MemoryStore::new()));
    let (supervisor, connector) = supervisor(store);

    let err = supervisor.explore("https://example.com/").unwrap_err();
    match err {
        CrawlError::CrawlContextFailure(message) => {
            assert!(message.contains("503"), "{message}");
            assert!(message.contains("cluster unavailable"), "{message}");
        }
        other => panic!("expected CrawlContextFailure, got {other:?}"),
    }
    assert_eq!(connector.connections.load(Ordering::SeqCst), 1);
}

#[test]
fn panicking_context_reports_one_failure() {
    let store = Arc::new(MemoryStore::new());
    let (supervisor, connector) = supervisor_with(store.clone(), Arc::new(Exploding));

    match supervisor.explore("https://example.com/") {
        Err(CrawlError::CrawlContextFailure(message)) => {
            assert!(message.contains("exited without reporting"), "{message}")
        }
        other => panic!("expected CrawlContextFailure, got {other:?}"),
    }
    assert_eq!(connector.connections.load(Ordering::SeqCst), 1);
    assert!(store.documents("web-en").is_empty());

    // The next call gets its own context and its own single failure.
    assert!(matches!(
        supervisor.index_page("https://example.com/recipes"),
        Err(CrawlError::CrawlContextFailure(_))
    ));
    assert_eq!(connector.connections.load(Ordering::SeqCst), 2);
}
