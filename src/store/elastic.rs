//! Elasticsearch REST client implementing [`DocumentStore`].

use super::{templates, DocumentStore, DomainBucket, Hit, SearchRequest, SearchResponse, StoreError};
use crate::document::{collection_for, Document, DomainPatch, DomainRecord, IndexAck, DOMAIN_COLLECTION};
use crate::vector::VectorSpace;
use async_trait::async_trait;
use clap::Args;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Connection parameters for the search backend.
#[derive(Args, Debug, Clone)]
pub struct ElasticConfig {
    /// Base URL of the Elasticsearch cluster
    #[arg(long = "es-url", env = "FASTINDEX_ES_URL", default_value = "http://localhost:9200")]
    pub url: String,

    /// Basic-auth user name
    #[arg(long = "es-username", env = "FASTINDEX_ES_USERNAME")]
    pub username: Option<String>,

    /// Basic-auth password
    #[arg(long = "es-password", env = "FASTINDEX_ES_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Seconds before a backend request times out
    #[arg(long = "es-timeout-secs", env = "FASTINDEX_ES_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

impl ElasticConfig {
    /// Config pointing at `url` without credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

/// Thin async client over the Elasticsearch document, update and search APIs.
///
/// The first upsert into a `web-<lang>` collection creates it with the
/// language's analyzer and the vector fields, so no collection is ever left
/// to dynamic mapping.
#[derive(Clone)]
pub struct ElasticStore {
    client: Client,
    base: Url,
    username: Option<String>,
    password: Option<String>,
    vector_dims: Vec<(&'static str, usize)>,
    created: Arc<Mutex<HashSet<String>>>,
}

impl ElasticStore {
    /// Builds a client for the configured cluster.
    pub fn connect(config: &ElasticConfig) -> Result<Self, StoreError> {
        let base = Url::parse(&config.url)
            .map_err(|err| StoreError::Config(format!("{}: {err}", config.url)))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Config(format!("{} is not a base URL", config.url)));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            base,
            username: config.username.clone(),
            password: config.password.clone(),
            vector_dims: VectorSpace::mapping_fields(),
            created: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Creates the domain registry and the document collection for
    /// `language`, leaving existing collections untouched.
    pub async fn ensure_collections(&self, language: &str) -> Result<(), StoreError> {
        self.create_collection(DOMAIN_COLLECTION, templates::domain_collection())
            .await?;
        self.ensure_document_collection(&collection_for(language))
            .await
    }

    async fn ensure_document_collection(&self, collection: &str) -> Result<(), StoreError> {
        let Some(language) = collection
            .strip_prefix(DOMAIN_COLLECTION)
            .and_then(|rest| rest.strip_prefix('-'))
        else {
            return Ok(());
        };
        let known = self
            .created
            .lock()
            .map(|created| created.contains(collection))
            .unwrap_or(false);
        if known {
            return Ok(());
        }
        self.create_collection(
            collection,
            templates::document_collection(language, &self.vector_dims),
        )
        .await?;
        if let Ok(mut created) = self.created.lock() {
            created.insert(collection.to_string());
        }
        Ok(())
    }

    async fn create_collection(&self, name: &str, body: Value) -> Result<(), StoreError> {
        let response = self
            .request(reqwest::Method::PUT, &[name])?
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::BAD_REQUEST {
            let text = response.text().await.unwrap_or_default();
            if text.contains("resource_already_exists_exception") {
                tracing::debug!(collection = name, "collection already exists");
                return Ok(());
            }
            return Err(StoreError::Status { status: 400, body: text });
        }
        check(response).await?;
        tracing::info!(collection = name, "created collection");
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Config(format!("{} is not a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, segments: &[&str]) -> Result<RequestBuilder, StoreError> {
        let builder = self.client.request(method, self.endpoint(segments)?);
        Ok(match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, StoreError> {
        let response = check(builder.send().await?).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| StoreError::Decode(err.to_string()))
    }
}

async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DocumentStore for ElasticStore {
    async fn upsert_document(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<IndexAck, StoreError> {
        self.ensure_document_collection(collection).await?;
        let builder = self
            .request(reqwest::Method::PUT, &[collection, "_doc", &document.url])?
            .json(document);
        let ack: WriteAck = self.send_json(builder).await?;
        Ok(IndexAck {
            collection: collection.to_string(),
            url: document.url.clone(),
            replaced: ack.result == "updated",
        })
    }

    async fn merge_domain(&self, patch: DomainPatch) -> Result<DomainRecord, StoreError> {
        let mut builder = self.request(
            reqwest::Method::POST,
            &[DOMAIN_COLLECTION, "_update", &patch.domain],
        )?;
        builder = builder
            .query(&[("_source", "true")])
            .json(&json!({ "doc": &patch, "doc_as_upsert": true }));
        let ack: UpdateAck = self.send_json(builder).await?;
        match ack.get {
            Some(got) => Ok(got.source),
            // Older clusters ignore `_source` on updates; the patch is what was written.
            None => Ok(patch.apply(None)),
        }
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError> {
        let body = templates::render(request);
        tracing::debug!(collection = %request.collection, %body, "backend search");
        let builder = self
            .request(reqwest::Method::POST, &[&request.collection, "_search"])?
            .json(&body);
        let raw: RawSearch = self.send_json(builder).await?;
        Ok(raw.into_response())
    }

    async fn documents_missing_vector(
        &self,
        collection: &str,
        field: &str,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let builder = self
            .request(reqwest::Method::POST, &[collection, "_search"])?
            .json(&templates::missing_field(field, limit));
        let raw: RawSearch = self.send_json(builder).await?;
        Ok(raw.hits.hits.into_iter().map(|hit| hit.source).collect())
    }

    async fn set_vector(
        &self,
        collection: &str,
        url: &str,
        field: &str,
        vector: &[f32],
    ) -> Result<(), StoreError> {
        let mut doc = serde_json::Map::new();
        doc.insert(field.to_string(), json!(vector));
        let builder = self
            .request(reqwest::Method::POST, &[collection, "_update", url])?
            .json(&json!({ "doc": doc }));
        let _: UpdateAck = self.send_json(builder).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct WriteAck {
    result: String,
}

#[derive(Deserialize)]
struct UpdateAck {
    #[serde(default)]
    get: Option<UpdateGet>,
}

#[derive(Deserialize)]
struct UpdateGet {
    #[serde(rename = "_source")]
    source: DomainRecord,
}

#[derive(Deserialize)]
struct RawSearch {
    hits: RawHits,
    #[serde(default)]
    aggregations: Option<RawAggregations>,
}

#[derive(Deserialize)]
struct RawHits {
    #[serde(default)]
    total: Option<RawTotal>,
    #[serde(default)]
    hits: Vec<RawHit>,
}

// Pre-7.x clusters report a bare number, later ones an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTotal {
    Count(u64),
    Object { value: u64 },
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source")]
    source: Document,
    #[serde(default)]
    highlight: BTreeMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct RawAggregations {
    per_domain: RawTerms,
}

#[derive(Deserialize)]
struct RawTerms {
    buckets: Vec<RawBucket>,
}

#[derive(Deserialize)]
struct RawBucket {
    key: String,
    doc_count: u64,
    top_results: RawTopHits,
}

#[derive(Deserialize)]
struct RawTopHits {
    hits: RawHits,
}

impl RawHits {
    fn total(&self) -> u64 {
        match self.total {
            Some(RawTotal::Count(value)) | Some(RawTotal::Object { value }) => value,
            None => self.hits.len() as u64,
        }
    }

    fn into_hits(self) -> Vec<Hit> {
        self.hits.into_iter().map(RawHit::into_hit).collect()
    }
}

impl RawHit {
    fn into_hit(self) -> Hit {
        Hit {
            score: self.score.unwrap_or(0.0),
            source: self.source,
            highlight: self.highlight,
        }
    }
}

impl RawSearch {
    fn into_response(self) -> SearchResponse {
        let total = self.hits.total();
        let buckets = self
            .aggregations
            .map(|aggs| {
                aggs.per_domain
                    .buckets
                    .into_iter()
                    .map(|bucket| DomainBucket {
                        domain: bucket.key,
                        doc_count: bucket.doc_count,
                        top: bucket.top_results.hits.into_hits(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        SearchResponse {
            total,
            hits: self.hits.into_hits(),
            buckets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BackendQuery;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_partial_json, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> ElasticStore {
        ElasticStore::connect(&ElasticConfig::new(server.uri())).expect("client")
    }

    fn document() -> Document {
        Document {
            url: "https://example.com/pasta".into(),
            domain: "example.com".into(),
            title: "Pasta".into(),
            description: String::new(),
            body: "Fresh pasta".into(),
            weight: 2,
            thumbnail: None,
            vectors: BTreeMap::new(),
        }
    }

    async fn mount_existing(server: &MockServer, collection: &str) {
        Mock::given(method("PUT"))
            .and(path(format!("/{collection}")))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "type": "resource_already_exists_exception" }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn upsert_reports_replacement() {
        let server = MockServer::start().await;
        mount_existing(&server, "web-en").await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/web-en/_doc/.+pasta$"))
            .and(body_partial_json(json!({ "domain": "example.com", "weight": 2 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "updated" })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = store(&server)
            .upsert_document("web-en", &document())
            .await
            .expect("upsert");
        assert!(ack.replaced);
        assert_eq!(ack.collection, "web-en");
    }

    #[tokio::test]
    async fn merge_domain_sends_doc_as_upsert() {
        let server = MockServer::start().await;
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Mock::given(method("POST"))
            .and(path("/web/_update/example.com"))
            .and(query_param("_source", "true"))
            .and(body_partial_json(json!({
                "doc_as_upsert": true,
                "doc": { "domain": "example.com", "email": "owner@example.com" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "updated",
                "get": { "_source": {
                    "domain": "example.com",
                    "homepage": "https://example.com/",
                    "email": "owner@example.com",
                    "last_crawl": "2024-05-01T12:00:00Z"
                }}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let homepage = Url::parse("https://example.com/").unwrap();
        let record = store(&server)
            .merge_domain(DomainPatch::referenced(&homepage, "owner@example.com"))
            .await
            .expect("merge");
        assert_eq!(record.last_crawl, Some(at));
        assert_eq!(record.email.as_deref(), Some("owner@example.com"));
    }

    #[tokio::test]
    async fn parses_aggregated_search() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/web-en/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": { "total": { "value": 7, "relation": "eq" }, "hits": [] },
                "aggregations": { "per_domain": { "buckets": [
                    { "key": "example.com", "doc_count": 5, "top_results": { "hits": {
                        "total": 5,
                        "hits": [{
                            "_score": 4.5,
                            "_source": { "url": "https://example.com/pasta", "domain": "example.com",
                                         "title": "Pasta", "description": "", "body": "Fresh pasta", "weight": 2 },
                            "highlight": { "body": ["Fresh <em>pasta</em>"] }
                        }]
                    }}}
                ]}}
            })))
            .mount(&server)
            .await;

        let response = store(&server)
            .search(&SearchRequest {
                collection: "web-en".into(),
                query: BackendQuery::PerDomainTop {
                    expression: "pasta".into(),
                    buckets: 10,
                },
                from: 0,
                size: 10,
            })
            .await
            .expect("search");
        assert_eq!(response.total, 7);
        assert!(response.hits.is_empty());
        assert_eq!(response.buckets.len(), 1);
        let top = &response.buckets[0].top[0];
        assert_eq!(top.score, 4.5);
        assert_eq!(top.highlight["body"][0], "Fresh <em>pasta</em>");
    }

    #[tokio::test]
    async fn surfaces_backend_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/web-*/_search"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let err = store(&server)
            .search(&SearchRequest {
                collection: "web-*".into(),
                query: BackendQuery::Domain {
                    domain: "example.com".into(),
                },
                from: 0,
                size: 10,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn ensure_collections_tolerates_existing_ones() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/web"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/web-en"))
            .and(body_partial_json(json!({
                "mappings": { "properties": { "bert_vector": { "dims": 768 } } }
            })))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "type": "resource_already_exists_exception" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path_regex(r"^/web-en/_doc/.+"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "updated" })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store(&server);
        store
            .ensure_collections("en")
            .await
            .expect("existing collection is not an error");
        // Known collections are not created again on upsert.
        store.upsert_document("web-en", &document()).await.expect("upsert");
    }

    #[tokio::test]
    async fn first_upsert_creates_the_language_collection() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/web-fr"))
            .and(body_partial_json(json!({
                "mappings": { "properties": {
                    "domain": { "type": "keyword" },
                    "title": { "analyzer": "french" },
                    "laser_vector": { "type": "dense_vector", "dims": 1024 }
                } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/web-fr/_doc/.+"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "result": "created" })))
            .expect(2)
            .mount(&server)
            .await;

        let store = store(&server);
        let mut doc = document();
        let first = store.upsert_document("web-fr", &doc).await.expect("first upsert");
        assert!(!first.replaced);
        doc.url = "https://example.com/pates".into();
        store.upsert_document("web-fr", &doc).await.expect("second upsert");
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(
            ElasticStore::connect(&ElasticConfig::new("mailto:ops@example.com")),
            Err(StoreError::Config(_))
        ));
    }
}
