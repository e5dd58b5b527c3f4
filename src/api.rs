//! HTTP surface: request validation and the axum router.

use crate::crawl::{CrawlError, CrawlReport, CrawlSupervisor};
use crate::planner;
use crate::ranking::{RankingAggregator, SearchPage};
use crate::store::StoreError;
use axum::async_trait;
use axum::extract::{FromRequest, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Results per page when the request does not say.
pub const DEFAULT_HITS: i64 = 10;

/// Errors returned to HTTP clients as `{ "message": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request is missing fields or carries invalid values.
    #[error("{0}")]
    InvalidUsage(String),
    /// A synchronous crawl job failed.
    #[error(transparent)]
    Crawl(#[from] CrawlError),
    /// The search backend failed.
    #[error(transparent)]
    Search(#[from] StoreError),
    /// A blocking task died before reporting.
    #[error("background task failed: {0}")]
    Task(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidUsage(_) => StatusCode::BAD_REQUEST,
            Self::Crawl(_) | Self::Search(_) | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Body extractor accepting JSON or form-encoded payloads.
pub struct Input<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Input<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim_start().starts_with("application/json"));
        if is_json {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::InvalidUsage(rejection.body_text()))?;
            Ok(Self(value))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::InvalidUsage(rejection.body_text()))?;
            Ok(Self(value))
        }
    }
}

// Form values arrive as text, JSON values as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Number {
    Int(i64),
    Text(String),
}

impl Number {
    fn parse(self, field: &str) -> Result<i64, ApiError> {
        match self {
            Self::Int(value) => Ok(value),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| ApiError::InvalidUsage(format!("{field} must be an integer"))),
        }
    }
}

/// Payload of `/index` and `/explore`.
#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    url: Option<String>,
}

/// Payload of `/reference`.
#[derive(Debug, Deserialize)]
pub struct ReferenceRequest {
    url: Option<String>,
    email: Option<String>,
}

/// Payload of `/search`.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    query: Option<String>,
    hits: Option<Number>,
    start: Option<Number>,
}

fn required(value: Option<String>, message: &str) -> Result<String, ApiError> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidUsage(message.to_string()))
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    supervisor: CrawlSupervisor,
    ranking: RankingAggregator,
}

impl AppState {
    /// State serving crawls through `supervisor` and searches through `ranking`.
    pub fn new(supervisor: CrawlSupervisor, ranking: RankingAggregator) -> Self {
        Self {
            supervisor,
            ranking,
        }
    }
}

/// Routes for the four operations plus a health probe.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/index", post(index))
        .route("/explore", post(explore))
        .route("/reference", post(reference))
        .route("/search", post(search))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn index(
    State(state): State<AppState>,
    Input(request): Input<UrlRequest>,
) -> Result<(StatusCode, &'static str), ApiError> {
    let url = required(request.url, "No url specified in POST data")?;
    let supervisor = state.supervisor.clone();
    tokio::task::spawn_blocking(move || match supervisor.index_page(&url) {
        Ok(Some(report)) => tracing::info!(url = %url, indexed = report.pages_indexed, "index job done"),
        Ok(None) => tracing::info!(url = %url, "index job skipped unreachable url"),
        Err(err) => tracing::warn!(url = %url, error = %err, "index job failed"),
    });
    Ok((StatusCode::ACCEPTED, "Indexing started"))
}

async fn explore(
    State(state): State<AppState>,
    Input(request): Input<UrlRequest>,
) -> Result<Json<CrawlReport>, ApiError> {
    let url = required(request.url, "No url specified in POST data")?;
    tracing::info!(url = %url, "launch exploration job");
    let supervisor = state.supervisor.clone();
    let report = tokio::task::spawn_blocking(move || supervisor.explore(&url))
        .await
        .map_err(|err| ApiError::Task(err.to_string()))??;
    Ok(Json(report))
}

async fn reference(
    State(state): State<AppState>,
    Input(request): Input<ReferenceRequest>,
) -> Result<(StatusCode, &'static str), ApiError> {
    let missing = "No url or email specified in POST data";
    let url = required(request.url, missing)?;
    let email = required(request.email, missing)?;
    let supervisor = state.supervisor.clone();
    tokio::task::spawn_blocking(move || match supervisor.reference(&url, &email) {
        Ok(Some(record)) => tracing::info!(domain = %record.domain, "reference recorded"),
        Ok(None) => tracing::info!(url = %url, "reference skipped unreachable url"),
        Err(err) => tracing::warn!(url = %url, error = %err, "reference job failed"),
    });
    Ok((StatusCode::ACCEPTED, "Referencing started"))
}

async fn search(
    State(state): State<AppState>,
    Input(request): Input<SearchParams>,
) -> Result<Json<SearchPage>, ApiError> {
    let Some(query) = request.query else {
        return Err(ApiError::InvalidUsage("No query specified in POST data".into()));
    };
    let start = request.start.map(|n| n.parse("start")).transpose()?.unwrap_or(0);
    let hits = request
        .hits
        .map(|n| n.parse("hits"))
        .transpose()?
        .unwrap_or(DEFAULT_HITS);
    if start < 0 || hits < 0 {
        return Err(ApiError::InvalidUsage(
            "Start or hits cannot be negative numbers".into(),
        ));
    }
    let plan = planner::plan(&query);
    let page = state
        .ranking
        .execute(&plan, start as usize, hits as usize)
        .await?;
    tracing::info!(query = %query, total = page.total, returned = page.results.len(), "search");
    Ok(Json(page))
}
