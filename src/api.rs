// src/api.rs
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::assemble::ResultItem;
use crate::pipeline::Pipeline;
use crate::stream::StreamEvent;
use crate::telemetry::anon_hash;
use crate::types::{Language, Query};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

/// Public router. `allowed_origins` of `["*"]` allows any origin.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/query", post(query))
        .route("/query/stream", post(query_stream))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(target: "api", origin = %o, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(parsed)
}

#[derive(Debug, Deserialize)]
pub struct QueryReq {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub language: Option<Language>,
}

impl QueryReq {
    fn to_query(&self) -> Result<Query, crate::error::PipelineError> {
        Query::new(&self.query, self.language.unwrap_or_default(), self.top_k)
    }
}

#[derive(Debug, Serialize)]
pub struct QueryResp {
    pub query: String,
    pub answer: String,
    pub results: Vec<ResultItem>,
    pub route: &'static str,
    pub bucket: &'static str,
    pub category: String,
    pub requires_address: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_state: Option<&'static str>,
}

#[derive(Serialize)]
struct Detail {
    detail: String,
}

fn detail(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(Detail { detail: msg.into() })).into_response()
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "message": "City of Kingston 311 query service",
    }))
}

/// Healthy only when the vector index answers a stats call.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let p = &state.pipeline;
    match p.index_stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "healthy",
            "index": p.index_name(),
            "index_status": "connected",
            "total_vectors": stats.total_vectors,
            "sitemap_entries": p.sitemap().len(),
            "generator": p.generator_name(),
        })),
        Err(e) => {
            warn!(target: "api", error = %e, "health check: vector index unreachable");
            Json(serde_json::json!({
                "status": "unhealthy",
                "index": p.index_name(),
                "error": e.to_string(),
            }))
        }
    }
}

async fn query(State(state): State<AppState>, Json(req): Json<QueryReq>) -> Response {
    let q = match req.to_query() {
        Ok(q) => q,
        Err(e) => return detail(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    };
    info!(target: "api", qid = %anon_hash(&q.text), "POST /query");
    let out = state.pipeline.answer(&q).await;
    if let Some(err) = &out.error {
        return detail(StatusCode::INTERNAL_SERVER_ERROR, err.clone());
    }
    let resp = QueryResp {
        query: q.text.clone(),
        route: out.classification.route.label(),
        bucket: out.classification.bucket.as_str(),
        category: out.classification.category.clone(),
        requires_address: out.requires_address(),
        workflow_state: out.workflow_state(),
        answer: out.answer,
        results: out.results,
    };
    Json(resp).into_response()
}

async fn query_stream(
    State(state): State<AppState>,
    Json(req): Json<QueryReq>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = match req.to_query() {
        Ok(q) => {
            info!(target: "api", qid = %anon_hash(&q.text), "POST /query/stream");
            state.pipeline.clone().spawn_stream(q).boxed()
        }
        Err(e) => stream::once(async move { StreamEvent::Error { content: e.to_string() } }).boxed(),
    };
    Sse::new(events.map(|ev| Ok(to_sse(&ev)))).keep_alive(KeepAlive::default())
}

fn to_sse(ev: &StreamEvent) -> Event {
    match serde_json::to_string(ev) {
        Ok(json) => Event::default().data(json),
        Err(e) => Event::default().data(format!(
            r#"{{"type":"error","content":"encoding failed: {e}"}}"#
        )),
    }
}
