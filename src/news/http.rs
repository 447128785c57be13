//! HTTP API for the news service
//!
//! | Method | Path          | Body         | Success                 |
//! |--------|---------------|--------------|-------------------------|
//! | POST   | `/news`       | RecordDraft  | 202 + accepted record   |
//! | GET    | `/news`       | -            | 200 + newest-first page |
//! | POST   | `/news/query` | QuerySpec    | 200 + page              |
//! | GET    | `/news/:id`   | -            | 200 + record            |
//! | PUT    | `/news/:id`   | RecordPatch  | 200 + updated record    |
//! | DELETE | `/news/:id`   | -            | 200 + `{"id": id}`      |
//! | GET    | `/health`     | -            | 200 + status            |
//! | GET    | `/metrics`    | -            | 200 + Prometheus text   |

use super::service::NewsService;
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, PipelineMetrics, Result};
use crate::model::{QuerySpec, Record, RecordDraft, RecordPatch, DEFAULT_LIMIT};
use crate::pipeline::ConsumerState;
use crate::store::SearchIndex;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NewsService>,
    pub index: Arc<dyn SearchIndex>,
    pub metrics: Arc<PipelineMetrics>,
    pub consumer: watch::Receiver<ConsumerState>,
}

pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/news", post(publish_news).get(list_news))
        .route("/news/query", post(query_news))
        .route(
            "/news/:id",
            get(get_news).put(update_news).delete(delete_news),
        )
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct PageParams {
    offset: Option<usize>,
    limit: Option<usize>,
}

fn json_body<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(value)| value).map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::TooLarge(e.body_text())
        } else {
            Error::Invalid(e.body_text())
        }
    })
}

fn path_id(id: std::result::Result<Path<i64>, PathRejection>) -> Result<i64> {
    id.map(|Path(id)| id)
        .map_err(|e| Error::Invalid(e.body_text()))
}

async fn publish_news(
    State(state): State<AppState>,
    body: std::result::Result<Json<RecordDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<Record>)> {
    let record = state.service.publish(json_body(body)?).await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

async fn list_news(
    State(state): State<AppState>,
    params: std::result::Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Vec<Record>>> {
    let Query(params) = params.map_err(|e| Error::Invalid(e.body_text()))?;
    let spec = QuerySpec::page(
        params.offset.unwrap_or(0),
        params.limit.unwrap_or(DEFAULT_LIMIT),
    );
    Ok(Json(state.service.get_all(&spec).await?))
}

async fn query_news(
    State(state): State<AppState>,
    body: std::result::Result<Json<QuerySpec>, JsonRejection>,
) -> Result<Json<Vec<Record>>> {
    let spec = json_body(body)?;
    Ok(Json(state.service.get_all(&spec).await?))
}

async fn get_news(
    State(state): State<AppState>,
    id: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<Record>> {
    Ok(Json(state.service.get_by_id(path_id(id)?).await?))
}

async fn update_news(
    State(state): State<AppState>,
    id: std::result::Result<Path<i64>, PathRejection>,
    body: std::result::Result<Json<RecordPatch>, JsonRejection>,
) -> Result<Json<Record>> {
    let id = path_id(id)?;
    let patch = json_body(body)?;
    Ok(Json(state.service.update(id, patch).await?))
}

async fn delete_news(
    State(state): State<AppState>,
    id: std::result::Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse> {
    let id = path_id(id)?;
    state.service.delete(id).await?;
    Ok(Json(json!({ "id": id })))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let consumer = *state.consumer.borrow();
    let indexed = state.index.len().await.ok();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": crate::VERSION,
            "consumer": consumer,
            "indexed": indexed,
            "uptime_secs": state.metrics.uptime_seconds(),
        })),
    )
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}
