//! HTTP request handlers for the graph API
//!
//! Handlers only translate between HTTP and [`GraphService`] calls; all
//! behaviour lives in the service.

use crate::core::error::GraphError;
use crate::core::types::Fields;
use crate::graph::{Created, Deleted, Fetched, GraphService, Page};
use crate::system::collect_metrics;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Request header naming the author of a mutation
pub const AUTHOR_HEADER: &str = "author";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Graph service
    pub service: Arc<GraphService>,
    /// Serve `/metrics`
    pub metrics_enabled: bool,
}

/// Error rendered as `{code, message}` with the matching status
#[derive(Debug)]
pub struct ApiError(pub GraphError);

impl From<GraphError> for ApiError {
    fn from(err: GraphError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.0.body();
        let status = StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = body.code, error = %self.0, "Request failed");
        } else {
            tracing::debug!(code = body.code, error = %self.0, "Request rejected");
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check payload
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `ok` when storage is reachable
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
}

/// Edge listing query parameters
#[derive(Debug, Default, Deserialize)]
pub struct EdgeQuery {
    /// Page size
    pub count: Option<String>,
    /// Cursor from a previous page
    pub after: Option<String>,
}

fn author(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHOR_HEADER).and_then(|v| v.to_str().ok())
}

fn into_fields(body: Value) -> Result<Fields, GraphError> {
    match body {
        Value::Object(fields) => Ok(fields),
        _ => Err(GraphError::invalid("Request body must be a JSON object")),
    }
}

/// `delete_fields` travels inside the update body
fn split_delete_fields(fields: &mut Fields) -> Result<Vec<String>, GraphError> {
    match fields.remove("delete_fields") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(name),
                _ => Err(GraphError::invalid("'delete_fields' must be an array of strings")),
            })
            .collect(),
        Some(_) => Err(GraphError::invalid("'delete_fields' must be an array of strings")),
    }
}

/// `GET /v1/graph`
pub async fn get_graph(State(state): State<AppState>) -> Json<Value> {
    Json(state.service.registry().raw().clone())
}

/// `GET /v1/health`
pub async fn health_check(State(state): State<AppState>) -> ApiResult<HealthResponse> {
    state.service.check().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: crate::VERSION,
    }))
}

/// `GET /v1/graph/:ids`
pub async fn get_objects(State(state): State<AppState>, Path(ids): Path<String>) -> ApiResult<Fetched> {
    Ok(Json(state.service.get_objects(&ids).await?))
}

/// `POST /v1/graph`
pub async fn create_object(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Fields> {
    let fields = into_fields(body)?;
    Ok(Json(state.service.create_object(fields, author(&headers)).await?))
}

/// `PUT /v1/graph/:id`
pub async fn update_object(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Fields> {
    let mut delta = into_fields(body)?;
    let delete_fields = split_delete_fields(&mut delta)?;
    let updated = state
        .service
        .update_object(&id, delta, delete_fields, author(&headers))
        .await?;
    Ok(Json(updated))
}

/// `DELETE /v1/graph/:id`
pub async fn delete_object(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Deleted> {
    Ok(Json(state.service.delete_object(&id, author(&headers)).await?))
}

/// `GET /v1/graph/:src/:edge_name`
pub async fn get_edge_objects(
    State(state): State<AppState>,
    Path((src, edge_name)): Path<(String, String)>,
    Query(query): Query<EdgeQuery>,
) -> ApiResult<Page> {
    let page = state
        .service
        .get_edge_objects(&src, &edge_name, query.count.as_deref(), query.after.as_deref())
        .await?;
    Ok(Json(page))
}

/// `GET /v1/graph/:src/:edge_name/:dst`
pub async fn get_edge_object(
    State(state): State<AppState>,
    Path((src, edge_name, dst)): Path<(String, String, String)>,
) -> ApiResult<Fields> {
    Ok(Json(state.service.get_edge_object(&src, &edge_name, &dst).await?))
}

/// `POST /v1/graph/:src/:edge_name/:dst`
pub async fn create_edge(
    State(state): State<AppState>,
    Path((src, edge_name, dst)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Created> {
    let created = state
        .service
        .create_edge(&src, &edge_name, &dst, author(&headers))
        .await?;
    Ok(Json(created))
}

/// `DELETE /v1/graph/:src/:edge_name/:dst`
pub async fn delete_edge(
    State(state): State<AppState>,
    Path((src, edge_name, dst)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Deleted> {
    let deleted = state
        .service
        .delete_edge(&src, &edge_name, &dst, author(&headers))
        .await?;
    Ok(Json(deleted))
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Response {
    if !state.metrics_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        collect_metrics(),
    )
        .into_response()
}
