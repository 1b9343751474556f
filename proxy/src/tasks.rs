use crate::auth::Caller;
use crate::errors::{ApiError, Operation};
use crate::payload::{caller_query, parse_object, upstream_json};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, RawQuery, State};
use bytes::Bytes;
use relay::UpstreamRequest;
use serde_json::{Value, json};
use std::sync::Arc;

const FETCH_TASKS: Operation = Operation::read("fetch tasks");
const FETCH_TASK: Operation = Operation::read("fetch task");
const CREATE_TASK: Operation = Operation::write("create task");
const UPDATE_TASK: Operation = Operation::write("update task");
const DELETE_TASK: Operation = Operation::write("delete task");

/// Lists tasks. Caller filters (status, page, search) are forwarded; the
/// identity keys are always the proxy's own.
pub async fn index(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    RawQuery(query): RawQuery,
) -> Result<Json<Value>, ApiError> {
    let request = UpstreamRequest::get("/api/tasks")
        .query(caller_query(query.as_deref()))
        .query(ctx.identity_pairs());

    let response = state.forward(&ctx, FETCH_TASKS, request).await?;
    Ok(Json(upstream_json(&response)))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path(id): Path<u64>,
) -> Result<Json<Value>, ApiError> {
    let request = UpstreamRequest::get(format!("/api/tasks/{id}")).query(ctx.identity_pairs());

    let response = state.forward(&ctx, FETCH_TASK, request).await?;
    Ok(Json(upstream_json(&response)))
}

/// Creates a task. New tasks always start out `pending`.
pub async fn store(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let mut body = parse_object(&body)?;
    body.insert("status".into(), json!("pending"));

    let request = UpstreamRequest::post("/api/tasks").json(Value::Object(ctx.enrich(body)));
    let response = state.forward(&ctx, CREATE_TASK, request).await?;
    Ok(Json(upstream_json(&response)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path(id): Path<u64>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse_object(&body)?;

    let request =
        UpstreamRequest::put(format!("/api/tasks/{id}")).json(Value::Object(ctx.enrich(body)));
    state.forward(&ctx, UPDATE_TASK, request).await?;
    Ok(Json(json!({"message": "Task updated successfully"})))
}

pub async fn destroy(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path(id): Path<u64>,
) -> Result<Json<Value>, ApiError> {
    let request = UpstreamRequest::delete(format!("/api/tasks/{id}"))
        .json(Value::Object(ctx.enrich(Default::default())));
    state.forward(&ctx, DELETE_TASK, request).await?;
    Ok(Json(json!({"message": "Task deleted successfully"})))
}
