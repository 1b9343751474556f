use crate::auth::Caller;
use crate::errors::{ApiError, Operation};
use crate::payload::{parse_object, required_str, upstream_json};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use bytes::Bytes;
use relay::UpstreamRequest;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const FETCH_THREADS: Operation = Operation::read("fetch threads");
const FETCH_THREAD: Operation = Operation::read("fetch thread");
const CREATE_THREAD: Operation = Operation::write("create thread");
const UPDATE_THREAD: Operation = Operation::read("update thread");

/// Copies `temp_identifier` when it is a non-empty string.
fn copy_temp_identifier(from: &Map<String, Value>, to: &mut Map<String, Value>) {
    if let Some(temp) = from
        .get("temp_identifier")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
    {
        to.insert("temp_identifier".into(), json!(temp));
    }
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path(task): Path<u64>,
) -> Result<Json<Value>, ApiError> {
    let request = UpstreamRequest::get(format!("/api/tasks/{task}/threads"))
        .headers(ctx.identity_headers())
        .query(ctx.identity_pairs());

    let response = state.forward(&ctx, FETCH_THREADS, request).await?;
    Ok(Json(upstream_json(&response)))
}

/// Posts a reply. Replies from the host app are always `external`.
pub async fn store(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path(task): Path<u64>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let body = parse_object(&body)?;

    let mut payload = Map::new();
    payload.insert(
        "content".into(),
        body.get("content").cloned().unwrap_or(Value::Null),
    );
    payload.insert("type".into(), json!("external"));
    copy_temp_identifier(&body, &mut payload);

    let request = UpstreamRequest::post(format!("/api/tasks/{task}/threads"))
        .json(Value::Object(ctx.enrich(payload)));
    let response = state.forward(&ctx, CREATE_THREAD, request).await?;
    Ok((StatusCode::CREATED, Json(upstream_json(&response))))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path((task, thread)): Path<(u64, u64)>,
) -> Result<Json<Value>, ApiError> {
    let request = UpstreamRequest::get(format!("/api/tasks/{task}/threads/{thread}"))
        .headers(ctx.identity_headers())
        .query([("project", ctx.credentials.project.as_str())]);

    let response = state.forward(&ctx, FETCH_THREAD, request).await?;
    Ok(Json(upstream_json(&response)))
}

/// Edits a reply. The upstream status is relayed on success.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path((task, thread)): Path<(u64, u64)>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let body = parse_object(&body)?;
    let content = required_str(&body, "content")?;
    if body
        .get("temp_identifier")
        .is_some_and(|t| !t.is_null() && !t.is_string())
    {
        return Err(ApiError::Validation(
            "The temp_identifier field must be a string.".into(),
        ));
    }

    let mut payload = Map::new();
    payload.insert("content".into(), json!(content));
    copy_temp_identifier(&body, &mut payload);

    let request = UpstreamRequest::put(format!("/api/tasks/{task}/threads/{thread}"))
        .json(Value::Object(ctx.enrich(payload)));
    let response = state.forward(&ctx, UPDATE_THREAD, request).await?;
    Ok((response.status, Json(upstream_json(&response))))
}
