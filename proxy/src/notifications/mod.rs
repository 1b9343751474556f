//! Webhook relay: SHIFT posts notifications here, they are delivered to a
//! host user.

pub mod channels;
pub mod directory;
pub mod messages;

use crate::errors::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use messages::{Notification, TaskCreated, ThreadUpdated};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;

#[derive(Deserialize)]
struct NotificationRequest {
    handler: String,
    payload: Map<String, Value>,
    source: Map<String, Value>,
}

fn user_id(payload: &Map<String, Value>) -> Option<u64> {
    match payload.get("user_id")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn dashboard_url(state: &AppState) -> String {
    format!(
        "{}{}",
        state.config.app.url.trim_end_matches('/'),
        state.config.dashboard.mount
    )
}

pub async fn store(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let request: NotificationRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Invalid notification: {e}")))?;
    let handler = request.handler;

    tracing::info!(
        %handler,
        source = %serde_json::Value::Object(request.source),
        "received notification from SHIFT"
    );

    if state.config.notifications.handled_by_main_app {
        return Ok(Json(json!({"handled_by": "main_app", "handler": handler})).into_response());
    }

    let production = state.config.app.is_production();
    let url = dashboard_url(&state);
    let parsed = match handler.as_str() {
        "thread.update" => {
            ThreadUpdated::from_payload(&request.payload, &url).map(Notification::ThreadUpdated)
        }
        "task.created" => {
            TaskCreated::from_payload(&request.payload, &url).map(Notification::TaskCreated)
        }
        _ => {
            tracing::warn!(%handler, "unhandled notification type");
            let body = json!({
                "production": production,
                "message": "Unhandled notification type",
                "handler": handler,
            });
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response());
        }
    };
    let notification = parsed.map_err(|e| ApiError::Validation(e.to_string()))?;

    let id = user_id(&request.payload)
        .ok_or_else(|| ApiError::Validation("payload.user_id must be a user id".into()))?;
    let user = state
        .directory
        .find(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("User {id} not found")))?;

    state
        .notifier
        .notify(&user, &notification)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to deliver notification: {e}")))?;

    Ok(Json(json!({
        "production": production,
        "message": "Notification processed successfully",
    }))
    .into_response())
}
