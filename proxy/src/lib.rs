pub mod attachments;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod metrics_defs;
pub mod notifications;
pub mod payload;
pub mod state;
pub mod tasks;
pub mod threads;

#[cfg(test)]
mod testutils;

use axum::Router;
use axum::extract::{DefaultBodyLimit, MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use shared::admin_service::{AdminError, AdminService, Readiness};
use shared::http::run_http_service;
use shared::{gauge, histogram};
use state::{AppState, StateError};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Admin error: {0}")]
    Admin(#[from] AdminError),
    #[error(transparent)]
    State(#[from] StateError),
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(tasks::index).post(tasks::store))
        .route(
            "/tasks/{id}",
            get(tasks::show).put(tasks::update).delete(tasks::destroy),
        )
        .route(
            "/tasks/{id}/threads",
            get(threads::index).post(threads::store),
        )
        .route(
            "/tasks/{id}/threads/{thread}",
            get(threads::show).put(threads::update),
        )
        .route("/attachments/upload", post(attachments::upload))
        .route(
            "/attachments/upload-multiple",
            post(attachments::upload_multiple),
        )
        .route("/attachments/upload-init", post(attachments::upload_init))
        .route("/attachments/upload-chunk", post(attachments::upload_chunk))
        .route("/attachments/upload-status", get(attachments::upload_status))
        .route(
            "/attachments/upload-complete",
            post(attachments::upload_complete),
        )
        .route("/attachments/list-temp", get(attachments::list_temp))
        .route("/attachments/remove-temp", delete(attachments::remove_temp))
        .route("/attachments/{id}/download", get(attachments::download))
        .route(
            "/attachments/temp/{temp}/{filename}",
            get(attachments::download_temp),
        )
        .route("/notifications", post(notifications::store))
}

/// Every route: the API under `<mount>/api`, the SPA shell under `<mount>`
/// and the built assets under `assets_path`.
pub fn router(state: Arc<AppState>) -> Router {
    let dashboard = &state.config.dashboard;
    let mount = dashboard.mount.as_str();
    let body_limit = state.config.uploads.request_body_limit();

    Router::new()
        .nest(&format!("{mount}/api"), api_routes())
        .route(mount, get(dashboard::show))
        .route(&format!("{mount}/{{*path}}"), get(dashboard::show))
        .nest_service(&dashboard.assets_path, ServeDir::new(&dashboard.dist_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();
    let started = Instant::now();

    gauge!(REQUESTS_INFLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(REQUESTS_INFLIGHT).decrement(1.0);

    histogram!(
        REQUEST_DURATION,
        "method" => method,
        "route" => route,
        "status" => response.status().as_str().to_string(),
    )
    .record(started.elapsed().as_secs_f64());

    response
}

pub async fn run(config: config::Config) -> Result<(), ProxyError> {
    let state = Arc::new(AppState::new(config)?);
    let listener = &state.config.listener;
    let admin_listener = state.config.admin_listener.clone();

    if !state.config.shift.is_configured() {
        tracing::warn!("SHIFT credentials are not configured; API routes will answer 500");
    }

    let configured = state.config.shift.is_configured();
    let admin = AdminService::new(move || {
        if configured {
            Readiness::Ready
        } else {
            Readiness::NotReady("SHIFT credentials are not configured".into())
        }
    });

    let tcp = TcpListener::bind(format!("{}:{}", listener.host, listener.port)).await?;
    tracing::info!(host = %listener.host, port = listener.port, "proxy listening");
    let app = router(state.clone());

    let proxy_task = async { axum::serve(tcp, app).await.map_err(ProxyError::from) };
    let admin_task = async {
        run_http_service::<_, AdminError>(&admin_listener.host, admin_listener.port, admin)
            .await
            .map_err(ProxyError::from)
    };

    tokio::try_join!(proxy_task, admin_task)?;
    Ok(())
}
