//! Serves the SPA shell with runtime configuration injected.

use crate::auth::CurrentUser;
use crate::config::DashboardConfig;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use relay::{AppConfig, HostUser};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum DashboardError {
    #[error("Dashboard build not found at {path}: {source}")]
    MissingBuild {
        path: String,
        source: std::io::Error,
    },
    #[error("Could not encode dashboard config: {0}")]
    Encode(#[from] serde_json::Error),
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "cannot serve dashboard");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({"error": self.to_string()})),
        )
            .into_response()
    }
}

/// Exposed to the SPA as `window.shiftConfig`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShellConfig<'a> {
    login_route: &'a str,
    logout_route: &'a str,
    base_url: &'a str,
    app_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, DashboardError> {
    let dashboard = &state.config.dashboard;
    let Some(user) = user else {
        return Ok(Redirect::to(&dashboard.login_route).into_response());
    };

    let html = match dev_server_html(&state, dashboard).await {
        Some(html) => html,
        None => built_html(dashboard).await?,
    };

    let html = inject_config(&html, dashboard, &state.config.app, Some(&user))?;
    Ok(Html(html).into_response())
}

/// The dev server's HTML with its scripts pointed at the dev server, or
/// `None` when it is not configured or not reachable.
async fn dev_server_html(state: &AppState, dashboard: &DashboardConfig) -> Option<String> {
    let dev_server = dashboard.dev_server.as_ref()?;

    if let Err(e) = state
        .dev_client
        .head(dev_server.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
    {
        tracing::debug!(%dev_server, error = %e, "dev server not reachable, serving build");
        return None;
    }

    let html = match fetch_text(&state.dev_client, dev_server).await {
        Ok(html) => html,
        Err(e) => {
            tracing::debug!(%dev_server, error = %e, "dev server fetch failed, serving build");
            return None;
        }
    };

    Some(rewrite_dev_scripts(&html, dev_server, &dashboard.dev_scripts))
}

async fn fetch_text(client: &reqwest::Client, url: &Url) -> Result<String, reqwest::Error> {
    client
        .get(url.clone())
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}

async fn built_html(dashboard: &DashboardConfig) -> Result<String, DashboardError> {
    let path = dashboard.dist_dir.join("index.html");
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| DashboardError::MissingBuild {
            path: path.display().to_string(),
            source,
        })
}

/// Points root-relative script URLs at the dev server origin.
pub fn rewrite_dev_scripts(html: &str, dev_server: &Url, scripts: &[String]) -> String {
    let origin = dev_server.origin().ascii_serialization();
    scripts.iter().fold(html.to_string(), |html, script| {
        html.replace(
            &format!("src=\"{script}\""),
            &format!("src=\"{origin}{script}\""),
        )
    })
}

/// Adds the `window.shiftConfig` script once, ahead of the first module
/// script so it is defined before the app boots.
pub fn inject_config(
    html: &str,
    dashboard: &DashboardConfig,
    app: &AppConfig,
    user: Option<&HostUser>,
) -> Result<String, DashboardError> {
    let config = ShellConfig {
        login_route: &dashboard.login_route,
        logout_route: &dashboard.logout_route,
        base_url: &app.url,
        app_name: &app.name,
        username: user.map(|u| u.name.as_str()),
        email: user.map(|u| u.email.as_str()),
    };
    let encoded = serde_json::to_string(&config)?.replace("</", "<\\/");
    let script = format!("<script>window.shiftConfig = {encoded};</script>");

    let at = html
        .find("<script type=\"module\"")
        .or_else(|| html.find("</body>"))
        .unwrap_or(html.len());

    let mut out = String::with_capacity(html.len() + script.len());
    out.push_str(&html[..at]);
    out.push_str(&script);
    out.push_str(&html[at..]);
    Ok(out)
}
