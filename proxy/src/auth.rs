use crate::config::AuthConfig;
use crate::errors::ApiError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use http::HeaderMap;
use http::request::Parts;
use relay::{HostContext, HostUser};
use std::convert::Infallible;
use std::sync::Arc;

/// The signed-in host user, read from the trusted headers the host's auth
/// layer sets. `None` when there is no session.
pub struct CurrentUser(pub Option<HostUser>);

/// A resolved [`HostContext`]. Rejects with 500 when SHIFT is not configured
/// and 401 when there is no session, in that order.
pub struct Caller(pub HostContext);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn user_from_headers(headers: &HeaderMap, auth: &AuthConfig) -> Option<HostUser> {
    let id = header(headers, &auth.user_id_header)?.parse().ok()?;

    Some(HostUser {
        id,
        name: header(headers, &auth.user_name_header)
            .unwrap_or_default()
            .to_string(),
        email: header(headers, &auth.user_email_header)
            .unwrap_or_default()
            .to_string(),
    })
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(CurrentUser(user_from_headers(
            &parts.headers,
            &state.config.auth,
        )))
    }
}

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = user_from_headers(&parts.headers, &state.config.auth);
        let ctx = HostContext::resolve(&state.config.shift, &state.config.app, user)?;
        Ok(Caller(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_user_from_headers() {
        let auth = AuthConfig::default();
        let mut headers = HeaderMap::new();
        assert_eq!(user_from_headers(&headers, &auth), None);

        headers.insert("x-user-id", HeaderValue::from_static("abc"));
        assert_eq!(user_from_headers(&headers, &auth), None);

        headers.insert("x-user-id", HeaderValue::from_static("42"));
        headers.insert("x-user-name", HeaderValue::from_static("Ada Lovelace"));
        headers.insert("x-user-email", HeaderValue::from_static("ada@example.com"));
        assert_eq!(
            user_from_headers(&headers, &auth),
            Some(HostUser {
                id: 42,
                name: "Ada Lovelace".into(),
                email: "ada@example.com".into(),
            })
        );
    }

    #[test]
    fn test_custom_header_names() {
        let auth = AuthConfig {
            user_id_header: "x-remote-user".into(),
            ..AuthConfig::default()
        };
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("1"));
        assert_eq!(user_from_headers(&headers, &auth), None);

        headers.insert("x-remote-user", HeaderValue::from_static("7"));
        assert_eq!(user_from_headers(&headers, &auth).map(|u| u.id), Some(7));
    }
}
