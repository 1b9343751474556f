use crate::config::{AppConfig, Credentials, SdkConfig};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("SHIFT configuration missing. Configure SHIFT_TOKEN and SHIFT_PROJECT.")]
    ConfigMissing,
    #[error("Unauthenticated")]
    Unauthenticated,
}

/// A user of the host application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUser {
    pub id: u64,
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserIdentity {
    pub name: String,
    pub email: String,
    pub id: u64,
    pub environment: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metadata {
    pub url: String,
    pub environment: String,
}

/// Attribution attached to every call made to the SHIFT API.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IdentityContext {
    pub project: String,
    pub user: UserIdentity,
    pub metadata: Metadata,
}

/// Top-level keys the proxy owns in every outbound payload.
pub const RESERVED_KEYS: &[&str] = &["project", "user", "metadata"];

/// Everything a proxied operation needs to know about where it runs and who
/// triggered it. Built fresh for every request.
#[derive(Clone, Debug)]
pub struct HostContext {
    pub credentials: Credentials,
    pub user: HostUser,
    pub app: AppConfig,
}

impl HostContext {
    /// Configuration is checked before the caller: a misconfigured install
    /// reports that regardless of who is asking.
    pub fn resolve(
        sdk: &SdkConfig,
        app: &AppConfig,
        user: Option<HostUser>,
    ) -> Result<Self, ContextError> {
        let credentials = sdk.resolve()?;
        let user = user.ok_or(ContextError::Unauthenticated)?;

        Ok(HostContext {
            credentials,
            user,
            app: app.clone(),
        })
    }

    pub fn identity(&self) -> IdentityContext {
        IdentityContext {
            project: self.credentials.project.clone(),
            user: UserIdentity {
                name: self.user.name.clone(),
                email: self.user.email.clone(),
                id: self.user.id,
                environment: self.app.env.clone(),
                url: self.app.url.clone(),
            },
            metadata: Metadata {
                url: self.app.url.clone(),
                environment: self.app.env.clone(),
            },
        }
    }

    fn identity_value(&self) -> Map<String, Value> {
        match serde_json::to_value(self.identity()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Merges the identity into a caller-supplied body. Identity keys always
    /// win over whatever the caller sent.
    pub fn enrich(&self, mut body: Map<String, Value>) -> Map<String, Value> {
        body.extend(self.identity_value());
        body
    }

    /// The identity as bracket-notation pairs, for URL queries and multipart
    /// fields.
    pub fn identity_pairs(&self) -> Vec<(String, String)> {
        flatten_pairs(&Value::Object(self.identity_value()))
    }

    /// Caller attribution headers sent alongside thread reads.
    pub fn identity_headers(&self) -> HeaderMap {
        let values = [
            ("x-user-name", self.user.name.clone()),
            ("x-user-email", self.user.email.clone()),
            ("x-user-id", self.user.id.to_string()),
            ("x-environment", self.app.env.clone()),
            ("x-app-url", self.app.url.clone()),
        ];

        let mut headers = HeaderMap::new();
        for (name, value) in values {
            match HeaderValue::from_bytes(value.as_bytes()) {
                Ok(v) => {
                    headers.insert(HeaderName::from_static(name), v);
                }
                Err(_) => tracing::debug!(header = name, "skipping unencodable identity header"),
            }
        }
        headers
    }
}

/// True for keys the caller may not set in a query: `project`, `user[...]`,
/// `metadata[...]`.
pub fn is_reserved_pair_key(key: &str) -> bool {
    RESERVED_KEYS.iter().any(|reserved| {
        key == *reserved
            || key
                .strip_prefix(reserved)
                .is_some_and(|rest| rest.starts_with('['))
    })
}

/// Flattens a JSON value into `key[nested][0]=value` pairs, the encoding the
/// SHIFT API expects for queries and multipart fields. Nulls are dropped,
/// booleans become `1`/`0`.
pub fn flatten_pairs(value: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    flatten_into(None, value, &mut out);
    out
}

fn flatten_into(prefix: Option<&str>, value: &Value, out: &mut Vec<(String, String)>) {
    let nested = |key: &str| match prefix {
        Some(p) => format!("{p}[{key}]"),
        None => key.to_string(),
    };

    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_into(Some(&nested(k)), v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(Some(&nested(&i.to_string())), v, out);
            }
        }
        Value::Null => {}
        scalar => {
            let Some(key) = prefix else { return };
            let rendered = match scalar {
                Value::String(s) => s.clone(),
                Value::Bool(true) => "1".into(),
                Value::Bool(false) => "0".into(),
                other => other.to_string(),
            };
            out.push((key.to_string(), rendered));
        }
    }
}
