use crate::context::ContextError;
use serde::Deserialize;
use std::fmt;
use url::Url;

pub const DEFAULT_SHIFT_URL: &str = "https://shift.wyxos.com";

const MIB: u64 = 1024 * 1024;

fn default_shift_url() -> Url {
    Url::parse(DEFAULT_SHIFT_URL).expect("default SHIFT url is valid")
}

/// Settings for reaching the remote SHIFT API.
///
/// Token and project are optional at load time so the service can start and
/// report itself as not ready; every proxied operation resolves them through
/// [`SdkConfig::resolve`] before doing any network work.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SdkConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_shift_url")]
    pub url: Url,
}

impl Default for SdkConfig {
    fn default() -> Self {
        SdkConfig {
            token: None,
            project: None,
            url: default_shift_url(),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl SdkConfig {
    pub fn resolve(&self) -> Result<Credentials, ContextError> {
        match (non_blank(&self.token), non_blank(&self.project)) {
            (Some(token), Some(project)) => Ok(Credentials {
                token: token.to_string(),
                project: project.to_string(),
                base_url: self.url.clone(),
            }),
            _ => Err(ContextError::ConfigMissing),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.resolve().is_ok()
    }
}

/// Resolved bearer token, project identifier and base URL.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub token: String,
    pub project: String,
    pub base_url: Url,
}

impl Credentials {
    /// Joins an API path onto the base URL, keeping any path prefix the base
    /// URL carries.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("project", &self.project)
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

fn default_app_name() -> String {
    "SHIFT".into()
}

fn default_app_url() -> String {
    "http://localhost".into()
}

fn default_app_env() -> String {
    "production".into()
}

/// The host application the widget is embedded in.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_url")]
    pub url: String,
    #[serde(default = "default_app_env")]
    pub env: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            name: default_app_name(),
            url: default_app_url(),
            env: default_app_env(),
        }
    }
}

impl AppConfig {
    pub fn is_local(&self) -> bool {
        self.env == "local"
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum LimitsError {
    #[error("upload limits must be greater than zero")]
    Zero,
    #[error("max_single_upload_bytes ({single}) exceeds max_upload_bytes ({total})")]
    SingleExceedsTotal { single: u64, total: u64 },
}

/// Byte ceilings enforced locally before anything is sent upstream.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UploadLimits {
    /// Largest file accepted by any upload path, chunked included.
    pub max_upload_bytes: u64,
    /// Largest single chunk accepted by `upload-chunk`.
    pub chunk_size_bytes: u64,
    /// Largest file accepted by the single-shot `upload` path.
    pub max_single_upload_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        UploadLimits {
            max_upload_bytes: 100 * MIB,
            chunk_size_bytes: 5 * MIB,
            max_single_upload_bytes: 20 * MIB,
        }
    }
}

impl UploadLimits {
    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.max_upload_bytes == 0
            || self.chunk_size_bytes == 0
            || self.max_single_upload_bytes == 0
        {
            return Err(LimitsError::Zero);
        }
        if self.max_single_upload_bytes > self.max_upload_bytes {
            return Err(LimitsError::SingleExceedsTotal {
                single: self.max_single_upload_bytes,
                total: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// Request body ceiling for the HTTP layer: large enough for the biggest
    /// accepted upload plus multipart framing.
    pub fn request_body_limit(&self) -> usize {
        usize::try_from(self.max_upload_bytes.saturating_add(MIB)).unwrap_or(usize::MAX)
    }
}
