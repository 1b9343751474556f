use relay::config::LimitsError;
use relay::{AppConfig, HostUser, SdkConfig, UploadLimits};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Path must start with '/' and not end with one: {0:?}")]
    InvalidPath(String),

    #[error("Invalid upload limits: {0}")]
    Limits(#[from] LimitsError),

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("Duplicate directory user id: {0}")]
    DuplicateUser(u64),

    #[error("Notification mail requires a from address")]
    EmptyMailFrom,
}

/// Proxy configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for the dashboard and API
    pub listener: Listener,
    /// Admin listener for health and readiness
    pub admin_listener: Listener,
    /// Credentials and base URL of the SHIFT API
    #[serde(default)]
    pub shift: SdkConfig,
    /// The host application
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub uploads: UploadLimits,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Host users notifications can be delivered to
    #[serde(default)]
    pub users: Vec<HostUser>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.uploads.validate()?;
        self.auth.validate()?;
        self.dashboard.validate()?;
        self.notifications.validate()?;

        let mut ids = HashSet::new();
        for user in &self.users {
            if !ids.insert(user.id) {
                return Err(ValidationError::DuplicateUser(user.id));
            }
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn validate_path(path: &str) -> Result<(), ValidationError> {
    if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
        return Err(ValidationError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Names of the trusted headers the host's auth layer sets on every request.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub user_id_header: String,
    pub user_name_header: String,
    pub user_email_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            user_id_header: "x-user-id".into(),
            user_name_header: "x-user-name".into(),
            user_email_header: "x-user-email".into(),
        }
    }
}

impl AuthConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        for name in [
            &self.user_id_header,
            &self.user_name_header,
            &self.user_email_header,
        ] {
            if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(ValidationError::InvalidHeaderName(name.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    /// URL prefix for the dashboard and the API (`<mount>/api/...`)
    pub mount: String,
    /// Directory holding the built SPA (`index.html` and assets)
    pub dist_dir: PathBuf,
    /// URL prefix the built assets are served under
    pub assets_path: String,
    /// Vite dev server; when reachable, its HTML is served instead of the build
    pub dev_server: Option<Url>,
    /// Absolute script URLs in the dev server HTML to point at the dev server
    pub dev_scripts: Vec<String>,
    pub login_route: String,
    pub logout_route: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            mount: "/shift".into(),
            dist_dir: PathBuf::from("dist"),
            assets_path: "/shift-assets".into(),
            dev_server: None,
            dev_scripts: vec![
                "/@vite/client".into(),
                "/src/main.ts".into(),
                "/src/main.js".into(),
            ],
            login_route: "/login".into(),
            logout_route: "/logout".into(),
        }
    }
}

impl DashboardConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_path(&self.mount)?;
        validate_path(&self.assets_path)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationsConfig {
    /// The host application handles SHIFT notifications itself; the relay
    /// acknowledges them without dispatching anything.
    pub handled_by_main_app: bool,
    /// SMTP delivery. Notifications are only logged when unset.
    pub mail: Option<MailConfig>,
}

impl NotificationsConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        match &self.mail {
            Some(mail) if mail.from.trim().is_empty() => Err(ValidationError::EmptyMailFrom),
            _ => Ok(()),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Sender mailbox, e.g. `SHIFT <shift@example.com>`
    pub from: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        listener:
            host: 0.0.0.0
            port: 8080
        admin_listener:
            host: 127.0.0.1
            port: 8081
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.shift, SdkConfig::default());
        assert_eq!(config.app.name, "SHIFT");
        assert_eq!(config.uploads, UploadLimits::default());
        assert_eq!(config.auth.user_id_header, "x-user-id");
        assert_eq!(config.dashboard.mount, "/shift");
        assert_eq!(config.dashboard.assets_path, "/shift-assets");
        assert_eq!(config.dashboard.dev_scripts.len(), 3);
        assert!(!config.notifications.handled_by_main_app);
        assert!(config.users.is_empty());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
            listener:
                host: 0.0.0.0
                port: 8080
            admin_listener:
                host: 127.0.0.1
                port: 8081
            shift:
                token: abc
                project: proj-1
                url: https://shift.example.com
            app:
                name: Acme
                url: https://acme.example.com
                env: local
            uploads:
                chunk_size_bytes: 1048576
            dashboard:
                mount: /feedback
                dev_server: http://localhost:5173
            notifications:
                mail:
                    smtp_host: smtp.example.com
                    from: SHIFT <shift@example.com>
            users:
                - id: 1
                  name: Ada
                  email: ada@example.com
        "#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());

        assert!(config.shift.is_configured());
        assert!(config.app.is_local());
        assert_eq!(config.uploads.chunk_size_bytes, 1024 * 1024);
        assert_eq!(config.uploads.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(
            config.dashboard.dev_server.as_ref().map(Url::as_str),
            Some("http://localhost:5173/")
        );
        let mail = config.notifications.mail.unwrap();
        assert_eq!(mail.smtp_port, 587);
        assert_eq!(config.users[0].email, "ada@example.com");
    }

    #[test]
    fn test_validation_errors() {
        let base: Config = serde_yaml::from_str(MINIMAL).unwrap();

        let mut config = base.clone();
        config.listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = base.clone();
        config.dashboard.mount = "/".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidPath(_))
        ));

        let mut config = base.clone();
        config.dashboard.mount = "shift".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidPath(_))
        ));

        let mut config = base.clone();
        config.uploads.max_single_upload_bytes = config.uploads.max_upload_bytes + 1;
        assert!(matches!(config.validate(), Err(ValidationError::Limits(_))));

        let mut config = base.clone();
        config.auth.user_id_header = "bad header".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidHeaderName(_))
        ));

        let mut config = base.clone();
        let user = HostUser {
            id: 7,
            name: "A".into(),
            email: "a@example.com".into(),
        };
        config.users = vec![user.clone(), user];
        assert_eq!(config.validate(), Err(ValidationError::DuplicateUser(7)));
    }
}
