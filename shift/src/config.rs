use proxy::config::{Config as ProxyConfig, ValidationError};
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use url::Url;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    #[serde(default = "default_statsd_port")]
    pub statsd_port: u16,
}

fn default_statsd_port() -> u16 {
    8125
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    pub level: String,
    pub sentry_dsn: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".into(),
            sentry_dsn: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CommonConfig {
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub proxy: ProxyConfig,
}

impl Config {
    /// Loads the file, applies environment overrides and validates.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(path, |key| std::env::var(key).ok())
    }

    pub fn load(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let mut config: Config = serde_yaml::from_reader(file)?;

        config.apply_env(env)?;
        config.proxy.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let shift = &mut self.proxy.shift;
        if let Some(token) = env("SHIFT_TOKEN") {
            shift.token = Some(token);
        }
        if let Some(project) = env("SHIFT_PROJECT") {
            shift.project = Some(project);
        }
        if let Some(url) = env("SHIFT_URL") {
            shift.url = Url::parse(&url).map_err(|source| ConfigError::InvalidUrl {
                var: "SHIFT_URL",
                source,
            })?;
        }

        let app = &mut self.proxy.app;
        if let Some(env_name) = env("APP_ENV") {
            app.env = env_name;
        }
        if let Some(url) = env("APP_URL") {
            app.url = url;
        }
        if let Some(name) = env("APP_NAME") {
            app.name = name;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        source: url::ParseError,
    },
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}
