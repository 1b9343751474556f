use crate::config::Config;
use crate::errors::{ApiError, Operation};
use crate::notifications::channels::{
    LogChannel, Notifier, NotifyChannel, NotifyError, SmtpChannel,
};
use crate::notifications::directory::{ConfigDirectory, UserDirectory};
use relay::{ClientOptions, HostContext, RelayClient, RelayError, RelayResponse, UpstreamRequest};
use std::sync::Arc;
use std::time::Duration;

const DEV_SERVER_TIMEOUT: Duration = Duration::from_secs(2);

/// Immutable state shared by every request.
pub struct AppState {
    pub config: Config,
    pub client: RelayClient,
    /// Used for the dashboard dev server only.
    pub dev_client: reqwest::Client,
    pub notifier: Notifier,
    pub directory: Arc<dyn UserDirectory>,
}

#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error("could not build HTTP client: {0}")]
    Client(#[from] RelayError),
    #[error("could not build HTTP client: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("could not configure mail: {0}")]
    Mail(#[from] NotifyError),
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, StateError> {
        let channel: Arc<dyn NotifyChannel> = match &config.notifications.mail {
            Some(mail) => Arc::new(SmtpChannel::new(mail)?),
            None => Arc::new(LogChannel),
        };
        let directory = Arc::new(ConfigDirectory::new(config.users.clone()));

        Self::with_parts(config, Notifier::with_channels(vec![channel]), directory)
    }

    pub fn with_parts(
        config: Config,
        notifier: Notifier,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self, StateError> {
        let client = RelayClient::new(ClientOptions::for_host(&config.shift, &config.app))?;
        let dev_client = reqwest::Client::builder()
            .timeout(DEV_SERVER_TIMEOUT)
            .build()?;

        Ok(AppState {
            config,
            client,
            dev_client,
            notifier,
            directory,
        })
    }

    /// Sends `request` and turns transport failures and non-2xx responses
    /// into API errors.
    pub async fn forward(
        &self,
        ctx: &HostContext,
        op: Operation,
        request: UpstreamRequest,
    ) -> Result<RelayResponse, ApiError> {
        let response = self
            .client
            .send(&ctx.credentials, request)
            .await
            .map_err(|e| ApiError::transport(op, e))?;

        if !response.is_success() {
            return Err(ApiError::from_upstream(&response, op));
        }
        Ok(response)
    }
}
