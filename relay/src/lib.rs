//! Client side of the SHIFT integration: configuration, caller identity and
//! every call made to the remote SHIFT API.

pub mod client;
pub mod config;
pub mod context;
pub mod download;
pub mod metrics_defs;
pub mod multipart;
pub mod upload;

#[cfg(test)]
mod testutils;

pub use client::{ClientOptions, RelayClient, RelayError, RelayResponse, UpstreamRequest};
pub use config::{AppConfig, Credentials, SdkConfig, UploadLimits};
pub use context::{ContextError, HostContext, HostUser};
