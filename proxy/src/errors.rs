use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay::upload::UploadError;
use relay::{ContextError, RelayError, RelayResponse};
use serde::Serialize;

/// A call to the SHIFT API made on behalf of one route.
#[derive(Clone, Copy, Debug)]
pub struct Operation {
    /// Completes "Failed to ...", e.g. `fetch tasks`.
    pub action: &'static str,
    /// Status used when the upstream status is neither 4xx nor 5xx.
    pub default_status: StatusCode,
}

impl Operation {
    pub const fn read(action: &'static str) -> Self {
        Operation {
            action,
            default_status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn write(action: &'static str) -> Self {
        Operation {
            action,
            default_status: StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("{0}")]
    Validation(String),
    #[error("{message}")]
    Upstream { status: StatusCode, message: String },
    #[error("Failed to {action}: {source}")]
    Transport {
        action: &'static str,
        source: RelayError,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Maps a non-2xx upstream response: 4xx passes through, 5xx becomes 500
    /// and anything else takes the operation's default.
    pub fn from_upstream(response: &RelayResponse, op: Operation) -> Self {
        let status = if response.status.is_client_error() {
            response.status
        } else if response.status.is_server_error() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            op.default_status
        };

        ApiError::Upstream {
            status,
            message: response
                .message()
                .unwrap_or_else(|| format!("Failed to {}", op.action)),
        }
    }

    pub fn transport(op: Operation, source: RelayError) -> Self {
        ApiError::Transport {
            action: op.action,
            source,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Context(ContextError::ConfigMissing) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Context(ContextError::Unauthenticated) => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Upstream { status, .. } => *status,
            ApiError::Transport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::Empty | UploadError::TooLarge { .. } | UploadError::ChunkTooLarge { .. } => {
                ApiError::Validation(e.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, %status, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }

        let body = Json(ErrorBody {
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}
