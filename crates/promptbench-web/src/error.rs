//! Web error type and its HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use promptbench_agent::{AgentError, GatewayError};

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// The request could not be turned into a conversation.
    #[error("{0}")]
    BadRequest(String),

    /// The gateway client could not be constructed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Listener bind or accept failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AgentError> for WebError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::InvalidParameter { .. } => Self::BadRequest(err.to_string()),
            AgentError::Gateway(e) => Self::Gateway(e),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
