//! Agent error types.
//!
//! Gateway failures surface as [`GatewayError`]; everything else the crate
//! can fail with is folded into [`AgentError`].  Tool failures never appear
//! here: they are captured inside a [`ToolResult`](crate::tools::ToolResult).

/// Failure talking to the remote completion API.
///
/// The gateway never retries on its own; the orchestrator decides what a
/// failure means for the conversation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Network, TLS, or timeout failure before a response was received.
    #[error("gateway transport error: {reason}")]
    Transport { reason: String },

    /// The API answered with a non-success status.
    #[error("gateway returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The response body was not the shape we expect.
    #[error("gateway response parse error: {reason}")]
    Parse { reason: String },

    /// The token stream was interrupted or carried invalid data.
    #[error("gateway stream error: {reason}")]
    Stream { reason: String },

    /// No API key is configured for the gateway.
    #[error("missing api key for gateway")]
    MissingApiKey,
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            reason: err.to_string(),
        }
    }
}

/// Unified error type for the agent crate.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Gateway -------------------------------------------------------------
    /// A call to the completion API failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    // -- Configuration -------------------------------------------------------
    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// A request parameter could not be interpreted.
    #[error("invalid request parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration could not be parsed.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Reading a configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;
