//! Tool registry and executor.
//!
//! Handlers register under their function name.  [`ToolRegistry::execute`]
//! runs one call on its own task under a fixed timeout and always returns a
//! [`ToolResult`]: failures are captured, never propagated.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::task::{JoinError, JoinHandle};

use crate::llm::types::ToolSchema;

/// Default per-call execution timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Coarse grouping used for event annotation and dedupe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Search,
    Utility,
    #[default]
    Other,
}

/// How prominently a client should render a tool's activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolVisibility {
    #[default]
    Primary,
    Secondary,
    Hidden,
}

/// Per-tool annotation attached to events by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub category: ToolCategory,
    pub visibility: ToolVisibility,
}

impl ToolMetadata {
    pub const fn new(category: ToolCategory, visibility: ToolVisibility) -> Self {
        Self {
            category,
            visibility,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

/// Why a tool call did not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// The arguments did not satisfy the tool's contract.
    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    /// The tool ran and reported a failure.
    #[error("{reason}")]
    Failed { reason: String },

    /// The call exceeded the executor timeout.
    #[error("Tool '{tool}' timed out after {}", format_timeout(.after))]
    Timeout { tool: String, after: Duration },

    /// No handler is registered under this name.
    #[error("Unknown tool: {name}. Available tools: {available}")]
    UnknownTool { name: String, available: String },

    /// The handler task panicked or was cancelled.
    #[error("Tool '{tool}' crashed: {reason}")]
    Crashed { tool: String, reason: String },
}

impl ToolError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            reason: reason.into(),
        }
    }
}

fn format_timeout(after: &Duration) -> String {
    if after.subsec_millis() == 0 {
        format!("{} seconds", after.as_secs())
    } else {
        format!("{}ms", after.as_millis())
    }
}

/// Outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Echoes the request id.  Carried alongside the result on the wire.
    #[serde(default, skip_serializing)]
    pub id: String,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(result: Value) -> Self {
        Self {
            id: String::new(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            id: String::new(),
            success: false,
            result: None,
            error: Some(error.to_string()),
        }
    }

    /// Interpret a handler payload.  A payload carrying a string `error`
    /// field is a structured failure: reported unsuccessful, payload kept.
    pub fn from_payload(payload: Value) -> Self {
        match payload.get("error").and_then(Value::as_str) {
            Some(error) => Self {
                id: String::new(),
                success: false,
                error: Some(error.to_owned()),
                result: Some(payload),
            },
            None => Self::success(payload),
        }
    }

    /// Attach the id of the request this result answers.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Content of the tool-role message fed back to the model.
    pub fn to_message_content(&self) -> String {
        let value = if self.success {
            self.result.clone().unwrap_or_else(|| json!({}))
        } else {
            json!({ "error": self.error.as_deref().unwrap_or("Tool execution failed") })
        };
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// A sandboxed, side-effect-bounded tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Function name the model calls this tool by.
    fn name(&self) -> &str;

    /// Schema advertised to the model.
    fn schema(&self) -> ToolSchema;

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::default()
    }

    /// Run the tool.
    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name-keyed set of tool handlers plus the execution timeout.
#[derive(Clone)]
pub struct ToolRegistry {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
    timeout: Duration,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.handlers.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_TIMEOUT)
    }
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            handlers: BTreeMap::new(),
            timeout,
        }
    }

    /// Register a handler, replacing any previous one with the same name.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name().to_owned();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(tool = %name, "replaced previously registered tool");
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, handler: impl ToolHandler + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Schemas of every registered tool, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.handlers.values().map(|h| h.schema()).collect()
    }

    /// Annotation for `name`; unknown tools are `other`/`primary`.
    pub fn metadata_for(&self, name: &str) -> ToolMetadata {
        self.handlers
            .get(name)
            .map(|h| h.metadata())
            .unwrap_or_default()
    }

    /// Execute one call.  Never fails outward: unknown tools, handler
    /// errors, panics and timeouts all become unsuccessful results.
    ///
    /// The handler runs on its own task, aborted if this future is dropped.
    pub async fn execute(&self, name: &str, args: Map<String, Value>) -> ToolResult {
        let Some(handler) = self.handlers.get(name).cloned() else {
            tracing::warn!(tool = %name, "call to unknown tool");
            let available = self.names().collect::<Vec<_>>().join(", ");
            return ToolResult::failure(ToolError::UnknownTool {
                name: name.to_owned(),
                available,
            });
        };

        let started = std::time::Instant::now();
        let task = AbortOnDrop(tokio::spawn(async move { handler.call(args).await }));

        let result = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => ToolResult::failure(ToolError::Timeout {
                tool: name.to_owned(),
                after: self.timeout,
            }),
            Ok(Err(join_err)) => ToolResult::failure(crashed(name, join_err)),
            Ok(Ok(Err(e))) => ToolResult::failure(e),
            Ok(Ok(Ok(payload))) => ToolResult::from_payload(payload),
        };

        tracing::debug!(
            tool = %name,
            success = result.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool call finished"
        );
        result
    }
}

fn crashed(tool: &str, err: JoinError) -> ToolError {
    let reason = if err.is_panic() {
        "handler panicked".to_owned()
    } else {
        err.to_string()
    };
    tracing::error!(tool, %reason, "tool task failed");
    ToolError::Crashed {
        tool: tool.to_owned(),
        reason,
    }
}

/// Join handle that aborts its task when dropped before completion.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
