//! Stream events and their wire framing.
//!
//! The orchestrator writes [`StreamEvent`]s into an [`EventSink`]; a
//! transport drains the paired receiver and frames each event as
//! `data: <json>\n\n`.  A closed receiver is the cancellation signal.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::llm::types::ToolCallRequest;
use crate::tools::{ToolCategory, ToolMetadata, ToolResult, ToolVisibility};

/// Warning code attached when a turn's tool calls were clamped.
pub const CODE_TOOL_CLAMP: &str = "TOOL_CLAMP";
/// Warning code attached when the iteration cap ended the conversation.
pub const CODE_ITERATION_CAP: &str = "ITERATION_CAP";
/// Warning code attached when no gateway API key is configured.
pub const CODE_MISSING_API_KEY: &str = "MISSING_API_KEY";

/// One event on the wire.  Append-only: nothing is ever retracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Reasoning {
        content: String,
    },
    /// Batch announcement of the calls about to run this turn.
    ToolCalls {
        calls: Vec<ToolCallRequest>,
    },
    ToolExecuting {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<ToolCategory>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        visibility: Option<ToolVisibility>,
    },
    ToolResult {
        id: String,
        name: String,
        result: ToolResult,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<ToolCategory>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        visibility: Option<ToolVisibility>,
    },
    Content {
        content: String,
    },
    Warning {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Done {
        done: bool,
    },
}

impl StreamEvent {
    pub fn reasoning(content: impl Into<String>) -> Self {
        Self::Reasoning {
            content: content.into(),
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self::Content {
            content: content.into(),
        }
    }

    pub fn warning(message: impl Into<String>, code: Option<&str>) -> Self {
        Self::Warning {
            message: message.into(),
            code: code.map(str::to_owned),
        }
    }

    /// Sent instead of a conversation when no gateway key is configured.
    pub fn missing_api_key() -> Self {
        Self::warning(
            "Set OPENROUTER_API_KEY to enable streaming.",
            Some(CODE_MISSING_API_KEY),
        )
    }

    pub fn done() -> Self {
        Self::Done { done: true }
    }

    pub fn tool_executing(id: &str, name: &str, meta: ToolMetadata) -> Self {
        Self::ToolExecuting {
            id: id.to_owned(),
            name: name.to_owned(),
            category: Some(meta.category),
            visibility: Some(meta.visibility),
        }
    }

    pub fn tool_result(id: &str, name: &str, result: ToolResult, meta: ToolMetadata) -> Self {
        Self::ToolResult {
            id: id.to_owned(),
            name: name.to_owned(),
            result,
            category: Some(meta.category),
            visibility: Some(meta.visibility),
        }
    }

    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reasoning { .. } => "reasoning",
            Self::ToolCalls { .. } => "tool_calls",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolResult { .. } => "tool_result",
            Self::Content { .. } => "content",
            Self::Warning { .. } => "warning",
            Self::Done { .. } => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// Frame as `data: <json>\n\n`.
    pub fn to_frame(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("data: {json}\n\n"),
            Err(e) => {
                tracing::error!(kind = self.kind(), error = %e, "failed to serialize event");
                let fallback = Self::warning(format!("failed to serialize {} event", self.kind()), None);
                let json = serde_json::to_string(&fallback).unwrap_or_default();
                format!("data: {json}\n\n")
            }
        }
    }

    /// Parse one frame back into an event.  Used by clients and tests.
    pub fn from_frame(frame: &str) -> Option<Self> {
        let data = frame.trim().strip_prefix("data:")?.trim();
        serde_json::from_str(data).ok()
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// The client stopped listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client disconnected")]
pub struct ClientGone;

/// Sending half of an event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

/// Create a bounded event channel.  A full buffer applies backpressure to
/// the orchestrator.
pub fn event_channel(buffer: usize) -> (EventSink, mpsc::Receiver<StreamEvent>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (EventSink { tx }, rx)
}

impl EventSink {
    /// Send one event, waiting for buffer space.
    pub async fn emit(&self, event: StreamEvent) -> Result<(), ClientGone> {
        tracing::trace!(kind = event.kind(), "emitting event");
        self.tx.send(event).await.map_err(|_| ClientGone)
    }

    /// Resolves once the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
