//! Core types for talking to the completion API.
//!
//! These types model the data flowing between the orchestrator and the
//! model gateway.  The [`super::client`] module translates them into the
//! OpenAI-compatible wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user.
    User,
    /// Output from the model.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,

    /// The textual content of the message.
    ///
    /// `None` for assistant messages that only carry tool calls.
    #[serde(default)]
    pub content: Option<String>,

    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Identifies which tool call this message answers (tool role only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Create an assistant text message.  Empty text is recorded as `None`.
    pub fn assistant(content: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.filter(|c| !c.is_empty()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message that records tool-call requests.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool result message linked to `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model.
///
/// The argument string is kept exactly as the model produced it so it can be
/// echoed back in the conversation history without re-encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Opaque identifier assigned by the model.
    pub id: String,

    /// Name of the tool to invoke.
    pub name: String,

    /// Raw JSON-encoded arguments.
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the argument string into a JSON object.
    ///
    /// Malformed or non-object arguments degrade to `{}` and are logged; a
    /// bad argument string never aborts the turn.
    pub fn parsed_arguments(&self) -> Map<String, Value> {
        if self.arguments.trim().is_empty() {
            return Map::new();
        }
        match serde_json::from_str::<Value>(&self.arguments) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                tracing::warn!(
                    tool = %self.name,
                    id = %self.id,
                    kind = %json_kind(&other),
                    "tool arguments are not a JSON object, using empty arguments"
                );
                Map::new()
            }
            Err(e) => {
                tracing::warn!(
                    tool = %self.name,
                    id = %self.id,
                    error = %e,
                    "malformed tool arguments, using empty arguments"
                );
                Map::new()
            }
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tool schemas
// ---------------------------------------------------------------------------

/// A callable tool description in the OpenAI function format:
/// `{"type": "function", "function": {"name", "description", "parameters"}}`.
///
/// The original JSON is kept verbatim and passed through to the gateway
/// unchanged; only the function name is extracted for lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ToolSchema {
    name: String,
    raw: Value,
}

impl ToolSchema {
    /// Build a function schema from its parts.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        let name = name.into();
        let raw = json!({
            "type": "function",
            "function": {
                "name": name,
                "description": description.into(),
                "parameters": parameters,
            }
        });
        Self { name, raw }
    }

    /// The declared function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema exactly as declared.
    pub fn as_value(&self) -> &Value {
        &self.raw
    }
}

impl TryFrom<Value> for ToolSchema {
    type Error = String;

    fn try_from(raw: Value) -> std::result::Result<Self, Self::Error> {
        let name = raw["function"]["name"]
            .as_str()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| "tool schema is missing `function.name`".to_owned())?
            .to_owned();
        Ok(Self { name, raw })
    }
}

impl From<ToolSchema> for Value {
    fn from(schema: ToolSchema) -> Self {
        schema.raw
    }
}

/// Directive controlling whether and which tool the model must call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    /// The model decides.
    #[default]
    Auto,
    /// Tools must not be called.
    None,
    /// Some tool must be called.
    Required,
    /// This specific function must be called.
    Function(String),
}

impl ToolChoice {
    /// Interpret a client-supplied directive against the declared tool names.
    ///
    /// `auto`, `none` and `required` map to themselves; a declared tool name
    /// forces that function; anything else degrades to `auto`.
    pub fn parse<'a>(raw: &str, mut declared: impl Iterator<Item = &'a str>) -> Self {
        let raw = raw.trim();
        match raw {
            "" | "auto" => return Self::Auto,
            "none" => return Self::None,
            "required" => return Self::Required,
            _ => {}
        }
        if declared.any(|d| d == raw) {
            Self::Function(raw.to_owned())
        } else {
            Self::Auto
        }
    }

    /// Whether this directive forces a tool call, either a specific
    /// function or any tool.
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::Required | Self::Function(_))
    }

    /// Wire representation for the `tool_choice` request field.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Auto => json!("auto"),
            Self::None => json!("none"),
            Self::Required => json!("required"),
            Self::Function(name) => json!({"type": "function", "function": {"name": name}}),
        }
    }
}

// ---------------------------------------------------------------------------
// Request parameters
// ---------------------------------------------------------------------------

/// Everything besides the model id and messages that goes into a completion
/// request.
///
/// `None` fields are omitted from the wire body entirely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub repetition_penalty: Option<f64>,
    pub min_p: Option<f64>,
    pub top_a: Option<f64>,
    pub seed: Option<i64>,

    /// Declared tool schemas, passed through unchanged.
    pub tools: Vec<ToolSchema>,
    /// Only sent when `tools` is non-empty.
    pub tool_choice: Option<ToolChoice>,
    pub parallel_tool_calls: Option<bool>,

    /// Structured-output directive, e.g. `{"type": "json_object"}`.
    pub response_format: Option<Value>,
    pub stop: Vec<String>,
    /// Reasoning effort hint (`low`, `medium`, `high`).
    pub reasoning_effort: Option<String>,

    pub logprobs: Option<bool>,
    pub top_logprobs: Option<u8>,
    pub logit_bias: Option<Value>,
}

impl RequestParams {
    /// Sampling defaults applied to every conversation unless overridden.
    pub fn with_default_sampling() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(1.0),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Completion results
// ---------------------------------------------------------------------------

/// Which branch a parsed completion drives the orchestrator into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    ToolCalls,
    Content,
    Empty,
}

/// One normalized completion, regardless of provider response shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResult {
    /// Reasoning or thinking text surfaced by the model.
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    /// Final text content.  Never `Some` with blank text.
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl CompletionResult {
    /// A result carrying only text content.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: normalize_text(Some(content.into())),
            ..Self::default()
        }
    }

    /// A result carrying only tool calls.
    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::default()
        }
    }

    /// Attach reasoning text.
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = normalize_text(Some(reasoning.into()));
        self
    }

    /// Tool calls take priority over content; blank content counts as none.
    pub fn kind(&self) -> CompletionKind {
        if !self.tool_calls.is_empty() {
            CompletionKind::ToolCalls
        } else if self.content.is_some() {
            CompletionKind::Content
        } else {
            CompletionKind::Empty
        }
    }
}

/// Map blank strings to `None`.
pub(crate) fn normalize_text(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty())
}

/// Token usage reported by the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

// ---------------------------------------------------------------------------
// Streaming events
// ---------------------------------------------------------------------------

/// Incremental events produced by a streaming completion call.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A fragment of reasoning text.
    Reasoning(String),
    /// A fragment of answer text.
    ContentDelta(String),
    /// A fragment of a tool call, correlated by `index`.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// Usage totals, usually in the final chunk.
    Usage(Usage),
    /// The model stopped, with the reported reason.
    Finished(Option<String>),
}
