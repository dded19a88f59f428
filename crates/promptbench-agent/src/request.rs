//! Conversation requests and parameter parsing.
//!
//! Transports hand the orchestrator a [`ConversationRequest`].  Loosely typed
//! client input (query strings, CLI flags) is first collected into
//! [`RawParams`] and converted with [`RawParams::into_params`], which applies
//! defaults, range checks, and the shorthand forms clients are allowed to use.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::types::{RequestParams, ToolSchema};

/// Everything the orchestrator needs for one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    /// Declared tool schemas; empty means no tool calling.
    pub tools: Vec<ToolSchema>,
    /// Raw `tool_choice` directive: `auto`, `none`, `required`, or a tool name.
    pub tool_choice: Option<String>,
    /// Overrides the configured iteration cap.
    pub max_iterations: Option<u32>,
    pub params: RequestParams,
}

impl ConversationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            tools: Vec::new(),
            tool_choice: None,
            max_iterations: None,
            params: RequestParams::with_default_sampling(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: impl Into<String>) -> Self {
        self.tool_choice = Some(choice.into());
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn with_params(mut self, params: RequestParams) -> Self {
        self.params = params;
        self
    }

    /// System and user prompt joined, as used for intent detection.
    pub fn prompt_text(&self) -> String {
        format!("{}\n{}", self.system.as_deref().unwrap_or_default(), self.prompt)
    }
}

/// Parse a JSON-encoded array of tool schemas.
pub fn parse_tool_schemas(raw: &str) -> Result<Vec<ToolSchema>> {
    let value: Value = serde_json::from_str(raw).map_err(|e| AgentError::InvalidParameter {
        name: "tool_schemas".into(),
        reason: format!("invalid tools JSON: {e}"),
    })?;
    if !value.is_array() {
        return Err(AgentError::InvalidParameter {
            name: "tool_schemas".into(),
            reason: "tools must be a JSON array".into(),
        });
    }
    serde_json::from_value(value).map_err(|e| AgentError::InvalidParameter {
        name: "tool_schemas".into(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Raw parameters
// ---------------------------------------------------------------------------

/// Client-supplied sampling knobs before validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
    pub top_k: Option<u32>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub repetition_penalty: Option<f64>,
    pub min_p: Option<f64>,
    pub top_a: Option<f64>,
    pub seed: Option<i64>,
    /// JSON object, or `json` / `json_object` / `jsonobject`.
    pub response_format: Option<String>,
    /// Comma- or newline-separated stop sequences.
    pub stop: Option<String>,
    pub logprobs: Option<bool>,
    pub top_logprobs: Option<i64>,
    /// JSON object mapping token ids to bias values.
    pub logit_bias: Option<String>,
}

impl RawParams {
    /// Validate and convert.  Unset temperature and top_p take the
    /// defaults from [`RequestParams::with_default_sampling`].
    pub fn into_params(self) -> Result<RequestParams> {
        let defaults = RequestParams::with_default_sampling();

        let temperature = self.temperature.or(defaults.temperature);
        check_range("temperature", temperature, 0.0, 2.0)?;
        let top_p = self.top_p.or(defaults.top_p);
        check_range("top_p", top_p, 0.0, 1.0)?;
        if self.max_tokens == Some(0) {
            return Err(AgentError::InvalidParameter {
                name: "max_tokens".into(),
                reason: "must be at least 1".into(),
            });
        }

        let top_logprobs = self.top_logprobs.map(clamp_top_logprobs);
        let logprobs = if top_logprobs.is_some() {
            Some(true)
        } else {
            self.logprobs
        };

        let logit_bias = self.logit_bias.as_deref().and_then(|raw| {
            match serde_json::from_str::<Value>(raw) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring unparseable logit_bias");
                    None
                }
            }
        });

        Ok(RequestParams {
            temperature,
            top_p,
            top_k: self.top_k,
            max_tokens: self.max_tokens,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            repetition_penalty: self.repetition_penalty,
            min_p: self.min_p,
            top_a: self.top_a,
            seed: self.seed,
            response_format: self.response_format.as_deref().and_then(parse_response_format),
            stop: self.stop.as_deref().map(parse_stop).unwrap_or_default(),
            reasoning_effort: self.reasoning_effort.as_deref().and_then(parse_reasoning_effort),
            logprobs,
            top_logprobs,
            logit_bias,
            ..RequestParams::default()
        })
    }
}

fn check_range(name: &str, value: Option<f64>, min: f64, max: f64) -> Result<()> {
    match value {
        Some(v) if !(min..=max).contains(&v) => Err(AgentError::InvalidParameter {
            name: name.to_owned(),
            reason: format!("{v} is outside {min}..={max}"),
        }),
        _ => Ok(()),
    }
}

/// Interpret a `response_format` directive.
pub fn parse_response_format(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(raw) {
        return Some(v);
    }
    match raw.to_lowercase().as_str() {
        "json" | "json_object" | "jsonobject" => Some(json!({"type": "json_object"})),
        _ => None,
    }
}

/// Split stop sequences on commas and newlines, dropping blanks.
pub fn parse_stop(raw: &str) -> Vec<String> {
    raw.split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// `auto` and blank mean "let the provider decide" and are omitted.
pub fn parse_reasoning_effort(raw: &str) -> Option<String> {
    let effort = raw.trim().to_lowercase();
    (!effort.is_empty() && effort != "auto").then_some(effort)
}

/// Providers accept between 1 and 5 alternatives per token.
pub fn clamp_top_logprobs(n: i64) -> u8 {
    n.clamp(1, 5) as u8
}
