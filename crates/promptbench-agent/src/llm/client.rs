//! Model gateway client.
//!
//! [`ModelGateway`] is the seam between the orchestrator and the remote
//! completion API.  [`OpenRouterClient`] implements it against any
//! OpenAI-compatible Chat Completions endpoint (OpenRouter by default), in
//! both blocking and streaming modes.  No retries happen here.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::llm::streaming_openai::decode_sse_stream;
use crate::llm::types::{
    CompletionResult, Message, RequestParams, Role, ToolCallRequest, Usage, normalize_text,
};

/// Lazily consumed sequence of streaming events.  Finite and not
/// restartable; dropping it abandons the underlying request.
pub type GatewayStream = BoxStream<'static, Result<crate::llm::types::GatewayEvent, GatewayError>>;

/// Anything that can answer completion requests.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Single blocking completion call.
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &RequestParams,
    ) -> Result<CompletionResult, GatewayError>;

    /// Token-streaming completion call.
    async fn stream_complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &RequestParams,
    ) -> Result<GatewayStream, GatewayError>;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-compatible completion endpoint.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    config: GatewayConfig,
    http: reqwest::Client,
}

impl OpenRouterClient {
    /// Create a new client.  Fails when no API key is configured.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        if config.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(GatewayError::MissingApiKey);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { config, http })
    }

    fn headers(&self) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        let key = self.config.api_key.as_deref().unwrap_or_default();
        let auth_value = format!("Bearer {key}");
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| GatewayError::Transport {
                reason: format!("invalid authorization header: {e}"),
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(referer) = &self.config.referer
            && let Ok(value) = HeaderValue::from_str(referer)
        {
            headers.insert("HTTP-Referer", value);
        }
        if let Some(title) = &self.config.app_title
            && let Ok(value) = HeaderValue::from_str(title)
        {
            headers.insert("X-Title", value);
        }
        Ok(headers)
    }

    /// Send the request and turn non-success statuses into [`GatewayError::Http`].
    async fn send(&self, body: &Value) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        tracing::debug!(
            url = %url,
            model = %body["model"],
            stream = body["stream"].as_bool().unwrap_or(false),
            "sending completion request"
        );

        let resp = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                message: http_error_message(&text),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelGateway for OpenRouterClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &RequestParams,
    ) -> Result<CompletionResult, GatewayError> {
        let body = build_request_body(model, messages, params, false);
        let resp = self.send(&body).await?;

        let text = resp.text().await.map_err(|e| GatewayError::Transport {
            reason: format!("failed to read response body: {e}"),
        })?;
        let v: Value = serde_json::from_str(&text).map_err(|e| GatewayError::Parse {
            reason: format!("invalid JSON response: {e}"),
        })?;

        let result = parse_completion_response(&v)?;
        if let Some(usage) = result.usage {
            tracing::debug!(
                model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion finished"
            );
        }
        Ok(result)
    }

    async fn stream_complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &RequestParams,
    ) -> Result<GatewayStream, GatewayError> {
        let body = build_request_body(model, messages, params, true);
        let resp = self.send(&body).await?;
        Ok(decode_sse_stream(Box::pin(resp.bytes_stream())))
    }
}

// ===========================================================================
// Wire format conversion (free functions)
// ===========================================================================

/// Build the JSON body for a Chat Completions request.
///
/// Tool-related fields are only sent when tools are declared.
pub fn build_request_body(
    model: &str,
    messages: &[Message],
    params: &RequestParams,
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages_to_openai(messages),
    });

    let numeric = [
        ("temperature", params.temperature),
        ("top_p", params.top_p),
        ("frequency_penalty", params.frequency_penalty),
        ("presence_penalty", params.presence_penalty),
        ("repetition_penalty", params.repetition_penalty),
        ("min_p", params.min_p),
        ("top_a", params.top_a),
    ];
    for (key, value) in numeric {
        if let Some(v) = value {
            body[key] = json!(v);
        }
    }
    if let Some(top_k) = params.top_k {
        body["top_k"] = json!(top_k);
    }
    if let Some(max_tokens) = params.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(seed) = params.seed {
        body["seed"] = json!(seed);
    }

    if !params.tools.is_empty() {
        body["tools"] = json!(params.tools);
        if let Some(choice) = &params.tool_choice {
            body["tool_choice"] = choice.to_wire();
        }
        if let Some(parallel) = params.parallel_tool_calls {
            body["parallel_tool_calls"] = json!(parallel);
        }
    }

    if let Some(format) = &params.response_format {
        body["response_format"] = format.clone();
    }
    if !params.stop.is_empty() {
        body["stop"] = json!(params.stop);
    }
    if let Some(effort) = &params.reasoning_effort {
        body["reasoning"] = json!({ "effort": effort });
    }
    if let Some(logprobs) = params.logprobs {
        body["logprobs"] = json!(logprobs);
    }
    if let Some(top) = params.top_logprobs {
        body["top_logprobs"] = json!(top);
    }
    if let Some(bias) = &params.logit_bias {
        body["logit_bias"] = bias.clone();
    }

    if stream {
        body["stream"] = json!(true);
    }

    body
}

/// Convert messages into the OpenAI Chat Completions wire format.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::System | Role::User => json!({
                "role": msg.role,
                "content": msg.content.as_deref().unwrap_or_default(),
            }),
            Role::Assistant if msg.tool_calls.is_empty() => json!({
                "role": "assistant",
                "content": msg.content.as_deref().unwrap_or_default(),
            }),
            Role::Assistant => {
                let tool_calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments,
                            }
                        })
                    })
                    .collect();
                json!({
                    "role": "assistant",
                    "content": msg.content,
                    "tool_calls": tool_calls,
                })
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id,
                "content": msg.content.as_deref().unwrap_or_default(),
            }),
        })
        .collect()
}

/// Parse a non-streaming Chat Completions response.
pub fn parse_completion_response(v: &Value) -> Result<CompletionResult, GatewayError> {
    let choice = &v["choices"][0];
    let message = &choice["message"];
    if message.is_null() {
        if let Some(msg) = v["error"]["message"].as_str() {
            return Err(GatewayError::Parse {
                reason: msg.to_owned(),
            });
        }
        return Err(GatewayError::Parse {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(index, tc)| {
                    let func = &tc["function"];
                    // Some providers send arguments as an object instead of a string.
                    let arguments = match &func["arguments"] {
                        Value::String(s) => s.clone(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    let id = tc["id"]
                        .as_str()
                        .map(str::to_owned)
                        .unwrap_or_else(|| format!("call_{index}"));
                    ToolCallRequest::new(id, func["name"].as_str().unwrap_or_default(), arguments)
                })
                .filter(|tc| !tc.name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let usage = v.get("usage").filter(|u| !u.is_null()).map(|u| Usage {
        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
    });

    Ok(CompletionResult {
        reasoning: extract_reasoning(message),
        tool_calls,
        content: normalize_text(Some(content_to_text(&message["content"]))),
        finish_reason: choice["finish_reason"].as_str().map(str::to_owned),
        usage,
    })
}

/// Flatten message content into plain text.
///
/// Content is either a string or a list of typed blocks; only `text` blocks
/// contribute, joined by newlines.
pub fn content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Collect reasoning from `reasoning`/`thinking` fields and from
/// `thinking`/`reasoning` content blocks.
fn extract_reasoning(message: &Value) -> Option<String> {
    let mut parts: Vec<&str> = ["reasoning", "thinking"]
        .iter()
        .filter_map(|key| message[*key].as_str())
        .filter(|s| !s.trim().is_empty())
        .collect();

    if let Some(blocks) = message["content"].as_array() {
        for block in blocks {
            let kind = block["type"].as_str().unwrap_or_default().to_lowercase();
            if kind != "thinking" && kind != "reasoning" {
                continue;
            }
            let text = ["thinking", "reasoning", "content", "text"]
                .iter()
                .find_map(|key| block[*key].as_str())
                .unwrap_or_default();
            if !text.trim().is_empty() {
                parts.push(text);
            }
        }
    }

    normalize_text(Some(parts.join("\n")))
}

/// Pull `error.message` out of an error body, falling back to the raw text.
fn http_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_owned))
        .unwrap_or_else(|| body.trim().to_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
