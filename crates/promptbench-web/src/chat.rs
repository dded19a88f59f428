//! `GET /api/chat/stream`: one conversation as a `text/event-stream`.
//!
//! Query parameters are validated up front; anything malformed is a 400
//! with a JSON body before the stream starts.  Once streaming, every
//! response ends with exactly one `done` frame, and closing the connection
//! drops the event receiver, which cancels the conversation.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use promptbench_agent::{ConversationRequest, RawParams, StreamEvent, parse_tool_schemas};

use crate::error::WebError;
use crate::state::AppState;

/// Accepted range for `max_tool_calls`.
pub const MAX_TOOL_CALLS_RANGE: std::ops::RangeInclusive<u32> = 1..=20;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Query string of a chat stream request.
///
/// Fields are listed out rather than flattened from [`RawParams`] because
/// flattened structs lose numeric parsing in query strings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChatStreamQuery {
    pub model: Option<String>,
    pub prompt: String,
    pub system: Option<String>,
    /// JSON array of tool schemas.
    pub tool_schemas: Option<String>,
    /// Older name for `tool_schemas`.
    pub tools: Option<String>,
    pub tool_choice: Option<String>,
    /// Iteration cap override.
    pub max_tool_calls: Option<u32>,

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
    pub response_format: Option<String>,
    pub stop: Option<String>,
    pub logprobs: Option<bool>,
    pub top_logprobs: Option<i64>,
    pub logit_bias: Option<String>,
}

impl ChatStreamQuery {
    /// Validate and convert into a conversation request.
    pub fn into_request(self) -> Result<ConversationRequest, WebError> {
        let model = self
            .model
            .map(|m| m.trim().to_owned())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| WebError::BadRequest("`model` is required".into()))?;

        if let Some(n) = self.max_tool_calls
            && !MAX_TOOL_CALLS_RANGE.contains(&n)
        {
            return Err(WebError::BadRequest(format!(
                "`max_tool_calls` must be within 1..=20, got {n}"
            )));
        }

        let tools = match self.tool_schemas.as_deref().or(self.tools.as_deref()) {
            Some(raw) if !raw.trim().is_empty() => parse_tool_schemas(raw)?,
            _ => Vec::new(),
        };

        let params = RawParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            reasoning_effort: self.reasoning_effort,
            top_k: self.top_k,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            repetition_penalty: self.repetition_penalty,
            min_p: self.min_p,
            top_a: self.top_a,
            seed: self.seed,
            response_format: self.response_format,
            stop: self.stop,
            logprobs: self.logprobs,
            top_logprobs: self.top_logprobs,
            logit_bias: self.logit_bias,
        }
        .into_params()?;

        let mut request = ConversationRequest::new(model, self.prompt)
            .with_tools(tools)
            .with_params(params);
        if let Some(system) = self.system.filter(|s| !s.trim().is_empty()) {
            request = request.with_system(system);
        }
        if let Some(choice) = self.tool_choice {
            request = request.with_tool_choice(choice);
        }
        if let Some(n) = self.max_tool_calls {
            request = request.with_max_iterations(n);
        }
        Ok(request)
    }
}

/// Stream one conversation.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ChatStreamQuery>, QueryRejection>,
) -> Result<Response, WebError> {
    let Query(query) = query.map_err(|e| WebError::BadRequest(e.body_text()))?;
    let request = query.into_request()?;

    let events: BoxStream<'static, StreamEvent> = match &state.orchestrator {
        Some(orchestrator) => {
            tracing::info!(
                model = %request.model,
                tools = request.tools.len(),
                "chat stream started"
            );
            ReceiverStream::new(orchestrator.start(request)).boxed()
        }
        None => stream::iter([StreamEvent::missing_api_key(), StreamEvent::done()]).boxed(),
    };

    Ok(sse_response(events))
}

/// Frame `events` as a `text/event-stream` response.
pub fn sse_response(events: BoxStream<'static, StreamEvent>) -> Response {
    let frames = events.map(|event| Ok::<_, Infallible>(event.to_frame()));
    (
        [
            (CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (X_ACCEL_BUFFERING, HeaderValue::from_static("no")),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}
