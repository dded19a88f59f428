//! SSE stream decoding for the OpenAI-compatible Chat Completions API.
//!
//! The streaming format sends `data:` lines whose JSON payloads contain
//! `choices[].delta` objects, terminated by a `data: [DONE]` sentinel.
//! [`OpenAiStreamDecoder`] turns each line into [`GatewayEvent`]s and
//! [`CompletionAssembler`] folds those events back into one
//! [`CompletionResult`] when a caller needs the whole turn.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;

use crate::error::GatewayError;
use crate::llm::types::{CompletionResult, GatewayEvent, ToolCallRequest, Usage, normalize_text};

// ---------------------------------------------------------------------------
// Line decoder
// ---------------------------------------------------------------------------

/// Decodes individual SSE lines into gateway events.
#[derive(Debug, Default)]
pub struct OpenAiStreamDecoder {
    /// Whether the `[DONE]` sentinel has been received.
    done: bool,
}

impl OpenAiStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the `[DONE]` sentinel has been received.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a single SSE line from the stream.
    ///
    /// Blank lines, comments, and non-`data:` fields produce no events.
    pub fn feed_line(&mut self, line: &str) -> Result<Vec<GatewayEvent>, GatewayError> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with(':') {
            return Ok(Vec::new());
        }

        let Some(data) = line.strip_prefix("data:") else {
            return Ok(Vec::new());
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(Vec::new());
        }

        let v: Value = serde_json::from_str(data).map_err(|e| GatewayError::Stream {
            reason: format!("invalid JSON in SSE data: {e}"),
        })?;

        // Some providers report mid-stream failures as an `error` object.
        if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
            let message = err["message"].as_str().unwrap_or("unknown stream error");
            return Err(GatewayError::Stream {
                reason: message.to_owned(),
            });
        }

        let mut events = Vec::new();
        let choice = &v["choices"][0];
        let delta = &choice["delta"];

        if !delta.is_null() {
            for key in ["reasoning", "thinking", "reasoning_content"] {
                if let Some(text) = delta[key].as_str()
                    && !text.is_empty()
                {
                    events.push(GatewayEvent::Reasoning(text.to_owned()));
                }
            }

            if let Some(content) = delta["content"].as_str()
                && !content.is_empty()
            {
                events.push(GatewayEvent::ContentDelta(content.to_owned()));
            }

            if let Some(tool_calls) = delta["tool_calls"].as_array() {
                for tc in tool_calls {
                    let func = &tc["function"];
                    events.push(GatewayEvent::ToolCallDelta {
                        index: tc["index"].as_u64().unwrap_or(0) as usize,
                        id: tc["id"].as_str().map(str::to_owned),
                        name: func["name"].as_str().map(str::to_owned),
                        arguments: func["arguments"].as_str().unwrap_or_default().to_owned(),
                    });
                }
            }
        }

        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            events.push(GatewayEvent::Usage(Usage {
                prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            }));
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            events.push(GatewayEvent::Finished(Some(reason.to_owned())));
        }

        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Byte stream adapter
// ---------------------------------------------------------------------------

struct DecodeState<S> {
    bytes: S,
    buffer: Vec<u8>,
    decoder: OpenAiStreamDecoder,
    pending: VecDeque<GatewayEvent>,
    finished: bool,
}

impl<S> DecodeState<S> {
    /// Decode every complete line currently in the buffer.
    fn drain_lines(&mut self) -> Result<(), GatewayError> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.feed(&line)?;
            if self.decoder.is_done() {
                self.finished = true;
                self.buffer.clear();
                break;
            }
        }
        Ok(())
    }

    fn feed(&mut self, line: &[u8]) -> Result<(), GatewayError> {
        let line = std::str::from_utf8(line).map_err(|e| GatewayError::Stream {
            reason: format!("invalid UTF-8 in stream: {e}"),
        })?;
        let events = self.decoder.feed_line(line)?;
        self.pending.extend(events);
        Ok(())
    }
}

/// Turn a raw byte stream of SSE data into a stream of gateway events.
///
/// Lines are reassembled across chunk boundaries before decoding, so
/// multi-byte characters split between chunks survive.  The stream ends at
/// `[DONE]`, at the end of the input, or after the first error.
pub fn decode_sse_stream<S, B, E>(bytes: S) -> BoxStream<'static, Result<GatewayEvent, GatewayError>>
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        bytes,
        buffer: Vec::new(),
        decoder: OpenAiStreamDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(chunk.as_ref());
                    if let Err(e) = st.drain_lines() {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    let err = GatewayError::Stream {
                        reason: format!("stream read error: {e}"),
                    };
                    return Some((Err(err), st));
                }
                None => {
                    st.finished = true;
                    let rest = std::mem::take(&mut st.buffer);
                    if let Err(e) = st.feed(&rest) {
                        return Some((Err(e), st));
                    }
                }
            }
        }
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

/// Folds streamed [`GatewayEvent`]s into a single [`CompletionResult`].
#[derive(Debug, Default)]
pub struct CompletionAssembler {
    reasoning: String,
    content: String,
    /// In-progress tool calls keyed by their stream `index`.  Indices come
    /// from the provider and may be sparse.
    builders: BTreeMap<usize, ToolCallBuilder>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl CompletionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &GatewayEvent) {
        match event {
            GatewayEvent::Reasoning(text) => self.reasoning.push_str(text),
            GatewayEvent::ContentDelta(text) => self.content.push_str(text),
            GatewayEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let builder = self.builders.entry(*index).or_default();
                if let Some(id) = id
                    && builder.id.is_empty()
                {
                    builder.id = id.clone();
                }
                if let Some(name) = name {
                    builder.name.push_str(name);
                }
                builder.arguments.push_str(arguments);
            }
            GatewayEvent::Usage(usage) => self.usage = Some(*usage),
            GatewayEvent::Finished(reason) => self.finish_reason = reason.clone(),
        }
    }

    /// Text content accumulated so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Finish assembly.  Calls that never received a name are dropped; calls
    /// that never received an id get a positional one.
    pub fn finish(self) -> CompletionResult {
        let tool_calls = self
            .builders
            .into_iter()
            .filter(|(_, b)| !b.name.is_empty())
            .map(|(index, b)| {
                let id = if b.id.is_empty() {
                    format!("call_{index}")
                } else {
                    b.id
                };
                ToolCallRequest::new(id, b.name, b.arguments)
            })
            .collect();

        CompletionResult {
            reasoning: normalize_text(Some(self.reasoning)),
            tool_calls,
            content: normalize_text(Some(self.content)),
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
