//! Model gateway layer.
//!
//! - [`types`] -- Messages, tool calls, request parameters, completion results.
//! - [`client`] -- The [`ModelGateway`] trait and its HTTP implementation.
//! - [`streaming_openai`] -- SSE decoding for streamed completions.

pub mod client;
pub mod streaming_openai;
pub mod types;

pub use client::{GatewayStream, ModelGateway, OpenRouterClient};
pub use streaming_openai::{CompletionAssembler, OpenAiStreamDecoder};
pub use types::{
    CompletionKind, CompletionResult, GatewayEvent, Message, RequestParams, Role, ToolCallRequest,
    ToolChoice, ToolSchema, Usage,
};
