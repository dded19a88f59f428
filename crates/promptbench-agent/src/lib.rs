//! Tool-calling conversation orchestrator for PromptBench.
//!
//! This crate drives multi-turn conversations between a user, a remote
//! language model and a set of locally executed tools, and reports progress
//! as a stream of typed events.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Transport   │────>│ Orchestrator │────>│ ToolRegistry │
//! │ (SSE / CLI)  │<────│ (turn loop)  │     │  (handlers)  │
//! └──────────────┘     └──────┬───────┘     └──────────────┘
//!     StreamEvent             │
//!                      ┌──────┴───────┐     ┌──────────────┐
//!                      │ ModelGateway │     │  Guardrails  │
//!                      │ (OpenRouter) │     │ (per vendor) │
//!                      └──────────────┘     └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`llm`] -- Gateway client, streaming decoder, and wire types.
//! - [`guardrails`] -- Per-provider capability flags.
//! - [`tools`] -- Tool handler trait, registry, and per-turn planning.
//! - [`search_intent`] -- Detection of search intent and time windows.
//! - [`orchestrator`] -- The conversation state machine.
//! - [`events`] -- Stream events and their `data:` framing.
//! - [`request`] -- Conversation requests and parameter parsing.
//! - [`config`] -- Layered application configuration.
//! - [`error`] -- Error types.

pub mod config;
pub mod error;
pub mod events;
pub mod guardrails;
pub mod llm;
pub mod orchestrator;
pub mod request;
pub mod search_intent;
pub mod tools;

// Re-export the most commonly used types at the crate root.
pub use config::AppConfig;
pub use error::{AgentError, GatewayError, Result};
pub use events::{ClientGone, EventSink, StreamEvent, event_channel};
pub use guardrails::{GuardrailPolicy, ProviderGuardrails, provider_id};
pub use llm::{
    CompletionResult, GatewayEvent, GatewayStream, Message, ModelGateway, OpenRouterClient,
    RequestParams, Role, ToolCallRequest, ToolChoice, ToolSchema,
};
pub use orchestrator::{ConversationContext, Orchestrator};
pub use request::{ConversationRequest, RawParams, parse_tool_schemas};
pub use search_intent::{SearchIntentDetector, TimeConstraint, TimeHint};
pub use tools::{
    ToolCategory, ToolError, ToolHandler, ToolMetadata, ToolRegistry, ToolResult, ToolVisibility,
};
