//! HTTP surface for PromptBench.
//!
//! Exposes the orchestrator over plain HTTP:
//!
//! - `GET /api/chat/stream` runs one conversation and streams its events as
//!   `text/event-stream` frames.
//! - `GET /api/tools` lists the built-in tools and their schemas.
//! - `GET /api/health` reports version, uptime and whether a gateway key is
//!   configured.

pub mod api;
pub mod chat;
pub mod error;
pub mod server;
pub mod state;

pub use error::WebError;
pub use server::WebServer;
pub use state::AppState;
