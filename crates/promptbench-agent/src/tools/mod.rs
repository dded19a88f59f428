//! Tool registry, executor, and per-turn call planning.
//!
//! - [`registry`] -- [`ToolHandler`] trait, [`ToolRegistry`], result types.
//! - [`plan`] -- Clamp and dedupe policy applied to one turn's tool calls.

pub mod plan;
pub mod registry;

pub use plan::{PlannedCall, TurnPlan, dedup_key};
pub use registry::{
    ToolCategory, ToolError, ToolHandler, ToolMetadata, ToolRegistry, ToolResult, ToolVisibility,
};
