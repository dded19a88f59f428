//! Built-in tools for PromptBench -- web search, clock, calculator.
//!
//! Each tool implements [`ToolHandler`] from `promptbench-agent`; use
//! [`builtin_registry`] to get all of them registered under the configured
//! timeout.

pub mod calculator;
pub mod clock;
pub mod web_search;

use std::sync::Arc;

use promptbench_agent::config::AppConfig;
use promptbench_agent::tools::{ToolHandler, ToolRegistry};

pub use calculator::{CalcError, Calculator, Number, evaluate};
pub use clock::CurrentTime;
pub use web_search::WebSearch;

/// Names of the built-in tools, in registration order.
pub const BUILTIN_TOOLS: &[&str] = &["search_web", "get_current_time", "calculate"];

/// The built-in handlers configured from `config`.
pub fn builtin_handlers(config: &AppConfig) -> Vec<Arc<dyn ToolHandler>> {
    let timeout = config.orchestrator.tool_timeout();
    vec![
        Arc::new(WebSearch::new(config.tools.brave_api_key.clone(), timeout)),
        Arc::new(CurrentTime),
        Arc::new(Calculator),
    ]
}

/// A registry holding every built-in tool.
pub fn builtin_registry(config: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new(config.orchestrator.tool_timeout());
    for handler in builtin_handlers(config) {
        registry.register(handler);
    }
    tracing::debug!(
        tools = ?registry.names().collect::<Vec<_>>(),
        timeout_ms = config.orchestrator.tool_timeout_ms,
        "built-in tool registry ready"
    );
    registry
}
