//! Catalogue and health endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use serde_json::Value;

use promptbench_agent::{ToolCategory, ToolVisibility};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /api/tools
// ---------------------------------------------------------------------------

/// One registered tool as seen by clients.
#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub category: ToolCategory,
    pub visibility: ToolVisibility,
    /// The function schema, in the shape clients send back as `tool_schemas`.
    pub schema: Value,
}

/// List every registered tool, sorted by name.
pub async fn tools(State(state): State<Arc<AppState>>) -> Json<Vec<ToolInfo>> {
    let tools = state
        .registry
        .schemas()
        .into_iter()
        .map(|schema| {
            let name = schema.name().to_owned();
            let meta = state.registry.metadata_for(&name);
            ToolInfo {
                name,
                category: meta.category,
                visibility: meta.visibility,
                schema: schema.as_value().clone(),
            }
        })
        .collect();
    Json(tools)
}

// ---------------------------------------------------------------------------
// GET /api/health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` when a gateway key is configured, `degraded` otherwise.
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub gateway_configured: bool,
    pub tools: Vec<String>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let gateway_configured = state.gateway_configured();
    Json(HealthResponse {
        status: if gateway_configured { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        gateway_configured,
        tools: state.registry.names().map(str::to_owned).collect(),
    })
}
