//! Application configuration.
//!
//! Configuration is layered:
//! - built-in defaults
//! - an optional TOML file (`promptbench.toml` or an explicit path)
//! - environment variables (`OPENROUTER_*`, `BRAVE_API_KEY`, `TOOL_LOOP_V2`,
//!   `PROMPTBENCH_*`)
//!
//! The result is validated once and then treated as read-only.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::guardrails::{GuardrailPolicy, ProviderGuardrails};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "promptbench.toml";

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Nudge appended after a round of tool results.
pub const DEFAULT_FINALIZATION_PROMPT: &str =
    "Please use the tool results above to answer my original question.";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Remote completion API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Bearer token.  Usually supplied through `OPENROUTER_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Transport timeout for one request, in seconds.
    pub timeout_secs: u64,
    /// Sent as `HTTP-Referer` for attribution.
    pub referer: Option<String>,
    /// Sent as `X-Title` for attribution.
    pub app_title: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: None,
            timeout_secs: 120,
            referer: None,
            app_title: Some("PromptBench".to_owned()),
        }
    }
}

/// Conversation loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Hard ceiling on model calls in the main loop.
    pub max_iterations: u32,
    /// Tool calls executed per turn; extras are dropped with one warning.
    pub max_tool_calls_per_turn: usize,
    /// Per-call tool timeout in milliseconds.
    pub tool_timeout_ms: u64,
    /// Use streaming gateway calls for main-loop turns.
    pub stream_turns: bool,
    /// Event channel capacity between orchestrator and transport.
    pub event_buffer: usize,
    pub finalization_prompt: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            max_tool_calls_per_turn: 6,
            tool_timeout_ms: 5_000,
            stream_turns: false,
            event_buffer: 64,
            finalization_prompt: DEFAULT_FINALIZATION_PROMPT.to_owned(),
        }
    }
}

impl OrchestratorConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

/// Built-in tool settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Enables the Brave Search backend for `search_web`.
    #[serde(skip_serializing)]
    pub brave_api_key: Option<String>,
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Allowed CORS origins; empty means any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_owned(),
            port: 3000,
            cors_origins: Vec::new(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub orchestrator: OrchestratorConfig,
    /// Per-provider guardrail overrides layered over the built-in table.
    pub guardrails: HashMap<String, ProviderGuardrails>,
    pub tools: ToolsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load defaults, the config file, and environment overrides.
    ///
    /// An explicit `path` must exist; without one, [`DEFAULT_CONFIG_FILE`]
    /// is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("no config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file.  No environment overrides are applied.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AgentError::Config {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config: Self = toml::from_str(&content)?;
        info!(path = %path.display(), "configuration loaded from file");
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENROUTER_API_KEY") {
            self.gateway.api_key = Some(key);
        }
        if let Some(url) = get("OPENROUTER_BASE_URL") {
            self.gateway.base_url = url;
        }
        if let Some(raw) = get("OPENROUTER_TIMEOUT") {
            match raw.trim().parse::<f64>() {
                Ok(secs) if secs > 0.0 => self.gateway.timeout_secs = secs.ceil() as u64,
                _ => warn!(value = %raw, "ignoring invalid OPENROUTER_TIMEOUT"),
            }
        }
        if let Some(referer) = get("OPENROUTER_REFERER") {
            self.gateway.referer = Some(referer);
        }
        if let Some(title) = get("OPENROUTER_APP_TITLE") {
            self.gateway.app_title = Some(title);
        }
        if let Some(key) = get("BRAVE_API_KEY") {
            self.tools.brave_api_key = Some(key);
        }
        if let Some(raw) = get("TOOL_LOOP_V2") {
            self.orchestrator.stream_turns = is_truthy(&raw);
        }
        if let Some(bind) = get("PROMPTBENCH_BIND") {
            self.server.bind = bind;
        }
        if let Some(raw) = get("PROMPTBENCH_PORT") {
            match raw.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %raw, "ignoring invalid PROMPTBENCH_PORT"),
            }
        }
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(AgentError::Config {
                reason: reason.to_owned(),
            })
        };
        if self.gateway.base_url.trim().is_empty() {
            return fail("gateway.base_url must not be empty");
        }
        if self.gateway.timeout_secs == 0 {
            return fail("gateway.timeout_secs must be positive");
        }
        if self.orchestrator.max_iterations == 0 {
            return fail("orchestrator.max_iterations must be at least 1");
        }
        if self.orchestrator.max_tool_calls_per_turn == 0 {
            return fail("orchestrator.max_tool_calls_per_turn must be at least 1");
        }
        if self.orchestrator.tool_timeout_ms == 0 {
            return fail("orchestrator.tool_timeout_ms must be positive");
        }
        Ok(())
    }

    /// The built-in guardrail table with this config's overrides applied.
    pub fn guardrail_policy(&self) -> GuardrailPolicy {
        GuardrailPolicy::builtin().with_overrides(self.guardrails.clone())
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
