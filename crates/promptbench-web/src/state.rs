//! Shared application state for the HTTP handlers.

use std::sync::Arc;
use std::time::Instant;

use promptbench_agent::{
    AppConfig, GatewayError, ModelGateway, OpenRouterClient, Orchestrator, ToolRegistry,
};

use crate::error::WebError;

/// State shared across all request handlers via `Arc`.
#[derive(Debug)]
pub struct AppState {
    /// `None` when no gateway key is configured; chat streams then answer
    /// with a warning instead of calling the model.
    pub orchestrator: Option<Orchestrator>,
    /// Tools offered to conversations and listed by `/api/tools`.
    pub registry: Arc<ToolRegistry>,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

impl AppState {
    /// Assemble state around an explicit gateway.
    pub fn new(
        config: AppConfig,
        registry: ToolRegistry,
        gateway: Option<Arc<dyn ModelGateway>>,
    ) -> Self {
        let registry = Arc::new(registry);
        let orchestrator = gateway.map(|gateway| {
            Orchestrator::new(
                gateway,
                Arc::clone(&registry),
                Arc::new(config.guardrail_policy()),
                config.orchestrator.clone(),
            )
        });
        Self {
            orchestrator,
            registry,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    /// Build the OpenRouter client and the built-in tools from `config`.
    ///
    /// A missing API key is not fatal: the server still starts and reports
    /// the problem on every chat stream.
    pub fn from_config(config: AppConfig) -> Result<Self, WebError> {
        let gateway: Option<Arc<dyn ModelGateway>> =
            match OpenRouterClient::new(config.gateway.clone()) {
                Ok(client) => Some(Arc::new(client)),
                Err(GatewayError::MissingApiKey) => {
                    tracing::warn!("OPENROUTER_API_KEY is not set, chat streams will only warn");
                    None
                }
                Err(e) => return Err(e.into()),
            };
        let registry = promptbench_tools::builtin_registry(&config);
        Ok(Self::new(config, registry, gateway))
    }

    pub fn gateway_configured(&self) -> bool {
        self.orchestrator.is_some()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
