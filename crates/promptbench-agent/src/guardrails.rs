//! Provider guardrail policy.
//!
//! Some upstream providers reject request parameters that the aggregation
//! API otherwise accepts.  [`GuardrailPolicy`] is an immutable table of
//! capability flags keyed by provider id, built once and shared read-only
//! by every orchestrator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Capability flags for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderGuardrails {
    /// May `tool_choice` name one specific function?
    pub allow_forced_tool_choice: bool,
    /// May `parallel_tool_calls` be enabled?
    pub allow_parallel_tool_calls: bool,
    /// May a `response_format` directive be sent?
    pub allow_structured_output: bool,
}

impl ProviderGuardrails {
    /// Everything allowed.
    pub const PERMISSIVE: Self = Self {
        allow_forced_tool_choice: true,
        allow_parallel_tool_calls: true,
        allow_structured_output: true,
    };
}

impl Default for ProviderGuardrails {
    fn default() -> Self {
        Self::PERMISSIVE
    }
}

/// Lookup table from provider id to [`ProviderGuardrails`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardrailPolicy {
    table: HashMap<String, ProviderGuardrails>,
}

impl GuardrailPolicy {
    /// A policy with no entries: every provider is permissive.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// The entries for providers with known incompatibilities.
    pub fn builtin() -> Self {
        let mut table = HashMap::new();
        table.insert(
            "anthropic".to_owned(),
            ProviderGuardrails {
                allow_parallel_tool_calls: false,
                ..ProviderGuardrails::PERMISSIVE
            },
        );
        table.insert(
            "xai".to_owned(),
            ProviderGuardrails {
                allow_forced_tool_choice: false,
                allow_parallel_tool_calls: false,
                allow_structured_output: false,
            },
        );
        Self { table }
    }

    /// Add or replace entries.  Keys are normalized like provider ids.
    pub fn with_overrides(
        mut self,
        overrides: impl IntoIterator<Item = (String, ProviderGuardrails)>,
    ) -> Self {
        for (provider, flags) in overrides {
            self.table.insert(normalize_provider(&provider), flags);
        }
        self
    }

    /// Flags for `provider_id`; unknown providers get the permissive default.
    pub fn guardrails_for(&self, provider_id: &str) -> ProviderGuardrails {
        self.table
            .get(provider_id)
            .copied()
            .unwrap_or(ProviderGuardrails::PERMISSIVE)
    }

    /// Convenience: flags for the provider serving `model`.
    pub fn guardrails_for_model(&self, model: &str) -> ProviderGuardrails {
        self.guardrails_for(&provider_id(model))
    }
}

/// Derive the provider id from a model id.
///
/// `x-ai/grok-4` becomes `xai`, `anthropic/claude-sonnet-4:thinking`
/// becomes `anthropic`.
pub fn provider_id(model: &str) -> String {
    let prefix = model.split('/').next().unwrap_or_default();
    let prefix = prefix.split(':').next().unwrap_or_default();
    normalize_provider(prefix)
}

fn normalize_provider(raw: &str) -> String {
    raw.trim().replace('-', "").to_lowercase()
}
