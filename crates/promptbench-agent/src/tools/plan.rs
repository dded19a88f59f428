//! Per-turn tool call planning.
//!
//! Before a turn's calls are dispatched they are clamped to the configured
//! maximum (first N by arrival order) and search-category calls with the
//! same normalized arguments are collapsed onto one execution.  Collapsed
//! calls still get their own result, mirrored from the call they duplicate.

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::llm::types::ToolCallRequest;
use crate::search_intent::TimeConstraint;
use crate::tools::registry::{ToolCategory, ToolMetadata, ToolRegistry};

/// One call that survived the clamp.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCall {
    pub request: ToolCallRequest,
    /// Parsed arguments, with search filters filled in where applicable.
    pub arguments: Map<String, Value>,
    pub metadata: ToolMetadata,
    /// Index of the earlier call in this plan whose result this one mirrors.
    pub duplicate_of: Option<usize>,
}

/// The calls of one turn after clamp and dedupe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnPlan {
    pub calls: Vec<PlannedCall>,
    /// Calls beyond the clamp limit, in arrival order.  Never executed.
    pub dropped: Vec<ToolCallRequest>,
}

impl TurnPlan {
    /// Build the plan for one turn.
    ///
    /// `time_constraint`, when present, fills missing `time_hint`/`after`
    /// arguments of search-category calls before the dedupe key is taken.
    pub fn build(
        requests: Vec<ToolCallRequest>,
        registry: &ToolRegistry,
        max_calls: usize,
        time_constraint: Option<&TimeConstraint>,
    ) -> Self {
        let mut requests = requests;
        let dropped = if requests.len() > max_calls {
            requests.split_off(max_calls)
        } else {
            Vec::new()
        };

        let mut seen: HashMap<(String, String), usize> = HashMap::new();
        let calls = requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| {
                let metadata = registry.metadata_for(&request.name);
                let mut arguments = request.parsed_arguments();
                let mut duplicate_of = None;

                if metadata.category == ToolCategory::Search {
                    if let Some(tc) = time_constraint {
                        tc.fill_search_args(&mut arguments);
                    }
                    let key = (request.name.clone(), dedup_key(&arguments));
                    match seen.get(&key) {
                        Some(&first) => duplicate_of = Some(first),
                        None => {
                            seen.insert(key, index);
                        }
                    }
                }

                PlannedCall {
                    request,
                    arguments,
                    metadata,
                    duplicate_of,
                }
            })
            .collect();

        Self { calls, dropped }
    }

    /// Whether the clamp removed any calls.
    pub fn clamped(&self) -> bool {
        !self.dropped.is_empty()
    }

    /// The requests that will be answered, in arrival order.
    pub fn requests(&self) -> Vec<ToolCallRequest> {
        self.calls.iter().map(|c| c.request.clone()).collect()
    }

    /// Number of underlying tool executions this plan needs.
    pub fn execution_count(&self) -> usize {
        self.calls.iter().filter(|c| c.duplicate_of.is_none()).count()
    }
}

/// Normalized identity of a search call: query text plus time filters.
///
/// Keys are emitted in sorted order so equal arguments always produce the
/// same string.
pub fn dedup_key(args: &Map<String, Value>) -> String {
    let query = field(args, "query")
        .or_else(|| field(args, "q"))
        .unwrap_or_default()
        .to_lowercase();
    let after = field(args, "after").unwrap_or_default();
    let before = field(args, "before").unwrap_or_default();
    let hint = field(args, "time_hint").unwrap_or_default().to_lowercase();

    json!({ "after": after, "before": before, "hint": hint, "q": query }).to_string()
}

fn field(args: &Map<String, Value>, key: &str) -> Option<String> {
    match args.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_owned()),
        other => Some(other.to_string()),
    }
}
