//! `get_current_time` -- the current UTC date and time.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use promptbench_agent::ToolSchema;
use promptbench_agent::tools::{ToolCategory, ToolError, ToolHandler, ToolMetadata, ToolVisibility};

/// Reports the current time.  Only UTC is supported; a requested timezone
/// is accepted and ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentTime;

/// Payload for one instant.
pub fn time_payload(now: DateTime<Utc>) -> Value {
    json!({
        "timestamp": now.to_rfc3339_opts(SecondsFormat::Micros, false),
        "timezone": "UTC",
        "unix_timestamp": now.timestamp(),
        "formatted": now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        "date": now.format("%Y-%m-%d").to_string(),
        "time": now.format("%H:%M:%S").to_string(),
    })
}

#[async_trait]
impl ToolHandler for CurrentTime {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::function(
            "get_current_time",
            "Get the current date and time in ISO 8601 format.",
            json!({
                "type": "object",
                "properties": {
                    "timezone": {
                        "type": "string",
                        "description": "Timezone name (e.g., 'UTC'). Defaults to UTC.",
                        "default": "UTC"
                    }
                },
                "required": []
            }),
        )
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(ToolCategory::Utility, ToolVisibility::Hidden)
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        if let Some(tz) = args.get("timezone").and_then(Value::as_str)
            && !tz.eq_ignore_ascii_case("utc")
        {
            tracing::debug!(timezone = tz, "non-UTC timezone requested, answering in UTC");
        }
        Ok(time_payload(Utc::now()))
    }
}
