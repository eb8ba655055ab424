//! Cost accounting records and telemetry events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reply::Reply;

/// Key used for any telemetry identifier that is missing
pub const UNKNOWN_KEY: &str = "unknown";

fn unknown_key() -> String {
    UNKNOWN_KEY.to_string()
}

/// Token usage and monetary cost of one generated reply
///
/// Every field has a serde default so that a malformed telemetry event still
/// parses into something countable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default = "unknown_key")]
    pub model_name: String,
}

impl CostRecord {
    /// Build a record; total tokens is always the sum of input and output
    pub fn new(input_tokens: u64, output_tokens: u64, cost_usd: f64, model_name: impl Into<String>) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            cost_usd,
            model_name: model_name.into(),
        }
    }

    /// Zero-token, zero-cost record attributed to a model
    pub fn zero(model_name: impl Into<String>) -> Self {
        Self::new(0, 0, 0.0, model_name)
    }
}

impl Default for CostRecord {
    fn default() -> Self {
        Self::zero(UNKNOWN_KEY)
    }
}

/// Per-reply usage event published to the telemetry channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(default)]
    pub message_id: String,
    #[serde(default = "unknown_key")]
    pub agent_type: String,
    #[serde(default)]
    pub cost_info: CostRecord,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    /// Derive the telemetry event for a reply
    pub fn from_reply(reply: &Reply) -> Self {
        Self {
            message_id: reply.message_id.to_string(),
            agent_type: reply.agent_type.to_string(),
            cost_info: reply.cost_info.clone(),
            timestamp: reply.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_tokens_is_sum() {
        let record = CostRecord::new(120, 80, 0.0042, "gemini-1.5-flash");
        assert_eq!(record.total_tokens, 200);
    }

    #[test]
    fn test_malformed_event_defaults() {
        let event: TelemetryEvent = serde_json::from_str(r#"{"cost_info": {}}"#).unwrap();
        assert_eq!(event.message_id, "");
        assert_eq!(event.agent_type, UNKNOWN_KEY);
        assert_eq!(event.cost_info.model_name, UNKNOWN_KEY);
        assert_eq!(event.cost_info.cost_usd, 0.0);
    }

    #[test]
    fn test_empty_object_parses() {
        let event: TelemetryEvent = serde_json::from_str("{}").unwrap();
        assert_eq!(event.cost_info, CostRecord::default());
    }
}
