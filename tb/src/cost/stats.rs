//! Aggregate cost statistics

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{TelemetryEvent, UNKNOWN_KEY};

/// Point-in-time copy of the cost accumulators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_cost: f64,
    pub total_messages: u64,
    pub average_cost_per_message: f64,
    /// Cost per responder type
    pub cost_by_agent: BTreeMap<String, f64>,
    /// Cost per model
    pub cost_by_model: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl AggregateStats {
    pub fn is_empty(&self) -> bool {
        self.total_messages == 0
    }

    /// Human-readable summary with per-key share of the total
    pub fn render_summary(&self) -> String {
        let rule = "=".repeat(50);
        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Cost Statistics Summary");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Total Messages: {}", self.total_messages);
        let _ = writeln!(out, "Total Cost: ${:.6}", self.total_cost);
        let _ = writeln!(out, "Average Cost/Message: ${:.6}", self.average_cost_per_message);

        for (title, buckets) in [("By Agent Type:", &self.cost_by_agent), ("By Model:", &self.cost_by_model)] {
            let _ = writeln!(out);
            let _ = writeln!(out, "{title}");
            for (key, cost) in buckets {
                let _ = writeln!(out, "  {key}: ${cost:.6} ({:.1}%)", share(*cost, self.total_cost));
            }
        }
        let _ = write!(out, "{rule}");
        out
    }
}

/// Percentage of `total`; a zero total never divides by zero
fn share(cost: f64, total: f64) -> f64 {
    cost / total.max(0.000001) * 100.0
}

/// The four running accumulators, mutated under one lock
#[derive(Debug, Default)]
pub(crate) struct Accumulators {
    total_cost: f64,
    total_messages: u64,
    cost_by_agent: BTreeMap<String, f64>,
    cost_by_model: BTreeMap<String, f64>,
}

impl Accumulators {
    pub fn record(&mut self, event: &TelemetryEvent) {
        let cost = event.cost_info.cost_usd;
        let agent = non_empty_key(&event.agent_type);
        let model = non_empty_key(&event.cost_info.model_name);

        self.total_cost += cost;
        self.total_messages += 1;
        *self.cost_by_agent.entry(agent.to_string()).or_insert(0.0) += cost;
        *self.cost_by_model.entry(model.to_string()).or_insert(0.0) += cost;
    }

    pub fn snapshot(&self) -> AggregateStats {
        AggregateStats {
            total_cost: self.total_cost,
            total_messages: self.total_messages,
            average_cost_per_message: self.total_cost / self.total_messages.max(1) as f64,
            cost_by_agent: self.cost_by_agent.clone(),
            cost_by_model: self.cost_by_model.clone(),
            timestamp: Utc::now(),
        }
    }
}

fn non_empty_key(key: &str) -> &str {
    if key.trim().is_empty() { UNKNOWN_KEY } else { key }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CostRecord;

    fn event(agent: &str, model: &str, cost: f64) -> TelemetryEvent {
        TelemetryEvent {
            message_id: "m".to_string(),
            agent_type: agent.to_string(),
            cost_info: CostRecord::new(1, 1, cost, model),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_and_snapshot() {
        let mut acc = Accumulators::default();
        acc.record(&event("chinese_teacher", "gemini-1.5-flash", 0.005));
        acc.record(&event("english_teacher", "gemini-1.5-flash", 0.007));

        let stats = acc.snapshot();
        assert_eq!(stats.total_messages, 2);
        assert!((stats.total_cost - 0.012).abs() < 1e-12);
        assert!((stats.average_cost_per_message - 0.006).abs() < 1e-12);
        assert_eq!(stats.cost_by_agent.len(), 2);
        assert!((stats.cost_by_model["gemini-1.5-flash"] - 0.012).abs() < 1e-12);
    }

    #[test]
    fn test_empty_keys_bucket_as_unknown() {
        let mut acc = Accumulators::default();
        acc.record(&event("", " ", 0.0));
        let stats = acc.snapshot();
        assert_eq!(stats.cost_by_agent.get(UNKNOWN_KEY), Some(&0.0));
        assert_eq!(stats.cost_by_model.get(UNKNOWN_KEY), Some(&0.0));
        assert_eq!(stats.total_messages, 1);
    }

    #[test]
    fn test_empty_snapshot_average_is_zero() {
        let stats = Accumulators::default().snapshot();
        assert!(stats.is_empty());
        assert_eq!(stats.average_cost_per_message, 0.0);
    }

    #[test]
    fn test_render_summary() {
        let mut acc = Accumulators::default();
        acc.record(&event("chinese_teacher", "llama3.1:8b", 0.003));
        acc.record(&event("english_teacher", "llama3.1:8b", 0.001));
        let summary = acc.snapshot().render_summary();

        assert!(summary.contains("Total Messages: 2"));
        assert!(summary.contains("Total Cost: $0.004000"));
        assert!(summary.contains("chinese_teacher: $0.003000 (75.0%)"));
        assert!(summary.contains("english_teacher: $0.001000 (25.0%)"));
        assert!(summary.contains("llama3.1:8b: $0.004000 (100.0%)"));
    }

    #[test]
    fn test_render_summary_zero_total() {
        let mut acc = Accumulators::default();
        acc.record(&event("english_teacher", "llama3.1:8b", 0.0));
        let summary = acc.snapshot().render_summary();
        assert!(summary.contains("english_teacher: $0.000000 (0.0%)"));
    }
}
