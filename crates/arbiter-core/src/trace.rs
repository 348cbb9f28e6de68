//! Tool-call traces and their derived summaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool invocation observed while the target produced its answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool.
    pub name: String,
    /// Input provided to the tool.
    #[serde(default)]
    pub input: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            input,
        }
    }
}

/// Read-only aggregate over one attempt's tool calls and resource usage.
///
/// Produced once per attempt, consumed by trajectory and metrics
/// evaluators, never mutated after creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    /// Total observed trace events.
    pub events: u32,
    /// Call count per tool name.
    #[serde(default)]
    pub tool_counts: BTreeMap<String, u32>,
    /// Ordered tool-call sequence, as observed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TraceSummary {
    /// Derive a summary from an ordered call sequence.
    pub fn from_calls(calls: Vec<ToolCall>) -> Self {
        let mut tool_counts = BTreeMap::new();
        for call in &calls {
            *tool_counts.entry(call.name.clone()).or_insert(0u32) += 1;
        }
        Self {
            events: calls.len() as u32,
            tool_counts,
            calls,
            ..Default::default()
        }
    }

    /// Attach token usage, also filling the total when both sides are known.
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = Some(input_tokens);
        self.output_tokens = Some(output_tokens);
        self.total_tokens = Some(input_tokens + output_tokens);
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Total tool calls across all tools.
    pub fn total_calls(&self) -> u32 {
        self.tool_counts.values().sum()
    }
}
