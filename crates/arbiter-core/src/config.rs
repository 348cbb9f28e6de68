//! Evaluator configuration schema.
//!
//! [`EvaluatorConfig`] is the tagged union the suite loader hands the
//! engine: a closed set of evaluator kinds keyed by `type`, each variant
//! carrying only the fields its kind needs. Configs may nest (composites
//! hold child configs), forming a tree that the composition engine walks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tagged evaluator configuration, keyed by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluatorConfig {
    /// Grade with an LLM judge against the case criteria.
    LlmJudge {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
        /// Criteria override; defaults to the case criteria.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        criteria: Option<String>,
    },
    /// Score with an external script (stdin/stdout JSON contract).
    Code {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
        /// Path to the scoring script.
        script: String,
        /// Opaque configuration forwarded to the script.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<Value>,
    },
    /// Nested evaluators folded by an aggregator.
    Composite {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
        evaluators: Vec<EvaluatorConfig>,
        aggregator: AggregatorSpec,
    },
    /// Validate the observed tool-call sequence.
    ToolTrajectory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
        mode: TrajectoryMode,
        /// Ordered expected calls, for `in_order` and `exact`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected: Option<Vec<ExpectedCall>>,
        /// Per-tool minimum call counts, for `any_order`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimums: Option<BTreeMap<String, u32>>,
    },
    /// Compare structured fields of the candidate answer.
    FieldAccuracy {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
        /// Dot-separated field path → expected value.
        fields: BTreeMap<String, Value>,
        /// Absolute tolerance for numeric comparisons.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tolerance: Option<f64>,
    },
    /// Wall-clock thresholds over the trace summary.
    Latency {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_total_ms: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_avg_call_ms: Option<f64>,
    },
    /// Spend threshold over the trace summary.
    Cost {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_usd: Option<f64>,
    },
    /// Token thresholds over the trace summary.
    TokenUsage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_input_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_output_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_total_tokens: Option<u64>,
    },
    /// Combined execution thresholds over the trace summary.
    ExecutionMetrics {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_tool_calls: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_tool_calls: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_duration_ms: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_cost_usd: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_total_tokens: Option<u64>,
    },
    /// Delegate to the sandboxed investigative judge capability.
    AgentJudge {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight: Option<f64>,
        /// Extra instructions for the investigative loop.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instructions: Option<String>,
    },
}

impl EvaluatorConfig {
    /// Kind tag, matching the serialized `type` key.
    pub fn kind(&self) -> &'static str {
        match self {
            EvaluatorConfig::LlmJudge { .. } => "llm_judge",
            EvaluatorConfig::Code { .. } => "code",
            EvaluatorConfig::Composite { .. } => "composite",
            EvaluatorConfig::ToolTrajectory { .. } => "tool_trajectory",
            EvaluatorConfig::FieldAccuracy { .. } => "field_accuracy",
            EvaluatorConfig::Latency { .. } => "latency",
            EvaluatorConfig::Cost { .. } => "cost",
            EvaluatorConfig::TokenUsage { .. } => "token_usage",
            EvaluatorConfig::ExecutionMetrics { .. } => "execution_metrics",
            EvaluatorConfig::AgentJudge { .. } => "agent_judge",
        }
    }

    /// Display name: the configured name, or the kind tag.
    pub fn display_name(&self) -> &str {
        self.name_field().unwrap_or_else(|| self.kind())
    }

    /// Aggregation weight, defaulting to 1.0.
    pub fn weight(&self) -> f64 {
        self.weight_field().unwrap_or(1.0)
    }

    fn name_field(&self) -> Option<&str> {
        match self {
            EvaluatorConfig::LlmJudge { name, .. }
            | EvaluatorConfig::Code { name, .. }
            | EvaluatorConfig::Composite { name, .. }
            | EvaluatorConfig::ToolTrajectory { name, .. }
            | EvaluatorConfig::FieldAccuracy { name, .. }
            | EvaluatorConfig::Latency { name, .. }
            | EvaluatorConfig::Cost { name, .. }
            | EvaluatorConfig::TokenUsage { name, .. }
            | EvaluatorConfig::ExecutionMetrics { name, .. }
            | EvaluatorConfig::AgentJudge { name, .. } => name.as_deref(),
        }
    }

    fn weight_field(&self) -> Option<f64> {
        match self {
            EvaluatorConfig::LlmJudge { weight, .. }
            | EvaluatorConfig::Code { weight, .. }
            | EvaluatorConfig::Composite { weight, .. }
            | EvaluatorConfig::ToolTrajectory { weight, .. }
            | EvaluatorConfig::FieldAccuracy { weight, .. }
            | EvaluatorConfig::Latency { weight, .. }
            | EvaluatorConfig::Cost { weight, .. }
            | EvaluatorConfig::TokenUsage { weight, .. }
            | EvaluatorConfig::ExecutionMetrics { weight, .. }
            | EvaluatorConfig::AgentJudge { weight, .. } => *weight,
        }
    }
}

/// How a composite folds its children.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregatorSpec {
    /// Σ(score × weight) / Σ(weight), weight defaulting to 1.
    WeightedAverage,
    /// Fraction of passing children compared against a cutoff.
    Threshold { threshold: f64 },
    /// Hand the child results to an LLM judge for a holistic verdict.
    LlmJudge {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        criteria: Option<String>,
    },
    /// Hand the child results to an external scoring script.
    CodeJudge {
        script: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<Value>,
    },
}

/// Matching mode for tool trajectories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryMode {
    /// Per-tool minimum call counts, order ignored.
    AnyOrder,
    /// Expected calls appear as a subsequence of the observed calls.
    InOrder,
    /// Expected calls account for the entire observed sequence.
    Exact,
}

/// One expected tool call in an `in_order`/`exact` trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedCall {
    pub tool: String,
    /// Argument matcher; omitted or `"any"` accepts any input.
    #[serde(default)]
    pub args: ArgsMatcher,
}

impl ExpectedCall {
    pub fn any(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args: ArgsMatcher::default(),
        }
    }

    pub fn with_args(tool: impl Into<String>, args: BTreeMap<String, Value>) -> Self {
        Self {
            tool: tool.into(),
            args: ArgsMatcher::Subset(args),
        }
    }
}

/// The literal `"any"` keyword in an `args` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnyKeyword {
    Any,
}

/// Argument matcher for an expected tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgsMatcher {
    /// Accept any input.
    Keyword(AnyKeyword),
    /// Subset match: every listed key must be present with a matching value.
    Subset(BTreeMap<String, Value>),
}

impl Default for ArgsMatcher {
    fn default() -> Self {
        ArgsMatcher::Keyword(AnyKeyword::Any)
    }
}

impl ArgsMatcher {
    /// The configured key subset, or `None` for match-any.
    pub fn subset(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            ArgsMatcher::Keyword(_) => None,
            ArgsMatcher::Subset(map) => Some(map),
        }
    }
}
