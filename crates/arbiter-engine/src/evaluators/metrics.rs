//! Declarative threshold checks over trace-derived metrics.
//!
//! Each configured threshold that is missing its datum counts as a miss,
//! not a silent skip. With multiple thresholds configured, score =
//! hits / (hits + misses); an evaluator with no thresholds scores 1.0.

use std::collections::BTreeMap;
use std::fmt::Display;

use async_trait::async_trait;
use serde_json::Value;

use arbiter_core::error::Result;
use arbiter_core::score::EvaluationScore;

use super::llm_judge::extract_json_object;
use super::{lookup_path, EvalContext, Evaluator};

/// Accumulates hit/miss lines for threshold checks.
#[derive(Default)]
struct Checks {
    hits: Vec<String>,
    misses: Vec<String>,
}

impl Checks {
    fn check_max<T: PartialOrd + Display + Copy>(
        &mut self,
        label: &str,
        value: Option<T>,
        max: T,
    ) {
        match value {
            Some(v) if v <= max => self.hits.push(format!("{label} {v} within limit {max}")),
            Some(v) => self.misses.push(format!("{label} {v} exceeds limit {max}")),
            None => self
                .misses
                .push(format!("{label} not reported (limit {max})")),
        }
    }

    fn check_min<T: PartialOrd + Display + Copy>(
        &mut self,
        label: &str,
        value: Option<T>,
        min: T,
    ) {
        match value {
            Some(v) if v >= min => self.hits.push(format!("{label} {v} meets minimum {min}")),
            Some(v) => self.misses.push(format!("{label} {v} below minimum {min}")),
            None => self
                .misses
                .push(format!("{label} not reported (minimum {min})")),
        }
    }

    fn into_score(self) -> EvaluationScore {
        let total = self.hits.len() + self.misses.len();
        let score = if total == 0 {
            1.0
        } else {
            self.hits.len() as f64 / total as f64
        };
        let mut result = EvaluationScore::from_score(score);
        result.hits = self.hits;
        result.misses = self.misses;
        result
    }
}

// =============================================================================
// Latency
// =============================================================================

pub struct LatencyEvaluator {
    name: String,
    weight: f64,
    max_total_ms: Option<f64>,
    max_avg_call_ms: Option<f64>,
}

impl LatencyEvaluator {
    pub fn new(
        name: String,
        weight: f64,
        max_total_ms: Option<f64>,
        max_avg_call_ms: Option<f64>,
    ) -> Self {
        Self {
            name,
            weight,
            max_total_ms,
            max_avg_call_ms,
        }
    }
}

#[async_trait]
impl Evaluator for LatencyEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "latency"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(&self, ctx: &EvalContext) -> Result<EvaluationScore> {
        let duration = ctx.trace.as_ref().and_then(|t| t.duration_ms);
        let mut checks = Checks::default();
        if let Some(max) = self.max_total_ms {
            checks.check_max("total duration (ms)", duration.map(|d| d as f64), max);
        }
        if let Some(max) = self.max_avg_call_ms {
            let avg = ctx.trace.as_ref().and_then(|t| {
                let events = t.events;
                t.duration_ms
                    .filter(|_| events > 0)
                    .map(|d| d as f64 / events as f64)
            });
            checks.check_max("average per-event duration (ms)", avg, max);
        }
        Ok(checks.into_score())
    }
}

// =============================================================================
// Cost
// =============================================================================

pub struct CostEvaluator {
    name: String,
    weight: f64,
    max_usd: Option<f64>,
}

impl CostEvaluator {
    pub fn new(name: String, weight: f64, max_usd: Option<f64>) -> Self {
        Self {
            name,
            weight,
            max_usd,
        }
    }
}

#[async_trait]
impl Evaluator for CostEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "cost"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(&self, ctx: &EvalContext) -> Result<EvaluationScore> {
        let cost = ctx.trace.as_ref().and_then(|t| t.cost_usd);
        let mut checks = Checks::default();
        if let Some(max) = self.max_usd {
            checks.check_max("cost (USD)", cost, max);
        }
        Ok(checks.into_score())
    }
}

// =============================================================================
// Token usage
// =============================================================================

pub struct TokenUsageEvaluator {
    name: String,
    weight: f64,
    max_input_tokens: Option<u64>,
    max_output_tokens: Option<u64>,
    max_total_tokens: Option<u64>,
}

impl TokenUsageEvaluator {
    pub fn new(
        name: String,
        weight: f64,
        max_input_tokens: Option<u64>,
        max_output_tokens: Option<u64>,
        max_total_tokens: Option<u64>,
    ) -> Self {
        Self {
            name,
            weight,
            max_input_tokens,
            max_output_tokens,
            max_total_tokens,
        }
    }
}

#[async_trait]
impl Evaluator for TokenUsageEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "token_usage"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(&self, ctx: &EvalContext) -> Result<EvaluationScore> {
        let trace = ctx.trace.as_ref();
        let mut checks = Checks::default();
        if let Some(max) = self.max_input_tokens {
            checks.check_max("input tokens", trace.and_then(|t| t.input_tokens), max);
        }
        if let Some(max) = self.max_output_tokens {
            checks.check_max("output tokens", trace.and_then(|t| t.output_tokens), max);
        }
        if let Some(max) = self.max_total_tokens {
            checks.check_max("total tokens", trace.and_then(|t| t.total_tokens), max);
        }
        Ok(checks.into_score())
    }
}

// =============================================================================
// Execution metrics
// =============================================================================

pub struct ExecutionMetricsEvaluator {
    name: String,
    weight: f64,
    max_tool_calls: Option<u32>,
    min_tool_calls: Option<u32>,
    max_duration_ms: Option<f64>,
    max_cost_usd: Option<f64>,
    max_total_tokens: Option<u64>,
}

impl ExecutionMetricsEvaluator {
    pub fn new(
        name: String,
        weight: f64,
        max_tool_calls: Option<u32>,
        min_tool_calls: Option<u32>,
        max_duration_ms: Option<f64>,
        max_cost_usd: Option<f64>,
        max_total_tokens: Option<u64>,
    ) -> Self {
        Self {
            name,
            weight,
            max_tool_calls,
            min_tool_calls,
            max_duration_ms,
            max_cost_usd,
            max_total_tokens,
        }
    }
}

#[async_trait]
impl Evaluator for ExecutionMetricsEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "execution_metrics"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(&self, ctx: &EvalContext) -> Result<EvaluationScore> {
        let trace = ctx.trace.as_ref();
        let tool_calls = trace.map(|t| t.total_calls());
        let mut checks = Checks::default();
        if let Some(max) = self.max_tool_calls {
            checks.check_max("tool calls", tool_calls, max);
        }
        if let Some(min) = self.min_tool_calls {
            checks.check_min("tool calls", tool_calls, min);
        }
        if let Some(max) = self.max_duration_ms {
            checks.check_max(
                "duration (ms)",
                trace.and_then(|t| t.duration_ms).map(|d| d as f64),
                max,
            );
        }
        if let Some(max) = self.max_cost_usd {
            checks.check_max("cost (USD)", trace.and_then(|t| t.cost_usd), max);
        }
        if let Some(max) = self.max_total_tokens {
            checks.check_max("total tokens", trace.and_then(|t| t.total_tokens), max);
        }
        Ok(checks.into_score())
    }
}

// =============================================================================
// Field accuracy
// =============================================================================

/// Compares structured fields of the candidate answer against expected
/// values. The candidate is parsed as JSON (a fenced block is extracted
/// first); an unparsable candidate makes every configured field a miss.
pub struct FieldAccuracyEvaluator {
    name: String,
    weight: f64,
    fields: BTreeMap<String, Value>,
    tolerance: Option<f64>,
}

impl FieldAccuracyEvaluator {
    pub fn new(
        name: String,
        weight: f64,
        fields: BTreeMap<String, Value>,
        tolerance: Option<f64>,
    ) -> Self {
        Self {
            name,
            weight,
            fields,
            tolerance,
        }
    }

    fn field_matches(&self, want: &Value, got: &Value) -> bool {
        match (want, got) {
            (Value::Number(want), Value::Number(got)) => {
                match (want.as_f64(), got.as_f64()) {
                    (Some(want), Some(got)) => {
                        (want - got).abs() <= self.tolerance.unwrap_or(f64::EPSILON)
                    }
                    _ => want == got,
                }
            }
            (Value::String(want), Value::String(got)) => want.eq_ignore_ascii_case(got),
            _ => want == got,
        }
    }
}

#[async_trait]
impl Evaluator for FieldAccuracyEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "field_accuracy"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(&self, ctx: &EvalContext) -> Result<EvaluationScore> {
        let parsed: Option<Value> = extract_json_object(&ctx.candidate)
            .and_then(|raw| serde_json::from_str(&raw).ok());

        let mut checks = Checks::default();
        for (path, want) in &self.fields {
            match parsed.as_ref().and_then(|value| lookup_path(value, path)) {
                Some(got) if self.field_matches(want, got) => {
                    checks.hits.push(format!("field {path} = {got}"));
                }
                Some(got) => checks
                    .misses
                    .push(format!("field {path} = {got}, expected {want}")),
                None if parsed.is_some() => {
                    checks.misses.push(format!("field {path} missing"));
                }
                None => checks.misses.push(format!(
                    "field {path} not checked: candidate answer is not valid JSON"
                )),
            }
        }
        Ok(checks.into_score())
    }
}
