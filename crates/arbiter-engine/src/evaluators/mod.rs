//! Evaluator registry and composition engine.
//!
//! Evaluator configuration arrives as a closed tagged union; [`build`]
//! maps each variant onto an implementation behind the common
//! [`Evaluator`] interface, and [`evaluate_case`] folds a case's ordered
//! evaluator list into one [`EvaluationScore`]. A failing evaluator
//! degrades to a zero-score entry; it never aborts its siblings.

pub mod agent_judge;
pub mod code_judge;
pub mod composite;
pub mod llm_judge;
pub mod metrics;
pub mod trajectory;

use std::sync::Arc;

use async_trait::async_trait;

use arbiter_core::config::EvaluatorConfig;
use arbiter_core::error::Result;
use arbiter_core::score::{EvaluationScore, EvaluatorResult, Verdict};
use arbiter_core::trace::TraceSummary;
use arbiter_providers::provider_trait::Provider;

pub use agent_judge::AgentJudge;

use agent_judge::AgentJudgeEvaluator;
use code_judge::CodeJudgeEvaluator;
use composite::CompositeEvaluator;
use llm_judge::LlmJudgeEvaluator;
use metrics::{
    CostEvaluator, ExecutionMetricsEvaluator, FieldAccuracyEvaluator, LatencyEvaluator,
    TokenUsageEvaluator,
};
use trajectory::ToolTrajectoryEvaluator;

/// Deepest composite nesting walked before a node scores zero.
/// Configs can originate from untrusted files.
pub const MAX_COMPOSITE_DEPTH: u32 = 8;

/// Everything an evaluator may look at while scoring one attempt.
#[derive(Clone)]
pub struct EvalContext {
    /// Case id, for logs.
    pub eval_id: String,
    /// Rendered input conversation.
    pub question: String,
    /// Free-text success criteria from the case.
    pub criteria: String,
    /// Reference answer, when the suite provides one.
    pub expected_answer: Option<String>,
    /// Candidate answer under evaluation.
    pub candidate: String,
    /// Trace summary for the attempt, when the target reported one.
    pub trace: Option<TraceSummary>,
    /// Judge provider for `llm_judge` evaluators and aggregators.
    pub judge: Option<Arc<dyn Provider>>,
    /// Sandboxed investigative judge capability.
    pub agent_judge: Option<Arc<dyn AgentJudge>>,
    /// Composite nesting depth of this evaluation.
    pub depth: u32,
}

impl EvalContext {
    pub fn new(
        eval_id: impl Into<String>,
        question: impl Into<String>,
        criteria: impl Into<String>,
        candidate: impl Into<String>,
    ) -> Self {
        Self {
            eval_id: eval_id.into(),
            question: question.into(),
            criteria: criteria.into(),
            expected_answer: None,
            candidate: candidate.into(),
            trace: None,
            judge: None,
            agent_judge: None,
            depth: 0,
        }
    }

    pub fn with_expected_answer(mut self, expected: impl Into<String>) -> Self {
        self.expected_answer = Some(expected.into());
        self
    }

    pub fn with_trace(mut self, trace: TraceSummary) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_judge(mut self, judge: Arc<dyn Provider>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn with_agent_judge(mut self, agent_judge: Arc<dyn AgentJudge>) -> Self {
        self.agent_judge = Some(agent_judge);
        self
    }

    /// Context for one nesting level deeper, used by composites.
    pub(crate) fn descend(&self) -> Self {
        let mut child = self.clone();
        child.depth += 1;
        child
    }
}

/// Common interface over all evaluator kinds.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Display name for report rows and failure messages.
    fn name(&self) -> &str;

    /// Kind tag, matching the config's `type` key.
    fn kind(&self) -> &'static str;

    /// Aggregation weight.
    fn weight(&self) -> f64 {
        1.0
    }

    /// Score one candidate. Expected failures come back as degraded
    /// scores; `Err` is reserved for unexpected conditions and is
    /// isolated by the caller.
    async fn evaluate(&self, ctx: &EvalContext) -> Result<EvaluationScore>;
}

/// Materialize the implementation for one config node.
pub fn build(config: &EvaluatorConfig) -> Box<dyn Evaluator> {
    let name = config.display_name().to_string();
    let weight = config.weight();
    match config {
        EvaluatorConfig::LlmJudge { criteria, .. } => {
            Box::new(LlmJudgeEvaluator::new(name, weight, criteria.clone()))
        }
        EvaluatorConfig::Code { script, config, .. } => Box::new(CodeJudgeEvaluator::new(
            name,
            weight,
            script.clone(),
            config.clone(),
        )),
        EvaluatorConfig::Composite {
            evaluators,
            aggregator,
            ..
        } => Box::new(CompositeEvaluator::new(
            name,
            weight,
            evaluators.clone(),
            aggregator.clone(),
        )),
        EvaluatorConfig::ToolTrajectory {
            mode,
            expected,
            minimums,
            ..
        } => Box::new(ToolTrajectoryEvaluator::new(
            name,
            weight,
            *mode,
            expected.clone().unwrap_or_default(),
            minimums.clone().unwrap_or_default(),
        )),
        EvaluatorConfig::FieldAccuracy {
            fields, tolerance, ..
        } => Box::new(FieldAccuracyEvaluator::new(
            name,
            weight,
            fields.clone(),
            *tolerance,
        )),
        EvaluatorConfig::Latency {
            max_total_ms,
            max_avg_call_ms,
            ..
        } => Box::new(LatencyEvaluator::new(
            name,
            weight,
            *max_total_ms,
            *max_avg_call_ms,
        )),
        EvaluatorConfig::Cost { max_usd, .. } => {
            Box::new(CostEvaluator::new(name, weight, *max_usd))
        }
        EvaluatorConfig::TokenUsage {
            max_input_tokens,
            max_output_tokens,
            max_total_tokens,
            ..
        } => Box::new(TokenUsageEvaluator::new(
            name,
            weight,
            *max_input_tokens,
            *max_output_tokens,
            *max_total_tokens,
        )),
        EvaluatorConfig::ExecutionMetrics {
            max_tool_calls,
            min_tool_calls,
            max_duration_ms,
            max_cost_usd,
            max_total_tokens,
            ..
        } => Box::new(ExecutionMetricsEvaluator::new(
            name,
            weight,
            *max_tool_calls,
            *min_tool_calls,
            *max_duration_ms,
            *max_cost_usd,
            *max_total_tokens,
        )),
        EvaluatorConfig::AgentJudge { instructions, .. } => {
            Box::new(AgentJudgeEvaluator::new(name, weight, instructions.clone()))
        }
    }
}

/// Run one evaluator, converting any failure into a zero-score entry.
pub(crate) async fn run_isolated(evaluator: &dyn Evaluator, ctx: &EvalContext) -> EvaluationScore {
    match evaluator.evaluate(ctx).await {
        Ok(score) => score,
        Err(err) => {
            tracing::warn!(
                eval_id = %ctx.eval_id,
                evaluator = evaluator.name(),
                error = %err,
                "evaluator failed"
            );
            EvaluationScore::zero(format!("Evaluator '{}' failed: {}", evaluator.name(), err))
        }
    }
}

/// Evaluate a case's ordered evaluator list and fold the results.
///
/// An empty list falls back to a single LLM judge over the case criteria.
/// Returns the folded score plus the per-evaluator report rows.
pub async fn evaluate_case(
    configs: &[EvaluatorConfig],
    ctx: &EvalContext,
) -> (EvaluationScore, Vec<EvaluatorResult>) {
    let default_judge;
    let configs = if configs.is_empty() {
        tracing::debug!(eval_id = %ctx.eval_id, "no evaluators configured, using default judge");
        default_judge = [EvaluatorConfig::LlmJudge {
            name: None,
            weight: None,
            criteria: None,
        }];
        &default_judge[..]
    } else {
        configs
    };

    let mut scores = Vec::with_capacity(configs.len());
    let mut rows = Vec::with_capacity(configs.len());
    for config in configs {
        let evaluator = build(config);
        let score = run_isolated(evaluator.as_ref(), ctx).await;
        rows.push(EvaluatorResult::from_score(
            evaluator.name(),
            evaluator.kind(),
            evaluator.weight(),
            &score,
        ));
        scores.push((evaluator.name().to_string(), score));
    }

    (fold_flat(&scores), rows)
}

/// Fold a flat (non-composite) evaluator list: arithmetic mean of scores,
/// concatenated hits/misses, name-prefixed reasonings joined with `" | "`.
fn fold_flat(scores: &[(String, EvaluationScore)]) -> EvaluationScore {
    if scores.len() == 1 {
        return scores[0].1.clone();
    }

    let mean = scores.iter().map(|(_, s)| s.score).sum::<f64>() / scores.len() as f64;
    let mut folded = EvaluationScore::from_score(mean);
    for (_, score) in scores {
        folded.hits.extend(score.hits.iter().cloned());
        folded.misses.extend(score.misses.iter().cloned());
    }
    let reasoning = scores
        .iter()
        .filter_map(|(name, s)| s.reasoning.as_ref().map(|r| format!("{name}: {r}")))
        .collect::<Vec<_>>()
        .join(" | ");
    if !reasoning.is_empty() {
        folded.reasoning = Some(reasoning);
    }
    folded
}

/// Render child evaluator rows for judge-style aggregators.
pub(crate) fn render_child_results(rows: &[EvaluatorResult]) -> String {
    rows.iter()
        .map(|row| {
            let mut line = format!(
                "- {} ({}): score {:.2}, verdict {}",
                row.name,
                row.kind,
                row.score,
                match row.verdict {
                    Verdict::Pass => "pass",
                    Verdict::Borderline => "borderline",
                    Verdict::Fail => "fail",
                }
            );
            if !row.hits.is_empty() {
                line.push_str(&format!("; hits: {}", row.hits.join("; ")));
            }
            if !row.misses.is_empty() {
                line.push_str(&format!("; misses: {}", row.misses.join("; ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Shared helper: dig a dot-separated path out of a JSON value.
pub(crate) fn lookup_path<'a>(
    value: &'a serde_json::Value,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
