//! Composite evaluator: recursive aggregation over nested evaluators.
//!
//! Children are materialized through the same registry as top-level
//! evaluators, so composites nest arbitrarily (bounded by
//! [`MAX_COMPOSITE_DEPTH`](super::MAX_COMPOSITE_DEPTH)). A child that
//! fails is folded in as a zero-score entry like any other result.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use arbiter_core::config::{AggregatorSpec, EvaluatorConfig};
use arbiter_core::error::Result;
use arbiter_core::score::{EvaluationScore, EvaluatorResult, Verdict};
use arbiter_providers::provider_trait::InvokeRequest;

use super::code_judge::run_script;
use super::llm_judge::{parse_judge_response, GRADING_INSTRUCTIONS};
use super::{build, render_child_results, run_isolated, EvalContext, Evaluator, MAX_COMPOSITE_DEPTH};

pub struct CompositeEvaluator {
    name: String,
    weight: f64,
    children: Vec<EvaluatorConfig>,
    aggregator: AggregatorSpec,
}

impl CompositeEvaluator {
    pub fn new(
        name: String,
        weight: f64,
        children: Vec<EvaluatorConfig>,
        aggregator: AggregatorSpec,
    ) -> Self {
        Self {
            name,
            weight,
            children,
            aggregator,
        }
    }
}

#[async_trait]
impl Evaluator for CompositeEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "composite"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(&self, ctx: &EvalContext) -> Result<EvaluationScore> {
        if ctx.depth >= MAX_COMPOSITE_DEPTH {
            return Ok(EvaluationScore::zero(format!(
                "composite nesting exceeds maximum depth {MAX_COMPOSITE_DEPTH}"
            )));
        }
        if self.children.is_empty() {
            return Ok(EvaluationScore::zero("composite has no child evaluators"));
        }

        let child_ctx = ctx.descend();
        let mut rows = Vec::with_capacity(self.children.len());
        for config in &self.children {
            let evaluator = build(config);
            let score = run_isolated(evaluator.as_ref(), &child_ctx).await;
            rows.push(EvaluatorResult::from_score(
                evaluator.name(),
                evaluator.kind(),
                evaluator.weight(),
                &score,
            ));
        }

        let mut folded = match &self.aggregator {
            AggregatorSpec::WeightedAverage => weighted_average(&rows),
            AggregatorSpec::Threshold { threshold } => threshold_fold(&rows, *threshold),
            AggregatorSpec::LlmJudge { criteria } => {
                judge_fold(ctx, &rows, criteria.as_deref()).await
            }
            AggregatorSpec::CodeJudge { script, config } => {
                code_fold(ctx, &rows, script, config.as_ref()).await
            }
        };
        folded.scores = Some(rows);
        Ok(folded)
    }
}

/// Σ(score × weight) / Σ(weight), weight defaulting to 1 at config level.
fn weighted_average(rows: &[EvaluatorResult]) -> EvaluationScore {
    let total_weight: f64 = rows.iter().map(|r| r.weight).sum();
    let score = if total_weight > 0.0 {
        rows.iter().map(|r| r.score * r.weight).sum::<f64>() / total_weight
    } else {
        0.0
    };
    let mut folded = EvaluationScore::from_score(score);
    for row in rows {
        folded.hits.extend(row.hits.iter().cloned());
        folded.misses.extend(row.misses.iter().cloned());
    }
    folded
}

/// Fraction of passing children compared against a cutoff. A child's
/// `borderline` verdict counts toward passing; that leniency is called out
/// in `reasoning` when it flips the outcome from fail to pass.
fn threshold_fold(rows: &[EvaluatorResult], threshold: f64) -> EvaluationScore {
    let total = rows.len();
    let passing = rows
        .iter()
        .filter(|r| matches!(r.verdict, Verdict::Pass | Verdict::Borderline))
        .count();
    let strictly_passing = rows.iter().filter(|r| r.verdict == Verdict::Pass).count();

    let score = passing as f64 / total as f64;
    let verdict = if score >= threshold {
        Verdict::Pass
    } else {
        Verdict::Fail
    };

    let mut folded = EvaluationScore::from_score(score);
    folded.verdict = verdict;
    for row in rows {
        match row.verdict {
            Verdict::Pass => folded
                .hits
                .push(format!("{} passed (score {:.2})", row.name, row.score)),
            Verdict::Borderline => folded.hits.push(format!(
                "{} borderline (score {:.2}), counted as passing",
                row.name, row.score
            )),
            Verdict::Fail => folded
                .misses
                .push(format!("{} failed (score {:.2})", row.name, row.score)),
        }
    }

    let borderline_count = passing - strictly_passing;
    if verdict == Verdict::Pass && (strictly_passing as f64 / total as f64) < threshold {
        folded.reasoning = Some(format!(
            "{borderline_count} borderline child evaluator(s) counted as passing; \
             without that leniency the threshold {threshold} would not be met"
        ));
    }
    folded
}

/// Delegate aggregation to an LLM judge over the rendered child results.
async fn judge_fold(
    ctx: &EvalContext,
    rows: &[EvaluatorResult],
    criteria: Option<&str>,
) -> EvaluationScore {
    let Some(judge) = ctx.judge.clone() else {
        return EvaluationScore::zero("no judge provider configured for composite aggregation");
    };

    let criteria = criteria.unwrap_or(
        "Combine the child evaluator results into one overall judgement of the candidate answer.",
    );
    let prompt = format!(
        "## Question\n{}\n\n## Candidate Answer\n{}\n\n## Child Evaluator Results\n{}\n\n## Aggregation Criteria\n{}\n\n{}",
        ctx.question,
        ctx.candidate,
        render_child_results(rows),
        criteria,
        GRADING_INSTRUCTIONS
    );

    let request = InvokeRequest::new(ctx.eval_id.clone(), prompt);
    match judge.invoke(request, CancellationToken::new()).await {
        Ok(response) => parse_judge_response(&response.text, &ctx.eval_id),
        Err(err) => {
            tracing::warn!(eval_id = %ctx.eval_id, error = %err, "aggregation judge failed");
            EvaluationScore::zero(format!("Aggregation judge failed: {err}"))
        }
    }
}

/// Delegate aggregation to an external script over the child results.
async fn code_fold(
    ctx: &EvalContext,
    rows: &[EvaluatorResult],
    script: &str,
    config: Option<&Value>,
) -> EvaluationScore {
    let payload = json!({
        "question": ctx.question,
        "criteria": ctx.criteria,
        "candidate_answer": ctx.candidate,
        "child_results": rows,
        "config": config,
    });
    match run_script(script, &payload).await {
        Ok(response) => response.into_score(),
        Err(err) => {
            tracing::warn!(
                eval_id = %ctx.eval_id,
                script = %script,
                error = %err,
                "aggregation script failed"
            );
            EvaluationScore::zero(format!("Aggregation script failed: {err:#}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, score: f64, verdict: Verdict) -> EvaluatorResult {
        EvaluatorResult {
            name: name.into(),
            kind: "llm_judge".into(),
            weight: 1.0,
            score,
            verdict,
            hits: Vec::new(),
            misses: Vec::new(),
            reasoning: None,
            scores: None,
            details: None,
        }
    }

    #[test]
    fn test_threshold_half_passes() {
        let rows = [
            row("a", 1.0, Verdict::Pass),
            row("b", 0.9, Verdict::Pass),
            row("c", 0.3, Verdict::Fail),
            row("d", 0.1, Verdict::Fail),
        ];
        let folded = threshold_fold(&rows, 0.5);
        assert_eq!(folded.score, 0.5);
        assert_eq!(folded.verdict, Verdict::Pass);
        assert!(folded.reasoning.is_none());
    }

    #[test]
    fn test_threshold_one_fails_same_children() {
        let rows = [
            row("a", 1.0, Verdict::Pass),
            row("b", 0.9, Verdict::Pass),
            row("c", 0.3, Verdict::Fail),
            row("d", 0.1, Verdict::Fail),
        ];
        let folded = threshold_fold(&rows, 1.0);
        assert_eq!(folded.score, 0.5);
        assert_eq!(folded.verdict, Verdict::Fail);
    }

    #[test]
    fn test_threshold_three_quarters_fails_at_one() {
        let rows = [
            row("a", 1.0, Verdict::Pass),
            row("b", 0.9, Verdict::Pass),
            row("c", 0.9, Verdict::Pass),
            row("d", 0.1, Verdict::Fail),
        ];
        let folded = threshold_fold(&rows, 1.0);
        assert_eq!(folded.score, 0.75);
        assert_eq!(folded.verdict, Verdict::Fail);
    }

    #[test]
    fn test_borderline_leniency_annotated_when_it_flips() {
        let rows = [
            row("a", 0.7, Verdict::Borderline),
            row("b", 0.1, Verdict::Fail),
        ];
        let folded = threshold_fold(&rows, 0.5);
        assert_eq!(folded.score, 0.5);
        assert_eq!(folded.verdict, Verdict::Pass);
        let reasoning = folded.reasoning.expect("leniency must be annotated");
        assert!(reasoning.contains("borderline"));
    }

    #[test]
    fn test_borderline_leniency_silent_when_outcome_unchanged() {
        let rows = [
            row("a", 0.9, Verdict::Pass),
            row("b", 0.1, Verdict::Fail),
        ];
        let folded = threshold_fold(&rows, 0.5);
        assert_eq!(folded.verdict, Verdict::Pass);
        assert!(folded.reasoning.is_none());
    }

    #[test]
    fn test_weighted_average_respects_weights() {
        let mut heavy = row("heavy", 1.0, Verdict::Pass);
        heavy.weight = 2.0;
        let light = row("light", 0.0, Verdict::Fail);
        let folded = weighted_average(&[heavy, light]);
        assert!((folded.score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(folded.verdict, Verdict::Fail);
    }

    #[tokio::test]
    async fn test_depth_guard_scores_zero() {
        let evaluator = CompositeEvaluator::new(
            "nested".into(),
            1.0,
            vec![EvaluatorConfig::LlmJudge {
                name: None,
                weight: None,
                criteria: None,
            }],
            AggregatorSpec::WeightedAverage,
        );
        let mut ctx = EvalContext::new("case-1", "q", "criteria", "answer");
        ctx.depth = MAX_COMPOSITE_DEPTH;
        let score = evaluator.evaluate(&ctx).await.unwrap();
        assert_eq!(score.score, 0.0);
        assert!(score.misses[0].contains("nesting exceeds"));
    }

    #[tokio::test]
    async fn test_failing_child_is_isolated() {
        // A code child with a nonexistent script degrades to zero and the
        // composite still aggregates normally.
        let evaluator = CompositeEvaluator::new(
            "mixed".into(),
            1.0,
            vec![
                EvaluatorConfig::ExecutionMetrics {
                    name: None,
                    weight: None,
                    max_tool_calls: None,
                    min_tool_calls: None,
                    max_duration_ms: None,
                    max_cost_usd: None,
                    max_total_tokens: None,
                },
                EvaluatorConfig::Code {
                    name: Some("broken".into()),
                    weight: None,
                    script: "/nonexistent/script".into(),
                    config: None,
                },
            ],
            AggregatorSpec::WeightedAverage,
        );
        let ctx = EvalContext::new("case-1", "q", "criteria", "answer");
        let score = evaluator.evaluate(&ctx).await.unwrap();
        // First child scores 1.0 (no thresholds configured), second 0.0.
        assert!((score.score - 0.5).abs() < 1e-9);
        let rows = score.scores.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].score, 0.0);
    }
}
