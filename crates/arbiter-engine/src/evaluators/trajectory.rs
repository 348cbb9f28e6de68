//! Tool-call trajectory matching.
//!
//! A pure matcher validating an observed tool-call sequence against a
//! configured pattern. Matching is greedy left-to-right: once an expected
//! item consumes an observed call the match never backtracks, and each
//! observed call is consumable at most once.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::Value;

use arbiter_core::config::{ArgsMatcher, ExpectedCall, TrajectoryMode};
use arbiter_core::error::Result;
use arbiter_core::score::EvaluationScore;
use arbiter_core::trace::ToolCall;

use super::{EvalContext, Evaluator};

/// Match an observed trajectory against the configured pattern.
pub fn match_trajectory(
    mode: TrajectoryMode,
    expected: &[ExpectedCall],
    minimums: &BTreeMap<String, u32>,
    observed: &[ToolCall],
) -> EvaluationScore {
    match mode {
        TrajectoryMode::AnyOrder => match_minimums(minimums, observed),
        TrajectoryMode::InOrder => match_ordered(expected, observed, false),
        TrajectoryMode::Exact => match_ordered(expected, observed, true),
    }
}

/// `any_order`: every configured tool must reach its minimum call count.
/// Score = fraction of tools meeting their minimum.
fn match_minimums(minimums: &BTreeMap<String, u32>, observed: &[ToolCall]) -> EvaluationScore {
    if minimums.is_empty() {
        return EvaluationScore::from_score(1.0)
            .with_reasoning("no tool minimums configured");
    }

    let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
    for call in observed {
        *counts.entry(call.name.as_str()).or_insert(0) += 1;
    }

    let mut result = EvaluationScore::from_score(0.0);
    for (tool, minimum) in minimums {
        let seen = counts.get(tool.as_str()).copied().unwrap_or(0);
        if seen >= *minimum {
            result
                .hits
                .push(format!("{tool}: called {seen}x (minimum {minimum})"));
        } else {
            result
                .misses
                .push(format!("{tool}: called {seen}x, minimum {minimum} not met"));
        }
    }

    let score = result.hits.len() as f64 / minimums.len() as f64;
    result.score = score;
    result.verdict = arbiter_core::score::Verdict::from_score(score);
    result
}

/// `in_order`/`exact`: expected items must appear in the observed sequence
/// in the same relative order. Observed calls whose tool is not part of
/// the expected sequence are noise: `in_order` skips them, `exact` counts
/// each as a miss that dilutes the score. A relevant call is consumed by
/// the next pending expected item, matching or not, so an expected tool
/// showing up out of order fails both sides rather than being matched by
/// looking ahead (greedy left-to-right, no backtracking).
fn match_ordered(expected: &[ExpectedCall], observed: &[ToolCall], exact: bool) -> EvaluationScore {
    let expected_tools: BTreeSet<&str> = expected.iter().map(|item| item.tool.as_str()).collect();

    let mut result = EvaluationScore::from_score(0.0);
    let mut matched = 0usize;
    let mut extras = 0usize;
    let mut expected_idx = 0usize;

    for (idx, call) in observed.iter().enumerate() {
        let relevant = expected_tools.contains(call.name.as_str());
        if expected_idx >= expected.len() || !relevant {
            // Noise for in_order; unaccounted trajectory for exact.
            extras += 1;
            if exact {
                result
                    .misses
                    .push(format!("unexpected call {} at position {idx}", call.name));
            }
            continue;
        }

        let item = &expected[expected_idx];
        expected_idx += 1;
        if call.name == item.tool && args_match(&item.args, &call.input) {
            matched += 1;
            result
                .hits
                .push(format!("{} matched at position {idx}", item.tool));
        } else if call.name == item.tool {
            result.misses.push(format!(
                "{}: arguments at position {idx} did not match",
                item.tool
            ));
        } else {
            result.misses.push(format!(
                "expected {} but observed {} at position {idx}",
                item.tool, call.name
            ));
        }
    }

    for item in &expected[expected_idx..] {
        result
            .misses
            .push(format!("{}: no matching call observed", item.tool));
    }

    let denominator = if exact {
        expected.len() + extras
    } else {
        expected.len()
    };
    let score = if denominator == 0 {
        1.0
    } else {
        matched as f64 / denominator as f64
    };
    result.score = score;
    result.verdict = arbiter_core::score::Verdict::from_score(score);
    result
}

fn args_match(matcher: &ArgsMatcher, input: &Value) -> bool {
    let Some(subset) = matcher.subset() else {
        return true;
    };
    let Some(object) = input.as_object() else {
        return subset.is_empty();
    };
    subset
        .iter()
        .all(|(key, want)| object.get(key).is_some_and(|got| value_matches(want, got)))
}

/// Partial equality: strings accept the configured value as a
/// case-insensitive substring; everything else is deep equality.
fn value_matches(want: &Value, got: &Value) -> bool {
    match (want, got) {
        (Value::String(want), Value::String(got)) => {
            got.to_lowercase().contains(&want.to_lowercase())
        }
        _ => want == got,
    }
}

pub struct ToolTrajectoryEvaluator {
    name: String,
    weight: f64,
    mode: TrajectoryMode,
    expected: Vec<ExpectedCall>,
    minimums: BTreeMap<String, u32>,
}

impl ToolTrajectoryEvaluator {
    pub fn new(
        name: String,
        weight: f64,
        mode: TrajectoryMode,
        expected: Vec<ExpectedCall>,
        minimums: BTreeMap<String, u32>,
    ) -> Self {
        Self {
            name,
            weight,
            mode,
            expected,
            minimums,
        }
    }
}

#[async_trait]
impl Evaluator for ToolTrajectoryEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "tool_trajectory"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(&self, ctx: &EvalContext) -> Result<EvaluationScore> {
        let calls: &[ToolCall] = ctx
            .trace
            .as_ref()
            .map(|trace| trace.calls.as_slice())
            .unwrap_or(&[]);
        let mut score = match_trajectory(self.mode, &self.expected, &self.minimums, calls);
        if ctx.trace.is_none() {
            // Missing data is a strict miss, not a silent skip.
            score.reasoning = Some("no execution trace recorded".to_string());
        }
        Ok(score)
    }
}
