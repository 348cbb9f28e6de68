//! Run results: per-case outcomes, trials, and trial aggregation.

use serde::{Deserialize, Serialize};

use crate::score::{EvaluatorResult, Verdict};
use crate::trace::TraceSummary;

/// One attempt at a case under a multi-trial policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    /// Zero-based attempt index.
    pub attempt: u32,
    pub score: f64,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evaluator_results: Vec<EvaluatorResult>,
    /// Invocation error that zeroed this attempt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

/// Statistics recorded by the trial aggregator, keyed by strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum TrialAggregation {
    PassAtK {
        /// Attempts whose verdict was `pass`.
        passed_attempts: u32,
        total_attempts: u32,
    },
    Mean {
        mean: f64,
        min: f64,
        max: f64,
    },
    ConfidenceInterval {
        mean: f64,
        /// Sample standard deviation (Bessel-corrected).
        stddev: f64,
        ci95_lower: f64,
        ci95_upper: f64,
        samples: u32,
    },
}

/// Final outcome for one case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub eval_id: String,
    pub score: f64,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hits: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub misses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Final text the target produced, when invocation succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evaluator_results: Vec<EvaluatorResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceSummary>,
    /// Per-attempt results when the case ran multiple trials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trials: Option<Vec<TrialResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<TrialAggregation>,
    /// Invocation or scheduling error that produced this result, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when a cost limit stopped the trial loop early.
    #[serde(default)]
    pub cost_limited: bool,
    pub duration_ms: u64,
}

impl EvaluationResult {
    /// Successful outcome skeleton; callers fill in answer and detail rows.
    pub fn scored(eval_id: impl Into<String>, score: f64, verdict: Verdict) -> Self {
        Self {
            eval_id: eval_id.into(),
            score,
            verdict,
            hits: Vec::new(),
            misses: Vec::new(),
            reasoning: None,
            candidate_answer: None,
            evaluator_results: Vec::new(),
            trace: None,
            trials: None,
            aggregation: None,
            error: None,
            cost_limited: false,
            duration_ms: 0,
        }
    }

    /// Error outcome: zero score with the failure recorded in `misses`.
    pub fn from_error(eval_id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut result = Self::scored(eval_id, 0.0, Verdict::Fail);
        result.misses = vec![format!("Error: {message}")];
        result.error = Some(message);
        result
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
