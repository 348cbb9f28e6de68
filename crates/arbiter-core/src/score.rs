//! Scores, verdicts, and per-evaluator report rows.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Score at or above which a verdict is `pass`.
pub const PASS_THRESHOLD: f64 = 0.8;
/// Score at or above which a verdict is `borderline`.
pub const BORDERLINE_THRESHOLD: f64 = 0.6;

/// Pass/borderline/fail classification of a numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Borderline,
    Fail,
}

impl Verdict {
    /// Classify a score with the shared thresholds (≥0.8 / ≥0.6 / below).
    pub fn from_score(score: f64) -> Self {
        if score >= PASS_THRESHOLD {
            Verdict::Pass
        } else if score >= BORDERLINE_THRESHOLD {
            Verdict::Borderline
        } else {
            Verdict::Fail
        }
    }

    /// Swap pass and fail; borderline is its own inverse.
    pub fn invert(self) -> Self {
        match self {
            Verdict::Pass => Verdict::Fail,
            Verdict::Borderline => Verdict::Borderline,
            Verdict::Fail => Verdict::Pass,
        }
    }

    pub fn passed(self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// Output of one evaluator over one candidate answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationScore {
    /// Normalized score in [0, 1].
    pub score: f64,
    pub verdict: Verdict,
    /// Aspects the candidate got right.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hits: Vec<String>,
    /// Aspects the candidate got wrong or missing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub misses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Per-child results, for composite evaluators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<Vec<EvaluatorResult>>,
    /// Opaque evaluator-specific diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl EvaluationScore {
    /// Build from a raw score, clamped to [0, 1], deriving the verdict.
    pub fn from_score(score: f64) -> Self {
        let score = score.clamp(0.0, 1.0);
        Self {
            score,
            verdict: Verdict::from_score(score),
            hits: Vec::new(),
            misses: Vec::new(),
            reasoning: None,
            scores: None,
            details: None,
        }
    }

    /// Zero score carrying a single explanatory miss.
    pub fn zero(miss: impl Into<String>) -> Self {
        let mut result = Self::from_score(0.0);
        result.misses.push(miss.into());
        result
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Mirror of this score: `1 − score`, hits and misses swapped, pass and
    /// fail swapped (borderline kept). Applying it twice restores the
    /// original, up to floating-point tolerance.
    pub fn negate(&self) -> Self {
        Self {
            score: 1.0 - self.score,
            verdict: self.verdict.invert(),
            hits: self.misses.clone(),
            misses: self.hits.clone(),
            reasoning: self.reasoning.clone(),
            scores: self.scores.clone(),
            details: self.details.clone(),
        }
    }
}

/// Report-facing projection of one evaluator's score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorResult {
    pub name: String,
    /// Evaluator kind tag (`llm_judge`, `code`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    pub weight: f64,
    pub score: f64,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hits: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub misses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Nested rows, when this row came from a composite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<Vec<EvaluatorResult>>,
    /// Opaque evaluator-specific diagnostics, passed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl EvaluatorResult {
    /// Project an evaluation score into its report row.
    pub fn from_score(
        name: impl Into<String>,
        kind: impl Into<String>,
        weight: f64,
        score: &EvaluationScore,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            weight,
            score: score.score,
            verdict: score.verdict,
            hits: score.hits.clone(),
            misses: score.misses.clone(),
            reasoning: score.reasoning.clone(),
            scores: score.scores.clone(),
            details: score.details.clone(),
        }
    }
}
