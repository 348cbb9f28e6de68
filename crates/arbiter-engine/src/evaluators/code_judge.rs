//! External code-judge evaluator.
//!
//! Runs a scoring script as a child process: a JSON payload on stdin, one
//! JSON object `{score, hits?, misses?, reasoning?, details?}` back on
//! stdout. The script is an opaque external collaborator; any failure
//! (spawn, non-zero exit, bad JSON) degrades to a zero score.

use std::process::Stdio;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use arbiter_core::error::Result;
use arbiter_core::score::{EvaluationScore, Verdict};

use super::{EvalContext, Evaluator};

/// Response contract for scoring scripts.
#[derive(Debug, Deserialize)]
pub(crate) struct ScriptResponse {
    score: f64,
    #[serde(default)]
    hits: Vec<String>,
    #[serde(default)]
    misses: Vec<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    details: Option<Value>,
}

impl ScriptResponse {
    pub(crate) fn into_score(self) -> EvaluationScore {
        let score = self.score.clamp(0.0, 1.0);
        EvaluationScore {
            score,
            verdict: Verdict::from_score(score),
            hits: self.hits,
            misses: self.misses,
            reasoning: self.reasoning,
            scores: None,
            details: self.details,
        }
    }
}

/// Run a scoring script with the payload on stdin, parsing its stdout.
pub(crate) async fn run_script(script: &str, payload: &Value) -> anyhow::Result<ScriptResponse> {
    let mut child = Command::new(script)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn scoring script '{script}'"))?;

    let mut stdin = child
        .stdin
        .take()
        .context("scoring script stdin unavailable")?;
    stdin.write_all(serde_json::to_string(payload)?.as_bytes()).await?;
    drop(stdin);

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        anyhow::bail!(
            "script exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let body = stdout.trim();
    // The contract is a single JSON object; tolerate scripts that print
    // diagnostics first by also trying the last non-empty line.
    serde_json::from_str(body)
        .or_else(|err| match body.lines().rev().find(|l| !l.trim().is_empty()) {
            Some(last) => serde_json::from_str(last.trim()),
            None => Err(err),
        })
        .with_context(|| format!("script emitted invalid JSON: {}", truncate(body, 200)))
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct CodeJudgeEvaluator {
    name: String,
    weight: f64,
    script: String,
    config: Option<Value>,
}

impl CodeJudgeEvaluator {
    pub fn new(name: String, weight: f64, script: String, config: Option<Value>) -> Self {
        Self {
            name,
            weight,
            script,
            config,
        }
    }

    fn payload(&self, ctx: &EvalContext) -> Value {
        json!({
            "question": ctx.question,
            "criteria": ctx.criteria,
            "expected_answer": ctx.expected_answer,
            "candidate_answer": ctx.candidate,
            "candidate_trace_summary": ctx.trace,
            "config": self.config,
        })
    }
}

#[async_trait]
impl Evaluator for CodeJudgeEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "code"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(&self, ctx: &EvalContext) -> Result<EvaluationScore> {
        match run_script(&self.script, &self.payload(ctx)).await {
            Ok(response) => Ok(response.into_score()),
            Err(err) => {
                tracing::warn!(
                    eval_id = %ctx.eval_id,
                    script = %self.script,
                    error = %err,
                    "scoring script failed"
                );
                Ok(EvaluationScore::zero(format!(
                    "Scoring script failed: {err:#}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_script_degrades_to_zero() {
        let evaluator = CodeJudgeEvaluator::new(
            "checker".into(),
            1.0,
            "/nonexistent/scoring-script".into(),
            None,
        );
        let ctx = EvalContext::new("case-1", "q", "criteria", "answer");
        let score = evaluator.evaluate(&ctx).await.unwrap();
        assert_eq!(score.score, 0.0);
        assert!(score.misses[0].starts_with("Scoring script failed:"));
    }

    #[test]
    fn test_script_response_clamps_and_passes_details() {
        let response: ScriptResponse = serde_json::from_str(
            r#"{"score": 2.0, "hits": ["ok"], "details": {"matched": 3}}"#,
        )
        .unwrap();
        let score = response.into_score();
        assert_eq!(score.score, 1.0);
        assert_eq!(score.details, Some(json!({"matched": 3})));
    }
}
