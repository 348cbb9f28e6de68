//! LLM judge evaluator.
//!
//! Delegates grading to a judge provider and parses its structured
//! response. Judge output is untrusted input: anything unparsable
//! degrades to a zero score, never an error.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use arbiter_core::error::Result;
use arbiter_core::score::{EvaluationScore, Verdict};
use arbiter_providers::provider_trait::InvokeRequest;

use super::{EvalContext, Evaluator};

/// Grading instructions appended to every judge prompt.
pub(crate) const GRADING_INSTRUCTIONS: &str = r#"## Instructions
Grade the candidate answer against the criteria. Respond with a single JSON object and nothing else:
{"score": <number between 0.0 and 1.0>, "hits": ["<criterion met>", ...], "misses": ["<criterion not met>", ...], "reasoning": "<one short paragraph>"}"#;

/// Structured verdict expected back from the judge.
#[derive(Debug, Deserialize)]
struct JudgeResponse {
    score: f64,
    #[serde(default)]
    hits: Vec<String>,
    #[serde(default)]
    misses: Vec<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

pub struct LlmJudgeEvaluator {
    name: String,
    weight: f64,
    /// Criteria override; falls back to the case criteria.
    criteria: Option<String>,
}

impl LlmJudgeEvaluator {
    pub fn new(name: String, weight: f64, criteria: Option<String>) -> Self {
        Self {
            name,
            weight,
            criteria,
        }
    }

    fn render_prompt(&self, ctx: &EvalContext) -> String {
        let criteria = self.criteria.as_deref().unwrap_or(&ctx.criteria);
        let mut prompt = format!(
            "## Question\n{}\n\n## Grading Criteria\n{}\n\n",
            ctx.question, criteria
        );
        if let Some(expected) = &ctx.expected_answer {
            prompt.push_str(&format!("## Reference Answer\n{expected}\n\n"));
        }
        prompt.push_str(&format!(
            "## Candidate Answer\n{}\n\n{}",
            ctx.candidate, GRADING_INSTRUCTIONS
        ));
        prompt
    }
}

#[async_trait]
impl Evaluator for LlmJudgeEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "llm_judge"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(&self, ctx: &EvalContext) -> Result<EvaluationScore> {
        let Some(judge) = ctx.judge.clone() else {
            return Ok(EvaluationScore::zero("no judge provider configured"));
        };

        let mut request = InvokeRequest::new(ctx.eval_id.clone(), self.render_prompt(ctx));
        request.metadata = Some(serde_json::json!({"role": "judge"}));

        let response = match judge.invoke(request, CancellationToken::new()).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(eval_id = %ctx.eval_id, error = %err, "judge invocation failed");
                return Ok(EvaluationScore::zero(format!(
                    "Judge invocation failed: {err}"
                )));
            }
        };

        Ok(parse_judge_response(&response.text, &ctx.eval_id))
    }
}

/// Parse the judge's verdict, degrading to a zero score on malformed output.
pub(crate) fn parse_judge_response(text: &str, eval_id: &str) -> EvaluationScore {
    let parsed = extract_json_object(text)
        .and_then(|raw| serde_json::from_str::<JudgeResponse>(&raw).ok());
    match parsed {
        Some(response) => {
            let score = response.score.clamp(0.0, 1.0);
            EvaluationScore {
                score,
                verdict: Verdict::from_score(score),
                hits: response.hits,
                misses: response.misses,
                reasoning: response.reasoning,
                scores: None,
                details: None,
            }
        }
        None => {
            tracing::warn!(
                eval_id = %eval_id,
                response = %text,
                "unparsable judge response"
            );
            EvaluationScore::from_score(0.0)
        }
    }
}

/// Pull the first JSON object out of a response, stripping markdown fences.
pub(crate) fn extract_json_object(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }

    if let Ok(fence) = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```") {
        if let Some(captures) = fence.captures(text) {
            return Some(captures[1].to_string());
        }
    }

    // Last resort: first balanced object, respecting string literals.
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
