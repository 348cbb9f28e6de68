//! Investigative agent judge seam.
//!
//! The sandboxed agent that runs an investigative loop (tools, workspace
//! inspection) is an external collaborator. This module defines the
//! capability trait and the evaluator that delegates to it; everything
//! past the [`EvaluationScore`] contract lives outside the engine.

use async_trait::async_trait;

use arbiter_core::error::Result;
use arbiter_core::score::EvaluationScore;

use super::{EvalContext, Evaluator};

/// Sandboxed investigative judge capability.
#[async_trait]
pub trait AgentJudge: Send + Sync {
    /// Investigate the candidate and come back with a normal score.
    async fn judge(
        &self,
        ctx: &EvalContext,
        instructions: Option<&str>,
    ) -> Result<EvaluationScore>;
}

pub struct AgentJudgeEvaluator {
    name: String,
    weight: f64,
    instructions: Option<String>,
}

impl AgentJudgeEvaluator {
    pub fn new(name: String, weight: f64, instructions: Option<String>) -> Self {
        Self {
            name,
            weight,
            instructions,
        }
    }
}

#[async_trait]
impl Evaluator for AgentJudgeEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "agent_judge"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(&self, ctx: &EvalContext) -> Result<EvaluationScore> {
        match ctx.agent_judge.clone() {
            Some(agent) => agent.judge(ctx, self.instructions.as_deref()).await,
            None => Ok(EvaluationScore::zero(
                "no agent judge capability configured",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FixedAgent;

    #[async_trait]
    impl AgentJudge for FixedAgent {
        async fn judge(
            &self,
            _ctx: &EvalContext,
            instructions: Option<&str>,
        ) -> Result<EvaluationScore> {
            assert_eq!(instructions, Some("check the workspace"));
            Ok(EvaluationScore::from_score(0.9))
        }
    }

    #[tokio::test]
    async fn test_delegates_to_capability() {
        let evaluator = AgentJudgeEvaluator::new(
            "investigator".into(),
            1.0,
            Some("check the workspace".into()),
        );
        let ctx = EvalContext::new("case-1", "q", "criteria", "answer")
            .with_agent_judge(Arc::new(FixedAgent));
        let score = evaluator.evaluate(&ctx).await.unwrap();
        assert_eq!(score.score, 0.9);
    }

    #[tokio::test]
    async fn test_missing_capability_scores_zero() {
        let evaluator = AgentJudgeEvaluator::new("investigator".into(), 1.0, None);
        let ctx = EvalContext::new("case-1", "q", "criteria", "answer");
        let score = evaluator.evaluate(&ctx).await.unwrap();
        assert_eq!(score.score, 0.0);
        assert_eq!(score.misses, vec!["no agent judge capability configured"]);
    }
}
