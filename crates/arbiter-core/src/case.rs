//! Eval cases and their conversations.
//!
//! An [`EvalCase`] is one unit of evaluation: an input conversation, a
//! free-text success criteria, and the evaluator configuration used to
//! grade the target's answer. Cases are produced by the suite loader and
//! are read-only from then on, so they are safe to share across
//! concurrently running tasks.

use serde::{Deserialize, Serialize};

use crate::config::EvaluatorConfig;

/// Conversation role for a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Label used when rendering transcripts.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Render an ordered conversation into the prompt text sent to a provider.
///
/// A single user turn renders as bare text; anything longer gets
/// `role: content` lines so the target sees the full exchange. The same
/// rendering feeds the response cache key, so it must stay deterministic.
pub fn render_transcript(messages: &[Message]) -> String {
    match messages {
        [only] if only.role == Role::User => only.content.clone(),
        _ => messages
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// How multiple trial scores fold into one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStrategy {
    /// Best attempt wins.
    #[default]
    PassAtK,
    /// Arithmetic mean of attempt scores.
    Mean,
    /// Lower bound of a 95% confidence interval on the mean.
    ConfidenceInterval,
}

/// Multi-trial policy for a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialPolicy {
    /// Number of independent attempts.
    #[serde(default = "default_trial_count")]
    pub count: u32,
    /// Aggregation strategy across attempts.
    #[serde(default)]
    pub strategy: TrialStrategy,
    /// Stop starting further attempts once accumulated cost crosses this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_limit_usd: Option<f64>,
}

fn default_trial_count() -> u32 {
    1
}

impl Default for TrialPolicy {
    fn default() -> Self {
        Self {
            count: 1,
            strategy: TrialStrategy::default(),
            cost_limit_usd: None,
        }
    }
}

/// One unit of evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCase {
    /// Unique id within a run.
    pub id: String,
    /// Free-text description of what a successful answer looks like.
    pub criteria: String,
    /// Ordered input conversation handed to the target.
    pub input: Vec<Message>,
    /// Reference conversation, when the suite provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Vec<Message>>,
    /// Ordered evaluator configuration; empty falls back to the default judge.
    #[serde(default)]
    pub evaluators: Vec<EvaluatorConfig>,
    /// Multi-trial policy, when the case runs more than once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trials: Option<TrialPolicy>,
}

impl EvalCase {
    pub fn new(id: impl Into<String>, criteria: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            criteria: criteria.into(),
            input: Vec::new(),
            expected: None,
            evaluators: Vec::new(),
            trials: None,
        }
    }

    pub fn with_input(mut self, input: Vec<Message>) -> Self {
        self.input = input;
        self
    }

    pub fn with_expected(mut self, expected: Vec<Message>) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn with_evaluators(mut self, evaluators: Vec<EvaluatorConfig>) -> Self {
        self.evaluators = evaluators;
        self
    }

    pub fn with_trials(mut self, trials: TrialPolicy) -> Self {
        self.trials = Some(trials);
        self
    }

    /// Rendered input conversation.
    pub fn question(&self) -> String {
        render_transcript(&self.input)
    }

    /// Last assistant turn of the expected conversation, if any.
    pub fn expected_answer(&self) -> Option<&str> {
        self.expected
            .as_ref()?
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Number of attempts this case runs, at least 1.
    pub fn trial_count(&self) -> u32 {
        self.trials.as_ref().map(|t| t.count.max(1)).unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_single_user_turn_is_bare() {
        let messages = vec![Message::user("What is 2 + 2?")];
        assert_eq!(render_transcript(&messages), "What is 2 + 2?");
    }

    #[test]
    fn test_render_multi_turn_tags_roles() {
        let messages = vec![
            Message::system("Be terse."),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        assert_eq!(
            render_transcript(&messages),
            "system: Be terse.\nuser: hi\nassistant: hello"
        );
    }

    #[test]
    fn test_expected_answer_takes_last_assistant_turn() {
        let case = EvalCase::new("c1", "answers correctly").with_expected(vec![
            Message::assistant("draft"),
            Message::user("try again"),
            Message::assistant("final"),
        ]);
        assert_eq!(case.expected_answer(), Some("final"));
    }

    #[test]
    fn test_trial_count_defaults_to_one() {
        let case = EvalCase::new("c1", "anything");
        assert_eq!(case.trial_count(), 1);

        let case = case.with_trials(TrialPolicy {
            count: 0,
            ..Default::default()
        });
        assert_eq!(case.trial_count(), 1);
    }
}
