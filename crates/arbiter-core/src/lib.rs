//! Core data model for the Arbiter agent evaluation engine.
//!
//! Everything here is plain data: cases and their conversations, the
//! evaluator configuration schema, scores and verdicts, tool-call trace
//! summaries, and run results. The execution machinery lives in
//! `arbiter-engine`; target access lives in `arbiter-providers`.
//!
//! # Architecture
//!
//! - `case`: eval cases, conversation turns, trial policies
//! - `config`: the tagged evaluator configuration union
//! - `score`: scores, verdicts, per-evaluator report rows
//! - `trace`: tool calls and derived trace summaries
//! - `result`: per-case results, trials, trial aggregation
//! - `error`: error taxonomy shared across the workspace

pub mod case;
pub mod config;
pub mod error;
pub mod result;
pub mod score;
pub mod trace;

pub use case::{render_transcript, EvalCase, Message, Role, TrialPolicy, TrialStrategy};
pub use config::{AggregatorSpec, ArgsMatcher, EvaluatorConfig, ExpectedCall, TrajectoryMode};
pub use error::{EvalError, Result};
pub use result::{EvaluationResult, TrialAggregation, TrialResult};
pub use score::{EvaluationScore, EvaluatorResult, Verdict};
pub use trace::{ToolCall, TraceSummary};
