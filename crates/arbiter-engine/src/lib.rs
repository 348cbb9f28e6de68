//! Evaluation engine for Arbiter.
//!
//! Runs a suite of cases against a pluggable target, scores each response
//! with one or more evaluators, and aggregates the results.
//!
//! # Architecture
//!
//! - `runner`: concurrency scheduler — bounded worker pool, retry/timeout
//!   policy, provider-level batching, response cache, trials
//! - `evaluators`: evaluator registry and composition engine
//! - `trials`: multi-trial statistical aggregation
//! - `progress`: progress events emitted while a run executes

pub mod evaluators;
pub mod progress;
pub mod runner;
pub mod trials;

pub use progress::{ProgressEvent, ProgressSink, ProgressStatus, ResultSink};
pub use runner::{EvalRunner, RunOptions};
