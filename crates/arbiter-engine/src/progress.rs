//! Progress events emitted while a run executes.
//!
//! Events fire in actual start/finish order; only the runner's returned
//! result list is ordered by input position.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use arbiter_core::result::EvaluationResult;

/// Lifecycle state of one case within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One progress update for one case.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Worker slot id assigned at dispatch; observability only.
    pub worker_id: u64,
    pub eval_id: String,
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn pending(eval_id: impl Into<String>) -> Self {
        Self {
            worker_id: 0,
            eval_id: eval_id.into(),
            status: ProgressStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn running(worker_id: u64, eval_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            worker_id,
            eval_id: eval_id.into(),
            status: ProgressStatus::Running,
            started_at: Some(started_at),
            completed_at: None,
            error: None,
        }
    }

    pub fn completed(
        worker_id: u64,
        eval_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            worker_id,
            eval_id: eval_id.into(),
            status: ProgressStatus::Completed,
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            error: None,
        }
    }

    pub fn failed(
        worker_id: u64,
        eval_id: impl Into<String>,
        started_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            worker_id,
            eval_id: eval_id.into(),
            status: ProgressStatus::Failed,
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            error: Some(error.into()),
        }
    }
}

/// Callback receiving progress events.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Callback receiving each completed result as it finishes.
pub type ResultSink = Arc<dyn Fn(&EvaluationResult) + Send + Sync>;
