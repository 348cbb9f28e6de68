//! Provider trait abstraction over evaluation targets.
//!
//! The scheduler never talks to a model API directly; it goes through a
//! [`Provider`], one instance per target name, shared across its worker
//! pool. Cancellation is threaded explicitly as a token argument rather
//! than ambient state, so a timeout and an external cancel both reach the
//! same in-flight call.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use arbiter_core::case::Message;
use arbiter_core::error::{EvalError, Result};
use arbiter_core::trace::TraceSummary;

/// Request for one target invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Case id this request grades.
    pub eval_id: String,
    /// Zero-based trial attempt number.
    pub attempt: u32,
    /// Fully rendered prompt text.
    pub prompt: String,
    /// Role-tagged conversation, for providers that keep the structure.
    pub messages: Vec<Message>,
    /// Per-call deadline, when the run configures one.
    pub timeout: Option<Duration>,
    /// Opaque per-request metadata.
    pub metadata: Option<Value>,
}

impl InvokeRequest {
    pub fn new(eval_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            eval_id: eval_id.into(),
            attempt: 0,
            prompt: prompt.into(),
            messages: Vec::new(),
            timeout: None,
            metadata: None,
        }
    }
}

/// Response from one target invocation.
#[derive(Debug, Clone, Default)]
pub struct InvokeResponse {
    /// Candidate answer text.
    pub text: String,
    /// Execution trace, when the target reports one.
    pub trace: Option<TraceSummary>,
}

impl InvokeResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: TraceSummary) -> Self {
        self.trace = Some(trace);
        self
    }
}

/// Capability through which the scheduler reaches a target.
///
/// Implementations must tolerate concurrent `invoke` calls: the runner
/// shares one instance per target across all of its tasks.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider id, used in cache keys and logs.
    fn id(&self) -> &str;

    /// Invoke the target once. The token fires on timeout or external
    /// cancellation; implementations should abandon work when it trips.
    async fn invoke(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<InvokeResponse>;

    /// Whether `invoke_batch` is implemented.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Invoke the target once per request, returning one response per
    /// request in the same order. Providers without batch support are
    /// simply never asked.
    async fn invoke_batch(&self, requests: Vec<InvokeRequest>) -> Result<Vec<InvokeResponse>> {
        let _ = requests;
        Err(EvalError::Provider(format!(
            "provider '{}' does not support batching",
            self.id()
        )))
    }
}

/// A target resolved by the suite loader, reachable through a provider.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    /// Target name, unique within a run.
    pub name: String,
    /// Id of the provider serving this target.
    pub provider: String,
    /// Whether the target asks for provider-level batching.
    pub wants_batch: bool,
    /// Provider-specific settings, passed through opaquely.
    pub settings: Value,
}

impl ResolvedTarget {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            wants_batch: false,
            settings: Value::Null,
        }
    }

    pub fn with_batching(mut self) -> Self {
        self.wants_batch = true;
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }
}
