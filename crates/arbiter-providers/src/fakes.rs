//! Fake providers for tests.
//!
//! Shipped as a regular module rather than behind `cfg(test)` so the
//! engine's integration tests (and downstream users writing their own)
//! can drive the scheduler without a live target.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use arbiter_core::error::{EvalError, Result};
use arbiter_core::trace::TraceSummary;

use crate::provider_trait::{InvokeRequest, InvokeResponse, Provider};

/// Provider returning a fixed response, with an optional artificial delay.
///
/// Tracks the peak number of concurrent `invoke` calls so scheduler tests
/// can assert the worker-pool bound.
pub struct StaticProvider {
    id: String,
    response: InvokeResponse,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    invocations: AtomicUsize,
}

impl StaticProvider {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: "static".to_string(),
            response: InvokeResponse::text(text),
            delay: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn with_trace(mut self, trace: TraceSummary) -> Self {
        self.response.trace = Some(trace);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total `invoke` calls served so far.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Highest number of `invoke` calls ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        _request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<InvokeResponse> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let outcome = match self.delay {
            Some(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(self.response.clone()),
                    _ = cancel.cancelled() => Err(EvalError::Cancelled),
                }
            }
            None => Ok(self.response.clone()),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// One scripted outcome for [`ScriptedProvider`].
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Respond(String),
    /// Fail with a timeout-classified error.
    TimeOut,
    /// Fail with a non-timeout provider error.
    Fail(String),
    /// Block until the cancellation token fires.
    Hang,
}

/// Provider replaying a queue of outcomes, one per `invoke` call.
///
/// An exhausted queue fails loudly so tests notice unexpected extra calls.
pub struct ScriptedProvider {
    id: String,
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    batch_responses: Mutex<Option<Vec<InvokeResponse>>>,
    invocations: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(outcomes: impl IntoIterator<Item = ScriptedOutcome>) -> Self {
        Self {
            id: "scripted".to_string(),
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            batch_responses: Mutex::new(None),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Queue the array the next `invoke_batch` call returns, regardless of
    /// the request count — tests use this to force a length mismatch.
    pub fn with_batch_responses(self, responses: Vec<InvokeResponse>) -> Self {
        *self.batch_responses.lock() = Some(responses);
        self
    }

    /// Total `invoke` calls served so far (batch calls not included).
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        _request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<InvokeResponse> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let next = self.outcomes.lock().pop_front();
        match next {
            Some(ScriptedOutcome::Respond(text)) => Ok(InvokeResponse::text(text)),
            Some(ScriptedOutcome::TimeOut) => Err(EvalError::Timeout),
            Some(ScriptedOutcome::Fail(message)) => Err(EvalError::Provider(message)),
            Some(ScriptedOutcome::Hang) => {
                cancel.cancelled().await;
                Err(EvalError::Cancelled)
            }
            None => Err(EvalError::Provider("scripted outcome queue exhausted".into())),
        }
    }

    fn supports_batch(&self) -> bool {
        self.batch_responses.lock().is_some()
    }

    async fn invoke_batch(&self, _requests: Vec<InvokeRequest>) -> Result<Vec<InvokeResponse>> {
        match self.batch_responses.lock().take() {
            Some(responses) => Ok(responses),
            None => Err(EvalError::Provider("no batch responses scripted".into())),
        }
    }
}
