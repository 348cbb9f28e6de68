//! Concurrency scheduler driving a suite of cases against one target.
//!
//! The runner owns a bounded worker pool: at most `max_concurrency` case
//! tasks run at once, excess cases queue in submission order and start as
//! slots free, and results come back in input order regardless of
//! completion order. Invocation, retries, and evaluation for one case run
//! sequentially inside that case's task; tasks for different cases run
//! concurrently with no ordering guarantee relative to each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use arbiter_core::case::{EvalCase, TrialPolicy};
use arbiter_core::error::{EvalError, Result};
use arbiter_core::result::{EvaluationResult, TrialResult};
use arbiter_core::score::{EvaluationScore, EvaluatorResult};
use arbiter_providers::cache::{response_cache_key, ResponseCache};
use arbiter_providers::provider_trait::{InvokeRequest, InvokeResponse, Provider, ResolvedTarget};
use arbiter_providers::registry::ProviderRegistry;

use crate::evaluators::{self, AgentJudge, EvalContext};
use crate::progress::{ProgressEvent, ProgressSink, ResultSink};
use crate::trials;

/// Global options for one run.
#[derive(Clone)]
pub struct RunOptions {
    /// Maximum concurrently running case tasks.
    pub max_concurrency: usize,
    /// Additional immediate retries for timeout-classified errors.
    pub max_retries: u32,
    /// Per-invocation timeout.
    pub agent_timeout_ms: Option<u64>,
    /// Response cache consulted before invocation.
    pub cache: Option<Arc<dyn ResponseCache>>,
    /// Judge provider for `llm_judge` evaluators and the default judge.
    pub judge: Option<Arc<dyn Provider>>,
    /// Sandboxed investigative judge capability.
    pub agent_judge: Option<Arc<dyn AgentJudge>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            max_retries: 0,
            agent_timeout_ms: None,
            cache: None,
            judge: None,
            agent_judge: None,
        }
    }
}

impl RunOptions {
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_ms(mut self, agent_timeout_ms: u64) -> Self {
        self.agent_timeout_ms = Some(agent_timeout_ms);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_judge(mut self, judge: Arc<dyn Provider>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn with_agent_judge(mut self, agent_judge: Arc<dyn AgentJudge>) -> Self {
        self.agent_judge = Some(agent_judge);
        self
    }
}

/// Scheduler for one resolved target.
pub struct EvalRunner {
    target: ResolvedTarget,
    providers: ProviderRegistry,
    options: RunOptions,
    progress: Option<ProgressSink>,
    on_result: Option<ResultSink>,
    cancel: CancellationToken,
    worker_ids: AtomicU64,
    run_id: Uuid,
}

impl EvalRunner {
    /// Create a runner for one resolved target served by `provider`.
    pub fn new(target: ResolvedTarget, provider: Arc<dyn Provider>, options: RunOptions) -> Self {
        let providers = ProviderRegistry::new();
        providers.register(target.name.clone(), provider);
        Self {
            target,
            providers,
            options,
            progress: None,
            on_result: None,
            cancel: CancellationToken::new(),
            worker_ids: AtomicU64::new(0),
            run_id: Uuid::new_v4(),
        }
    }

    /// Attach a progress callback.
    pub fn on_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Attach a per-result callback.
    pub fn on_result(mut self, sink: ResultSink) -> Self {
        self.on_result = Some(sink);
        self
    }

    /// Token cancelling all in-flight invocations of this run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = &self.progress {
            sink(event);
        }
    }

    /// Run every case and return one result per case, in input order.
    ///
    /// Individual case failures never surface as errors: each becomes a
    /// zero-score result with the failure recorded on it.
    pub async fn run(&self, cases: &[EvalCase]) -> Vec<EvaluationResult> {
        let Some(provider) = self.providers.get(&self.target.name) else {
            return cases
                .iter()
                .map(|case| {
                    EvaluationResult::from_error(&case.id, "no provider registered for target")
                })
                .collect();
        };

        debug!(
            run_id = %self.run_id,
            target = %self.target.name,
            cases = cases.len(),
            max_concurrency = self.options.max_concurrency,
            "starting run"
        );

        for case in cases {
            self.emit(ProgressEvent::pending(&case.id));
        }

        // Provider-level batching: one request per case submitted together,
        // skipping the per-case retry/timeout path. A length mismatch (or
        // any batch error) discards the whole batch before anything was
        // evaluated, so falling back never double-dispatches a case.
        let mut batched: Option<Vec<InvokeResponse>> = None;
        if self.target.wants_batch && provider.supports_batch() {
            match self.invoke_batch(provider.as_ref(), cases).await {
                Ok(responses) => batched = Some(responses),
                Err(err) => {
                    warn!(
                        run_id = %self.run_id,
                        error = %err,
                        "batch invocation failed, falling back to per-case dispatch"
                    );
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut join_set: JoinSet<(usize, EvaluationResult)> = JoinSet::new();

        for (index, case) in cases.iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let task = CaseTask {
                case: case.clone(),
                target_name: self.target.name.clone(),
                provider: provider.clone(),
                options: self.options.clone(),
                progress: self.progress.clone(),
                cancel: self.cancel.clone(),
                worker_id: self.worker_ids.fetch_add(1, Ordering::Relaxed) + 1,
            };
            let prefetched = batched.as_ref().map(|responses| responses[index].clone());
            join_set.spawn(async move {
                let _permit = permit;
                let result = task.run(prefetched).await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<EvaluationResult>> = vec![None; cases.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if let Some(sink) = &self.on_result {
                        sink(&result);
                    }
                    slots[index] = Some(result);
                }
                Err(err) => {
                    // A panicking task loses its index; its slot stays empty
                    // and is backfilled with an error result below.
                    warn!(run_id = %self.run_id, error = %err, "case task panicked");
                }
            }
        }

        slots
            .into_iter()
            .zip(cases)
            .map(|(slot, case)| {
                slot.unwrap_or_else(|| {
                    EvaluationResult::from_error(&case.id, "case task aborted unexpectedly")
                })
            })
            .collect()
    }

    async fn invoke_batch(
        &self,
        provider: &dyn Provider,
        cases: &[EvalCase],
    ) -> Result<Vec<InvokeResponse>> {
        let requests = cases
            .iter()
            .map(|case| {
                let mut request = InvokeRequest::new(&case.id, case.question());
                request.messages = case.input.clone();
                request.timeout = self.options.agent_timeout_ms.map(Duration::from_millis);
                request
            })
            .collect::<Vec<_>>();
        let responses = provider.invoke_batch(requests).await?;
        if responses.len() != cases.len() {
            return Err(EvalError::BatchMismatch {
                expected: cases.len(),
                actual: responses.len(),
            });
        }
        Ok(responses)
    }
}

/// Everything one case's task needs, moved onto the worker.
struct CaseTask {
    case: EvalCase,
    target_name: String,
    provider: Arc<dyn Provider>,
    options: RunOptions,
    progress: Option<ProgressSink>,
    cancel: CancellationToken,
    worker_id: u64,
}

impl CaseTask {
    fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = &self.progress {
            sink(event);
        }
    }

    /// Run the case to completion, converting every failure into an error
    /// result so sibling tasks are never affected.
    async fn run(&self, prefetched: Option<InvokeResponse>) -> EvaluationResult {
        let started_at = Utc::now();
        let timer = Instant::now();
        self.emit(ProgressEvent::running(
            self.worker_id,
            &self.case.id,
            started_at,
        ));

        let outcome = self.evaluate(prefetched).await;
        let duration_ms = timer.elapsed().as_millis() as u64;
        match outcome {
            Ok(mut result) => {
                result.duration_ms = duration_ms;
                self.emit(ProgressEvent::completed(
                    self.worker_id,
                    &self.case.id,
                    started_at,
                ));
                result
            }
            Err(err) => {
                self.emit(ProgressEvent::failed(
                    self.worker_id,
                    &self.case.id,
                    started_at,
                    err.to_string(),
                ));
                let mut result = EvaluationResult::from_error(&self.case.id, err.to_string());
                result.duration_ms = duration_ms;
                result
            }
        }
    }

    async fn evaluate(&self, prefetched: Option<InvokeResponse>) -> Result<EvaluationResult> {
        if self.case.trial_count() > 1 {
            return self.run_trials(prefetched).await;
        }

        let response = self.obtain_response(0, prefetched).await?;
        let (score, rows) = self.score_response(&response).await;
        Ok(self.single_result(response, score, rows))
    }

    /// One attempt's response: batch prefetch, cache, or invocation with
    /// the retry/timeout policy.
    async fn obtain_response(
        &self,
        attempt: u32,
        prefetched: Option<InvokeResponse>,
    ) -> Result<InvokeResponse> {
        if let Some(response) = prefetched {
            return Ok(response);
        }

        let prompt = self.case.question();
        let cache_key = self.options.cache.as_ref().map(|_| {
            response_cache_key(
                self.provider.id(),
                &self.target_name,
                &self.case.id,
                &prompt,
            )
        });

        if let (Some(cache), Some(key)) = (&self.options.cache, &cache_key) {
            if let Some(hit) = cache.get(key) {
                debug!(eval_id = %self.case.id, "response cache hit");
                return Ok(hit);
            }
        }

        let response = self.invoke_with_retry(attempt, &prompt).await?;

        if let (Some(cache), Some(key)) = (&self.options.cache, &cache_key) {
            cache.put(key, response.clone());
        }
        Ok(response)
    }

    /// Timeout-classified errors retry immediately, up to the retry
    /// budget; anything else surfaces at once.
    async fn invoke_with_retry(&self, attempt: u32, prompt: &str) -> Result<InvokeResponse> {
        let mut retries_left = self.options.max_retries;
        loop {
            match self.invoke_once(attempt, prompt).await {
                Ok(response) => return Ok(response),
                Err(err)
                    if err.is_timeout() && retries_left > 0 && !self.cancel.is_cancelled() =>
                {
                    retries_left -= 1;
                    debug!(
                        eval_id = %self.case.id,
                        error = %err,
                        retries_left,
                        "timeout, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn invoke_once(&self, attempt: u32, prompt: &str) -> Result<InvokeResponse> {
        let call_token = self.cancel.child_token();
        let mut request = InvokeRequest::new(&self.case.id, prompt);
        request.attempt = attempt;
        request.messages = self.case.input.clone();
        request.timeout = self.options.agent_timeout_ms.map(Duration::from_millis);

        let invocation = self.provider.invoke(request, call_token.clone());
        match self.options.agent_timeout_ms {
            Some(timeout_ms) => {
                match tokio::time::timeout(Duration::from_millis(timeout_ms), invocation).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        call_token.cancel();
                        Err(EvalError::Timeout)
                    }
                }
            }
            None => invocation.await,
        }
    }

    async fn score_response(
        &self,
        response: &InvokeResponse,
    ) -> (EvaluationScore, Vec<EvaluatorResult>) {
        let mut ctx = EvalContext::new(
            &self.case.id,
            self.case.question(),
            &self.case.criteria,
            &response.text,
        );
        if let Some(expected) = self.case.expected_answer() {
            ctx = ctx.with_expected_answer(expected);
        }
        if let Some(trace) = &response.trace {
            ctx = ctx.with_trace(trace.clone());
        }
        ctx.judge = self.options.judge.clone();
        ctx.agent_judge = self.options.agent_judge.clone();
        evaluators::evaluate_case(&self.case.evaluators, &ctx).await
    }

    fn single_result(
        &self,
        response: InvokeResponse,
        score: EvaluationScore,
        rows: Vec<EvaluatorResult>,
    ) -> EvaluationResult {
        let mut result = EvaluationResult::scored(&self.case.id, score.score, score.verdict);
        result.hits = score.hits;
        result.misses = score.misses;
        result.reasoning = score.reasoning;
        result.candidate_answer = Some(response.text);
        result.evaluator_results = rows;
        result.trace = response.trace;
        result
    }

    /// Repeat invocation+evaluation independently per attempt, then hand
    /// the ordered trial list to the aggregator. A configured cost limit
    /// stops the loop before starting further attempts.
    async fn run_trials(&self, mut prefetched: Option<InvokeResponse>) -> Result<EvaluationResult> {
        let policy = self.case.trials.clone().unwrap_or_default();
        let count = self.case.trial_count();

        let mut trial_rows: Vec<TrialResult> = Vec::with_capacity(count as usize);
        let mut total_cost = 0.0f64;
        let mut cost_limited = false;
        let mut last_response: Option<InvokeResponse> = None;

        for attempt in 0..count {
            if let Some(limit) = policy.cost_limit_usd {
                if attempt > 0 && total_cost >= limit {
                    warn!(
                        eval_id = %self.case.id,
                        total_cost,
                        limit,
                        "cost limit reached, stopping trials early"
                    );
                    cost_limited = true;
                    break;
                }
            }

            match self.obtain_response(attempt, prefetched.take()).await {
                Ok(response) => {
                    let (score, rows) = self.score_response(&response).await;
                    let cost_usd = response.trace.as_ref().and_then(|t| t.cost_usd);
                    if let Some(cost) = cost_usd {
                        total_cost += cost;
                    }
                    trial_rows.push(TrialResult {
                        attempt,
                        score: score.score,
                        verdict: score.verdict,
                        evaluator_results: rows,
                        error: None,
                        cost_usd,
                    });
                    last_response = Some(response);
                }
                Err(err) => {
                    // Attempts are independent; a failed one zeroes itself
                    // without aborting the rest of the trial loop.
                    trial_rows.push(TrialResult {
                        attempt,
                        score: 0.0,
                        verdict: arbiter_core::score::Verdict::Fail,
                        evaluator_results: Vec::new(),
                        error: Some(err.to_string()),
                        cost_usd: None,
                    });
                }
            }
        }

        Ok(self.trials_result(policy, trial_rows, last_response, cost_limited))
    }

    fn trials_result(
        &self,
        policy: TrialPolicy,
        trial_rows: Vec<TrialResult>,
        last_response: Option<InvokeResponse>,
        cost_limited: bool,
    ) -> EvaluationResult {
        let aggregated = trials::aggregate(&trial_rows, policy.strategy);

        // Headline detail rows come from the best-scoring attempt.
        let best = trial_rows
            .iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut result =
            EvaluationResult::scored(&self.case.id, aggregated.score, aggregated.verdict);
        result.reasoning = Some(aggregated.describe());
        result.evaluator_results = best
            .map(|t| t.evaluator_results.clone())
            .unwrap_or_default();
        result.candidate_answer = last_response.as_ref().map(|r| r.text.clone());
        result.trace = last_response.and_then(|r| r.trace);
        result.trials = Some(trial_rows);
        result.aggregation = Some(aggregated.aggregation);
        result.cost_limited = cost_limited;
        result
    }
}
