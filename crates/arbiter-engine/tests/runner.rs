//! Scheduler behavior: concurrency bounds, retries, batching, ordering,
//! caching, trials, and failure isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use arbiter_core::case::{EvalCase, Message, TrialPolicy, TrialStrategy};
use arbiter_core::config::EvaluatorConfig;
use arbiter_core::error::Result;
use arbiter_core::result::TrialAggregation;
use arbiter_core::score::Verdict;
use arbiter_core::trace::TraceSummary;
use arbiter_engine::progress::{ProgressEvent, ProgressStatus};
use arbiter_engine::{EvalRunner, RunOptions};
use arbiter_providers::cache::MemoryCache;
use arbiter_providers::fakes::{ScriptedOutcome, ScriptedProvider, StaticProvider};
use arbiter_providers::provider_trait::{
    InvokeRequest, InvokeResponse, Provider, ResolvedTarget,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("arbiter_engine=debug")
        .try_init();
}

fn case(id: &str) -> EvalCase {
    // ExecutionMetrics with no thresholds scores 1.0 without needing a
    // judge, which keeps scheduler tests focused on scheduling.
    EvalCase::new(id, "responds at all")
        .with_input(vec![Message::user(format!("prompt for {id}"))])
        .with_evaluators(vec![EvaluatorConfig::ExecutionMetrics {
            name: None,
            weight: None,
            max_tool_calls: None,
            min_tool_calls: None,
            max_duration_ms: None,
            max_cost_usd: None,
            max_total_tokens: None,
        }])
}

fn cases(n: usize) -> Vec<EvalCase> {
    (0..n).map(|i| case(&format!("case-{i}"))).collect()
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    init_tracing();
    let provider = Arc::new(StaticProvider::new("ok").with_delay(Duration::from_millis(30)));
    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "static"),
        provider.clone(),
        RunOptions::default().with_concurrency(3),
    );

    let results = runner.run(&cases(8)).await;
    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|r| !r.is_error()));
    assert_eq!(provider.invocations(), 8);
    assert!(
        provider.peak_in_flight() <= 3,
        "peak in-flight {} exceeded limit",
        provider.peak_in_flight()
    );
}

#[tokio::test]
async fn test_results_preserve_input_order() {
    // Later cases finish first: each case's latency decreases with its
    // index, so completion order is roughly the reverse of submission.
    struct SkewedProvider;

    #[async_trait]
    impl Provider for SkewedProvider {
        fn id(&self) -> &str {
            "skewed"
        }

        async fn invoke(
            &self,
            request: InvokeRequest,
            _cancel: CancellationToken,
        ) -> Result<InvokeResponse> {
            let index: u64 = request
                .eval_id
                .trim_start_matches("case-")
                .parse()
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(60 - index * 10)).await;
            Ok(InvokeResponse::text(format!("answer for {}", request.eval_id)))
        }
    }

    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "skewed"),
        Arc::new(SkewedProvider),
        RunOptions::default().with_concurrency(6),
    );

    let input = cases(6);
    let results = runner.run(&input).await;
    for (result, case) in results.iter().zip(&input) {
        assert_eq!(result.eval_id, case.id);
        assert_eq!(
            result.candidate_answer.as_deref(),
            Some(format!("answer for {}", case.id).as_str())
        );
    }
}

#[tokio::test]
async fn test_timeout_retries_then_succeeds() {
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedOutcome::TimeOut,
        ScriptedOutcome::TimeOut,
        ScriptedOutcome::Respond("recovered".into()),
    ]));
    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "scripted"),
        provider.clone(),
        RunOptions::default().with_retries(2),
    );

    let results = runner.run(&cases(1)).await;
    assert!(!results[0].is_error());
    assert_eq!(results[0].candidate_answer.as_deref(), Some("recovered"));
    assert_eq!(provider.invocations(), 3);
}

#[tokio::test]
async fn test_timeout_exhausts_retry_budget() {
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedOutcome::TimeOut,
        ScriptedOutcome::TimeOut,
        ScriptedOutcome::TimeOut,
    ]));
    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "scripted"),
        provider.clone(),
        RunOptions::default().with_retries(2),
    );

    let results = runner.run(&cases(1)).await;
    assert!(results[0].is_error());
    assert_eq!(results[0].score, 0.0);
    assert!(results[0].misses[0].starts_with("Error:"));
    // maxRetries + 1 attempts, no more.
    assert_eq!(provider.invocations(), 3);
}

#[tokio::test]
async fn test_non_timeout_error_not_retried() {
    let provider = Arc::new(ScriptedProvider::new([ScriptedOutcome::Fail(
        "connection refused".into(),
    )]));
    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "scripted"),
        provider.clone(),
        RunOptions::default().with_retries(5),
    );

    let results = runner.run(&cases(1)).await;
    assert!(results[0].is_error());
    assert!(results[0].misses[0].contains("connection refused"));
    assert_eq!(provider.invocations(), 1);
}

#[tokio::test]
async fn test_hanging_provider_hits_timeout_and_retries() {
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedOutcome::Hang,
        ScriptedOutcome::Respond("late but fine".into()),
    ]));
    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "scripted"),
        provider.clone(),
        RunOptions::default().with_retries(1).with_timeout_ms(40),
    );

    let results = runner.run(&cases(1)).await;
    assert!(!results[0].is_error());
    assert_eq!(provider.invocations(), 2);
}

#[tokio::test]
async fn test_batch_success_skips_per_case_invocation() {
    let provider = Arc::new(
        ScriptedProvider::new([]).with_batch_responses(vec![
            InvokeResponse::text("batch answer 0"),
            InvokeResponse::text("batch answer 1"),
            InvokeResponse::text("batch answer 2"),
        ]),
    );
    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "scripted").with_batching(),
        provider.clone(),
        RunOptions::default().with_concurrency(2),
    );

    let results = runner.run(&cases(3)).await;
    assert_eq!(provider.invocations(), 0);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(
            result.candidate_answer.as_deref(),
            Some(format!("batch answer {i}").as_str())
        );
    }
}

#[tokio::test]
async fn test_batch_length_mismatch_falls_back_per_case() {
    let provider = Arc::new(
        ScriptedProvider::new([
            ScriptedOutcome::Respond("solo 0".into()),
            ScriptedOutcome::Respond("solo 1".into()),
            ScriptedOutcome::Respond("solo 2".into()),
        ])
        .with_batch_responses(vec![InvokeResponse::text("only one")]),
    );
    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "scripted").with_batching(),
        provider.clone(),
        RunOptions::default(),
    );

    let results = runner.run(&cases(3)).await;
    // No case dropped, every case re-dispatched individually.
    assert_eq!(results.len(), 3);
    assert_eq!(provider.invocations(), 3);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(
            result.candidate_answer.as_deref(),
            Some(format!("solo {i}").as_str())
        );
    }
}

#[tokio::test]
async fn test_batch_not_attempted_without_target_opt_in() {
    let provider = Arc::new(
        ScriptedProvider::new([ScriptedOutcome::Respond("per-case".into())])
            .with_batch_responses(vec![InvokeResponse::text("batch")]),
    );
    // Target does not want batching, so batch support is irrelevant.
    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "scripted"),
        provider.clone(),
        RunOptions::default(),
    );

    let results = runner.run(&cases(1)).await;
    assert_eq!(results[0].candidate_answer.as_deref(), Some("per-case"));
    assert_eq!(provider.invocations(), 1);
}

#[tokio::test]
async fn test_cache_hit_skips_invocation() {
    let provider = Arc::new(StaticProvider::new("cached answer"));
    let cache = Arc::new(MemoryCache::new());
    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "static"),
        provider.clone(),
        RunOptions::default().with_cache(cache.clone()),
    );

    let suite = cases(2);
    let first = runner.run(&suite).await;
    assert_eq!(provider.invocations(), 2);
    assert_eq!(cache.len(), 2);

    let second = runner.run(&suite).await;
    assert_eq!(provider.invocations(), 2, "second run must be served from cache");
    assert_eq!(
        first[0].candidate_answer, second[0].candidate_answer,
        "cache must return the identical response"
    );
}

#[tokio::test]
async fn test_trials_pass_at_k_takes_best_attempt() {
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedOutcome::Respond(r#"{"x": 2}"#.into()),
        ScriptedOutcome::Respond(r#"{"x": 1}"#.into()),
    ]));
    let case = EvalCase::new("multi", "emits x = 1")
        .with_input(vec![Message::user("emit x")])
        .with_evaluators(vec![EvaluatorConfig::FieldAccuracy {
            name: None,
            weight: None,
            fields: [("x".to_string(), serde_json::json!(1))].into(),
            tolerance: None,
        }])
        .with_trials(TrialPolicy {
            count: 2,
            strategy: TrialStrategy::PassAtK,
            cost_limit_usd: None,
        });

    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "scripted"),
        provider.clone(),
        RunOptions::default(),
    );
    let results = runner.run(std::slice::from_ref(&case)).await;

    let result = &results[0];
    assert_eq!(result.score, 1.0);
    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(result.trials.as_ref().unwrap().len(), 2);
    assert_eq!(
        result.aggregation,
        Some(TrialAggregation::PassAtK {
            passed_attempts: 1,
            total_attempts: 2,
        })
    );
    assert_eq!(provider.invocations(), 2);
}

#[tokio::test]
async fn test_trials_stop_at_cost_limit() {
    let trace = TraceSummary::from_calls(vec![]).with_cost(1.0);
    let provider = Arc::new(StaticProvider::new("pricey").with_trace(trace));
    let case = case("costly").with_trials(TrialPolicy {
        count: 5,
        strategy: TrialStrategy::Mean,
        cost_limit_usd: Some(1.5),
    });

    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "static"),
        provider.clone(),
        RunOptions::default(),
    );
    let results = runner.run(std::slice::from_ref(&case)).await;

    let result = &results[0];
    assert!(result.cost_limited);
    // Attempt 0 spends 1.0 (< 1.5), attempt 1 spends another, then the
    // limit stops attempt 2.
    assert_eq!(result.trials.as_ref().unwrap().len(), 2);
    assert_eq!(provider.invocations(), 2);
}

#[tokio::test]
async fn test_failed_trial_zeroes_only_itself() {
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedOutcome::Fail("flaky backend".into()),
        ScriptedOutcome::Respond(r#"{"x": 1}"#.into()),
    ]));
    let case = EvalCase::new("flaky", "emits x = 1")
        .with_input(vec![Message::user("emit x")])
        .with_evaluators(vec![EvaluatorConfig::FieldAccuracy {
            name: None,
            weight: None,
            fields: [("x".to_string(), serde_json::json!(1))].into(),
            tolerance: None,
        }])
        .with_trials(TrialPolicy {
            count: 2,
            strategy: TrialStrategy::PassAtK,
            cost_limit_usd: None,
        });

    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "scripted"),
        provider,
        RunOptions::default(),
    );
    let results = runner.run(std::slice::from_ref(&case)).await;

    let result = &results[0];
    assert!(!result.is_error(), "one failed attempt must not fail the case");
    assert_eq!(result.score, 1.0);
    let trials = result.trials.as_ref().unwrap();
    assert!(trials[0].error.as_ref().unwrap().contains("flaky backend"));
    assert!(trials[1].error.is_none());
}

#[tokio::test]
async fn test_progress_events_cover_lifecycle() {
    let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();

    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "static"),
        Arc::new(StaticProvider::new("ok")),
        RunOptions::default().with_concurrency(2),
    )
    .on_progress(Arc::new(move |event| {
        sink_events.lock().unwrap().push(event);
    }));

    runner.run(&cases(2)).await;

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 6);
    assert!(events[..2]
        .iter()
        .all(|e| e.status == ProgressStatus::Pending));
    for id in ["case-0", "case-1"] {
        let statuses: Vec<_> = events
            .iter()
            .filter(|e| e.eval_id == id)
            .map(|e| e.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                ProgressStatus::Pending,
                ProgressStatus::Running,
                ProgressStatus::Completed,
            ]
        );
    }
    // Worker ids are assigned at dispatch and are unique.
    let mut worker_ids: Vec<_> = events
        .iter()
        .filter(|e| e.status == ProgressStatus::Running)
        .map(|e| e.worker_id)
        .collect();
    worker_ids.sort_unstable();
    worker_ids.dedup();
    assert_eq!(worker_ids.len(), 2);
}

#[tokio::test]
async fn test_result_callback_sees_every_result() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "static"),
        Arc::new(StaticProvider::new("ok")),
        RunOptions::default().with_concurrency(4),
    )
    .on_result(Arc::new(move |_result| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    runner.run(&cases(5)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_external_cancellation_fails_cases_without_crashing() {
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedOutcome::Hang,
        ScriptedOutcome::Hang,
    ]));
    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "scripted"),
        provider,
        RunOptions::default().with_concurrency(2),
    );

    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();
    });

    let results = runner.run(&cases(2)).await;
    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(result.is_error());
        assert!(result.error.as_ref().unwrap().contains("cancelled"));
    }
}

#[tokio::test]
async fn test_panicking_provider_becomes_error_result() {
    struct PanickyProvider;

    #[async_trait]
    impl Provider for PanickyProvider {
        fn id(&self) -> &str {
            "panicky"
        }

        async fn invoke(
            &self,
            _request: InvokeRequest,
            _cancel: CancellationToken,
        ) -> Result<InvokeResponse> {
            panic!("unexpected programming error");
        }
    }

    let runner = EvalRunner::new(
        ResolvedTarget::new("local", "panicky"),
        Arc::new(PanickyProvider),
        RunOptions::default(),
    );

    let results = runner.run(&cases(2)).await;
    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(result.is_error());
    }
}
