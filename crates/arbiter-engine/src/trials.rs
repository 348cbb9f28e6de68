//! Multi-trial statistical aggregation.
//!
//! Pure functions folding N independent attempt results into one
//! score/verdict plus strategy-specific statistics.

use arbiter_core::case::TrialStrategy;
use arbiter_core::result::{TrialAggregation, TrialResult};
use arbiter_core::score::Verdict;

/// Two-tailed t critical values at α = 0.05 for df 1..=29.
const T_CRITICAL: [f64; 29] = [
    12.706, 4.303, 3.182, 2.776, 2.571, 2.447, 2.365, 2.306, 2.262, 2.228, 2.201, 2.179, 2.160,
    2.145, 2.131, 2.120, 2.110, 2.101, 2.093, 2.086, 2.080, 2.074, 2.069, 2.064, 2.060, 2.056,
    2.052, 2.048, 2.045,
];

/// Normal approximation used for df ≥ 30.
const Z_95: f64 = 1.96;

fn t_critical(df: usize) -> f64 {
    match df {
        0 => 0.0,
        1..=29 => T_CRITICAL[df - 1],
        _ => Z_95,
    }
}

/// Outcome of folding a trial list.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTrials {
    pub score: f64,
    pub verdict: Verdict,
    pub aggregation: TrialAggregation,
}

impl AggregatedTrials {
    /// Human-readable one-liner for the result's reasoning field.
    pub fn describe(&self) -> String {
        match &self.aggregation {
            TrialAggregation::PassAtK {
                passed_attempts,
                total_attempts,
            } => format!("pass_at_k: {passed_attempts}/{total_attempts} attempts passed"),
            TrialAggregation::Mean { mean, min, max } => {
                format!("mean of attempts: {mean:.3} (min {min:.3}, max {max:.3})")
            }
            TrialAggregation::ConfidenceInterval {
                mean,
                ci95_lower,
                samples,
                ..
            } => format!(
                "95% CI lower bound over {samples} attempts: {ci95_lower:.3} (mean {mean:.3})"
            ),
        }
    }
}

/// Fold an ordered, non-empty list of trials into one score and verdict.
///
/// The scheduler always records at least one attempt before aggregating;
/// an empty list aggregates to a zero fail so a bug upstream degrades
/// instead of panicking.
pub fn aggregate(trials: &[TrialResult], strategy: TrialStrategy) -> AggregatedTrials {
    if trials.is_empty() {
        return AggregatedTrials {
            score: 0.0,
            verdict: Verdict::Fail,
            aggregation: TrialAggregation::PassAtK {
                passed_attempts: 0,
                total_attempts: 0,
            },
        };
    }
    match strategy {
        TrialStrategy::PassAtK => pass_at_k(trials),
        TrialStrategy::Mean => mean_of(trials),
        TrialStrategy::ConfidenceInterval => confidence_interval(trials),
    }
}

/// Best attempt wins; ties broken by first occurrence.
fn pass_at_k(trials: &[TrialResult]) -> AggregatedTrials {
    let mut best = &trials[0];
    for trial in &trials[1..] {
        if trial.score > best.score {
            best = trial;
        }
    }
    let passed_attempts = trials.iter().filter(|t| t.verdict.passed()).count() as u32;
    AggregatedTrials {
        score: best.score,
        verdict: best.verdict,
        aggregation: TrialAggregation::PassAtK {
            passed_attempts,
            total_attempts: trials.len() as u32,
        },
    }
}

fn mean_of(trials: &[TrialResult]) -> AggregatedTrials {
    let mean = trials.iter().map(|t| t.score).sum::<f64>() / trials.len() as f64;
    let min = trials.iter().map(|t| t.score).fold(f64::INFINITY, f64::min);
    let max = trials
        .iter()
        .map(|t| t.score)
        .fold(f64::NEG_INFINITY, f64::max);
    AggregatedTrials {
        score: mean,
        verdict: Verdict::from_score(mean),
        aggregation: TrialAggregation::Mean { mean, min, max },
    }
}

/// Lower bound of a 95% two-tailed confidence interval on the mean.
///
/// Conservative on purpose: the score rewards both a high mean and low
/// variance. Fewer than two samples collapse the interval to the mean.
fn confidence_interval(trials: &[TrialResult]) -> AggregatedTrials {
    let n = trials.len();
    let mean = trials.iter().map(|t| t.score).sum::<f64>() / n as f64;

    if n < 2 {
        return AggregatedTrials {
            score: mean,
            verdict: Verdict::from_score(mean),
            aggregation: TrialAggregation::ConfidenceInterval {
                mean,
                stddev: 0.0,
                ci95_lower: mean,
                ci95_upper: mean,
                samples: n as u32,
            },
        };
    }

    let variance = trials
        .iter()
        .map(|t| (t.score - mean).powi(2))
        .sum::<f64>()
        / (n - 1) as f64;
    let stddev = variance.sqrt();
    let standard_error = stddev / (n as f64).sqrt();
    let margin = t_critical(n - 1) * standard_error;
    let ci95_lower = (mean - margin).clamp(0.0, 1.0);
    let ci95_upper = (mean + margin).clamp(0.0, 1.0);

    AggregatedTrials {
        score: ci95_lower,
        verdict: Verdict::from_score(ci95_lower),
        aggregation: TrialAggregation::ConfidenceInterval {
            mean,
            stddev,
            ci95_lower,
            ci95_upper,
            samples: n as u32,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial(attempt: u32, score: f64) -> TrialResult {
        TrialResult {
            attempt,
            score,
            verdict: Verdict::from_score(score),
            evaluator_results: Vec::new(),
            error: None,
            cost_usd: None,
        }
    }

    #[test]
    fn test_pass_at_k_takes_best_trial() {
        let trials = [trial(0, 0.2), trial(1, 0.9), trial(2, 0.5)];
        let agg = aggregate(&trials, TrialStrategy::PassAtK);
        assert_eq!(agg.score, 0.9);
        assert_eq!(agg.verdict, Verdict::Pass);
        assert_eq!(
            agg.aggregation,
            TrialAggregation::PassAtK {
                passed_attempts: 1,
                total_attempts: 3,
            }
        );
    }

    #[test]
    fn test_pass_at_k_ties_break_to_first() {
        // Same score, different verdicts: the first occurrence must win.
        let first = trial(0, 0.7);
        let mut second = trial(1, 0.7);
        second.verdict = Verdict::Pass;
        let agg = aggregate(&[first, second], TrialStrategy::PassAtK);
        assert_eq!(agg.score, 0.7);
        assert_eq!(agg.verdict, Verdict::Borderline);
    }

    #[test]
    fn test_mean_records_min_and_max() {
        let trials = [trial(0, 0.4), trial(1, 0.8), trial(2, 0.6)];
        let agg = aggregate(&trials, TrialStrategy::Mean);
        assert!((agg.score - 0.6).abs() < 1e-9);
        assert_eq!(agg.verdict, Verdict::Borderline);
        let TrialAggregation::Mean { mean, min, max } = agg.aggregation else {
            panic!("expected mean aggregation");
        };
        assert!((mean - 0.6).abs() < 1e-9);
        assert_eq!(min, 0.4);
        assert_eq!(max, 0.8);
    }

    #[test]
    fn test_confidence_interval_single_trial_collapses() {
        let trials = [trial(0, 0.7)];
        let agg = aggregate(&trials, TrialStrategy::ConfidenceInterval);
        let TrialAggregation::ConfidenceInterval {
            mean,
            stddev,
            ci95_lower,
            ci95_upper,
            samples,
        } = agg.aggregation
        else {
            panic!("expected confidence interval aggregation");
        };
        assert_eq!(mean, 0.7);
        assert_eq!(stddev, 0.0);
        assert_eq!(ci95_lower, 0.7);
        assert_eq!(ci95_upper, 0.7);
        assert_eq!(samples, 1);
        assert_eq!(agg.score, 0.7);
    }

    #[test]
    fn test_confidence_interval_two_trials() {
        // mean 0.6, sample stddev 0.141421, SE 0.1, t(df=1) = 12.706:
        // the margin dwarfs the mean, so the clamped lower bound is 0.
        let trials = [trial(0, 0.5), trial(1, 0.7)];
        let agg = aggregate(&trials, TrialStrategy::ConfidenceInterval);
        let TrialAggregation::ConfidenceInterval {
            mean,
            stddev,
            ci95_lower,
            ci95_upper,
            ..
        } = agg.aggregation
        else {
            panic!("expected confidence interval aggregation");
        };
        assert!((mean - 0.6).abs() < 1e-9);
        assert!((stddev - 0.02f64.sqrt()).abs() < 1e-9);
        assert_eq!(ci95_lower, 0.0);
        assert_eq!(ci95_upper, 1.0);
        assert_eq!(agg.score, 0.0);
        assert_eq!(agg.verdict, Verdict::Fail);
    }

    #[test]
    fn test_confidence_interval_low_variance_rewarded() {
        // Ten identical scores: zero variance, interval collapses to the mean.
        let trials: Vec<_> = (0..10).map(|i| trial(i, 0.9)).collect();
        let agg = aggregate(&trials, TrialStrategy::ConfidenceInterval);
        assert!((agg.score - 0.9).abs() < 1e-9);
        assert_eq!(agg.verdict, Verdict::Pass);
    }

    #[test]
    fn test_t_critical_table_boundaries() {
        assert_eq!(t_critical(1), 12.706);
        assert_eq!(t_critical(29), 2.045);
        assert_eq!(t_critical(30), Z_95);
        assert_eq!(t_critical(200), Z_95);
    }

    #[test]
    fn test_empty_trials_degrade_to_fail() {
        let agg = aggregate(&[], TrialStrategy::Mean);
        assert_eq!(agg.score, 0.0);
        assert_eq!(agg.verdict, Verdict::Fail);
    }
}
