use crate::metric::{mean, test_statuses, with_resampling, Metric, MetricConfig};
use gauge_common::{GaugeError, Result, Score, StoreView, TestOutcome};
use tracing::{error, warn};

/// Problem solve rate, or test pass rate when `test_level` is set.
///
/// Per problem: the fraction of completed candidates passing every test, or
/// the mean fraction of passing tests. The score averages that over problems
/// with at least one completed candidate.
#[derive(Debug, Clone)]
pub struct SolveRate {
    config: MetricConfig,
    test_level: bool,
}

impl SolveRate {
    pub fn new(config: MetricConfig, test_level: bool) -> Self {
        Self { config, test_level }
    }

    fn kind(&self) -> &'static str {
        if self.test_level {
            "test_pass_rate"
        } else {
            "problem_solve_rate"
        }
    }

    fn score(&self, view: &StoreView<'_>) -> Result<f64> {
        let visibility = self.config.visibility();
        let mut per_problem = Vec::with_capacity(view.len());

        for record in view.records() {
            let mut solved = Vec::new();
            let mut test_pass_rates = Vec::new();

            for verdict in self.config.completed_verdicts(record)? {
                let tests = verdict.tests(visibility).unwrap_or_default();
                if tests.is_empty() {
                    return Err(GaugeError::schema(
                        &record.id,
                        format!("completed verdict has no {} test results", visibility),
                    ));
                }

                if let TestOutcome::Aggregate { test_pass_rate } = tests[0] {
                    if tests.len() != 1 {
                        return Err(GaugeError::schema(
                            &record.id,
                            "aggregate test_pass_rate must be the only test entry",
                        ));
                    }
                    if !self.test_level {
                        return Err(GaugeError::schema(
                            &record.id,
                            "aggregate test_pass_rate cannot decide whether a problem is solved",
                        ));
                    }
                    test_pass_rates.push(test_pass_rate);
                    continue;
                }

                let statuses = test_statuses(&record.id, tests)?;
                let passed = statuses.iter().filter(|&&s| s).count();
                solved.push(if passed == statuses.len() { 1.0 } else { 0.0 });
                test_pass_rates.push(passed as f64 / statuses.len() as f64);
            }

            let values = if self.test_level { &test_pass_rates } else { &solved };
            if values.is_empty() {
                error!(
                    problem_id = %record.id,
                    judge = %self.config.code_evaluator_id,
                    "No completed evaluations, dropping problem"
                );
                continue;
            }
            per_problem.push(mean(values));
        }

        if per_problem.is_empty() {
            return Err(GaugeError::NoQualifyingProblems { metric_id: self.id() });
        }
        if per_problem.len() < view.len() {
            warn!(
                metric_id = %self.id(),
                kept = per_problem.len(),
                total = view.len(),
                "Some problems were dropped from the aggregate"
            );
        }
        Ok(mean(&per_problem))
    }
}

impl Metric for SolveRate {
    fn id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.config.code_evaluator_id,
            self.kind(),
            self.config.visibility()
        )
    }

    fn compute(&self, view: &StoreView<'_>, seed: Option<u64>) -> Result<Score> {
        with_resampling(view, seed, |view| self.score(view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::fixtures::make_store;
    use gauge_common::{EvaluationStore, Verdict};

    fn make_metric(test_level: bool) -> SolveRate {
        SolveRate::new(MetricConfig::new("local_evaluator", true), test_level)
    }

    fn scalar(score: Score) -> f64 {
        match score {
            Score::Scalar(value) => value,
            other => panic!("expected scalar, got {:?}", other),
        }
    }

    #[test]
    fn test_ids() {
        assert_eq!(make_metric(false).id(), "local_evaluator_problem_solve_rate_hidden");
        assert_eq!(make_metric(true).id(), "local_evaluator_test_pass_rate_hidden");
        let public = SolveRate::new(MetricConfig::new("online_judge", false), false);
        assert_eq!(public.id(), "online_judge_problem_solve_rate_public");
    }

    #[test]
    fn test_problem_solve_rate_two_problems() {
        let store = make_store(
            "local_evaluator",
            &[
                ("A", vec![vec![true, true], vec![true, false]]),
                ("B", vec![vec![false, true], vec![false, false]]),
            ],
        );
        let score = scalar(make_metric(false).compute(&store.view(), None).unwrap());
        assert!((score - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_test_pass_rate() {
        let store = make_store(
            "local_evaluator",
            &[
                ("A", vec![vec![true, true], vec![true, false]]),
                ("B", vec![vec![false, true], vec![false, false]]),
            ],
        );
        // A: mean(1.0, 0.5) = 0.75, B: mean(0.5, 0.0) = 0.25
        let score = scalar(make_metric(true).compute(&store.view(), None).unwrap());
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_non_completed_candidates_are_excluded_not_failed() {
        let mut store = make_store("local_evaluator", &[("A", vec![vec![true]])]);
        let mut verdicts = store.get("A").unwrap().verdicts("local_evaluator").unwrap().to_vec();
        verdicts.push(Verdict::FailedSubmission);
        store.merge("A", "local_evaluator", verdicts);

        let score = scalar(make_metric(false).compute(&store.view(), None).unwrap());
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_problem_without_completed_candidates_is_dropped() {
        let mut store = make_store("local_evaluator", &[("A", vec![vec![true]])]);
        store.merge("B", "local_evaluator", vec![Verdict::FailedSubmission]);

        let score = scalar(make_metric(false).compute(&store.view(), None).unwrap());
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_no_qualifying_problems_is_error() {
        let mut store = EvaluationStore::new();
        store.merge("A", "local_evaluator", vec![Verdict::FailedSubmission]);
        assert!(matches!(
            make_metric(false).compute(&store.view(), None),
            Err(GaugeError::NoQualifyingProblems { .. })
        ));
    }

    #[test]
    fn test_aggregate_pass_rate_single_entry() {
        let mut store = EvaluationStore::new();
        store.merge(
            "A",
            "online_judge",
            vec![Verdict::completed(
                true,
                None,
                Some(vec![TestOutcome::Aggregate { test_pass_rate: 0.75 }]),
                None,
            )],
        );
        let metric = SolveRate::new(MetricConfig::new("online_judge", true), true);
        assert_eq!(scalar(metric.compute(&store.view(), None).unwrap()), 0.75);

        store.merge(
            "A",
            "online_judge",
            vec![Verdict::completed(
                true,
                None,
                Some(vec![
                    TestOutcome::Aggregate { test_pass_rate: 0.75 },
                    TestOutcome::passed(),
                ]),
                None,
            )],
        );
        assert!(matches!(
            metric.compute(&store.view(), None),
            Err(GaugeError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_seeded_compute_leaves_view_untouched() {
        let store = make_store(
            "local_evaluator",
            &[("A", vec![vec![true]]), ("B", vec![vec![false]]), ("C", vec![vec![true]])],
        );
        let view = store.view();
        let metric = make_metric(false);

        let first = metric.compute(&view, Some(5)).unwrap();
        assert_eq!(first, metric.compute(&view, Some(5)).unwrap());
        assert_eq!(view.len(), 3);
        assert!((scalar(metric.compute(&view, None).unwrap()) - 2.0 / 3.0).abs() < 1e-9);
    }
}
