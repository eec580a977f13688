use gauge_common::{
    CompletedVerdict, EvaluationRecord, GaugeError, Result, Score, StoreView, TestOutcome,
    TestVisibility, Verdict,
};
use tracing::error;

/// Judge whose verdicts must always carry an explicit `evaluation_status`
pub const ONLINE_JUDGE: &str = "online_judge";

/// A score over a store view.
///
/// Implementations are pure: a seeded call resamples into its own view and
/// never touches the caller's, so one instance can serve many threads.
pub trait Metric: Send + Sync {
    /// Persistence key; equal configurations give equal ids
    fn id(&self) -> String;

    fn compute(&self, view: &StoreView<'_>, seed: Option<u64>) -> Result<Score>;
}

/// Which judge's verdicts a metric reads, and which test set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricConfig {
    pub code_evaluator_id: String,
    pub hidden_test_cases: bool,
}

impl MetricConfig {
    pub fn new(code_evaluator_id: impl Into<String>, hidden_test_cases: bool) -> Self {
        Self {
            code_evaluator_id: code_evaluator_id.into(),
            hidden_test_cases,
        }
    }

    pub fn visibility(&self) -> TestVisibility {
        TestVisibility::from_hidden_flag(self.hidden_test_cases)
    }

    /// Completed verdicts of this judge for one record.
    ///
    /// Non-completed verdicts are logged and left out. A legacy verdict
    /// without `evaluation_status` is rejected for the online judge.
    pub(crate) fn completed_verdicts<'r>(
        &self,
        record: &'r EvaluationRecord,
    ) -> Result<Vec<&'r CompletedVerdict>> {
        let judge = self.code_evaluator_id.as_str();
        let verdicts = record.verdicts(judge).ok_or_else(|| {
            GaugeError::schema(&record.id, format!("no verdicts for judge `{}`", judge))
        })?;

        let mut completed = Vec::with_capacity(verdicts.len());
        for (index, verdict) in verdicts.iter().enumerate() {
            match verdict {
                Verdict::Completed(c) if c.status_inferred && judge == ONLINE_JUDGE => {
                    return Err(GaugeError::schema(
                        &record.id,
                        format!("candidate {} of `{}` has no evaluation_status", index, judge),
                    ));
                }
                Verdict::Completed(c) => completed.push(c),
                other => {
                    error!(
                        problem_id = %record.id,
                        candidate = index,
                        judge,
                        status = %other.status(),
                        "Evaluation not completed, excluding candidate"
                    );
                }
            }
        }
        Ok(completed)
    }
}

/// Per-test pass flags; aggregate entries carry no per-test status
pub(crate) fn test_statuses(problem_id: &str, tests: &[TestOutcome]) -> Result<Vec<bool>> {
    tests
        .iter()
        .map(|test| match test {
            TestOutcome::Executed { status, .. } => Ok(*status),
            TestOutcome::Aggregate { .. } => Err(GaugeError::schema(
                problem_id,
                "aggregate test_pass_rate mixed with per-test results",
            )),
        })
        .collect()
}

/// Resample `view` when a seed is given, then score it with `score`.
pub(crate) fn with_resampling<F>(view: &StoreView<'_>, seed: Option<u64>, score: F) -> Result<Score>
where
    F: FnOnce(&StoreView<'_>) -> Result<f64>,
{
    let value = match seed {
        Some(seed) => score(&view.resample(seed))?,
        None => score(view)?,
    };
    Ok(Score::Scalar(value))
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
pub(crate) mod fixtures {
    use gauge_common::{EvaluationStore, TestOutcome, Verdict};

    pub fn make_verdict(statuses: &[bool]) -> Verdict {
        let tests = statuses
            .iter()
            .map(|&passed| {
                if passed {
                    TestOutcome::passed()
                } else {
                    TestOutcome::failed("wrong answer")
                }
            })
            .collect();
        Verdict::completed(true, None, Some(tests), None)
    }

    /// One record per `(id, candidates)`, every candidate a list of test statuses
    pub fn make_store(judge: &str, problems: &[(&str, Vec<Vec<bool>>)]) -> EvaluationStore {
        let mut store = EvaluationStore::new();
        for (id, candidates) in problems {
            let verdicts = candidates.iter().map(|c| make_verdict(c)).collect();
            store.merge(id, judge, verdicts);
        }
        store
    }
}
