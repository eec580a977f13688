use crate::metric::{mean, test_statuses, with_resampling, Metric, MetricConfig};
use gauge_common::{GaugeError, Result, Score, StoreView};
use tracing::{error, warn};

/// Unbiased pass@k estimator for `n` candidates of which `c` pass.
///
/// `1 - C(n-c, k) / C(n, k)`, evaluated as a running product so large `n`
/// neither overflows nor cancels. More passing than generated candidates is
/// rejected.
pub fn pass_at_k(n: usize, c: usize, k: usize) -> Result<f64> {
    let failing = n.checked_sub(c).ok_or_else(|| {
        GaugeError::InvalidConfig(format!("pass@k with {} passing out of {} candidates", c, n))
    })?;
    if failing < k {
        return Ok(1.0);
    }
    let miss: f64 = (failing + 1..=n).map(|i| 1.0 - k as f64 / i as f64).product();
    Ok(1.0 - miss)
}

#[derive(Debug, Clone)]
pub struct PassAtK {
    config: MetricConfig,
    k: usize,
}

impl PassAtK {
    pub fn new(config: MetricConfig, k: usize) -> Result<Self> {
        if k == 0 {
            return Err(GaugeError::InvalidConfig("pass@k needs k >= 1".into()));
        }
        Ok(Self { config, k })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    fn score(&self, view: &StoreView<'_>) -> Result<f64> {
        let visibility = self.config.visibility();
        let mut estimates = Vec::with_capacity(view.len());

        for record in view.records() {
            let mut n = 0;
            let mut c = 0;
            for verdict in self.config.completed_verdicts(record)? {
                let tests = verdict.tests(visibility).unwrap_or_default();
                if tests.is_empty() {
                    error!(problem_id = %record.id, "Completed verdict without test results, skipping candidate");
                    continue;
                }
                n += 1;
                if test_statuses(&record.id, tests)?.iter().all(|&passed| passed) {
                    c += 1;
                }
            }

            if n == 0 {
                error!(problem_id = %record.id, "No completed candidates, excluding problem from pass@k");
                continue;
            }
            if n == 1 {
                warn!(problem_id = %record.id, k = self.k, "Only one completed candidate for pass@k");
            }
            if n == self.k {
                warn!(problem_id = %record.id, k = self.k, "n == k, pass@k reduces to the exact pass rate");
            }
            estimates.push(pass_at_k(n, c, self.k)?);
        }

        if estimates.is_empty() {
            return Err(GaugeError::NoQualifyingProblems { metric_id: self.id() });
        }
        Ok(mean(&estimates))
    }
}

impl Metric for PassAtK {
    fn id(&self) -> String {
        format!(
            "{}_pass_at_{}_{}",
            self.config.code_evaluator_id,
            self.k,
            self.config.visibility()
        )
    }

    fn compute(&self, view: &StoreView<'_>, seed: Option<u64>) -> Result<Score> {
        with_resampling(view, seed, |view| self.score(view))
    }
}
