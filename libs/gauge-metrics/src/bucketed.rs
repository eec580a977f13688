use crate::metric::Metric;
use gauge_common::buckets::BucketingData;
use gauge_common::{GaugeError, Result, Score, StoreView};
use std::collections::BTreeMap;
use tracing::debug;

/// Scores `inner` independently on every bucket of a bucketing scheme.
pub struct BucketedMetric {
    inner: Box<dyn Metric>,
    bucketing_id: String,
    buckets: BucketingData,
}

impl BucketedMetric {
    pub fn new(inner: Box<dyn Metric>, bucketing_id: impl Into<String>, buckets: BucketingData) -> Result<Self> {
        let bucketing_id = bucketing_id.into();
        if buckets.is_empty() {
            return Err(GaugeError::InvalidConfig(format!(
                "bucketing `{}` defines no buckets",
                bucketing_id
            )));
        }
        Ok(Self {
            inner,
            bucketing_id,
            buckets,
        })
    }

    pub fn bucketing_id(&self) -> &str {
        &self.bucketing_id
    }
}

impl Metric for BucketedMetric {
    fn id(&self) -> String {
        format!("{}_{}", self.inner.id(), self.bucketing_id)
    }

    /// With a seed, every bucket is resampled on its own so each bucket keeps
    /// its size across bootstrap runs.
    fn compute(&self, view: &StoreView<'_>, seed: Option<u64>) -> Result<Score> {
        let mut scores = BTreeMap::new();
        for (bucket_id, ids) in &self.buckets {
            let bucket = view.filter(bucket_id, ids)?;
            debug!(bucket_id = %bucket_id, problems = bucket.len(), "Scoring bucket");
            match self.inner.compute(&bucket, seed)? {
                Score::Scalar(value) => {
                    scores.insert(bucket_id.clone(), value);
                }
                Score::Bucketed(_) => {
                    return Err(GaugeError::InvalidConfig(format!(
                        "nested bucketing in `{}`",
                        self.id()
                    )))
                }
            }
        }
        Ok(Score::Bucketed(scores))
    }
}

/// A bucketed metric whose buckets are date ranges
pub struct TemporalMetric {
    inner: BucketedMetric,
}

impl TemporalMetric {
    pub fn new(inner: BucketedMetric) -> Self {
        Self { inner }
    }
}

impl Metric for TemporalMetric {
    fn id(&self) -> String {
        format!("temporal_{}", self.inner.id())
    }

    fn compute(&self, view: &StoreView<'_>, seed: Option<u64>) -> Result<Score> {
        self.inner.compute(view, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::fixtures::make_store;
    use crate::metric::MetricConfig;
    use crate::solve_rate::SolveRate;

    fn make_buckets(entries: &[(&str, &[&str])]) -> BucketingData {
        entries
            .iter()
            .map(|(id, ids)| (id.to_string(), ids.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    fn make_metric(buckets: BucketingData) -> BucketedMetric {
        let inner = SolveRate::new(MetricConfig::new("local_evaluator", true), false);
        BucketedMetric::new(Box::new(inner), "difficulty", buckets).unwrap()
    }

    #[test]
    fn test_scores_each_bucket() {
        let store = make_store(
            "local_evaluator",
            &[("a", vec![vec![true]]), ("b", vec![vec![false]]), ("c", vec![vec![true]])],
        );
        let metric = make_metric(make_buckets(&[("800", &["a", "b"]), ("1600", &["c"])]));

        assert_eq!(metric.id(), "local_evaluator_problem_solve_rate_hidden_difficulty");
        match metric.compute(&store.view(), None).unwrap() {
            Score::Bucketed(scores) => {
                assert_eq!(scores["800"], 0.5);
                assert_eq!(scores["1600"], 1.0);
            }
            other => panic!("expected bucketed score, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_bucket_is_error_not_zero() {
        let store = make_store("local_evaluator", &[("a", vec![vec![true]])]);
        let metric = make_metric(make_buckets(&[("800", &["a"]), ("3500", &["zzz"])]));
        assert!(matches!(
            metric.compute(&store.view(), None),
            Err(GaugeError::EmptyBucket { bucket_id }) if bucket_id == "3500"
        ));
    }

    #[test]
    fn test_seeded_buckets_keep_their_ids() {
        let store = make_store(
            "local_evaluator",
            &[("a", vec![vec![true]]), ("b", vec![vec![false]]), ("c", vec![vec![true]])],
        );
        let metric = make_metric(make_buckets(&[("800", &["a", "b"]), ("1600", &["c"])]));
        for seed in 0..20 {
            let score = metric.compute(&store.view(), Some(seed)).unwrap();
            let ids: Vec<&str> = score.bucket_ids().unwrap().into_iter().collect();
            assert_eq!(ids, vec!["1600", "800"]);
        }
    }

    #[test]
    fn test_temporal_id() {
        let metric = TemporalMetric::new(make_metric(make_buckets(&[("2022-01-01_2022-06-01", &["a"])])));
        assert_eq!(
            metric.id(),
            "temporal_local_evaluator_problem_solve_rate_hidden_difficulty"
        );
    }
}
