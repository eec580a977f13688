//! Results artifact: metric id → alias, score and cached bootstrap scores.

use crate::error::{GaugeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A metric score, either over the whole store or per bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    Scalar(f64),
    Bucketed(BTreeMap<String, f64>),
}

impl Score {
    /// Scalar as is, bucketed scores reduced to the mean over buckets
    pub fn mean(&self) -> f64 {
        match self {
            Score::Scalar(value) => *value,
            Score::Bucketed(buckets) => {
                buckets.values().sum::<f64>() / buckets.len() as f64
            }
        }
    }

    pub fn bucket_ids(&self) -> Option<BTreeSet<&str>> {
        match self {
            Score::Scalar(_) => None,
            Score::Bucketed(buckets) => Some(buckets.keys().map(String::as_str).collect()),
        }
    }
}

/// Per-bucket seed → score series, or a single series for unbucketed metrics
#[derive(Debug, Clone, PartialEq)]
pub enum SeedScores {
    Scalar(BTreeMap<u64, f64>),
    PerBucket(BTreeMap<String, BTreeMap<u64, f64>>),
}

/// Seed → score cache of bootstrap runs.
///
/// Grows monotonically: merging never replaces or drops a cached seed. Seeds
/// persist as JSON object keys (strings) and come back as integers, so a
/// reloaded cache is looked up exactly like a fresh one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BootstrapCache {
    scores: BTreeMap<u64, Score>,
}

impl BootstrapCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, seed: u64) -> Option<&Score> {
        self.scores.get(&seed)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn contains_all(&self, starting_seed: u64, count: u64) -> bool {
        (starting_seed..starting_seed + count).all(|seed| self.scores.contains_key(&seed))
    }

    /// Add newly computed scores; returns how many seeds were new.
    pub fn merge(&mut self, computed: impl IntoIterator<Item = (u64, Score)>) -> usize {
        let mut added = 0;
        for (seed, score) in computed {
            if let std::collections::btree_map::Entry::Vacant(entry) = self.scores.entry(seed) {
                entry.insert(score);
                added += 1;
            }
        }
        added
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &Score)> {
        self.scores.iter().map(|(seed, score)| (*seed, score))
    }

    /// The `n` numerically lowest cached seeds, so a CI over fewer samples is
    /// always computed from a prefix of a larger cache.
    pub fn select(&self, n: usize) -> BootstrapCache {
        BootstrapCache {
            scores: self
                .scores
                .iter()
                .take(n)
                .map(|(seed, score)| (*seed, score.clone()))
                .collect(),
        }
    }

    fn check_bucket_ids(&self) -> Result<()> {
        let mut reference: Option<(u64, Option<BTreeSet<&str>>)> = None;
        for (seed, score) in &self.scores {
            let ids = score.bucket_ids();
            match &reference {
                None => reference = Some((*seed, ids)),
                Some((reference_seed, reference_ids)) => {
                    if *reference_ids != ids {
                        return Err(GaugeError::BucketDrift {
                            seed: *seed,
                            reference_seed: *reference_seed,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Every seed's score reduced to one number (bucket mean when bucketed)
    pub fn reduced_to_mean(&self) -> Result<BTreeMap<u64, f64>> {
        self.check_bucket_ids()?;
        Ok(self
            .scores
            .iter()
            .map(|(seed, score)| (*seed, score.mean()))
            .collect())
    }

    /// Bucketed caches regrouped as bucket → seed → score
    pub fn grouped_by_bucket(&self) -> Result<SeedScores> {
        self.check_bucket_ids()?;
        let mut grouped: BTreeMap<String, BTreeMap<u64, f64>> = BTreeMap::new();
        let mut scalar = BTreeMap::new();

        for (seed, score) in &self.scores {
            match score {
                Score::Scalar(value) => {
                    scalar.insert(*seed, *value);
                }
                Score::Bucketed(buckets) => {
                    for (bucket_id, value) in buckets {
                        grouped.entry(bucket_id.clone()).or_default().insert(*seed, *value);
                    }
                }
            }
        }

        if grouped.is_empty() {
            Ok(SeedScores::Scalar(scalar))
        } else {
            Ok(SeedScores::PerBucket(grouped))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub alias: String,
    pub score: Score,
    #[serde(default, skip_serializing_if = "BootstrapCache::is_empty")]
    pub bootstrap_runs_scores: BootstrapCache,
}

impl MetricResult {
    pub fn new(alias: impl Into<String>, score: Score) -> Self {
        Self {
            alias: alias.into(),
            score,
            bootstrap_runs_scores: BootstrapCache::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Results {
    metrics: BTreeMap<String, MetricResult>,
}

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, metric_id: &str) -> Option<&MetricResult> {
        self.metrics.get(metric_id)
    }

    pub fn get_mut(&mut self, metric_id: &str) -> Option<&mut MetricResult> {
        self.metrics.get_mut(metric_id)
    }

    pub fn contains(&self, metric_id: &str) -> bool {
        self.metrics.contains_key(metric_id)
    }

    pub fn insert(&mut self, metric_id: impl Into<String>, result: MetricResult) {
        self.metrics.insert(metric_id.into(), result);
    }

    pub fn get_score(&self, metric_id: &str, reduce_buckets_to_mean: bool) -> Option<Score> {
        let score = &self.metrics.get(metric_id)?.score;
        if reduce_buckets_to_mean {
            Some(Score::Scalar(score.mean()))
        } else {
            Some(score.clone())
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricResult)> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
