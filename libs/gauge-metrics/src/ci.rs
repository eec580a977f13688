//! Confidence intervals over bootstrap score distributions.

use gauge_common::{BootstrapCache, GaugeError, Result, SeedScores};
use serde::Serialize;
use std::collections::BTreeMap;

/// z-value of a two-sided 95% normal interval
const Z_95: f64 = 1.96;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub mean: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CiMethod {
    Percentile { confidence_level: f64 },
    StdDev,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CiReport {
    Scalar(ConfidenceInterval),
    PerBucket(BTreeMap<String, ConfidenceInterval>),
}

fn ensure_scores(scores: &[f64]) -> Result<()> {
    if scores.is_empty() {
        return Err(GaugeError::InvalidConfig(
            "no bootstrap scores to build a confidence interval from".into(),
        ));
    }
    Ok(())
}

fn mean(scores: &[f64]) -> f64 {
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// `q`-quantile of sorted values, linear interpolation between closest ranks
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = (sorted.len() - 1) as f64 * q;
    let below = position.floor() as usize;
    let above = position.ceil() as usize;
    sorted[below] + (position - below as f64) * (sorted[above] - sorted[below])
}

/// Percentile interval at `confidence_level`; the midpoint is the mean, not the median.
pub fn percentile_ci(scores: &[f64], confidence_level: f64) -> Result<ConfidenceInterval> {
    ensure_scores(scores)?;
    if !(0.0..1.0).contains(&confidence_level) || confidence_level == 0.0 {
        return Err(GaugeError::InvalidConfig(format!(
            "confidence level {} not in (0, 1)",
            confidence_level
        )));
    }

    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);
    let tail = (1.0 - confidence_level) / 2.0;

    Ok(ConfidenceInterval {
        lower: quantile(&sorted, tail),
        mean: mean(scores),
        upper: quantile(&sorted, 1.0 - tail),
    })
}

/// `mean ± 1.96 · σ` with the population standard deviation
pub fn std_ci(scores: &[f64]) -> Result<ConfidenceInterval> {
    ensure_scores(scores)?;
    let mean = mean(scores);
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
    let half_width = Z_95 * variance.sqrt();

    Ok(ConfidenceInterval {
        lower: mean - half_width,
        mean,
        upper: mean + half_width,
    })
}

fn interval(scores: &BTreeMap<u64, f64>, method: CiMethod) -> Result<ConfidenceInterval> {
    let values: Vec<f64> = scores.values().copied().collect();
    match method {
        CiMethod::Percentile { confidence_level } => percentile_ci(&values, confidence_level),
        CiMethod::StdDev => std_ci(&values),
    }
}

/// Interval over the `n_bootstrap_samples` lowest cached seeds.
///
/// Bucketed scores are reduced to their bucket mean first unless
/// `reduce_buckets_to_mean` is off, in which case each bucket gets its own
/// interval and every seed must report the same buckets.
pub fn bootstrap_ci(
    cache: &BootstrapCache,
    n_bootstrap_samples: usize,
    method: CiMethod,
    reduce_buckets_to_mean: bool,
) -> Result<CiReport> {
    let selected = cache.select(n_bootstrap_samples);

    if reduce_buckets_to_mean {
        return Ok(CiReport::Scalar(interval(&selected.reduced_to_mean()?, method)?));
    }
    match selected.grouped_by_bucket()? {
        SeedScores::Scalar(scores) => Ok(CiReport::Scalar(interval(&scores, method)?)),
        SeedScores::PerBucket(buckets) => buckets
            .iter()
            .map(|(bucket_id, scores)| Ok((bucket_id.clone(), interval(scores, method)?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map(CiReport::PerBucket),
    }
}
