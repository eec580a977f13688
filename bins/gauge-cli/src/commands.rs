// CLI commands: metrics run, bucketing construction, evaluation inspection
use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use gauge_common::buckets::{bucket_problems, bucketing_file_id, temporal_buckets};
use gauge_common::persistence::{
    read_evaluation_output, read_predictions, read_problems, read_results, write_bucketing_data,
    write_results,
};
use gauge_common::types::candidate_index;
use gauge_common::{EvaluationStatus, EvaluationStore, MetricResult, Results, Score};
use gauge_metrics::{bootstrap_ci, load_metric_definitions, BootstrapEngine, CiMethod, CiReport, Metric};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Settings of one metrics calculation run
#[derive(Debug, Clone)]
pub struct MetricsRun {
    pub exp_dir: PathBuf,
    pub predictions_dir: PathBuf,
    pub output_dir: PathBuf,
    pub metrics_config: PathBuf,
    pub buckets_dir: Option<PathBuf>,
    pub bootstrap_n: Option<u64>,
    pub starting_seed: u64,
    pub workers: usize,
    pub ci_method: CiMethod,
    pub per_bucket: bool,
    pub override_existing: bool,
    pub complete_override: bool,
}

fn format_score(score: &Score) -> String {
    match score {
        Score::Scalar(value) => format!("{:.4}", value),
        Score::Bucketed(buckets) => {
            let parts: Vec<String> = buckets.iter().map(|(id, v)| format!("{}={:.4}", id, v)).collect();
            format!("mean={:.4} [{}]", score.mean(), parts.join(", "))
        }
    }
}

fn format_ci(report: &CiReport) -> String {
    match report {
        CiReport::Scalar(ci) => format!("{:.4} [{:.4}, {:.4}]", ci.mean, ci.lower, ci.upper),
        CiReport::PerBucket(intervals) => intervals
            .iter()
            .map(|(id, ci)| format!("{}: {:.4} [{:.4}, {:.4}]", id, ci.mean, ci.lower, ci.upper))
            .collect::<Vec<_>>()
            .join("; "),
    }
}

/// Score one metric into `results`, bootstrapping when requested.
///
/// A metric already in `results` is only recomputed with `override_existing`,
/// which also drops its cached bootstrap scores.
fn compute_metric(
    run: &MetricsRun,
    alias: &str,
    metric: &dyn Metric,
    store: &EvaluationStore,
    engine: Option<&BootstrapEngine>,
    results: &mut Results,
) -> Result<Option<CiReport>> {
    let metric_id = metric.id();
    let view = store.view();

    if run.override_existing || !results.contains(&metric_id) {
        let score = metric
            .compute(&view, None)
            .with_context(|| format!("Failed to compute {}", metric_id))?;
        info!(alias, metric_id = %metric_id, score = %format_score(&score), "Metric computed");
        results.insert(metric_id.clone(), MetricResult::new(alias, score));
    } else {
        info!(alias, metric_id = %metric_id, "Already computed, skipping");
    }

    let (n, engine) = match (run.bootstrap_n, engine) {
        (Some(n), Some(engine)) => (n, engine),
        _ => return Ok(None),
    };
    let result = results
        .get_mut(&metric_id)
        .with_context(|| format!("No result for {}", metric_id))?;

    if result.bootstrap_runs_scores.contains_all(run.starting_seed, n) {
        info!(metric_id = %metric_id, bootstrap_n = n, "Bootstrap scores cached");
    } else {
        engine
            .run(metric, &view, run.starting_seed, n, &mut result.bootstrap_runs_scores)
            .with_context(|| format!("Bootstrap of {} failed", metric_id))?;
    }

    let report = bootstrap_ci(&result.bootstrap_runs_scores, n as usize, run.ci_method, !run.per_bucket)?;
    Ok(Some(report))
}

pub fn run_metrics(run: &MetricsRun) -> Result<()> {
    let store = read_evaluation_output(&run.exp_dir).context("Failed to read evaluation output")?;
    if store.is_empty() {
        bail!("No evaluation output in {}", run.exp_dir.display());
    }
    let predictions = read_predictions(&run.predictions_dir)
        .with_context(|| format!("Failed to read predictions from {}", run.predictions_dir.display()))?;
    store
        .ensure_aligned(&candidate_index(&predictions))
        .context("Evaluation output does not match the predictions")?;
    let definitions = load_metric_definitions(&run.metrics_config)
        .with_context(|| format!("Failed to load {}", run.metrics_config.display()))?;

    let mut results = if run.complete_override {
        warn!("Complete override: discarding existing results");
        Results::new()
    } else {
        read_results(&run.output_dir).context("Failed to read results")?
    };
    let engine = match run.bootstrap_n {
        Some(_) => Some(BootstrapEngine::new(run.workers)?),
        None => None,
    };

    info!(
        problems = store.len(),
        metrics = definitions.len(),
        bootstrap_n = ?run.bootstrap_n,
        "Starting metrics run"
    );

    let mut report = Vec::new();
    for (alias, definition) in &definitions {
        let metric = definition.build(run.buckets_dir.as_deref())?;
        let ci = compute_metric(run, alias, metric.as_ref(), &store, engine.as_ref(), &mut results)?;
        // Checkpoint after every metric so an abort keeps finished work
        write_results(&run.output_dir, &results).context("Failed to write results")?;
        report.push((alias.clone(), metric.id(), ci));
    }

    println!();
    println!("{:<24} {:<64} {}", "alias", "metric id", "score");
    for (alias, metric_id, ci) in &report {
        let score = results
            .get(metric_id)
            .map(|r| format_score(&r.score))
            .unwrap_or_default();
        println!("{:<24} {:<64} {}", alias, metric_id, score);
        if let Some(ci) = ci {
            println!("{:<24} {:<64} {}", "", "  bootstrap CI", format_ci(ci));
        }
    }
    Ok(())
}

/// How problems are grouped into buckets
#[derive(Debug, Clone)]
pub enum BucketScheme {
    Attributes(Vec<String>),
    Temporal {
        date_key: String,
        boundaries: Vec<String>,
    },
}

fn parse_filters(filters: &[String]) -> Result<BTreeMap<String, String>> {
    filters
        .iter()
        .map(|filter| match filter.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(anyhow!("Filter must look like attribute=value, got {}", filter)),
        })
        .collect()
}

fn attribute_matches(value: Option<&Value>, expected: &str) -> bool {
    match value {
        Some(Value::String(s)) => s == expected,
        Some(other) => other.to_string() == expected,
        None => false,
    }
}

pub fn build_buckets(
    problems_path: &Path,
    buckets_dir: &Path,
    dataset_name: &str,
    scheme: &BucketScheme,
    filters: &[String],
    min_bucket_size: usize,
) -> Result<String> {
    let problems = read_problems(problems_path)
        .with_context(|| format!("Failed to read problems from {}", problems_path.display()))?;
    let filters = parse_filters(filters)?;

    let kept: BTreeSet<String> = problems
        .iter()
        .filter(|p| filters.iter().all(|(k, v)| attribute_matches(p.attribute(k), v)))
        .map(|p| p.id.clone())
        .collect();
    let problems = problems.filter(&kept);
    if problems.is_empty() {
        bail!("No problems left after filtering");
    }

    let (data, keys) = match scheme {
        BucketScheme::Attributes(keys) => {
            if keys.is_empty() {
                bail!("Either --keys or --date-key is required");
            }
            (bucket_problems(&problems, keys, min_bucket_size)?, keys.clone())
        }
        BucketScheme::Temporal {
            date_key,
            boundaries,
        } => {
            let boundaries = boundaries
                .iter()
                .map(|b| {
                    NaiveDate::parse_from_str(b.trim(), "%Y-%m-%d")
                        .with_context(|| format!("Invalid boundary date: {}", b))
                })
                .collect::<Result<Vec<_>>>()?;
            (
                temporal_buckets(&problems, date_key, &boundaries, min_bucket_size)?,
                vec![date_key.clone()],
            )
        }
    };

    if data.is_empty() {
        bail!("Every bucket is smaller than {}", min_bucket_size);
    }
    let bucketing_id = bucketing_file_id(dataset_name, &filters, &keys, min_bucket_size);
    write_bucketing_data(buckets_dir, &bucketing_id, &data)?;

    println!("Bucketing: {}", bucketing_id);
    for (bucket_id, ids) in &data {
        println!("  {:<32} {} problems", bucket_id, ids.len());
    }
    Ok(bucketing_id)
}

/// Judge name → status → number of verdicts
pub fn summarize(store: &EvaluationStore) -> BTreeMap<String, BTreeMap<EvaluationStatus, usize>> {
    let mut summary: BTreeMap<String, BTreeMap<EvaluationStatus, usize>> = BTreeMap::new();
    for record in store.records() {
        for (judge, verdicts) in &record.judges {
            let counts = summary.entry(judge.clone()).or_default();
            for verdict in verdicts {
                *counts.entry(verdict.status()).or_insert(0) += 1;
            }
        }
    }
    summary
}

pub fn inspect(exp_dir: &Path) -> Result<()> {
    let store = read_evaluation_output(exp_dir).context("Failed to read evaluation output")?;
    println!("{} problems", store.len());
    for (judge, counts) in summarize(&store) {
        println!("{}", judge);
        for status in EvaluationStatus::ALL {
            println!("  {:<20} {}", status.to_string(), counts.get(&status).copied().unwrap_or(0));
        }
    }
    Ok(())
}
