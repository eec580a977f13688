mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gauge")]
#[command(about = "Gauge - Score judged candidate solutions with bootstrap confidence intervals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum CiKind {
    /// Percentile interval at --confidence
    Percentile,
    /// mean ± 1.96 standard deviations
    Std,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the configured metrics over an evaluation output
    Metrics {
        /// Experiment directory holding evaluation_output.jsonl
        #[arg(short, long)]
        exp_dir: PathBuf,

        /// Directory of prediction files the evaluation output was judged from
        #[arg(short, long)]
        predictions_dir: PathBuf,

        /// Where results.json is written (defaults to the experiment directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Metric alias → definition
        #[arg(short, long, default_value = "config/metrics.json")]
        metrics_config: PathBuf,

        /// Directory of bucketing data, required by bucketed metrics
        #[arg(short, long)]
        buckets_dir: Option<PathBuf>,

        /// Number of bootstrap resamples; no confidence intervals when absent
        #[arg(long)]
        bootstrap_n: Option<u64>,

        /// First bootstrap seed
        #[arg(long, default_value = "123")]
        seed: u64,

        /// Bootstrap worker threads
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Confidence level of percentile intervals
        #[arg(long, default_value = "0.95")]
        confidence: f64,

        #[arg(long, value_enum, default_value = "percentile")]
        ci: CiKind,

        /// One interval per bucket instead of over the bucket mean
        #[arg(long, default_value = "false")]
        per_bucket: bool,

        /// Recompute metrics already present in results.json
        #[arg(long = "override", default_value = "false")]
        override_existing: bool,

        /// Discard results.json entirely before computing
        #[arg(long, default_value = "false")]
        complete_override: bool,
    },

    /// Build bucketing data from problem attributes
    Bucket {
        /// Problems JSON-lines file
        #[arg(short, long)]
        problems: PathBuf,

        #[arg(short, long)]
        buckets_dir: PathBuf,

        /// Dataset name, first part of the bucketing id
        #[arg(short, long)]
        dataset_name: String,

        /// Attributes to bucket on (comma separated)
        #[arg(short, long, value_delimiter = ',', conflicts_with = "date_key")]
        keys: Vec<String>,

        /// Date attribute for temporal bucketing
        #[arg(long, requires = "boundaries")]
        date_key: Option<String>,

        /// Date range boundaries, YYYY-MM-DD (comma separated)
        #[arg(long, value_delimiter = ',')]
        boundaries: Vec<String>,

        /// Only bucket problems with attribute=value (repeatable)
        #[arg(short, long)]
        filter: Vec<String>,

        #[arg(long, default_value = "1")]
        min_bucket_size: usize,
    },

    /// Count verdicts per judge and status
    Inspect {
        #[arg(short, long)]
        exp_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Metrics {
            exp_dir,
            predictions_dir,
            output_dir,
            metrics_config,
            buckets_dir,
            bootstrap_n,
            seed,
            workers,
            confidence,
            ci,
            per_bucket,
            override_existing,
            complete_override,
        } => {
            let output_dir = output_dir.unwrap_or_else(|| exp_dir.clone());
            let run = commands::MetricsRun {
                exp_dir,
                predictions_dir,
                output_dir,
                metrics_config,
                buckets_dir,
                bootstrap_n,
                starting_seed: seed,
                workers,
                ci_method: match ci {
                    CiKind::Percentile => gauge_metrics::CiMethod::Percentile {
                        confidence_level: confidence,
                    },
                    CiKind::Std => gauge_metrics::CiMethod::StdDev,
                },
                per_bucket,
                override_existing,
                complete_override,
            };
            commands::run_metrics(&run)?;
        }
        Commands::Bucket {
            problems,
            buckets_dir,
            dataset_name,
            keys,
            date_key,
            boundaries,
            filter,
            min_bucket_size,
        } => {
            let scheme = match date_key {
                Some(date_key) => commands::BucketScheme::Temporal {
                    date_key,
                    boundaries,
                },
                None => commands::BucketScheme::Attributes(keys),
            };
            commands::build_buckets(
                &problems,
                &buckets_dir,
                &dataset_name,
                &scheme,
                &filter,
                min_bucket_size,
            )?;
        }
        Commands::Inspect { exp_dir } => {
            commands::inspect(&exp_dir)?;
        }
    }

    Ok(())
}
