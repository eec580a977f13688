mod config;
mod engine;
mod evaluator;
mod judge;
mod local_judge;
mod remote;

use anyhow::{bail, Context};
use config::{JudgeKind, LanguageConfigManager, WorkerConfig};
use engine::DockerEngine;
use gauge_common::persistence::{
    read_evaluation_output, read_predictions, read_problems, write_evaluation_output,
};
use gauge_common::EvaluationStore;
use judge::{evaluate_dataset, EvaluateOptions};
use local_judge::LocalJudge;
use remote::{PollPolicy, RedisQueue, RemoteJudge};
use tokio::signal;
use tracing::{error, info, instrument, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Gauge worker booting...");
    let config = WorkerConfig::from_env()?;

    tokio::select! {
        result = run(&config) => result?,
        _ = signal::ctrl_c() => {
            warn!("Received shutdown signal, verdicts of the judge in progress were not written");
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip_all, fields(exp_dir = %config.exp_dir.display(), language = %config.language))]
async fn run(config: &WorkerConfig) -> anyhow::Result<()> {
    let problems = read_problems(&config.problems_path)
        .with_context(|| format!("Failed to read problems from {}", config.problems_path.display()))?;
    let predictions = read_predictions(&config.predictions_dir).with_context(|| {
        format!("Failed to read predictions from {}", config.predictions_dir.display())
    })?;
    info!(
        problems = problems.len(),
        predictions = predictions.len(),
        judges = ?config.judges,
        "Loaded dataset"
    );

    let mut store = if config.complete_override {
        warn!("Complete override: discarding existing evaluation output");
        EvaluationStore::new()
    } else {
        read_evaluation_output(&config.exp_dir).context("Failed to read evaluation output")?
    };

    let options = EvaluateOptions {
        workers: config.workers,
        override_existing: config.override_existing || config.complete_override,
    };

    let mut violations = 0usize;
    for judge in &config.judges {
        let evaluation = match judge {
            JudgeKind::Local => {
                let config_manager = LanguageConfigManager::load_default()?;
                let language = config_manager.get_config(&config.language)?.clone();
                info!(image = %language.image, "Using local sandbox");
                let judge = LocalJudge::new(DockerEngine::new(language)?);
                evaluate_dataset(&judge, &problems, &predictions, store, &options).await?
            }
            JudgeKind::Online => {
                let queue = RedisQueue::connect(&config.redis_url).await?;
                info!(redis_url = %config.redis_url, "Connected to online judge queue");
                let judge = RemoteJudge::new(queue, config.language.clone(), PollPolicy::default());
                evaluate_dataset(&judge, &problems, &predictions, store, &options).await?
            }
        };
        store = evaluation.store;

        write_evaluation_output(&config.output_dir, &store)
            .context("Failed to write evaluation output")?;
        info!(judge = ?judge, records = store.len(), "Evaluation output written");

        for violation in &evaluation.violations {
            error!(judge = ?judge, error = %violation, "Judging contract violated");
        }
        violations += evaluation.violations.len();
    }

    if violations > 0 {
        bail!("{} problems were left unjudged after judging contract violations", violations);
    }
    Ok(())
}
