//! Bootstrap runs: metric scores over seeded resamples, cached per seed.

use crate::metric::Metric;
use gauge_common::{BootstrapCache, GaugeError, Result, Score, StoreView};
use rayon::prelude::*;
use tracing::{debug, info};

/// Runs bootstrap resamples on a fixed-size rayon pool.
///
/// Each worker resamples into a view it owns, so at most `workers`
/// resamples are alive at any time however many seeds are requested.
pub struct BootstrapEngine {
    workers: usize,
    thread_pool: rayon::ThreadPool,
}

impl BootstrapEngine {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("bootstrap-{}", index))
            .build()
            .map_err(|e| GaugeError::InvalidConfig(format!("bootstrap pool: {}", e)))?;

        Ok(Self {
            workers,
            thread_pool,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Scores for seeds `[starting_seed, starting_seed + resample_count)` in
    /// seed order.
    ///
    /// Cached seeds are reused; the rest are computed and merged into
    /// `cache`. A failing seed aborts the whole run and leaves `cache`
    /// untouched, so a partial distribution is never recorded.
    pub fn run(
        &self,
        metric: &dyn Metric,
        view: &StoreView<'_>,
        starting_seed: u64,
        resample_count: u64,
        cache: &mut BootstrapCache,
    ) -> Result<Vec<(u64, Score)>> {
        let seeds = starting_seed..starting_seed + resample_count;
        let missing: Vec<u64> = seeds.clone().filter(|seed| cache.get(*seed).is_none()).collect();
        let metric_id = metric.id();

        info!(
            metric_id = %metric_id,
            cached = resample_count as usize - missing.len(),
            to_compute = missing.len(),
            workers = self.workers,
            "Bootstrapping"
        );

        let computed: Vec<(u64, Score)> = self.thread_pool.install(|| {
            missing
                .into_par_iter()
                .map(|seed| -> Result<(u64, Score)> {
                    let score = metric.compute(view, Some(seed))?;
                    debug!(metric_id = %metric_id, seed, ?score, "Bootstrap run");
                    Ok((seed, score))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let added = cache.merge(computed);
        debug!(metric_id = %metric_id, added, "Merged bootstrap scores into cache");

        seeds
            .map(|seed| {
                cache
                    .get(seed)
                    .cloned()
                    .map(|score| (seed, score))
                    .ok_or_else(|| GaugeError::InvalidConfig(format!("seed {} missing from cache", seed)))
            })
            .collect()
    }
}
