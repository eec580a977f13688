//! Metric definitions as configured in `metrics.json`: alias → definition.

use crate::bucketed::{BucketedMetric, TemporalMetric};
use crate::metric::{Metric, MetricConfig};
use crate::pass_at_k::PassAtK;
use crate::solve_rate::SolveRate;
use gauge_common::persistence::read_bucketing_data;
use gauge_common::{GaugeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MetricKind {
    #[serde(rename = "solve_rate")]
    SolveRate {
        #[serde(default)]
        test_level: bool,
    },
    #[serde(rename = "pass_at_k")]
    PassAtK { k: usize },
}

fn default_hidden() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    #[serde(flatten)]
    pub kind: MetricKind,
    pub code_evaluator_id: String,
    #[serde(default = "default_hidden")]
    pub hidden_test_cases: bool,
    #[serde(default)]
    pub bucketing_id: Option<String>,
    #[serde(default)]
    pub temporal: bool,
}

impl MetricDefinition {
    /// Instantiate the metric, loading its bucketing data from `buckets_dir`.
    pub fn build(&self, buckets_dir: Option<&Path>) -> Result<Box<dyn Metric>> {
        let config = MetricConfig::new(&self.code_evaluator_id, self.hidden_test_cases);
        let base: Box<dyn Metric> = match self.kind {
            MetricKind::SolveRate { test_level } => Box::new(SolveRate::new(config, test_level)),
            MetricKind::PassAtK { k } => Box::new(PassAtK::new(config, k)?),
        };

        let bucketing_id = match &self.bucketing_id {
            Some(id) => id,
            None if self.temporal => {
                return Err(GaugeError::InvalidConfig(
                    "temporal metrics need a bucketing_id".into(),
                ))
            }
            None => return Ok(base),
        };
        let buckets_dir = buckets_dir.ok_or_else(|| {
            GaugeError::InvalidConfig(format!("bucketing `{}` needs a buckets directory", bucketing_id))
        })?;

        let bucketed = BucketedMetric::new(
            base,
            bucketing_id.clone(),
            read_bucketing_data(buckets_dir, bucketing_id)?,
        )?;
        if self.temporal {
            Ok(Box::new(TemporalMetric::new(bucketed)))
        } else {
            Ok(Box::new(bucketed))
        }
    }
}

pub fn load_metric_definitions(path: &Path) -> Result<BTreeMap<String, MetricDefinition>> {
    let content = fs::read_to_string(path)?;
    let definitions: BTreeMap<String, MetricDefinition> = serde_json::from_str(&content)?;
    if definitions.is_empty() {
        return Err(GaugeError::InvalidConfig(format!(
            "no metrics defined in {}",
            path.display()
        )));
    }
    Ok(definitions)
}
