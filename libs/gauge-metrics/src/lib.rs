pub mod bootstrap;
pub mod bucketed;
pub mod ci;
pub mod definition;
pub mod metric;
pub mod pass_at_k;
pub mod solve_rate;

pub use bootstrap::BootstrapEngine;
pub use bucketed::{BucketedMetric, TemporalMetric};
pub use ci::{bootstrap_ci, percentile_ci, std_ci, CiMethod, CiReport, ConfidenceInterval};
pub use definition::{load_metric_definitions, MetricDefinition, MetricKind};
pub use metric::{Metric, MetricConfig, ONLINE_JUDGE};
pub use pass_at_k::{pass_at_k, PassAtK};
pub use solve_rate::SolveRate;
