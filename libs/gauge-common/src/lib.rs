pub mod buckets;
pub mod error;
pub mod persistence;
pub mod results;
pub mod store;
pub mod types;
pub mod verdict;

pub use error::{GaugeError, Result};
pub use results::{BootstrapCache, MetricResult, Results, Score, SeedScores};
pub use store::{EvaluationRecord, EvaluationStore, StoreView};
pub use types::{CandidateIndex, Prediction, Problem, ProblemSet, TestCase, TestVisibility};
pub use verdict::{CompletedVerdict, EvaluationStatus, TestOutcome, Verdict};
