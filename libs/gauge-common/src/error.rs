//! Error taxonomy shared by the store, the metrics and the persistence layer.
//!
//! Store-level and metric-level violations always surface as one of these
//! variants. Judge failures on a single candidate never do: they are recorded
//! as `failed submission` / `failed collection` verdicts instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GaugeError>;

#[derive(Error, Debug)]
pub enum GaugeError {
    /// A persisted verdict or record breaks the state table or the cardinality invariant.
    #[error("schema violation for problem `{id}`: {reason}")]
    SchemaViolation { id: String, reason: String },

    /// A configured bucket resolved to zero problems.
    #[error("bucket `{bucket_id}` is empty")]
    EmptyBucket { bucket_id: String },

    /// Every problem was excluded from a metric's aggregate.
    #[error("metric `{metric_id}` has no problems with completed evaluations")]
    NoQualifyingProblems { metric_id: String },

    /// Bootstrap seeds disagree on the set of bucket ids.
    #[error("bucket ids of bootstrap seed {seed} differ from those of seed {reference_seed}")]
    BucketDrift { seed: u64, reference_seed: u64 },

    /// A prediction references a problem the dataset does not contain.
    #[error("no problem data for id `{0}`")]
    MissingProblem(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GaugeError {
    pub fn schema(id: impl Into<String>, reason: impl Into<String>) -> Self {
        GaugeError::SchemaViolation {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
