//! Verdict state machine for one candidate solution against one judge.
//!
//! ```text
//! failed submission ──► submitted ──► completed
//!        │                  │
//!        │                  └──────► failed collection
//!        ├──────────────────────────► failed collection
//!        └──────────────────────────► completed        (local judges)
//! ```
//!
//! The persisted form is a flat JSON object carrying an `evaluation_status`
//! tag. Required and forbidden fields per state are checked once, when the
//! object is turned into a [`Verdict`], so a malformed verdict can never be
//! constructed from disk.

use crate::types::TestVisibility;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EvaluationStatus {
    #[serde(rename = "failed submission", alias = "failed_submission")]
    FailedSubmission,
    #[serde(rename = "failed collection", alias = "failed_collection")]
    FailedCollection,
    #[serde(rename = "submitted")]
    Submitted,
    #[serde(rename = "completed")]
    Completed,
}

impl EvaluationStatus {
    pub const ALL: [EvaluationStatus; 4] = [
        EvaluationStatus::FailedSubmission,
        EvaluationStatus::FailedCollection,
        EvaluationStatus::Submitted,
        EvaluationStatus::Completed,
    ];

    /// Completed and failed collection never change again without an override
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EvaluationStatus::Completed | EvaluationStatus::FailedCollection
        )
    }

    fn rank(self) -> u8 {
        match self {
            EvaluationStatus::FailedSubmission => 0,
            EvaluationStatus::Submitted => 1,
            EvaluationStatus::FailedCollection | EvaluationStatus::Completed => 2,
        }
    }

    /// Whether a verdict in this state may be replaced by one in `next`
    /// without regressing.
    pub fn can_transition_to(self, next: EvaluationStatus) -> bool {
        if self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvaluationStatus::FailedSubmission => "failed submission",
            EvaluationStatus::FailedCollection => "failed collection",
            EvaluationStatus::Submitted => "submitted",
            EvaluationStatus::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a single test, or the aggregate pass rate scraped from an
/// online judge (always reported as the only entry of its list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestOutcome {
    Executed {
        status: bool,
        error_message: Option<String>,
    },
    Aggregate {
        test_pass_rate: f64,
    },
}

impl TestOutcome {
    pub fn passed() -> Self {
        TestOutcome::Executed {
            status: true,
            error_message: None,
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        TestOutcome::Executed {
            status: false,
            error_message: Some(error_message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedVerdict {
    pub compilation_status: bool,
    pub compilation_error_message: Option<String>,
    pub hidden_tests_results: Option<Vec<TestOutcome>>,
    pub public_tests_results: Option<Vec<TestOutcome>>,
    pub submission_url: Option<String>,
    /// Set for legacy local-judge verdicts persisted without an
    /// `evaluation_status`; kept so they round-trip unchanged.
    pub status_inferred: bool,
}

impl CompletedVerdict {
    pub fn tests(&self, visibility: TestVisibility) -> Option<&[TestOutcome]> {
        match visibility {
            TestVisibility::Hidden => self.hidden_tests_results.as_deref(),
            TestVisibility::Public => self.public_tests_results.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawVerdict", into = "RawVerdict")]
pub enum Verdict {
    FailedSubmission,
    FailedCollection { submission_url: Option<String> },
    Submitted { submission_url: String },
    Completed(CompletedVerdict),
}

impl Default for Verdict {
    fn default() -> Self {
        Verdict::FailedSubmission
    }
}

impl Verdict {
    pub fn completed(
        compilation_status: bool,
        compilation_error_message: Option<String>,
        hidden_tests_results: Option<Vec<TestOutcome>>,
        public_tests_results: Option<Vec<TestOutcome>>,
    ) -> Self {
        Verdict::Completed(CompletedVerdict {
            compilation_status,
            compilation_error_message,
            hidden_tests_results,
            public_tests_results,
            submission_url: None,
            status_inferred: false,
        })
    }

    pub fn status(&self) -> EvaluationStatus {
        match self {
            Verdict::FailedSubmission => EvaluationStatus::FailedSubmission,
            Verdict::FailedCollection { .. } => EvaluationStatus::FailedCollection,
            Verdict::Submitted { .. } => EvaluationStatus::Submitted,
            Verdict::Completed(_) => EvaluationStatus::Completed,
        }
    }

    pub fn as_completed(&self) -> Option<&CompletedVerdict> {
        match self {
            Verdict::Completed(completed) => Some(completed),
            _ => None,
        }
    }

    pub fn submission_url(&self) -> Option<&str> {
        match self {
            Verdict::Submitted { submission_url } => Some(submission_url),
            Verdict::FailedCollection { submission_url } => submission_url.as_deref(),
            Verdict::Completed(completed) => completed.submission_url.as_deref(),
            Verdict::FailedSubmission => None,
        }
    }
}

/// Flat on-disk shape of a verdict
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawVerdict {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    evaluation_status: Option<EvaluationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    submission_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compilation_status: Option<bool>,
    // Present-but-null differs from absent here.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    compilation_error_message: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hidden_tests_results: Option<Vec<TestOutcome>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    public_tests_results: Option<Vec<TestOutcome>>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl TryFrom<RawVerdict> for Verdict {
    type Error = String;

    fn try_from(raw: RawVerdict) -> Result<Self, Self::Error> {
        let status = raw.evaluation_status;
        match status {
            Some(EvaluationStatus::FailedSubmission) => {
                if raw.submission_url.is_some() {
                    return Err("`failed submission` verdict must not carry `submission_url`".into());
                }
                Ok(Verdict::FailedSubmission)
            }
            Some(EvaluationStatus::FailedCollection) => {
                if raw.compilation_status.is_some() || raw.compilation_error_message.is_some() {
                    return Err("`failed collection` verdict must not carry compilation fields".into());
                }
                Ok(Verdict::FailedCollection {
                    submission_url: raw.submission_url,
                })
            }
            Some(EvaluationStatus::Submitted) => match raw.submission_url {
                Some(submission_url) => Ok(Verdict::Submitted { submission_url }),
                None => Err("`submitted` verdict requires `submission_url`".into()),
            },
            Some(EvaluationStatus::Completed) | None => {
                let compilation_status = raw
                    .compilation_status
                    .ok_or("`completed` verdict requires `compilation_status`")?;
                let compilation_error_message = raw
                    .compilation_error_message
                    .ok_or("`completed` verdict requires `compilation_error_message`")?;
                if raw.hidden_tests_results.is_none() && raw.public_tests_results.is_none() {
                    return Err("`completed` verdict requires hidden and/or public test results".into());
                }
                Ok(Verdict::Completed(CompletedVerdict {
                    compilation_status,
                    compilation_error_message,
                    hidden_tests_results: raw.hidden_tests_results,
                    public_tests_results: raw.public_tests_results,
                    submission_url: raw.submission_url,
                    status_inferred: status.is_none(),
                }))
            }
        }
    }
}

impl From<Verdict> for RawVerdict {
    fn from(verdict: Verdict) -> Self {
        let status = verdict.status();
        match verdict {
            Verdict::FailedSubmission => RawVerdict {
                evaluation_status: Some(status),
                ..Default::default()
            },
            Verdict::FailedCollection { submission_url } => RawVerdict {
                evaluation_status: Some(status),
                submission_url,
                ..Default::default()
            },
            Verdict::Submitted { submission_url } => RawVerdict {
                evaluation_status: Some(status),
                submission_url: Some(submission_url),
                ..Default::default()
            },
            Verdict::Completed(completed) => RawVerdict {
                evaluation_status: (!completed.status_inferred).then_some(status),
                submission_url: completed.submission_url,
                compilation_status: Some(completed.compilation_status),
                compilation_error_message: Some(completed.compilation_error_message),
                hidden_tests_results: completed.hidden_tests_results,
                public_tests_results: completed.public_tests_results,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<Verdict, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn test_default_is_failed_submission_without_fields() {
        let value = serde_json::to_value(Verdict::default()).unwrap();
        assert_eq!(value, json!({"evaluation_status": "failed submission"}));
    }

    #[test]
    fn test_failed_submission_rejects_submission_url() {
        let result = parse(json!({
            "evaluation_status": "failed submission",
            "submission_url": "https://judge/1"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_submitted_requires_url() {
        assert!(parse(json!({"evaluation_status": "submitted"})).is_err());
        let verdict = parse(json!({
            "evaluation_status": "submitted",
            "submission_url": "gauge:result:1"
        }))
        .unwrap();
        assert_eq!(verdict.submission_url(), Some("gauge:result:1"));
    }

    #[test]
    fn test_failed_collection_rejects_compilation_fields() {
        let result = parse(json!({
            "evaluation_status": "failed collection",
            "compilation_status": true
        }));
        assert!(result.is_err());
        let result = parse(json!({
            "evaluation_status": "failed collection",
            "compilation_error_message": null
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_completed_requires_error_message_key_even_if_null() {
        let missing = parse(json!({
            "evaluation_status": "completed",
            "compilation_status": true,
            "hidden_tests_results": [{"status": true, "error_message": null}]
        }));
        assert!(missing.is_err());

        let verdict = parse(json!({
            "evaluation_status": "completed",
            "compilation_status": true,
            "compilation_error_message": null,
            "hidden_tests_results": [{"status": true, "error_message": null}]
        }))
        .unwrap();
        let completed = verdict.as_completed().unwrap();
        assert_eq!(completed.tests(TestVisibility::Hidden).unwrap().len(), 1);
        assert!(completed.tests(TestVisibility::Public).is_none());
    }

    #[test]
    fn test_completed_requires_some_results() {
        let result = parse(json!({
            "evaluation_status": "completed",
            "compilation_status": false,
            "compilation_error_message": "boom"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_underscore_status_spelling_accepted() {
        let verdict = parse(json!({"evaluation_status": "failed_submission"})).unwrap();
        assert_eq!(verdict, Verdict::FailedSubmission);
    }

    #[test]
    fn test_aggregate_test_outcome() {
        let verdict = parse(json!({
            "evaluation_status": "completed",
            "compilation_status": true,
            "compilation_error_message": null,
            "hidden_tests_results": [{"test_pass_rate": 0.75}]
        }))
        .unwrap();
        assert_eq!(
            verdict.as_completed().unwrap().tests(TestVisibility::Hidden),
            Some(&[TestOutcome::Aggregate { test_pass_rate: 0.75 }][..])
        );
    }

    #[test]
    fn test_inferred_status_round_trips_without_tag() {
        let original = json!({
            "compilation_status": true,
            "compilation_error_message": null,
            "hidden_tests_results": [{"status": false, "error_message": "wrong answer"}]
        });
        let verdict = parse(original.clone()).unwrap();
        assert!(verdict.as_completed().unwrap().status_inferred);
        assert_eq!(serde_json::to_value(&verdict).unwrap(), original);
    }

    #[test]
    fn test_transitions_never_regress() {
        use EvaluationStatus::*;
        assert!(FailedSubmission.can_transition_to(Submitted));
        assert!(FailedSubmission.can_transition_to(Completed));
        assert!(FailedSubmission.can_transition_to(FailedCollection));
        assert!(Submitted.can_transition_to(Completed));
        assert!(Submitted.can_transition_to(FailedCollection));
        assert!(!Submitted.can_transition_to(FailedSubmission));
        assert!(!Completed.can_transition_to(Submitted));
        assert!(!Completed.can_transition_to(FailedCollection));
        assert!(!FailedCollection.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Completed));
    }
}
