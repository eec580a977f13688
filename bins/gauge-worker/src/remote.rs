//! Online judge client over a Redis job queue.
//!
//! Jobs are pushed onto `gauge:queue:{language}`; the judge service writes
//! each report under `gauge:result:{job_id}`, which doubles as the
//! submission url stored in `submitted` verdicts.

use crate::judge::Judge;
use anyhow::{Context, Result};
use gauge_common::{CompletedVerdict, Problem, TestOutcome, Verdict};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const ONLINE_JUDGE: &str = "online_judge";

pub const QUEUE_PREFIX: &str = "gauge:queue";
pub const RESULT_PREFIX: &str = "gauge:result";

pub fn queue_name(language: &str) -> String {
    format!("{}:{}", QUEUE_PREFIX, language)
}

pub fn result_key(job_id: &Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeJob {
    pub id: Uuid,
    pub problem_id: String,
    pub language: String,
    pub source_code: String,
}

/// What the judge service reports for one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeReport {
    pub compilation_status: bool,
    #[serde(default)]
    pub compilation_error_message: Option<String>,
    #[serde(default)]
    pub hidden_tests_results: Option<Vec<TestOutcome>>,
    #[serde(default)]
    pub public_tests_results: Option<Vec<TestOutcome>>,
}

impl JudgeReport {
    fn into_verdict(self, submission_url: &str) -> Option<Verdict> {
        if self.hidden_tests_results.is_none() && self.public_tests_results.is_none() {
            return None;
        }
        Some(Verdict::Completed(CompletedVerdict {
            compilation_status: self.compilation_status,
            compilation_error_message: self.compilation_error_message,
            hidden_tests_results: self.hidden_tests_results,
            public_tests_results: self.public_tests_results,
            submission_url: Some(submission_url.to_string()),
            status_inferred: false,
        }))
    }
}

pub trait JudgeQueue {
    /// Enqueue a job and return its submission url
    async fn submit(&self, job: &JudgeJob) -> Result<String>;

    /// The report behind a submission url, if the judge has finished
    async fn fetch(&self, submission_url: &str) -> Result<Option<JudgeReport>>;
}

pub struct RedisQueue {
    conn: redis::aio::ConnectionManager,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self { conn })
    }
}

impl JudgeQueue for RedisQueue {
    async fn submit(&self, job: &JudgeJob) -> Result<String> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(queue_name(&job.language), payload).await?;
        Ok(result_key(&job.id))
    }

    async fn fetch(&self, submission_url: &str) -> Result<Option<JudgeReport>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(submission_url).await?;
        match payload {
            Some(data) => Ok(Some(
                serde_json::from_str(&data).context("Malformed judge report")?,
            )),
            None => Ok(None),
        }
    }
}

/// Submission polling budget
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_polls: 150,
        }
    }
}

pub struct RemoteJudge<Q> {
    queue: Q,
    language: String,
    poll: PollPolicy,
}

impl<Q: JudgeQueue> RemoteJudge<Q> {
    pub fn new(queue: Q, language: impl Into<String>, poll: PollPolicy) -> Self {
        Self {
            queue,
            language: language.into(),
            poll,
        }
    }

    async fn submit(&self, problem: &Problem, source_code: &str) -> Verdict {
        let job = JudgeJob {
            id: Uuid::new_v4(),
            problem_id: problem.id.clone(),
            language: self.language.clone(),
            source_code: source_code.to_string(),
        };
        match self.queue.submit(&job).await {
            Ok(submission_url) => {
                debug!(problem_id = %problem.id, job_id = %job.id, "Submitted");
                Verdict::Submitted { submission_url }
            }
            Err(e) => {
                warn!(problem_id = %problem.id, error = %e, "Submission failed");
                Verdict::FailedSubmission
            }
        }
    }

    /// Poll a submission until it reports or the budget runs out; an
    /// unfinished submission stays `submitted` for a later run.
    async fn collect(&self, problem: &Problem, submission_url: String) -> Verdict {
        for attempt in 0..self.poll.max_polls {
            match self.queue.fetch(&submission_url).await {
                Ok(Some(report)) => {
                    return match report.into_verdict(&submission_url) {
                        Some(verdict) => verdict,
                        None => {
                            warn!(problem_id = %problem.id, submission_url = %submission_url, "Report without test results");
                            Verdict::FailedCollection {
                                submission_url: Some(submission_url),
                            }
                        }
                    };
                }
                Ok(None) => {
                    if attempt + 1 < self.poll.max_polls {
                        tokio::time::sleep(self.poll.interval).await;
                    }
                }
                Err(e) => {
                    warn!(problem_id = %problem.id, submission_url = %submission_url, error = %e, "Collection failed");
                    return Verdict::FailedCollection {
                        submission_url: Some(submission_url),
                    };
                }
            }
        }

        info!(problem_id = %problem.id, submission_url = %submission_url, "Still pending, left as submitted");
        Verdict::Submitted { submission_url }
    }

    async fn collect_all(&self, problem: &Problem, verdicts: Vec<Verdict>) -> Vec<Verdict> {
        let mut collected = Vec::with_capacity(verdicts.len());
        for verdict in verdicts {
            collected.push(match verdict {
                Verdict::Submitted { submission_url } => self.collect(problem, submission_url).await,
                other => other,
            });
        }
        collected
    }
}

impl<Q: JudgeQueue> Judge for RemoteJudge<Q> {
    fn name(&self) -> &str {
        ONLINE_JUDGE
    }

    async fn evaluate_problem(&self, problem: &Problem, candidates: &[String]) -> Vec<Verdict> {
        // Submit everything first so the judge works on all candidates at once
        let mut submitted = Vec::with_capacity(candidates.len());
        for source_code in candidates {
            submitted.push(self.submit(problem, source_code).await);
        }
        self.collect_all(problem, submitted).await
    }

    /// Submitted candidates are collected, never resubmitted
    async fn resume_problem(
        &self,
        problem: &Problem,
        candidates: &[String],
        previous: &[Verdict],
    ) -> Vec<Verdict> {
        let mut pending = Vec::with_capacity(previous.len());
        for (source_code, verdict) in candidates.iter().zip(previous) {
            pending.push(match verdict {
                Verdict::FailedSubmission => self.submit(problem, source_code).await,
                other => other.clone(),
            });
        }
        self.collect_all(problem, pending).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Source "ok" passes, "pending" never finishes, "reject" cannot be
    /// enqueued, "flaky" cannot be fetched.
    #[derive(Default)]
    struct FakeQueue {
        jobs: Mutex<HashMap<String, JudgeJob>>,
        submissions: Mutex<usize>,
    }

    impl JudgeQueue for FakeQueue {
        async fn submit(&self, job: &JudgeJob) -> Result<String> {
            if job.source_code == "reject" {
                anyhow::bail!("queue full");
            }
            *self.submissions.lock().unwrap() += 1;
            let url = result_key(&job.id);
            self.jobs.lock().unwrap().insert(url.clone(), job.clone());
            Ok(url)
        }

        async fn fetch(&self, submission_url: &str) -> Result<Option<JudgeReport>> {
            let source = match self.jobs.lock().unwrap().get(submission_url) {
                Some(job) => job.source_code.clone(),
                None => "ok".to_string(),
            };
            match source.as_str() {
                "pending" => Ok(None),
                "flaky" => anyhow::bail!("connection reset"),
                "aggregate" => Ok(Some(JudgeReport {
                    compilation_status: true,
                    compilation_error_message: None,
                    hidden_tests_results: Some(vec![TestOutcome::Aggregate { test_pass_rate: 0.5 }]),
                    public_tests_results: None,
                })),
                _ => Ok(Some(JudgeReport {
                    compilation_status: true,
                    compilation_error_message: None,
                    hidden_tests_results: Some(vec![TestOutcome::passed()]),
                    public_tests_results: None,
                })),
            }
        }
    }

    fn make_judge() -> RemoteJudge<FakeQueue> {
        let poll = PollPolicy {
            interval: Duration::from_millis(1),
            max_polls: 3,
        };
        RemoteJudge::new(FakeQueue::default(), "python3", poll)
    }

    fn make_problem() -> Problem {
        serde_json::from_value(json!({"id": "1A", "hidden_tests_io": [[["1"], "1"]]})).unwrap()
    }

    fn make_candidates(sources: &[&str]) -> Vec<String> {
        sources.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_queue_naming() {
        assert_eq!(queue_name("python3"), "gauge:queue:python3");
        let id = Uuid::new_v4();
        assert_eq!(result_key(&id), result_key(&id));
        assert!(result_key(&id).starts_with("gauge:result:"));
    }

    #[tokio::test]
    async fn test_verdict_per_outcome() {
        let judge = make_judge();
        let verdicts = judge
            .evaluate_problem(&make_problem(), &make_candidates(&["ok", "reject", "pending", "flaky", "aggregate"]))
            .await;

        assert_eq!(verdicts.len(), 5);
        let completed = verdicts[0].as_completed().unwrap();
        assert!(completed.submission_url.as_deref().unwrap().starts_with("gauge:result:"));
        assert!(!completed.status_inferred);
        assert_eq!(verdicts[1], Verdict::FailedSubmission);
        assert!(matches!(verdicts[2], Verdict::Submitted { .. }));
        assert!(matches!(verdicts[3], Verdict::FailedCollection { submission_url: Some(_) }));
        assert_eq!(
            verdicts[4].as_completed().unwrap().hidden_tests_results,
            Some(vec![TestOutcome::Aggregate { test_pass_rate: 0.5 }])
        );
    }

    #[tokio::test]
    async fn test_resume_collects_without_resubmitting() {
        let judge = make_judge();
        let previous = vec![
            Verdict::Submitted {
                submission_url: "gauge:result:earlier".to_string(),
            },
            Verdict::FailedSubmission,
            Verdict::FailedCollection { submission_url: None },
        ];

        let verdicts = judge
            .resume_problem(&make_problem(), &make_candidates(&["ok", "ok", "ok"]), &previous)
            .await;

        assert_eq!(*judge.queue.submissions.lock().unwrap(), 1);
        assert_eq!(
            verdicts[0].as_completed().unwrap().submission_url.as_deref(),
            Some("gauge:result:earlier")
        );
        assert!(verdicts[1].as_completed().is_some());
        assert_eq!(verdicts[2], previous[2]);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_round_trip() {
        let queue = RedisQueue::connect("redis://127.0.0.1:6379").await.unwrap();
        let job = JudgeJob {
            id: Uuid::new_v4(),
            problem_id: "1A".to_string(),
            language: "python3".to_string(),
            source_code: "print(1)".to_string(),
        };
        let url = queue.submit(&job).await.unwrap();
        assert_eq!(url, result_key(&job.id));
        assert_eq!(queue.fetch(&url).await.unwrap(), None);
    }
}
