//! Judging contract and the dataset-level evaluation driver.

use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use gauge_common::types::candidate_index;
use gauge_common::{EvaluationStatus, EvaluationStore, GaugeError, Prediction, Problem, ProblemSet, Verdict};
use std::collections::BTreeMap;
use tracing::{debug, error, info, instrument, warn};

/// A judge returns exactly one verdict per candidate, in input order.
///
/// Failing to judge a candidate is not an error: it is reported as a
/// `failed submission` or `failed collection` verdict.
pub trait Judge {
    /// Key of this judge's verdicts in every evaluation record
    fn name(&self) -> &str;

    async fn evaluate_problem(&self, problem: &Problem, candidates: &[String]) -> Vec<Verdict>;

    /// Pick up a problem evaluated before. Terminal verdicts are kept and
    /// every other candidate is judged again.
    async fn resume_problem(
        &self,
        problem: &Problem,
        candidates: &[String],
        previous: &[Verdict],
    ) -> Vec<Verdict> {
        let pending: Vec<usize> = previous
            .iter()
            .enumerate()
            .filter(|(_, verdict)| !verdict.status().is_terminal())
            .map(|(index, _)| index)
            .collect();
        let sources: Vec<String> = pending.iter().map(|&index| candidates[index].clone()).collect();

        let fresh = self.evaluate_problem(problem, &sources).await;
        if fresh.len() != pending.len() {
            return fresh;
        }
        let mut verdicts = previous.to_vec();
        for (index, verdict) in pending.into_iter().zip(fresh) {
            verdicts[index] = verdict;
        }
        verdicts
    }
}

#[derive(Debug, Clone)]
pub struct EvaluateOptions {
    /// Problems judged concurrently
    pub workers: usize,
    /// Judge every problem again, ignoring existing verdicts
    pub override_existing: bool,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            override_existing: false,
        }
    }
}

fn status_counts(verdicts: &[Verdict]) -> BTreeMap<EvaluationStatus, usize> {
    let mut counts = BTreeMap::new();
    for verdict in verdicts {
        *counts.entry(verdict.status()).or_insert(0) += 1;
    }
    counts
}

/// Result of judging a dataset: the updated store, plus one error per
/// problem whose judge broke the contract. Those problems keep their previous
/// verdicts; every other problem is merged.
#[derive(Debug)]
pub struct DatasetEvaluation {
    pub store: EvaluationStore,
    pub violations: Vec<GaugeError>,
}

/// Keep the previous verdict of every candidate whose new verdict would move
/// it backwards in the state machine.
fn without_regressions(id: &str, judge_name: &str, previous: &[Verdict], verdicts: Vec<Verdict>) -> Vec<Verdict> {
    verdicts
        .into_iter()
        .zip(previous)
        .enumerate()
        .map(|(index, (new, old))| {
            if old.status().can_transition_to(new.status()) {
                new
            } else {
                warn!(
                    problem_id = %id,
                    judge = judge_name,
                    candidate = index,
                    from = %old.status(),
                    to = %new.status(),
                    "Verdict would regress, keeping the previous one"
                );
                old.clone()
            }
        })
        .collect()
}

/// Judge every predicted problem and merge the verdicts into `store`.
///
/// Without `override_existing`, problems whose verdicts are all terminal are
/// skipped, so re-running after a partial failure only redoes what failed.
/// Errors are returned only for inputs that cannot be judged at all; a judge
/// misbehaving on one problem is reported in [`DatasetEvaluation::violations`].
#[instrument(skip_all, fields(judge = %judge.name()))]
pub async fn evaluate_dataset<J: Judge>(
    judge: &J,
    problems: &ProblemSet,
    predictions: &[Prediction],
    store: EvaluationStore,
    options: &EvaluateOptions,
) -> Result<DatasetEvaluation> {
    let judge_name = judge.name().to_string();
    let mut store = store.initialize_or_validate(&judge_name, &candidate_index(predictions))?;

    let mut tasks = Vec::new();
    let mut skipped = 0usize;
    for prediction in predictions {
        let problem = problems.get(&prediction.id)?;
        if problem.hidden_tests_io.is_none() && problem.public_tests_io.is_none() {
            return Err(GaugeError::schema(&problem.id, "problem has neither hidden nor public tests").into());
        }
        let candidates = prediction.candidate_solutions()?;
        let previous = store
            .get(&prediction.id)
            .and_then(|record| record.verdicts(&judge_name))
            .map(<[Verdict]>::to_vec)
            .unwrap_or_default();

        if !options.override_existing && previous.iter().all(|v| v.status().is_terminal()) {
            debug!(problem_id = %problem.id, "Already evaluated, skipping");
            skipped += 1;
            continue;
        }
        tasks.push((problem, candidates, previous));
    }

    info!(
        to_evaluate = tasks.len(),
        skipped,
        workers = options.workers,
        "Evaluating dataset"
    );

    let results: Vec<(String, usize, Vec<Verdict>, Vec<Verdict>)> = stream::iter(tasks)
        .map(|(problem, candidates, previous)| async move {
            let verdicts = if options.override_existing {
                judge.evaluate_problem(problem, &candidates).await
            } else {
                judge.resume_problem(problem, &candidates, &previous).await
            };
            (problem.id.clone(), candidates.len(), previous, verdicts)
        })
        .buffer_unordered(options.workers.max(1))
        .collect()
        .await;

    let mut violations = Vec::new();
    for (id, num_candidates, previous, verdicts) in results {
        if verdicts.len() != num_candidates {
            let violation = GaugeError::schema(
                &id,
                format!(
                    "judge `{}` returned {} verdicts for {} candidate solutions",
                    judge_name,
                    verdicts.len(),
                    num_candidates
                ),
            );
            error!(problem_id = %id, error = %violation, "Keeping previous verdicts");
            violations.push(violation);
            continue;
        }
        let verdicts = if options.override_existing {
            verdicts
        } else {
            without_regressions(&id, &judge_name, &previous, verdicts)
        };

        info!(problem_id = %id, statuses = ?status_counts(&verdicts), "Problem evaluated");
        store.merge(&id, &judge_name, verdicts);
    }

    Ok(DatasetEvaluation { store, violations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauge_common::TestOutcome;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// "ok" passes, "wa" fails, "down" cannot be submitted
    struct FakeJudge {
        candidates_judged: AtomicUsize,
        /// Problem for which the last verdict goes missing
        drop_last_for: Option<&'static str>,
    }

    impl FakeJudge {
        fn new() -> Self {
            Self {
                candidates_judged: AtomicUsize::new(0),
                drop_last_for: None,
            }
        }

        fn dropping_last_for(problem_id: &'static str) -> Self {
            Self {
                candidates_judged: AtomicUsize::new(0),
                drop_last_for: Some(problem_id),
            }
        }

        fn judged(&self) -> usize {
            self.candidates_judged.load(Ordering::SeqCst)
        }
    }

    impl Judge for FakeJudge {
        fn name(&self) -> &str {
            "local_evaluator"
        }

        async fn evaluate_problem(&self, problem: &Problem, candidates: &[String]) -> Vec<Verdict> {
            self.candidates_judged.fetch_add(candidates.len(), Ordering::SeqCst);
            let mut verdicts: Vec<Verdict> = candidates
                .iter()
                .map(|source| match source.as_str() {
                    "down" => Verdict::FailedSubmission,
                    "ok" => Verdict::completed(true, None, Some(vec![TestOutcome::passed()]), None),
                    _ => Verdict::completed(true, None, Some(vec![TestOutcome::failed("wrong answer")]), None),
                })
                .collect();
            if self.drop_last_for == Some(problem.id.as_str()) {
                verdicts.pop();
            }
            verdicts
        }
    }

    fn make_problems(ids: &[&str]) -> ProblemSet {
        let problems = ids
            .iter()
            .map(|id| {
                serde_json::from_value(json!({
                    "id": id,
                    "hidden_tests_io": [[["1"], "1"]],
                    "public_tests_io": null
                }))
                .unwrap()
            })
            .collect();
        ProblemSet::from_problems(problems).unwrap()
    }

    fn make_prediction(id: &str, sources: &[&str]) -> Prediction {
        let outputs = sources
            .iter()
            .map(|code| json!({"data": {"output_data": {"code": code}}}))
            .collect();
        Prediction {
            id: id.to_string(),
            inference_outputs: outputs,
        }
    }

    fn make_options(override_existing: bool) -> EvaluateOptions {
        EvaluateOptions {
            workers: 3,
            override_existing,
        }
    }

    #[tokio::test]
    async fn test_every_candidate_gets_a_verdict_in_order() {
        let judge = FakeJudge::new();
        let predictions = vec![make_prediction("b", &["ok", "wa"]), make_prediction("a", &["wa", "ok", "down"])];

        let store = evaluate_dataset(&judge, &make_problems(&["a", "b"]), &predictions, EvaluationStore::new(), &make_options(false))
            .await
            .unwrap()
            .store;

        let ids: Vec<&str> = store.ids().collect();
        assert_eq!(ids, vec!["a", "b"]);
        let statuses: Vec<EvaluationStatus> = store
            .get("a")
            .unwrap()
            .verdicts("local_evaluator")
            .unwrap()
            .iter()
            .map(Verdict::status)
            .collect();
        assert_eq!(
            statuses,
            vec![EvaluationStatus::Completed, EvaluationStatus::Completed, EvaluationStatus::FailedSubmission]
        );
        assert_eq!(judge.judged(), 5);
    }

    #[tokio::test]
    async fn test_second_run_is_incremental_and_idempotent() {
        let judge = FakeJudge::new();
        let problems = make_problems(&["a", "b"]);
        let predictions = vec![make_prediction("a", &["ok"]), make_prediction("b", &["wa", "ok"])];

        let once = evaluate_dataset(&judge, &problems, &predictions, EvaluationStore::new(), &make_options(false))
            .await
            .unwrap()
            .store;
        let twice = evaluate_dataset(&judge, &problems, &predictions, once.clone(), &make_options(false))
            .await
            .unwrap()
            .store;

        assert_eq!(once, twice);
        assert_eq!(judge.judged(), 3);
    }

    #[tokio::test]
    async fn test_resume_rejudges_only_non_terminal_candidates() {
        let judge = FakeJudge::new();
        let problems = make_problems(&["a"]);
        let mut store = EvaluationStore::new();
        let kept = Verdict::completed(true, None, Some(vec![TestOutcome::failed("wrong answer")]), None);
        store.merge("a", "local_evaluator", vec![kept.clone(), Verdict::FailedSubmission]);

        // the first candidate would now pass, but its verdict is terminal
        let predictions = vec![make_prediction("a", &["ok", "ok"])];
        let store = evaluate_dataset(&judge, &problems, &predictions, store, &make_options(false))
            .await
            .unwrap()
            .store;

        let verdicts = store.get("a").unwrap().verdicts("local_evaluator").unwrap();
        assert_eq!(verdicts[0], kept);
        assert_eq!(verdicts[1].status(), EvaluationStatus::Completed);
        assert_eq!(judge.judged(), 1);
    }

    #[tokio::test]
    async fn test_override_rejudges_everything() {
        let judge = FakeJudge::new();
        let problems = make_problems(&["a"]);
        let predictions = vec![make_prediction("a", &["ok", "wa"])];

        let store = evaluate_dataset(&judge, &problems, &predictions, EvaluationStore::new(), &make_options(false))
            .await
            .unwrap()
            .store;
        evaluate_dataset(&judge, &problems, &predictions, store, &make_options(true))
            .await
            .unwrap()
            .store;
        assert_eq!(judge.judged(), 4);
    }

    #[tokio::test]
    async fn test_other_judges_are_preserved() {
        let judge = FakeJudge::new();
        let mut store = EvaluationStore::new();
        store.merge("a", "online_judge", vec![Verdict::Submitted { submission_url: "gauge:result:1".into() }]);

        let store = evaluate_dataset(
            &judge,
            &make_problems(&["a"]),
            &[make_prediction("a", &["ok"])],
            store,
            &make_options(false),
        )
        .await
        .unwrap()
        .store;

        let record = store.get("a").unwrap();
        assert_eq!(record.verdicts("online_judge").unwrap()[0].submission_url(), Some("gauge:result:1"));
        assert!(record.verdicts("local_evaluator").is_some());
    }

    #[tokio::test]
    async fn test_missing_verdict_keeps_other_problems() {
        let judge = FakeJudge::dropping_last_for("b");
        let predictions = vec![make_prediction("a", &["ok"]), make_prediction("b", &["ok", "ok"])];

        let evaluation = evaluate_dataset(
            &judge,
            &make_problems(&["a", "b"]),
            &predictions,
            EvaluationStore::new(),
            &make_options(false),
        )
        .await
        .unwrap();

        assert_eq!(evaluation.violations.len(), 1);
        assert!(matches!(
            &evaluation.violations[0],
            GaugeError::SchemaViolation { id, .. } if id == "b"
        ));
        let store = &evaluation.store;
        assert_eq!(
            store.get("a").unwrap().verdicts("local_evaluator").unwrap()[0].status(),
            EvaluationStatus::Completed
        );
        // b keeps its initial verdicts and is judged again on the next run
        assert_eq!(
            store.get("b").unwrap().verdicts("local_evaluator").unwrap(),
            &[Verdict::FailedSubmission, Verdict::FailedSubmission]
        );
    }

    #[tokio::test]
    async fn test_regressing_verdict_keeps_previous_state() {
        let judge = FakeJudge::new();
        let mut store = EvaluationStore::new();
        let submitted = Verdict::Submitted {
            submission_url: "gauge:result:1".into(),
        };
        store.merge("a", "local_evaluator", vec![submitted.clone()]);
        store.merge("b", "local_evaluator", vec![Verdict::FailedSubmission]);

        // the sandbox is down for a, b succeeds
        let predictions = vec![make_prediction("a", &["down"]), make_prediction("b", &["ok"])];
        let evaluation = evaluate_dataset(
            &judge,
            &make_problems(&["a", "b"]),
            &predictions,
            store,
            &make_options(false),
        )
        .await
        .unwrap();

        assert!(evaluation.violations.is_empty());
        assert_eq!(evaluation.store.get("a").unwrap().verdicts("local_evaluator").unwrap(), &[submitted]);
        assert_eq!(
            evaluation.store.get("b").unwrap().verdicts("local_evaluator").unwrap()[0].status(),
            EvaluationStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_prediction_without_problem_is_error() {
        let judge = FakeJudge::new();
        let result = evaluate_dataset(
            &judge,
            &make_problems(&["a"]),
            &[make_prediction("zzz", &["ok"])],
            EvaluationStore::new(),
            &make_options(false),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(judge.judged(), 0);
    }
}
