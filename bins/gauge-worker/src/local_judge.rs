use crate::engine::{EngineFailure, ExecutionEngine};
use crate::evaluator::evaluate_candidate;
use crate::judge::Judge;
use gauge_common::{Problem, TestCase, TestVisibility, Verdict};
use tracing::warn;

pub const LOCAL_JUDGE: &str = "local_evaluator";

/// Judges candidates in a local sandbox, hidden and public tests in one run.
pub struct LocalJudge<E> {
    engine: E,
}

impl<E: ExecutionEngine> LocalJudge<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }
}

impl<E: ExecutionEngine> Judge for LocalJudge<E> {
    fn name(&self) -> &str {
        LOCAL_JUDGE
    }

    async fn evaluate_problem(&self, problem: &Problem, candidates: &[String]) -> Vec<Verdict> {
        let inputs: Vec<String> = problem
            .tests(TestVisibility::Hidden)
            .iter()
            .chain(problem.tests(TestVisibility::Public))
            .map(TestCase::stdin)
            .collect();

        let mut verdicts = Vec::with_capacity(candidates.len());
        for (index, source_code) in candidates.iter().enumerate() {
            let verdict = match self.engine.run_candidate(source_code, &inputs).await {
                Ok(run) => evaluate_candidate(
                    problem.hidden_tests_io.as_ref(),
                    problem.public_tests_io.as_ref(),
                    run,
                ),
                Err(EngineFailure::Setup(e)) => {
                    warn!(problem_id = %problem.id, candidate = index, error = %e, "Sandbox setup failed");
                    Verdict::FailedSubmission
                }
                Err(EngineFailure::Collection(e)) => {
                    warn!(problem_id = %problem.id, candidate = index, error = %e, "Failed to collect outputs");
                    Verdict::FailedCollection { submission_url: None }
                }
            };
            verdicts.push(verdict);
        }
        verdicts
    }
}
