/// Test Evaluator - Scoring of raw execution outputs
///
/// Knows nothing about Docker or language runtimes: it turns what the engine
/// captured into per-test outcomes and a candidate verdict.
///
/// **Normalization Rules:**
/// - Leading and trailing whitespace trimmed (covers `\r\n` vs `\n` at the end)
/// - Internal whitespace and case preserved
use gauge_common::{TestCase, TestOutcome, Verdict};

/// Raw execution output for a single test case
#[derive(Debug, Clone, Default)]
pub struct TestExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    pub runtime_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompilationResult {
    pub success: bool,
    pub stderr: String,
}

impl CompilationResult {
    pub fn success() -> Self {
        Self {
            success: true,
            stderr: String::new(),
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stderr: stderr.into(),
        }
    }
}

/// Everything the engine captured for one candidate
#[derive(Debug, Clone)]
pub struct CandidateRun {
    pub compilation: CompilationResult,
    /// One output per test, hidden tests first then public; empty when
    /// compilation failed
    pub outputs: Vec<TestExecutionOutput>,
}

fn normalize_output(output: &str) -> &str {
    output.trim()
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Outcome of one test: runtime errors first, then timeouts, then output comparison.
pub fn evaluate_test(output: &TestExecutionOutput, test_case: &TestCase) -> TestOutcome {
    if output.runtime_error {
        let detail = first_line(&output.stderr);
        return TestOutcome::failed(format!("Runtime error: {}", detail).trim_end().to_string());
    }
    if output.timed_out {
        return TestOutcome::failed(format!("Time limit exceeded after {}ms", output.execution_time_ms));
    }

    let actual = normalize_output(&output.stdout);
    let expected = normalize_output(&test_case.expected_output);
    if actual == expected {
        TestOutcome::passed()
    } else {
        TestOutcome::failed(format!("Wrong answer: expected {:?}, got {:?}", expected, actual))
    }
}

fn evaluate_suite(
    tests: Option<&Vec<TestCase>>,
    outputs: &mut impl Iterator<Item = TestExecutionOutput>,
    compilation: &CompilationResult,
) -> Option<Vec<TestOutcome>> {
    let tests = tests?;
    Some(
        tests
            .iter()
            .map(|test_case| {
                if !compilation.success {
                    return TestOutcome::failed(compilation.stderr.clone());
                }
                match outputs.next() {
                    Some(output) => evaluate_test(&output, test_case),
                    None => TestOutcome::failed("No output captured"),
                }
            })
            .collect(),
    )
}

/// Completed verdict of one candidate.
///
/// A failed compilation still completes the evaluation: every test fails
/// with the compiler output.
pub fn evaluate_candidate(
    hidden_tests: Option<&Vec<TestCase>>,
    public_tests: Option<&Vec<TestCase>>,
    run: CandidateRun,
) -> Verdict {
    let CandidateRun {
        compilation,
        outputs,
    } = run;
    let mut outputs = outputs.into_iter();

    let hidden = evaluate_suite(hidden_tests, &mut outputs, &compilation);
    let public = evaluate_suite(public_tests, &mut outputs, &compilation);
    let error_message = (!compilation.success).then(|| compilation.stderr.clone());

    Verdict::completed(compilation.success, error_message, hidden, public)
}
