use crate::error::{GaugeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One input/output pair of a problem.
///
/// Persisted as `[[input lines...], expected_output]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(Vec<String>, String)", into = "(Vec<String>, String)")]
pub struct TestCase {
    pub inputs: Vec<String>,
    pub expected_output: String,
}

impl From<(Vec<String>, String)> for TestCase {
    fn from((inputs, expected_output): (Vec<String>, String)) -> Self {
        Self {
            inputs,
            expected_output,
        }
    }
}

impl From<TestCase> for (Vec<String>, String) {
    fn from(test: TestCase) -> Self {
        (test.inputs, test.expected_output)
    }
}

impl TestCase {
    /// Text fed to the program's standard input
    pub fn stdin(&self) -> String {
        let mut input = self.inputs.join("\n");
        if !input.ends_with('\n') {
            input.push('\n');
        }
        input
    }
}

/// Which test suite a metric or a judge looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestVisibility {
    Hidden,
    Public,
}

impl TestVisibility {
    pub fn from_hidden_flag(hidden_test_cases: bool) -> Self {
        if hidden_test_cases {
            TestVisibility::Hidden
        } else {
            TestVisibility::Public
        }
    }
}

impl fmt::Display for TestVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestVisibility::Hidden => write!(f, "hidden"),
            TestVisibility::Public => write!(f, "public"),
        }
    }
}

/// A competitive-programming problem, read-only input owned by the dataset.
///
/// Everything besides the id and the test suites (difficulty, tags, contest,
/// date, ...) is kept as an attribute map used for bucketing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    #[serde(default)]
    pub hidden_tests_io: Option<Vec<TestCase>>,
    #[serde(default)]
    pub public_tests_io: Option<Vec<TestCase>>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl Problem {
    pub fn tests(&self, visibility: TestVisibility) -> &[TestCase] {
        let tests = match visibility {
            TestVisibility::Hidden => &self.hidden_tests_io,
            TestVisibility::Public => &self.public_tests_io,
        };
        tests.as_deref().unwrap_or(&[])
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Problems keyed by id
#[derive(Debug, Clone, Default)]
pub struct ProblemSet {
    problems: BTreeMap<String, Problem>,
}

impl ProblemSet {
    pub fn from_problems(problems: Vec<Problem>) -> Result<Self> {
        let mut by_id = BTreeMap::new();
        for problem in problems {
            let id = problem.id.clone();
            if by_id.insert(id.clone(), problem).is_some() {
                return Err(GaugeError::schema(id, "duplicated problem id in dataset"));
            }
        }
        Ok(Self { problems: by_id })
    }

    pub fn get(&self, id: &str) -> Result<&Problem> {
        self.problems
            .get(id)
            .ok_or_else(|| GaugeError::MissingProblem(id.to_string()))
    }

    /// Subset view restricted to `ids`
    pub fn filter(&self, ids: &BTreeSet<String>) -> ProblemSet {
        let problems = self
            .problems
            .iter()
            .filter(|(id, _)| ids.contains(*id))
            .map(|(id, problem)| (id.clone(), problem.clone()))
            .collect();
        ProblemSet { problems }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Problem> {
        self.problems.values()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Inference outputs generated for one problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    #[serde(default)]
    pub inference_outputs: Vec<Value>,
}

/// Extract the candidate solution of one inference output.
pub fn get_prediction(output: &Value) -> Option<&str> {
    output.pointer("/data/output_data/code")?.as_str()
}

impl Prediction {
    /// Candidate solutions in the order they were generated
    pub fn candidate_solutions(&self) -> Result<Vec<String>> {
        self.inference_outputs
            .iter()
            .enumerate()
            .map(|(idx, output)| {
                get_prediction(output).map(str::to_string).ok_or_else(|| {
                    GaugeError::schema(
                        &self.id,
                        format!("inference output {} has no `data.output_data.code`", idx),
                    )
                })
            })
            .collect()
    }

    pub fn num_candidates(&self) -> usize {
        self.inference_outputs.len()
    }
}

/// Problem id → number of candidate solutions
pub type CandidateIndex = BTreeMap<String, usize>;

pub fn candidate_index(predictions: &[Prediction]) -> CandidateIndex {
    predictions
        .iter()
        .map(|p| (p.id.clone(), p.num_candidates()))
        .collect()
}
