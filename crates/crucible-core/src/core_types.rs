//! Core data model shared by the harness builder, sandbox backends and the
//! evaluation orchestrator.
//!
//! The wire shapes here are load-bearing: `ExecutionResult` is exactly the
//! payload a remote sandbox job prints to its log stream, and
//! `EvaluationRecord` is the flat row handed to the external persistence
//! layer. Changing a field name changes the external contract.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::EvalError;

/// The two recognized task-collection schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dataset {
    #[serde(rename = "mbpp")]
    Mbpp,
    #[serde(rename = "openai_humaneval")]
    HumanEval,
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Mbpp => f.write_str("mbpp"),
            Dataset::HumanEval => f.write_str("openai_humaneval"),
        }
    }
}

impl FromStr for Dataset {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mbpp" => Ok(Dataset::Mbpp),
            "openai_humaneval" | "humaneval" => Ok(Dataset::HumanEval),
            other => Err(EvalError::UnsupportedDataset(other.to_string())),
        }
    }
}

/// MBPP-style task: an optional setup snippet plus ordered lists of
/// required and challenge test statements. Field names match the dataset's
/// JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbppTask {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub test_setup_code: Option<String>,
    #[serde(default)]
    pub test_list: Vec<String>,
    #[serde(default)]
    pub challenge_test_list: Vec<String>,
}

/// HumanEval-style task: a test-script body and the entry-point symbol the
/// script's check function is invoked with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanEvalTask {
    #[serde(default)]
    pub prompt: Option<String>,
    pub test: String,
    pub entry_point: String,
}

/// One coding problem instance. The variant fixes the harness schema, so a
/// task can never be paired with the wrong builder. Deserialization goes
/// through `TaskStore`, which knows which schema a file holds.
#[derive(Debug, Clone)]
pub enum Task {
    Mbpp(MbppTask),
    HumanEval(HumanEvalTask),
}

impl Task {
    pub fn dataset(&self) -> Dataset {
        match self {
            Task::Mbpp(_) => Dataset::Mbpp,
            Task::HumanEval(_) => Dataset::HumanEval,
        }
    }
}

/// A `(code, test_code)` pair ready for execution.
#[derive(Debug, Clone)]
pub struct SubmissionPair {
    pub code: String,
    pub test_code: String,
}

/// Terminal classification of one execution.
///
/// Serialized as the strings `"passed"`, `"timed out"` and
/// `"failed: <reason>"` so remote payloads produced by the original job
/// image round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    TimedOut,
    Failed(String),
}

impl Outcome {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "passed" => Outcome::Passed,
            "timed out" => Outcome::TimedOut,
            other => match other.strip_prefix("failed: ") {
                Some(reason) => Outcome::Failed(reason.to_string()),
                None => Outcome::Failed(other.to_string()),
            },
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => f.write_str("passed"),
            Outcome::TimedOut => f.write_str("timed out"),
            Outcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Outcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Outcome::from_wire(&s))
    }
}

/// What one sandboxed run of `code` + `test_code` produced.
///
/// Invariant: `passed_tests == true` implies `compiled == true` implies
/// `result == Passed`. The constructors below are the only places the
/// flags are set, which is what keeps the invariant honest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub result: Outcome,
    pub compiled: bool,
    pub passed_tests: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_test_time: Option<f64>,
}

impl ExecutionResult {
    pub fn passed(avg_test_time: Option<f64>) -> Self {
        ExecutionResult {
            result: Outcome::Passed,
            compiled: true,
            passed_tests: true,
            avg_test_time,
        }
    }

    /// `compiled` reflects how far execution got before the watchdog fired:
    /// false when the submission itself was still running, true when the
    /// appended tests were.
    pub fn timed_out(compiled: bool) -> Self {
        ExecutionResult {
            result: Outcome::TimedOut,
            compiled,
            passed_tests: false,
            avg_test_time: None,
        }
    }

    pub fn failed(reason: impl Into<String>, compiled: bool) -> Self {
        ExecutionResult {
            result: Outcome::Failed(reason.into()),
            compiled,
            passed_tests: false,
            avg_test_time: None,
        }
    }
}

/// Static simplicity figures for a submission that compiled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Total lines.
    pub loc: usize,
    /// Logical lines (statements).
    pub lloc: usize,
    /// Source lines (neither blank nor comment-only).
    pub sloc: usize,
    /// Comment-only lines.
    pub comments: usize,
    /// Blank lines.
    pub blank: usize,
    /// Cyclomatic complexity of the first top-level construct.
    pub cyclomatic_complexity: u32,
    pub halstead_vocabulary: usize,
    pub halstead_length: usize,
    pub halstead_volume: f64,
    pub halstead_difficulty: f64,
    pub halstead_effort: f64,
    pub maintainability_index: f64,
}

/// The unit returned to callers and persisted downstream: task identity,
/// execution outcome, and (when the submission compiled) static metrics,
/// flattened into one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub dataset: Dataset,
    pub split: String,
    pub task_id: usize,
    #[serde(flatten)]
    pub execution: ExecutionResult,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    /// Set only on batch-failure sentinel records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvaluationRecord {
    /// Sentinel record for a task whose evaluation hit an unexpected error
    /// during a bulk run. Keeps the one-record-per-task shape intact.
    pub fn failure(dataset: Dataset, split: &str, task_id: usize, error: String) -> Self {
        EvaluationRecord {
            dataset,
            split: split.to_string(),
            task_id,
            execution: ExecutionResult::failed("batch task error", false),
            metrics: None,
            error: Some(error),
        }
    }

    pub fn is_failure_sentinel(&self) -> bool {
        self.error.is_some()
    }
}
