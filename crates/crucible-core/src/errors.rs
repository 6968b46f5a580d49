//! Error types for the evaluation harness
//!
//! Two tiers: `EvalError` covers the orchestration surface (task identity,
//! configuration, caller preconditions), while `SandboxError` covers faults
//! inside an execution backend (spawn failures, remote transport, payload
//! decoding). Compile failures, test failures and timeouts are *not* errors
//! anywhere in this crate; they are ordinary `ExecutionResult` values.

use std::time::Duration;

use thiserror::Error;

use crate::core_types::Dataset;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("unsupported dataset '{0}' (expected \"mbpp\" or \"openai_humaneval\")")]
    UnsupportedDataset(String),
    #[error("unknown split '{split}' for dataset '{dataset}'")]
    UnknownSplit { dataset: Dataset, split: String },
    #[error("task_id {task_id} out of range for {dataset}/{split} ({len} tasks)")]
    TaskOutOfRange {
        dataset: Dataset,
        split: String,
        task_id: usize,
        len: usize,
    },
    #[error("expected one submission per task ({expected}), got {actual}")]
    SubmissionCountMismatch { expected: usize, actual: usize },
    #[error("failed to load tasks: {0}")]
    TaskLoad(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("sandbox failure: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Faults raised by an execution backend. These are the "genuinely
/// unexpected" failures: during a bulk run the orchestrator converts them
/// into per-task sentinel records instead of aborting the batch.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("failed to spawn guest process: {0}")]
    Spawn(String),
    #[error("I/O error during sandboxed execution: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote operation failed: {0}")]
    OperationFailed(String),
    #[error("malformed remote payload: {0}")]
    MalformedPayload(String),
    #[error("no result in log stream after {}s", .waited.as_secs())]
    FetchTimeout { waited: Duration },
    #[error("evaluation worker failed: {0}")]
    Worker(String),
}
