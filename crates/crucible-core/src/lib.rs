//! Crucible: an evaluation harness for untrusted, machine-generated code.
//!
//! Given a code submission and a test suite authored independently of it,
//! the harness decides whether the submission runs, whether it passes the
//! tests, how long the tests take, and how simple the code is by static
//! metrics, while keeping the evaluator process, the filesystem and
//! concurrent evaluations safe from whatever the submission does, and
//! bounding every run with a hard time budget.
//!
//! # Architecture Overview
//!
//! - **Task model**: two dataset schemas behind one `Task` enum, with
//!   split-partitioned, index-addressable storage
//! - **Harness builder**: deterministic construction of the test code
//!   appended to each submission
//! - **Sandbox backends**: one `Sandbox` contract, two implementations
//!   (a local privilege-reduced child-process executor and a remote
//!   serverless job-runner client), selected by configuration
//! - **Complexity analysis**: size, cyclomatic, Halstead and
//!   maintainability figures for submissions that compiled
//! - **Orchestration**: single-task `evaluate` and bounded-parallel
//!   `bulk_evaluate` with per-task failure isolation
//! - **Configuration**: YAML-driven backend selection and tunables

pub mod analysis;
pub mod config;
pub mod core_types;
pub mod datasets;
pub mod errors;
pub mod evaluator;
pub mod harness;
pub mod sandbox;

pub use analysis::analyze_simplicity;
pub use config::{load_config, ConfigLoader, CrucibleConfig, SandboxBackend};
pub use core_types::{
    Dataset, EvaluationRecord, ExecutionResult, HumanEvalTask, MbppTask, Metrics, Outcome,
    SubmissionPair, Task,
};
pub use datasets::TaskStore;
pub use errors::{EvalError, SandboxError};
pub use evaluator::Evaluator;
pub use harness::build_tests;
pub use sandbox::{LocalSandbox, LocalSandboxConfig, RemoteSandbox, RemoteSandboxConfig, Sandbox};
