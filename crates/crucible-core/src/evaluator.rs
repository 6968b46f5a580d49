//! Evaluation orchestration.
//!
//! `evaluate` composes the harness builder, one sandbox backend and the
//! complexity analyzer into a single-task call; `bulk_evaluate` fans a
//! whole split out across the backend with per-task failure isolation.
//! Compile failures, test failures and timeouts are ordinary record
//! values here; only task-identity and configuration problems surface as
//! errors, and inside a bulk run even unexpected backend faults are
//! demoted to per-task sentinel records so the batch always completes.

use std::sync::Arc;

use crate::analysis::analyze_simplicity;
use crate::config::CrucibleConfig;
use crate::core_types::{Dataset, EvaluationRecord, SubmissionPair};
use crate::datasets::TaskStore;
use crate::errors::EvalError;
use crate::harness::build_tests;
use crate::sandbox::{create_sandbox, Sandbox};

pub struct Evaluator {
    store: Arc<TaskStore>,
    sandbox: Arc<dyn Sandbox>,
}

impl Evaluator {
    pub fn new(store: Arc<TaskStore>, sandbox: Arc<dyn Sandbox>) -> Self {
        Evaluator { store, sandbox }
    }

    /// Build an evaluator with the backend the configuration selects.
    pub fn from_config(config: &CrucibleConfig, store: Arc<TaskStore>) -> Result<Self, EvalError> {
        config.validate()?;
        let sandbox = create_sandbox(config)?;
        Ok(Evaluator::new(store, sandbox))
    }

    /// Evaluate one submission against one task.
    ///
    /// Task identity is validated before any execution resource is
    /// acquired. Metrics are computed only when the submission compiled;
    /// otherwise the record carries none, keeping the row shape uniform.
    pub async fn evaluate(
        &self,
        dataset: Dataset,
        split: &str,
        task_id: usize,
        code: &str,
    ) -> Result<EvaluationRecord, EvalError> {
        let task = self.store.task(dataset, split, task_id)?;
        let test_code = build_tests(task);
        let execution = self.sandbox.check_correctness(code, &test_code).await?;
        let metrics = execution.compiled.then(|| analyze_simplicity(code));
        Ok(EvaluationRecord {
            dataset,
            split: split.to_string(),
            task_id,
            execution,
            metrics,
            error: None,
        })
    }

    /// Evaluate one submission per task of a split.
    ///
    /// Always returns exactly one record per task, in task-id order,
    /// regardless of which tasks fail or how. A task whose evaluation hits
    /// an unexpected fault gets a sentinel record; its neighbours are
    /// untouched. There is no automatic retry: a terminal task stays
    /// terminal.
    pub async fn bulk_evaluate(
        &self,
        dataset: Dataset,
        split: &str,
        code: Vec<String>,
        concurrency: Option<usize>,
    ) -> Result<Vec<EvaluationRecord>, EvalError> {
        let expected = self.store.split_len(dataset, split)?;
        if code.len() != expected {
            return Err(EvalError::SubmissionCountMismatch {
                expected,
                actual: code.len(),
            });
        }

        let mut pairs = Vec::with_capacity(expected);
        for (task_id, submission) in code.iter().enumerate() {
            let task = self.store.task(dataset, split, task_id)?;
            pairs.push(SubmissionPair {
                code: submission.clone(),
                test_code: build_tests(task),
            });
        }

        let limit = concurrency.unwrap_or_else(host_parallelism).max(1);
        log::info!(
            "bulk evaluating {} tasks from {}/{} (concurrency {})",
            expected,
            dataset,
            split,
            limit
        );
        let mut results = self.sandbox.check_batch(&pairs, limit).await;
        if results.len() != expected {
            log::error!(
                "backend returned {} results for {} tasks",
                results.len(),
                expected
            );
            results.truncate(expected);
            while results.len() < expected {
                results.push(Err(crate::errors::SandboxError::Worker(
                    "backend returned no result for this task".to_string(),
                )));
            }
        }

        let records = results
            .into_iter()
            .enumerate()
            .map(|(task_id, result)| match result {
                Ok(execution) => {
                    let metrics = execution
                        .compiled
                        .then(|| analyze_simplicity(&code[task_id]));
                    EvaluationRecord {
                        dataset,
                        split: split.to_string(),
                        task_id,
                        execution,
                        metrics,
                        error: None,
                    }
                }
                Err(err) => {
                    log::warn!("task {} failed with unexpected error: {}", task_id, err);
                    EvaluationRecord::failure(dataset, split, task_id, err.to_string())
                }
            })
            .collect();
        Ok(records)
    }
}

fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
}
