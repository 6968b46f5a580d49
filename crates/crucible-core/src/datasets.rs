//! Read-only task collections, partitioned by dataset and split.
//!
//! Loading the collections is the caller's job (they arrive as JSON arrays
//! in the dataset's native field names); the evaluation core only needs
//! index-based random access by `(dataset, split, task_id)`.

use std::collections::HashMap;
use std::path::Path;

use crate::core_types::{Dataset, HumanEvalTask, MbppTask, Task};
use crate::errors::EvalError;

#[derive(Debug, Default)]
pub struct TaskStore {
    splits: HashMap<(Dataset, String), Vec<Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        TaskStore::default()
    }

    pub fn insert_mbpp_split(&mut self, split: &str, tasks: Vec<MbppTask>) {
        self.splits.insert(
            (Dataset::Mbpp, split.to_string()),
            tasks.into_iter().map(Task::Mbpp).collect(),
        );
    }

    pub fn insert_humaneval_split(&mut self, split: &str, tasks: Vec<HumanEvalTask>) {
        self.splits.insert(
            (Dataset::HumanEval, split.to_string()),
            tasks.into_iter().map(Task::HumanEval).collect(),
        );
    }

    /// Parse a JSON array of task rows in the dataset's native schema and
    /// register it as a split.
    pub fn insert_split_from_json(
        &mut self,
        dataset: Dataset,
        split: &str,
        json: &str,
    ) -> Result<usize, EvalError> {
        let count = match dataset {
            Dataset::Mbpp => {
                let tasks: Vec<MbppTask> = serde_json::from_str(json).map_err(|e| {
                    EvalError::TaskLoad(format!("invalid mbpp task file: {}", e))
                })?;
                let count = tasks.len();
                self.insert_mbpp_split(split, tasks);
                count
            }
            Dataset::HumanEval => {
                let tasks: Vec<HumanEvalTask> = serde_json::from_str(json).map_err(|e| {
                    EvalError::TaskLoad(format!("invalid humaneval task file: {}", e))
                })?;
                let count = tasks.len();
                self.insert_humaneval_split(split, tasks);
                count
            }
        };
        log::info!("loaded {} tasks for {}/{}", count, dataset, split);
        Ok(count)
    }

    /// Read a split from a JSON file on disk.
    pub async fn load_split_file<P: AsRef<Path>>(
        &mut self,
        dataset: Dataset,
        split: &str,
        path: P,
    ) -> Result<usize, EvalError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            EvalError::TaskLoad(format!(
                "failed to read task file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        self.insert_split_from_json(dataset, split, &raw)
    }

    pub fn split_len(&self, dataset: Dataset, split: &str) -> Result<usize, EvalError> {
        self.splits
            .get(&(dataset, split.to_string()))
            .map(Vec::len)
            .ok_or_else(|| EvalError::UnknownSplit {
                dataset,
                split: split.to_string(),
            })
    }

    pub fn task(
        &self,
        dataset: Dataset,
        split: &str,
        task_id: usize,
    ) -> Result<&Task, EvalError> {
        let tasks = self
            .splits
            .get(&(dataset, split.to_string()))
            .ok_or_else(|| EvalError::UnknownSplit {
                dataset,
                split: split.to_string(),
            })?;
        tasks.get(task_id).ok_or_else(|| EvalError::TaskOutOfRange {
            dataset,
            split: split.to_string(),
            task_id,
            len: tasks.len(),
        })
    }
}
