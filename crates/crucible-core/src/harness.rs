//! Test-harness construction.
//!
//! A harness is the code string appended to a submission for execution.
//! Building one is pure string assembly and must be deterministic: repeated
//! calls on the same task produce byte-identical output, because downstream
//! caching and record comparison rely on it.

use crate::core_types::{HumanEvalTask, MbppTask, Task};

/// Build the test harness for a task. The task's variant selects the
/// schema, so there is no dataset argument to get wrong.
pub fn build_tests(task: &Task) -> String {
    match task {
        Task::Mbpp(task) => build_mbpp_tests(task),
        Task::HumanEval(task) => build_humaneval_tests(task),
    }
}

/// Optional setup snippet, then the required and challenge test statements
/// one per line, in list order. No reordering, no deduplication.
fn build_mbpp_tests(task: &MbppTask) -> String {
    let setup = match task.test_setup_code.as_deref() {
        Some(setup) if !setup.is_empty() => format!("{}\n\n", setup),
        _ => String::new(),
    };
    let statements: Vec<&str> = task
        .test_list
        .iter()
        .chain(task.challenge_test_list.iter())
        .map(String::as_str)
        .collect();
    format!("{}{}", setup, statements.join("\n"))
}

/// The test script verbatim, then one invocation of its check function
/// with the task's entry point.
fn build_humaneval_tests(task: &HumanEvalTask) -> String {
    format!("{}\ncheck({})", task.test, task.entry_point)
}
