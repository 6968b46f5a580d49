//! Execution backends for running untrusted submissions.
//!
//! One contract, two implementations: `LocalSandbox` runs each submission
//! in a privilege-reduced child process on this host, `RemoteSandbox`
//! dispatches it to an isolated serverless job runner and reads the result
//! back from a log stream. Callers pick a backend through configuration
//! and stay oblivious to which one is active.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{CrucibleConfig, SandboxBackend};
use crate::core_types::{ExecutionResult, SubmissionPair};
use crate::errors::{EvalError, SandboxError};

pub mod local;
pub mod remote;

pub use local::{LocalSandbox, LocalSandboxConfig};
pub use remote::{BatchJob, Pacer, RemoteSandbox, RemoteSandboxConfig};

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run `code` alone, then `code` + `test_code`, under isolation and a
    /// bounded time budget. Compile failures, test failures and timeouts
    /// come back as `Ok` values; `Err` means the backend itself faulted.
    async fn check_correctness(
        &self,
        code: &str,
        test_code: &str,
    ) -> Result<ExecutionResult, SandboxError>;

    /// Evaluate a batch of pairs. Output order always matches input order,
    /// and one element's failure never disturbs its neighbours.
    ///
    /// `concurrency` bounds the local worker pool; the remote backend
    /// ignores it and paces its dispatch and fetch phases globally instead,
    /// because the platform rate limits are shared across workers.
    async fn check_batch(
        &self,
        pairs: &[SubmissionPair],
        concurrency: usize,
    ) -> Vec<Result<ExecutionResult, SandboxError>>;
}

/// Build the backend selected by the configuration.
pub fn create_sandbox(config: &CrucibleConfig) -> Result<Arc<dyn Sandbox>, EvalError> {
    match config.backend {
        SandboxBackend::Local => {
            log::info!(
                "using local sandbox (interpreter: {})",
                config.local.interpreter
            );
            Ok(Arc::new(LocalSandbox::new(config.local.clone())))
        }
        SandboxBackend::Remote => {
            log::info!("using remote sandbox (job: {})", config.remote.job);
            Ok(Arc::new(RemoteSandbox::new(config.remote.clone())?))
        }
    }
}
