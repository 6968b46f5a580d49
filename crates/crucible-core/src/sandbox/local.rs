//! Local execution backend.
//!
//! Every submission runs in its own freshly spawned interpreter process
//! inside a scoped scratch directory, with resource limits applied between
//! fork and exec. The capability reduction therefore lives and dies with
//! the guest process: nothing in the evaluator's own process is mutated,
//! and any number of evaluations may run concurrently.
//!
//! The rlimit pass is defense against accidents (fork bombs, runaway
//! allocation, bulk file writes), not a security boundary. The host
//! process/container the evaluator runs in is assumed to provide the real
//! isolation.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use uuid::Uuid;

use super::Sandbox;
use crate::core_types::{ExecutionResult, SubmissionPair};
use crate::errors::SandboxError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSandboxConfig {
    /// Interpreter command for the guest language.
    pub interpreter: String,
    /// Wall-clock budget per guest run, in seconds.
    pub timeout_secs: f64,
    /// Whether to time the tests after a passing run.
    pub evaluate_run_time: bool,
    /// Trials for the timing pass; the minimum is reported.
    pub timing_trials: u32,
    /// Address-space cap for the guest (`RLIMIT_AS`). `None` leaves the
    /// inherited limit in place.
    pub max_memory_bytes: Option<u64>,
    /// Process cap for the guest (`RLIMIT_NPROC`); stops fork bombs.
    pub max_processes: Option<u64>,
    /// Captured bytes per output stream; the rest is drained and dropped.
    pub max_output_bytes: usize,
}

impl Default for LocalSandboxConfig {
    fn default() -> Self {
        LocalSandboxConfig {
            interpreter: "python3".to_string(),
            timeout_secs: 10.0,
            evaluate_run_time: false,
            timing_trials: 3,
            max_memory_bytes: None,
            max_processes: Some(4096),
            max_output_bytes: 64 * 1024,
        }
    }
}

impl LocalSandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }
}

#[derive(Debug, Clone)]
pub struct LocalSandbox {
    config: LocalSandboxConfig,
}

/// What one guest process did.
#[derive(Debug)]
struct GuestRun {
    exit: Option<i32>,
    stderr: String,
    timed_out: bool,
    duration: Duration,
}

impl GuestRun {
    fn success(&self) -> bool {
        !self.timed_out && self.exit == Some(0)
    }
}

impl LocalSandbox {
    pub fn new(config: LocalSandboxConfig) -> Self {
        if which::which(&config.interpreter).is_err() {
            log::warn!(
                "interpreter '{}' not found on PATH; guest runs will fail to spawn",
                config.interpreter
            );
        }
        LocalSandbox { config }
    }

    /// Spawn one guest process on `script` and wait for it under the
    /// wall-clock watchdog. The guest is killed outright when the budget
    /// elapses; `RLIMIT_CPU` backs the watchdog up in case the evaluator
    /// itself dies first.
    async fn run_guest(&self, dir: &Path, script: &Path) -> Result<GuestRun, SandboxError> {
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(script)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("HOME", dir)
            .env("TMPDIR", dir)
            // Force single-threaded numeric libraries in the guest.
            .env("OMP_NUM_THREADS", "1")
            .env("OPENBLAS_NUM_THREADS", "1")
            .env("MKL_NUM_THREADS", "1")
            .env("NUMEXPR_NUM_THREADS", "1")
            .kill_on_drop(true);
        self.apply_limits(&mut cmd);

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Spawn(e.to_string()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.config.max_output_bytes;
        // Both streams must be drained while the guest runs, or a chatty
        // guest blocks forever on a full pipe.
        let stdout_task = tokio::spawn(async move {
            match stdout {
                Some(stream) => read_capped(stream, cap).await,
                None => String::new(),
            }
        });
        let stderr_task = tokio::spawn(async move {
            match stderr {
                Some(stream) => read_capped(stream, cap).await,
                None => String::new(),
            }
        });

        let (exit, timed_out) =
            match tokio::time::timeout(self.config.timeout(), child.wait()).await {
                Ok(Ok(status)) => (status.code(), false),
                Ok(Err(e)) => return Err(SandboxError::Io(e)),
                Err(_) => {
                    log::debug!("guest exceeded {:.1}s budget, killing", self.config.timeout_secs);
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    (None, true)
                }
            };

        let duration = started.elapsed();
        let _ = stdout_task.await;
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(GuestRun {
            exit,
            stderr,
            timed_out,
            duration,
        })
    }

    #[cfg(unix)]
    fn apply_limits(&self, cmd: &mut Command) {
        let max_memory = self.config.max_memory_bytes;
        let max_processes = self.config.max_processes;
        let cpu_secs = self.config.timeout_secs.ceil() as u64 + 1;

        fn rlimit(value: u64) -> libc::rlimit {
            libc::rlimit {
                rlim_cur: value,
                rlim_max: value,
            }
        }

        // SAFETY: runs between fork and exec in the child; only
        // async-signal-safe libc calls, on values moved into the closure.
        unsafe {
            cmd.pre_exec(move || {
                if let Some(mem) = max_memory {
                    libc::setrlimit(libc::RLIMIT_AS, &rlimit(mem));
                }
                if let Some(procs) = max_processes {
                    libc::setrlimit(libc::RLIMIT_NPROC, &rlimit(procs));
                }
                libc::setrlimit(libc::RLIMIT_CPU, &rlimit(cpu_secs));
                // No bulk file writes, no core dumps, few descriptors.
                libc::setrlimit(libc::RLIMIT_FSIZE, &rlimit(256 * 1024 * 1024));
                libc::setrlimit(libc::RLIMIT_CORE, &rlimit(0));
                libc::setrlimit(libc::RLIMIT_NOFILE, &rlimit(256));
                Ok(())
            });
        }
    }

    #[cfg(not(unix))]
    fn apply_limits(&self, _cmd: &mut Command) {}

    /// Minimum wall-clock duration of the combined program over the
    /// configured number of trials. Best-effort: any anomalous trial
    /// (non-zero exit, timeout) withdraws the figure entirely.
    async fn time_tests(&self, dir: &Path, program: &Path) -> Result<Option<f64>, SandboxError> {
        let mut best: Option<f64> = None;
        for _ in 0..self.config.timing_trials.max(1) {
            let run = self.run_guest(dir, program).await?;
            if !run.success() {
                return Ok(None);
            }
            let secs = run.duration.as_secs_f64();
            best = Some(match best {
                Some(current) => current.min(secs),
                None => secs,
            });
        }
        Ok(best)
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn check_correctness(
        &self,
        code: &str,
        test_code: &str,
    ) -> Result<ExecutionResult, SandboxError> {
        // Scoped scratch directory; RAII drop removes it on every exit path.
        let dir = tempfile::Builder::new()
            .prefix("crucible-eval-")
            .tempdir()?;
        let run_id = Uuid::new_v4();
        let submission = dir.path().join(format!("submission_{}.py", run_id));
        let program = dir.path().join(format!("program_{}.py", run_id));
        tokio::fs::write(&submission, code).await?;
        tokio::fs::write(&program, format!("{}\n\n{}", code, test_code)).await?;

        // Stage 1: the submission alone. A clean exit is "compiled".
        let first = self.run_guest(dir.path(), &submission).await?;
        if first.timed_out {
            return Ok(ExecutionResult::timed_out(false));
        }
        if !first.success() {
            return Ok(ExecutionResult::failed(failure_summary(&first), false));
        }

        // Stage 2: submission plus harness.
        let second = self.run_guest(dir.path(), &program).await?;
        if second.timed_out {
            return Ok(ExecutionResult::timed_out(true));
        }
        if !second.success() {
            return Ok(ExecutionResult::failed(failure_summary(&second), true));
        }

        let avg_test_time = if self.config.evaluate_run_time {
            self.time_tests(dir.path(), &program).await?
        } else {
            None
        };

        Ok(ExecutionResult::passed(avg_test_time))
    }

    async fn check_batch(
        &self,
        pairs: &[SubmissionPair],
        concurrency: usize,
    ) -> Vec<Result<ExecutionResult, SandboxError>> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut handles = Vec::with_capacity(pairs.len());
        for pair in pairs.iter().cloned() {
            let sandbox = self.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| SandboxError::Worker(e.to_string()))?;
                sandbox.check_correctness(&pair.code, &pair.test_code).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for joined in futures_util::future::join_all(handles).await {
            results.push(match joined {
                Ok(result) => result,
                Err(join_err) => Err(SandboxError::Worker(join_err.to_string())),
            });
        }
        results
    }
}

/// Keep reading until EOF so the guest never blocks on a full pipe, but
/// retain at most `cap` bytes.
async fn read_capped<R: tokio::io::AsyncRead + Unpin>(mut stream: R, cap: usize) -> String {
    let mut retained = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if retained.len() < cap {
                    let take = n.min(cap - retained.len());
                    retained.extend_from_slice(&buf[..take]);
                }
            }
        }
    }
    String::from_utf8_lossy(&retained).into_owned()
}

/// One-line failure reason: the last non-empty stderr line (for Python
/// guests, the final traceback line), falling back to the exit status.
fn failure_summary(run: &GuestRun) -> String {
    run.stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| match run.exit {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Outcome;
    use std::time::Instant as StdInstant;

    /// Shell-based guests keep these tests hermetic: the semantics under
    /// test (two-stage classification, watchdog, summaries) are
    /// interpreter-agnostic.
    fn sh_sandbox(timeout_secs: f64) -> LocalSandbox {
        LocalSandbox::new(LocalSandboxConfig {
            interpreter: "sh".to_string(),
            timeout_secs,
            ..LocalSandboxConfig::default()
        })
    }

    #[tokio::test]
    async fn passing_code_and_tests() {
        let sandbox = sh_sandbox(10.0);
        let result = sandbox
            .check_correctness("x=1", "test \"$x\" = 1")
            .await
            .unwrap();
        assert_eq!(result.result, Outcome::Passed);
        assert!(result.compiled);
        assert!(result.passed_tests);
        assert_eq!(result.avg_test_time, None);
    }

    #[tokio::test]
    async fn failing_tests_still_compile() {
        let sandbox = sh_sandbox(10.0);
        let result = sandbox
            .check_correctness("x=1", "test \"$x\" = 2")
            .await
            .unwrap();
        assert!(result.compiled);
        assert!(!result.passed_tests);
        assert!(result.result.to_string().starts_with("failed:"));
    }

    #[tokio::test]
    async fn broken_submission_does_not_compile() {
        let sandbox = sh_sandbox(10.0);
        let result = sandbox
            .check_correctness("definitely_not_a_command_xyz", "true")
            .await
            .unwrap();
        assert!(!result.compiled);
        assert!(!result.passed_tests);
        assert!(result.result.to_string().starts_with("failed:"));
    }

    #[tokio::test]
    async fn infinite_loop_times_out_within_bounded_overhead() {
        let sandbox = sh_sandbox(1.0);
        let started = StdInstant::now();
        let result = sandbox
            .check_correctness("while :; do :; done", "true")
            .await
            .unwrap();
        assert_eq!(result.result, Outcome::TimedOut);
        assert!(!result.compiled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn hanging_tests_time_out_after_compiling() {
        let sandbox = sh_sandbox(1.0);
        let result = sandbox
            .check_correctness("x=1", "while :; do :; done")
            .await
            .unwrap();
        assert_eq!(result.result, Outcome::TimedOut);
        assert!(result.compiled);
        assert!(!result.passed_tests);
    }

    #[tokio::test]
    async fn failure_summary_is_last_stderr_line() {
        let sandbox = sh_sandbox(10.0);
        let result = sandbox
            .check_correctness("echo context >&2; echo oops >&2; exit 2", "true")
            .await
            .unwrap();
        assert_eq!(result.result, Outcome::Failed("oops".to_string()));
    }

    #[tokio::test]
    async fn timing_reports_minimum_of_trials() {
        let sandbox = LocalSandbox::new(LocalSandboxConfig {
            interpreter: "sh".to_string(),
            evaluate_run_time: true,
            timing_trials: 2,
            ..LocalSandboxConfig::default()
        });
        let result = sandbox.check_correctness("x=1", "true").await.unwrap();
        assert_eq!(result.result, Outcome::Passed);
        let timing = result.avg_test_time.expect("timing requested");
        assert!(timing >= 0.0);
        assert!(timing < 5.0);
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let sandbox = sh_sandbox(10.0);
        let pairs = vec![
            SubmissionPair {
                code: "x=1".to_string(),
                test_code: "test \"$x\" = 1".to_string(),
            },
            SubmissionPair {
                code: "definitely_not_a_command_xyz".to_string(),
                test_code: "true".to_string(),
            },
            SubmissionPair {
                code: "y=2".to_string(),
                test_code: "test \"$y\" = 2".to_string(),
            },
        ];
        let results = sandbox.check_batch(&pairs, 2).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().result, Outcome::Passed);
        assert!(!results[1].as_ref().unwrap().compiled);
        assert_eq!(results[2].as_ref().unwrap().result, Outcome::Passed);
    }

    #[tokio::test]
    async fn unknown_interpreter_is_a_spawn_error() {
        let sandbox = LocalSandbox::new(LocalSandboxConfig {
            interpreter: "crucible-no-such-interpreter".to_string(),
            ..LocalSandboxConfig::default()
        });
        let err = sandbox.check_correctness("x=1", "true").await.unwrap_err();
        assert!(matches!(err, SandboxError::Spawn(_)));
    }

    mod python_scenarios {
        //! The guest-language scenarios from the evaluation contract; they
        //! need a real python3 and skip quietly when one is absent.

        use super::*;

        fn python3() -> Option<LocalSandbox> {
            if which::which("python3").is_err() {
                eprintln!("skipping: python3 not on PATH");
                return None;
            }
            Some(LocalSandbox::new(LocalSandboxConfig::default()))
        }

        #[tokio::test]
        async fn square_function_passes_its_check() {
            let Some(sandbox) = python3() else { return };
            let result = sandbox
                .check_correctness(
                    "def f(x): return x*x",
                    "def check(candidate):\n    assert candidate(2) == 4\ncheck(f)",
                )
                .await
                .unwrap();
            assert_eq!(result.result, Outcome::Passed);
            assert!(result.compiled && result.passed_tests);
        }

        #[tokio::test]
        async fn identity_function_fails_its_check() {
            let Some(sandbox) = python3() else { return };
            let result = sandbox
                .check_correctness(
                    "def f(x): return x",
                    "def check(candidate):\n    assert candidate(2) == 4\ncheck(f)",
                )
                .await
                .unwrap();
            assert!(result.compiled);
            assert!(!result.passed_tests);
            assert!(result.result.to_string().starts_with("failed:"));
        }

        #[tokio::test]
        async fn guest_stdin_read_raises_instead_of_blocking() {
            let Some(sandbox) = python3() else { return };
            let result = sandbox
                .check_correctness("x = input()", "pass")
                .await
                .unwrap();
            assert!(!result.compiled);
            assert!(result.result.to_string().contains("EOFError"));
        }
    }
}
