//! Remote execution backend.
//!
//! A `(code, test_code)` pair is submitted as the argument list of a job on
//! an isolated serverless runner; the job image executes the pair and
//! prints the `ExecutionResult` payload to its stdout log channel. The
//! result is read back by querying a structured log store for the one
//! entry matching the job's execution correlation id.
//!
//! Rate limits on the platform are per fixed window, on both the job-run
//! API and the log-read API, so bulk dispatch and bulk fetch are each
//! serialized globally and paced with fixed spacing rather than
//! exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use super::Sandbox;
use crate::core_types::{ExecutionResult, SubmissionPair};
use crate::errors::SandboxError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSandboxConfig {
    /// Base URL of the job-runner API.
    pub runner_url: String,
    /// Base URL of the log-store API.
    pub logs_url: String,
    pub project: String,
    pub location: String,
    pub job: String,
    /// Seconds between polls of an in-flight operation.
    pub operation_poll_interval_secs: f64,
    /// Seconds between polls of the log store for one result.
    pub log_poll_interval_secs: f64,
    /// Give up waiting for a result after this many seconds.
    pub fetch_ceiling_secs: f64,
    /// Fixed spacing between bulk dispatches.
    pub dispatch_spacing_secs: f64,
    /// Fixed spacing between bulk log reads.
    pub fetch_spacing_secs: f64,
}

impl Default for RemoteSandboxConfig {
    fn default() -> Self {
        RemoteSandboxConfig {
            runner_url: String::new(),
            logs_url: String::new(),
            project: String::new(),
            location: "us-central1".to_string(),
            job: "safe-eval".to_string(),
            operation_poll_interval_secs: 1.0,
            log_poll_interval_secs: 5.0,
            fetch_ceiling_secs: 600.0,
            dispatch_spacing_secs: 2.0,
            fetch_spacing_secs: 2.0,
        }
    }
}

impl RemoteSandboxConfig {
    pub fn operation_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.operation_poll_interval_secs.max(0.0))
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.log_poll_interval_secs.max(0.0))
    }

    pub fn fetch_ceiling(&self) -> Duration {
        Duration::from_secs_f64(self.fetch_ceiling_secs.max(0.0))
    }
}

/// Handle correlating one dispatched job to its later log entry. Created
/// on dispatch, consumed exactly once by the fetch phase.
#[derive(Debug)]
pub struct BatchJob {
    execution_id: String,
}

impl BatchJob {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }
}

/// Fixed-spacing rate limiter: consecutive `pace` calls are kept at least
/// `interval` apart. The first call never waits.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Pacer {
            interval,
            last: Mutex::new(None),
        }
    }

    pub async fn pace(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let next_slot = previous + self.interval;
            let now = Instant::now();
            if next_slot > now {
                sleep(next_slot - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}

pub struct RemoteSandbox {
    config: RemoteSandboxConfig,
    client: reqwest::Client,
    dispatch_pacer: Pacer,
    fetch_pacer: Pacer,
}

/// Long-running operation returned by the job-runner API. `metadata.name`
/// carries the execution resource as soon as the job is accepted;
/// `response.name` carries it once the run completes.
#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    metadata: Option<ResourceName>,
    #[serde(default)]
    response: Option<ResourceName>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct ResourceName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct LogPage {
    #[serde(default)]
    entries: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    #[serde(rename = "jsonPayload")]
    json_payload: Option<serde_json::Value>,
}

impl RemoteSandbox {
    pub fn new(config: RemoteSandboxConfig) -> Result<Self, SandboxError> {
        let client = reqwest::Client::builder().build()?;
        let dispatch_pacer = Pacer::new(Duration::from_secs_f64(
            config.dispatch_spacing_secs.max(0.0),
        ));
        let fetch_pacer = Pacer::new(Duration::from_secs_f64(config.fetch_spacing_secs.max(0.0)));
        Ok(RemoteSandbox {
            config,
            client,
            dispatch_pacer,
            fetch_pacer,
        })
    }

    fn job_resource(&self) -> String {
        format!(
            "projects/{}/locations/{}/jobs/{}",
            self.config.project, self.config.location, self.config.job
        )
    }

    async fn send_job(&self, code: &str, test_code: &str) -> Result<Operation, SandboxError> {
        let url = format!(
            "{}/v2/{}:run",
            self.config.runner_url.trim_end_matches('/'),
            self.job_resource()
        );
        let body = json!({
            "overrides": {
                "containerOverrides": [
                    { "args": [code, test_code] }
                ]
            }
        });
        let operation: Operation = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        log::debug!("dispatched operation {}", operation.name);
        Ok(operation)
    }

    /// Poll the operation until the run completes, then extract the
    /// execution correlation id from the response resource name.
    async fn await_operation(&self, mut operation: Operation) -> Result<String, SandboxError> {
        let deadline = Instant::now() + self.config.fetch_ceiling();
        loop {
            if operation.done {
                if let Some(error) = operation.error {
                    return Err(SandboxError::OperationFailed(error.message));
                }
                let name = operation.response.map(|r| r.name).ok_or_else(|| {
                    SandboxError::MalformedPayload(
                        "operation completed without a response resource".to_string(),
                    )
                })?;
                return Ok(final_segment(&name).to_string());
            }
            if Instant::now() >= deadline {
                return Err(SandboxError::OperationFailed(format!(
                    "operation {} did not complete in time",
                    operation.name
                )));
            }
            sleep(self.config.operation_poll_interval()).await;
            let url = format!(
                "{}/v2/{}",
                self.config.runner_url.trim_end_matches('/'),
                operation.name.trim_start_matches('/')
            );
            operation = self
                .client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
        }
    }

    fn log_filter(&self, execution_id: &str) -> String {
        format!(
            "resource.type = \"cloud_run_job\" \
             AND resource.labels.job_name = \"{job}\" \
             AND labels.\"run.googleapis.com/execution_name\" = \"{execution}\" \
             AND log_name=\"projects/{project}/logs/run.googleapis.com%2Fstdout\"",
            job = self.config.job,
            execution = execution_id,
            project = self.config.project,
        )
    }

    /// Poll the log store for the single entry matching this job. The
    /// result is usually not available immediately after the run reports
    /// completion, hence the poll loop; giving up is an explicit
    /// `FetchTimeout`, never a silent empty result.
    async fn fetch_result(&self, job: &BatchJob) -> Result<ExecutionResult, SandboxError> {
        let started = Instant::now();
        let url = format!(
            "{}/v2/entries:list",
            self.config.logs_url.trim_end_matches('/')
        );
        let body = json!({
            "resourceNames": [format!("projects/{}", self.config.project)],
            "filter": self.log_filter(&job.execution_id),
            "pageSize": 1,
        });
        loop {
            let page: LogPage = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            if let Some(entry) = page.entries.into_iter().next() {
                let payload = entry.json_payload.ok_or_else(|| {
                    SandboxError::MalformedPayload("log entry without jsonPayload".to_string())
                })?;
                return serde_json::from_value(payload)
                    .map_err(|e| SandboxError::MalformedPayload(e.to_string()));
            }
            let waited = started.elapsed();
            if waited >= self.config.fetch_ceiling() {
                return Err(SandboxError::FetchTimeout { waited });
            }
            sleep(self.config.log_poll_interval()).await;
        }
    }

    /// Dispatch phase of a bulk run: strictly sequential, fixed spacing.
    /// A failed dispatch occupies its slot as an error so the fetch phase
    /// and the final record set keep their indexes aligned.
    pub async fn bulk_send(
        &self,
        pairs: &[SubmissionPair],
    ) -> Vec<Result<BatchJob, SandboxError>> {
        log::info!("dispatching {} jobs", pairs.len());
        let mut jobs = Vec::with_capacity(pairs.len());
        for pair in pairs {
            self.dispatch_pacer.pace().await;
            let job = match self.send_job(&pair.code, &pair.test_code).await {
                Ok(operation) => match operation.metadata {
                    Some(metadata) => Ok(BatchJob {
                        execution_id: final_segment(&metadata.name).to_string(),
                    }),
                    None => Err(SandboxError::MalformedPayload(
                        "dispatch response carried no execution metadata".to_string(),
                    )),
                },
                Err(e) => Err(e),
            };
            jobs.push(job);
        }
        log::info!("{} jobs sent", jobs.iter().filter(|j| j.is_ok()).count());
        jobs
    }

    /// Fetch phase of a bulk run: strictly sequential, independently paced
    /// (the log-read rate limit is separate from the job-run one).
    pub async fn bulk_fetch(
        &self,
        jobs: Vec<Result<BatchJob, SandboxError>>,
    ) -> Vec<Result<ExecutionResult, SandboxError>> {
        let total = jobs.len();
        log::info!("fetching {} job results", total);
        let mut results = Vec::with_capacity(total);
        for (i, job) in jobs.into_iter().enumerate() {
            match job {
                Ok(job) => {
                    if i > 0 && i % 10 == 0 {
                        log::info!("{}/{} results fetched", i, total);
                    }
                    self.fetch_pacer.pace().await;
                    results.push(self.fetch_result(&job).await);
                }
                // Dispatch already failed; there is nothing to fetch.
                Err(e) => results.push(Err(e)),
            }
        }
        results
    }
}

#[async_trait]
impl Sandbox for RemoteSandbox {
    async fn check_correctness(
        &self,
        code: &str,
        test_code: &str,
    ) -> Result<ExecutionResult, SandboxError> {
        let operation = self.send_job(code, test_code).await?;
        let execution_id = self.await_operation(operation).await?;
        self.fetch_result(&BatchJob { execution_id }).await
    }

    async fn check_batch(
        &self,
        pairs: &[SubmissionPair],
        _concurrency: usize,
    ) -> Vec<Result<ExecutionResult, SandboxError>> {
        let jobs = self.bulk_send(pairs).await;
        self.bulk_fetch(jobs).await
    }
}

fn final_segment(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Outcome;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-process stand-in for the job runner and log store.
    #[derive(Default)]
    struct MockPlatform {
        dispatch_count: AtomicUsize,
        /// Result payload per execution id; executions without one never
        /// surface in the log stream.
        payloads: std::sync::Mutex<HashMap<String, Value>>,
    }

    async fn run_job(
        State(platform): State<Arc<MockPlatform>>,
        Json(body): Json<Value>,
    ) -> Result<Json<Value>, StatusCode> {
        let code = body["overrides"]["containerOverrides"][0]["args"][0]
            .as_str()
            .unwrap_or_default();
        if code.contains("reject me") {
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
        let n = platform.dispatch_count.fetch_add(1, Ordering::SeqCst);
        let execution = format!("projects/p/locations/l/jobs/safe-eval/executions/exec-{}", n);
        Ok(Json(json!({
            "name": format!("projects/p/locations/l/operations/op-{}", n),
            "done": true,
            "metadata": { "name": execution },
            "response": { "name": execution },
        })))
    }

    async fn list_entries(
        State(platform): State<Arc<MockPlatform>>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let filter = body["filter"].as_str().unwrap_or_default();
        let execution_id = filter
            .split("execution_name\" = \"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap_or_default();
        let payloads = platform.payloads.lock().unwrap();
        match payloads.get(execution_id) {
            Some(payload) => Json(json!({ "entries": [ { "jsonPayload": payload } ] })),
            None => Json(json!({ "entries": [] })),
        }
    }

    async fn start_mock(platform: Arc<MockPlatform>) -> SocketAddr {
        let app = Router::new()
            .route(
                "/v2/projects/{project}/locations/{location}/jobs/{job_run}",
                post(run_job),
            )
            .route(
                "/v2/projects/{project}/locations/{location}/operations/{op}",
                get(|| async { Json(json!({})) }),
            )
            .route("/v2/entries:list", post(list_entries))
            .with_state(platform);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn fast_config(addr: SocketAddr) -> RemoteSandboxConfig {
        let base = format!("http://{}", addr);
        RemoteSandboxConfig {
            runner_url: base.clone(),
            logs_url: base,
            project: "p".to_string(),
            location: "l".to_string(),
            job: "safe-eval".to_string(),
            operation_poll_interval_secs: 0.01,
            log_poll_interval_secs: 0.02,
            fetch_ceiling_secs: 0.2,
            dispatch_spacing_secs: 0.0,
            fetch_spacing_secs: 0.0,
        }
    }

    fn register_payload(platform: &MockPlatform, execution_id: &str, payload: Value) {
        platform
            .payloads
            .lock()
            .unwrap()
            .insert(execution_id.to_string(), payload);
    }

    #[tokio::test]
    async fn single_check_round_trips_the_payload() {
        let platform = Arc::new(MockPlatform::default());
        register_payload(
            &platform,
            "exec-0",
            json!({ "result": "passed", "compiled": true, "passed_tests": true, "avg_test_time": 0.03 }),
        );
        let addr = start_mock(Arc::clone(&platform)).await;
        let sandbox = RemoteSandbox::new(fast_config(addr)).unwrap();

        let result = sandbox
            .check_correctness("def f(x): return x*x", "assert f(2)==4")
            .await
            .unwrap();
        assert_eq!(result.result, Outcome::Passed);
        assert!(result.passed_tests);
        assert_eq!(result.avg_test_time, Some(0.03));
    }

    #[tokio::test]
    async fn batch_keeps_input_order_and_isolates_failures() {
        let platform = Arc::new(MockPlatform::default());
        let addr = start_mock(Arc::clone(&platform)).await;
        let sandbox = RemoteSandbox::new(fast_config(addr)).unwrap();

        // Rejected dispatches never allocate an execution id, so the two
        // accepted pairs map to exec-0 and exec-1.
        register_payload(
            &platform,
            "exec-0",
            json!({ "result": "passed", "compiled": true, "passed_tests": true }),
        );
        register_payload(
            &platform,
            "exec-1",
            json!({ "result": "failed: AssertionError", "compiled": true, "passed_tests": false }),
        );

        let pairs = vec![
            SubmissionPair {
                code: "a".to_string(),
                test_code: "t".to_string(),
            },
            SubmissionPair {
                code: "reject me".to_string(),
                test_code: "t".to_string(),
            },
            SubmissionPair {
                code: "b".to_string(),
                test_code: "t".to_string(),
            },
        ];
        let results = sandbox.check_batch(&pairs, 8).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().result, Outcome::Passed);
        assert!(matches!(results[1], Err(SandboxError::Transport(_))));
        assert_eq!(
            results[2].as_ref().unwrap().result,
            Outcome::Failed("AssertionError".to_string())
        );
    }

    #[tokio::test]
    async fn missing_log_entry_is_an_explicit_fetch_timeout() {
        let platform = Arc::new(MockPlatform::default());
        let addr = start_mock(Arc::clone(&platform)).await;
        let sandbox = RemoteSandbox::new(fast_config(addr)).unwrap();

        let err = sandbox
            .check_correctness("never logs", "t")
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::FetchTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_enforces_fixed_spacing() {
        let pacer = Pacer::new(Duration::from_secs(2));
        let started = Instant::now();
        pacer.pace().await;
        // First call is free.
        assert!(started.elapsed() < Duration::from_millis(10));
        pacer.pace().await;
        pacer.pace().await;
        assert!(started.elapsed() >= Duration::from_secs(4));
    }
}
