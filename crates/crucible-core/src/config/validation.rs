//! Configuration validation.
//!
//! Validation runs before any evaluator is built, so a bad config fails
//! fast instead of surfacing mid-batch.

use crate::config::types::{CrucibleConfig, SandboxBackend};
use crate::errors::EvalError;

impl CrucibleConfig {
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.concurrency == Some(0) {
            return Err(EvalError::Config(
                "concurrency must be at least 1 (omit it for host parallelism)".to_string(),
            ));
        }

        self.validate_local()?;
        if self.backend == SandboxBackend::Remote {
            self.validate_remote()?;
        }
        Ok(())
    }

    fn validate_local(&self) -> Result<(), EvalError> {
        let local = &self.local;
        if local.interpreter.trim().is_empty() {
            return Err(EvalError::Config(
                "local.interpreter must name a command".to_string(),
            ));
        }
        if !local.timeout_secs.is_finite() || local.timeout_secs <= 0.0 {
            return Err(EvalError::Config(format!(
                "local.timeout_secs must be a positive number, got {}",
                local.timeout_secs
            )));
        }
        if local.timing_trials == 0 {
            return Err(EvalError::Config(
                "local.timing_trials must be at least 1".to_string(),
            ));
        }
        if local.max_output_bytes == 0 {
            return Err(EvalError::Config(
                "local.max_output_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_remote(&self) -> Result<(), EvalError> {
        let remote = &self.remote;
        for (field, value) in [
            ("remote.runner_url", &remote.runner_url),
            ("remote.logs_url", &remote.logs_url),
        ] {
            if value.trim().is_empty() {
                return Err(EvalError::Config(format!(
                    "{} is required for the remote backend",
                    field
                )));
            }
            reqwest::Url::parse(value)
                .map_err(|e| EvalError::Config(format!("{} is not a valid URL: {}", field, e)))?;
        }
        for (field, value) in [
            ("remote.project", &remote.project),
            ("remote.location", &remote.location),
            ("remote.job", &remote.job),
        ] {
            if value.trim().is_empty() {
                return Err(EvalError::Config(format!(
                    "{} is required for the remote backend",
                    field
                )));
            }
        }
        if remote.log_poll_interval_secs <= 0.0 {
            return Err(EvalError::Config(
                "remote.log_poll_interval_secs must be positive".to_string(),
            ));
        }
        if remote.fetch_ceiling_secs < remote.log_poll_interval_secs {
            return Err(EvalError::Config(
                "remote.fetch_ceiling_secs must be at least one poll interval".to_string(),
            ));
        }
        for (field, value) in [
            ("remote.dispatch_spacing_secs", remote.dispatch_spacing_secs),
            ("remote.fetch_spacing_secs", remote.fetch_spacing_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EvalError::Config(format!(
                    "{} must be a non-negative number, got {}",
                    field, value
                )));
            }
        }
        Ok(())
    }
}
