//! Configuration for the evaluation harness.
//!
//! A single YAML document selects the sandbox backend and carries every
//! tunable for both backends plus the bulk worker-pool width. Defaults
//! reproduce the production constants (10 s local timeout, 3 timing
//! trials, 5 s log poll, 10 min fetch ceiling, 2 s dispatch/fetch
//! spacing), so an empty config file is a working local setup.

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::*;
pub use types::*;

#[cfg(test)]
mod tests;

use std::path::Path;

use crate::errors::EvalError;

/// Load and validate a configuration from a YAML file.
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<CrucibleConfig, EvalError> {
    ConfigLoader::from_file(path).await
}
