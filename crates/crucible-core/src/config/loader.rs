//! Loading configuration from YAML.

use std::path::Path;

use crate::config::types::CrucibleConfig;
use crate::errors::EvalError;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Read, parse and validate a YAML config file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<CrucibleConfig, EvalError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            EvalError::Config(format!(
                "failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config = Self::from_yaml(&raw)?;
        log::debug!("loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<CrucibleConfig, EvalError> {
        let config: CrucibleConfig = serde_yaml::from_str(raw)
            .map_err(|e| EvalError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
