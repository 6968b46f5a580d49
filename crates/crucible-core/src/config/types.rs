//! Configuration type definitions.

use serde::{Deserialize, Serialize};

use crate::sandbox::{LocalSandboxConfig, RemoteSandboxConfig};

/// Which execution backend `evaluate`/`bulk_evaluate` run against.
/// Callers of the evaluator never see the difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrucibleConfig {
    pub backend: SandboxBackend,
    /// Bulk worker-pool width. `None` means the host's available
    /// parallelism, bounded by the machine rather than literally unlimited.
    pub concurrency: Option<usize>,
    pub local: LocalSandboxConfig,
    pub remote: RemoteSandboxConfig,
}

impl Default for CrucibleConfig {
    fn default() -> Self {
        CrucibleConfig {
            backend: SandboxBackend::Local,
            concurrency: None,
            local: LocalSandboxConfig::default(),
            remote: RemoteSandboxConfig::default(),
        }
    }
}
