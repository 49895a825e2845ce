//! On-disk configuration
//!
//! A YAML file mirroring the serve flags plus an inline chaos block. CLI
//! flags always win over file values.

use anyhow::Context;
use devtap_chaos::ChaosConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The devtap config file model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevtapConfig {
    /// Address the proxy listens on
    pub listen: Option<String>,
    /// Upstream origin requests are relayed to
    pub upstream: Option<String>,
    /// Overlay sidecar base URL
    pub overlay: Option<String>,
    /// Preset applied at startup (overridden by an inline chaos block)
    pub preset: Option<String>,
    /// Traffic log ring capacity
    pub max_log_entries: Option<usize>,
    /// Page sessions retained before LRU eviction
    pub max_sessions: Option<usize>,
    /// Session inactivity window in seconds
    pub session_timeout_secs: Option<u64>,
    /// Splice the instrumentation script into HTML documents
    pub inject_script: Option<bool>,
    /// Inline chaos configuration
    pub chaos: Option<ChaosConfig>,
}

impl DevtapConfig {
    /// Load and parse a YAML config file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))
    }
}
