//! Agent configuration.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::storage::DEFAULT_ENCRYPTION_SALT;

fn default_interval() -> u64 {
    60
}
fn default_batch_size() -> usize {
    50
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout() -> u64 {
    10
}
fn default_probe_timeout() -> u64 {
    5
}
fn default_max_errors() -> u32 {
    10
}
fn default_salt() -> String {
    DEFAULT_ENCRYPTION_SALT.to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Log upload endpoint.
    pub server_url: String,
    /// Agent configuration endpoint, polled while unauthorized.
    pub config_url: String,
    pub hostname: String,
    pub username: String,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    #[serde(default = "default_true")]
    pub monitor_all_users: bool,
    #[serde(default)]
    pub specific_user: Option<String>,
    pub encryption_password: String,
    #[serde(default = "default_salt")]
    pub encryption_salt: String,
    /// When false the agent sends records in the clear. Meant for lab
    /// setups only.
    #[serde(default = "default_true")]
    pub encrypt: bool,
}

impl AgentConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating config dir {}", dir.display()))?;
        }
        let raw = serde_json::to_string_pretty(self).context("serializing config")?;
        fs::write(path, raw).with_context(|| format!("writing config {}", path.display()))
    }

    /// Scope string reported to the server.
    pub fn monitoring_scope(&self) -> String {
        if self.monitor_all_users {
            "all_users".to_string()
        } else {
            format!(
                "specific_user:{}",
                self.specific_user.as_deref().unwrap_or("")
            )
        }
    }

    /// Whether telemetry about `username` is in scope.
    pub fn user_in_scope(&self, username: &str) -> bool {
        self.monitor_all_users || self.specific_user.as_deref() == Some(username)
    }
}
