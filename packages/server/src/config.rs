use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_NAME: &str = "collab.config.json";

/// Manager configuration file format
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagerConfig {
    /// Upper bound on live document instances
    pub max_instances: usize,

    /// Period of the idle-instance sweep; 0 disables it
    pub instance_cleanup_interval_ms: u64,

    /// Longest a pull request is held open waiting for new steps
    pub user_wait_timeout_ms: u64,

    /// How long a user counts as connected after its last request
    pub collect_users_timeout_ms: u64,

    /// Debounce window for incremental saves
    pub save_debounce_ms: u64,

    /// Steps retained per instance for rebasing and pulls
    pub max_step_history: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_instances: 20,
            instance_cleanup_interval_ms: 10_000,
            user_wait_timeout_ms: 7_000,
            collect_users_timeout_ms: 5_000,
            save_debounce_ms: 1_000,
            max_step_history: 1_000,
        }
    }
}

impl ManagerConfig {
    /// Load config from a file, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ManagerConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(ManagerConfig::default())
        }
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.instance_cleanup_interval_ms > 0)
            .then(|| Duration::from_millis(self.instance_cleanup_interval_ms))
    }

    pub fn user_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.user_wait_timeout_ms)
    }

    pub fn collect_users_timeout(&self) -> Duration {
        Duration::from_millis(self.collect_users_timeout_ms)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}
