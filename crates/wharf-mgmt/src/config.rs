use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use wharf_meta::{MigrationSettings, SplitPolicy};

/// Broker process configuration, loadable from TOML or JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Address the control-plane API listens on
    pub bind_addr: SocketAddr,
    /// Snapshot file for persisted metadata; in-memory only when unset
    pub snapshot_path: Option<PathBuf>,
    /// Delay between migration transfer checkpoints, in milliseconds
    pub migration_tick_ms: u64,
    /// Number of checkpoints before a migration commits
    pub migration_steps: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7799)),
            snapshot_path: None,
            migration_tick_ms: 200,
            migration_steps: 10,
        }
    }
}

impl BrokerConfig {
    /// Loads configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: BrokerConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: BrokerConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Migration tuning derived from this configuration.
    pub fn migration_settings(&self) -> MigrationSettings {
        MigrationSettings {
            tick: Duration::from_millis(self.migration_tick_ms),
            steps: self.migration_steps.max(1),
            split: SplitPolicy::Midpoint,
        }
    }
}
