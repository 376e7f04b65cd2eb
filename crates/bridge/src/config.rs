//! Sync configuration
//!
//! Stored as TOML. A missing file means defaults; every loaded or edited
//! config is validated before use.

use anyhow::{bail, Context, Result};
use queue::{QueueConfig, DEFAULT_BUSY_DEPTH};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vfs_core::ResourceKey;
use watcher::IgnoreConfig;

/// Keys accepted by [`SyncConfig::get`] and [`SyncConfig::set`]
pub const CONFIG_KEYS: &[&str] = &[
    "sync.debounce_ms",
    "sync.commit_message",
    "queue.busy_delay_ms",
    "queue.busy_depth",
    "ignore.use_gitignore",
    "ignore.patterns",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub sync: SyncSection,
    pub queue: QueueSection,
    pub ignore: IgnoreConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Quiet window before an edited file is committed
    pub debounce_ms: u64,
    /// Commit message; `{path}` is replaced with the file's key
    pub commit_message: String,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            commit_message: "Update {path}".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// How long a drain session runs before it is reported busy
    pub busy_delay_ms: u64,
    /// Waiting tasks that report busy immediately
    pub busy_depth: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            busy_delay_ms: 2000,
            busy_depth: DEFAULT_BUSY_DEPTH,
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.sync.debounce_ms)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            busy_delay: Duration::from_millis(self.queue.busy_delay_ms),
            busy_depth: self.queue.busy_depth,
        }
    }

    /// Render the commit message for `key`
    pub fn commit_message(&self, key: &ResourceKey) -> String {
        self.sync.commit_message.replace("{path}", key.as_str())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(10..=60_000).contains(&self.sync.debounce_ms) {
            bail!("sync.debounce_ms must be between 10 and 60000");
        }
        if self.sync.commit_message.trim().is_empty() {
            bail!("sync.commit_message must not be empty");
        }
        if !(100..=60_000).contains(&self.queue.busy_delay_ms) {
            bail!("queue.busy_delay_ms must be between 100 and 60000");
        }
        if !(1..=1000).contains(&self.queue.busy_depth) {
            bail!("queue.busy_depth must be between 1 and 1000");
        }
        Ok(())
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate().context("Refusing to save invalid configuration")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Default configuration as TOML
    pub fn example() -> Result<String> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Read one value by dotted key
    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "sync.debounce_ms" => self.sync.debounce_ms.to_string(),
            "sync.commit_message" => self.sync.commit_message.clone(),
            "queue.busy_delay_ms" => self.queue.busy_delay_ms.to_string(),
            "queue.busy_depth" => self.queue.busy_depth.to_string(),
            "ignore.use_gitignore" => self.ignore.use_gitignore.to_string(),
            "ignore.patterns" => self.ignore.patterns.join(","),
            _ => bail!("Unknown config key: {}", key),
        };
        Ok(value)
    }

    /// Set one value by dotted key, then validate
    ///
    /// `ignore.patterns` takes a comma-separated list.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "sync.debounce_ms" => {
                self.sync.debounce_ms = value
                    .parse()
                    .context("Invalid value: must be a positive integer")?;
            }
            "sync.commit_message" => self.sync.commit_message = value.to_string(),
            "queue.busy_delay_ms" => {
                self.queue.busy_delay_ms = value
                    .parse()
                    .context("Invalid value: must be a positive integer")?;
            }
            "queue.busy_depth" => {
                self.queue.busy_depth = value
                    .parse()
                    .context("Invalid value: must be a positive integer")?;
            }
            "ignore.use_gitignore" => {
                self.ignore.use_gitignore = value
                    .parse()
                    .context("Invalid value: must be 'true' or 'false'")?;
            }
            "ignore.patterns" => {
                self.ignore.patterns = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => bail!("Unknown config key: {}", key),
        }
        self.validate().context("Invalid configuration value")
    }
}
