//! Configuration file management.
//!
//! The file path comes from `TIMEVAULT_CONFIG`; without it (or if the file
//! is missing) every section takes its defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use timevault::VaultConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TIMEVAULT_CONFIG";

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// In-process cohort settings.
    #[serde(default)]
    pub cohort: CohortConfig,
    /// What the demo run seals and opens.
    #[serde(default)]
    pub demo: DemoConfig,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
    /// Engine settings, shared by every node.
    #[serde(default)]
    pub vault: VaultConfig,
}

/// Cohort configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortConfig {
    /// Number of nodes (N).
    #[serde(default = "default_cohort_size")]
    pub size: usize,
    /// Capacity of each node's inbound channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Demo configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Message to seal (at most 29 bytes).
    #[serde(default = "default_message")]
    pub message: String,
    /// Time-to-live of the sealed message, in milliseconds.
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// Node that seals.
    #[serde(default)]
    pub sealer: u32,
    /// Node that opens. Empty = the last node.
    #[serde(default)]
    pub opener: Option<u32>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    /// `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions

fn default_cohort_size() -> usize {
    5
}

fn default_channel_capacity() -> usize {
    256
}

fn default_message() -> String {
    "Hello World!".to_string()
}

fn default_duration_ms() -> u64 {
    3_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            size: default_cohort_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            message: default_message(),
            duration_ms: default_duration_ms(),
            sealer: 0,
            opener: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl DemoConfig {
    /// The demo duration.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

impl DaemonConfig {
    /// Load configuration from the file named by [`CONFIG_ENV`].
    ///
    /// Falls back to defaults if the variable is unset or the file does not
    /// exist.
    pub fn load() -> anyhow::Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                Self::parse(&content)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> anyhow::Result<()> {
        let n = self.cohort.size;
        if n == 0 {
            anyhow::bail!("cohort.size must be positive");
        }
        if self.cohort.channel_capacity == 0 {
            anyhow::bail!("cohort.channel_capacity must be positive");
        }
        if self.demo.sealer as usize >= n {
            anyhow::bail!("demo.sealer {} outside cohort of {n}", self.demo.sealer);
        }
        if self.opener() as usize >= n {
            anyhow::bail!("demo.opener {} outside cohort of {n}", self.opener());
        }
        self.vault.validate_for(n)?;
        Ok(())
    }

    /// The node that opens the demo message.
    pub fn opener(&self) -> u32 {
        self.demo
            .opener
            .unwrap_or_else(|| self.cohort.size.saturating_sub(1) as u32)
    }

    fn config_path() -> Option<PathBuf> {
        std::env::var_os(CONFIG_ENV).map(PathBuf::from)
    }
}
