//! Simulator configuration management

use anyhow::{Context, Result, anyhow};
use bridge::BridgeConfig;
use protocol::{ChannelId, MAX_CHANNELS};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub driver: DriverSettings,
    /// Channels opened in the host domain before the drivers start
    #[serde(default = "SimConfig::default_channels")]
    pub channels: Vec<ChannelSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

/// Simulated driver threads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Number of driver threads
    #[serde(default = "DriverSettings::default_threads")]
    pub threads: usize,
    /// Events fired by each driver thread
    #[serde(default = "DriverSettings::default_events")]
    pub events_per_thread: u64,
    /// Submit a faulting callback every N events (0 = never)
    #[serde(default)]
    pub fault_every: u64,
    /// Fraction of events addressed to a channel that is not open
    #[serde(default = "DriverSettings::default_unknown_ratio")]
    pub unknown_channel_ratio: f64,
    /// Pause between events on one driver thread
    #[serde(default)]
    pub event_interval_ms: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            threads: Self::default_threads(),
            events_per_thread: Self::default_events(),
            fault_every: 0,
            unknown_channel_ratio: Self::default_unknown_ratio(),
            event_interval_ms: 0,
        }
    }
}

impl DriverSettings {
    fn default_threads() -> usize {
        4
    }

    fn default_events() -> u64 {
        100
    }

    fn default_unknown_ratio() -> f64 {
        0.05
    }
}

/// How a channel's events are handled in the host domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    /// Log every event by kind
    #[default]
    Logging,
    /// Only count events
    Counting,
}

/// One channel to open
///
/// # Example Configuration
/// ```toml
/// [[channels]]
/// number = 0
/// handler = "logging"
///
/// [[channels]]
/// number = 3
/// handler = "counting"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub number: u8,
    #[serde(default)]
    pub handler: HandlerKind,
}

impl ChannelSettings {
    pub fn id(&self) -> ChannelId {
        ChannelId(self.number)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            bridge: BridgeConfig::default(),
            driver: DriverSettings::default(),
            channels: Self::default_channels(),
        }
    }
}

impl SimConfig {
    fn default_channels() -> Vec<ChannelSettings> {
        vec![
            ChannelSettings {
                number: 0,
                handler: HandlerKind::Logging,
            },
            ChannelSettings {
                number: 1,
                handler: HandlerKind::Counting,
            },
        ]
    }

    /// Load configuration from the specified path, or the default location
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Some(Self::default_path())
                .filter(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?,
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("ant-bridge").join("sim.toml")
        } else {
            PathBuf::from(".config/ant-bridge/sim.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        self.bridge.validate().context("Invalid [bridge] settings")?;

        if self.driver.threads == 0 {
            return Err(anyhow!("driver.threads must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.driver.unknown_channel_ratio) {
            return Err(anyhow!(
                "driver.unknown_channel_ratio must be between 0.0 and 1.0, got {}",
                self.driver.unknown_channel_ratio
            ));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.number >= MAX_CHANNELS {
                return Err(anyhow!(
                    "Invalid channel {}, must be below {}",
                    channel.number,
                    MAX_CHANNELS
                ));
            }
            if !seen.insert(channel.number) {
                return Err(anyhow!("Channel {} is configured twice", channel.number));
            }
        }

        Ok(())
    }
}
