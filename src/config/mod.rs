//! Configuration for the DLOG recorder
//!
//! Loaded from a TOML file; every table and field is optional and falls back
//! to the firmware defaults.
//!
//! # Example
//! ```ignore
//! let config = Config::load("recorder.toml")?;
//! let chunk = config.recorder.chunk_size;
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Engine tuning
    #[serde(default)]
    pub recorder: RecorderConfig,
    /// Firmware default recording parameters
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// Simulated channel layer used by the demo binary
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.recorder;
        if r.buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "recorder.buffer_size",
                reason: "must be positive".to_string(),
            });
        }
        if r.chunk_size == 0 || r.chunk_size > r.buffer_size {
            return Err(ConfigError::InvalidValue {
                field: "recorder.chunk_size",
                reason: format!("must be in 1..={}", r.buffer_size),
            });
        }
        if r.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "recorder.tick_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.simulator.digital_inputs > 8 {
            return Err(ConfigError::InvalidValue {
                field: "simulator.digital_inputs",
                reason: "at most 8 pins per channel".to_string(),
            });
        }
        if !(self.defaults.period > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "defaults.period",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Ring buffer, flusher and scheduling parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RecorderConfig {
    /// Circular sample buffer capacity in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Pending bytes that trigger a write without waiting for the sync interval
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum time between writes while data is pending
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Time budget of one `file_write` invocation
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Time budget of the final flush
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Periods below this are paced by the hardware module (seconds)
    #[serde(default = "default_host_period_min")]
    pub host_period_min: f64,

    /// Scheduler tick interval
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Bookmarks kept in memory for live display
    #[serde(default = "default_live_bookmarks_max")]
    pub live_bookmarks_max: usize,

    /// Capacity of the recorder task's message queue
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            chunk_size: default_chunk_size(),
            sync_interval_ms: default_sync_interval_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            flush_timeout_ms: default_flush_timeout_ms(),
            host_period_min: default_host_period_min(),
            tick_interval_ms: default_tick_interval_ms(),
            live_bookmarks_max: default_live_bookmarks_max(),
            event_queue: default_event_queue(),
        }
    }
}

impl RecorderConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn default_buffer_size() -> usize {
    128 * 1024
}
fn default_chunk_size() -> usize {
    4096
}
fn default_sync_interval_ms() -> u64 {
    10_000
}
fn default_write_timeout_ms() -> u64 {
    50
}
fn default_flush_timeout_ms() -> u64 {
    5_000
}
fn default_host_period_min() -> f64 {
    0.005
}
fn default_tick_interval_ms() -> u64 {
    1
}
fn default_live_bookmarks_max() -> usize {
    100
}
fn default_event_queue() -> usize {
    64
}

// =============================================================================
// Default Recording Parameters
// =============================================================================

/// Values restored by RESET
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    /// Sample period in seconds
    #[serde(default = "default_period")]
    pub period: f64,

    /// Total recording duration in seconds
    #[serde(default = "default_duration")]
    pub duration: f64,

    /// Directory for recordings created by the binary
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
            duration: default_duration(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_period() -> f64 {
    0.02
}
fn default_duration() -> f64 {
    60.0
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./recordings")
}

// =============================================================================
// Simulator Configuration
// =============================================================================

/// Simulated power-supply channels
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    /// Number of output channels
    #[serde(default = "default_channels")]
    pub channels: usize,

    /// Voltage setpoint of every channel (V)
    #[serde(default = "default_voltage")]
    pub voltage: f32,

    /// Load current of every channel (A)
    #[serde(default = "default_current")]
    pub current: f32,

    /// Relative standard deviation of measurement noise
    #[serde(default = "default_noise")]
    pub noise: f32,

    /// Digital input pins per channel
    #[serde(default)]
    pub digital_inputs: u8,

    /// Channel voltage limit, used for axis ranges (V)
    #[serde(default = "default_voltage_limit")]
    pub voltage_limit: f32,

    /// Channel current limit, used for axis ranges (A)
    #[serde(default = "default_current_limit")]
    pub current_limit: f32,

    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            voltage: default_voltage(),
            current: default_current(),
            noise: default_noise(),
            digital_inputs: 0,
            voltage_limit: default_voltage_limit(),
            current_limit: default_current_limit(),
            seed: None,
        }
    }
}

fn default_channels() -> usize {
    2
}
fn default_voltage() -> f32 {
    5.0
}
fn default_current() -> f32 {
    0.5
}
fn default_noise() -> f32 {
    0.01
}
fn default_voltage_limit() -> f32 {
    40.0
}
fn default_current_limit() -> f32 {
    5.0
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.recorder.buffer_size, 131072);
        assert_eq!(config.recorder.chunk_size, 4096);
        assert_eq!(config.recorder.sync_interval(), Duration::from_secs(10));
        assert_eq!(config.recorder.write_timeout(), Duration::from_millis(50));
        assert_eq!(config.recorder.host_period_min, 0.005);
        assert_eq!(config.defaults.period, 0.02);
        assert_eq!(config.defaults.duration, 60.0);
        assert_eq!(config.defaults.output_dir, PathBuf::from("./recordings"));
        assert_eq!(config.simulator.channels, 2);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[recorder]
buffer_size = 65536
chunk_size = 1024
sync_interval_ms = 500
write_timeout_ms = 20
flush_timeout_ms = 1000
host_period_min = 0.001
tick_interval_ms = 5
live_bookmarks_max = 10
event_queue = 16

[defaults]
period = 0.1
duration = 30.0
output_dir = "/data/dlog"

[simulator]
channels = 3
voltage = 12.0
current = 1.5
noise = 0.0
digital_inputs = 2
voltage_limit = 30.0
seed = 7
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.recorder.buffer_size, 65536);
        assert_eq!(config.recorder.chunk_size, 1024);
        assert_eq!(config.recorder.tick_interval(), Duration::from_millis(5));
        assert_eq!(config.recorder.flush_timeout(), Duration::from_secs(1));
        assert_eq!(config.recorder.live_bookmarks_max, 10);
        assert_eq!(config.recorder.event_queue, 16);

        assert_eq!(config.defaults.period, 0.1);
        assert_eq!(config.defaults.output_dir, PathBuf::from("/data/dlog"));

        assert_eq!(config.simulator.channels, 3);
        assert_eq!(config.simulator.digital_inputs, 2);
        assert_eq!(config.simulator.voltage_limit, 30.0);
        assert_eq!(config.simulator.current_limit, 5.0);
        assert_eq!(config.simulator.seed, Some(7));
    }

    #[test]
    fn reject_chunk_larger_than_buffer() {
        let toml = r#"
[recorder]
buffer_size = 1024
chunk_size = 4096
"#;
        let err = Config::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("recorder.chunk_size"));
    }

    #[test]
    fn reject_non_positive_period() {
        let toml = r#"
[defaults]
period = 0.0
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn reject_malformed_toml() {
        let err = Config::from_toml("[recorder\nbuffer_size = 1").unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }
}
