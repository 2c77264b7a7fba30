//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field carries a default, so an empty file (or no file at all) yields a
//! working configuration that uploads `./data/*.txt` every 60 seconds.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, UplinkError};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub uploader: UploaderConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub shadow: ShadowConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Record queue location
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_queue_dir")]
    pub dir: String,

    #[serde(default = "default_queue_extension")]
    pub extension: String,
}

/// Upload worker pacing
#[derive(Debug, Deserialize, Clone)]
pub struct UploaderConfig {
    /// Sleep between two scans of the queue
    #[serde(default = "default_scan_period_s")]
    pub scan_period_s: u64,

    /// Minimum spacing between two submissions
    #[serde(default = "default_cooldown_s")]
    pub cooldown_s: u64,
}

/// Supervisor polling
#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorConfig {
    #[serde(default = "default_poll_interval_s")]
    pub poll_interval_s: u64,
}

/// Reachability probe target
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectivityConfig {
    #[serde(default = "default_probe_host")]
    pub host: String,

    #[serde(default = "default_probe_port")]
    pub port: u16,

    #[serde(default = "default_probe_timeout_s")]
    pub timeout_s: u64,
}

/// Device shadow endpoint
#[derive(Debug, Deserialize, Clone)]
pub struct ShadowConfig {
    #[serde(default = "default_shadow_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_thing_name")]
    pub thing_name: String,

    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: u64,

    #[serde(default = "default_operation_timeout_s")]
    pub operation_timeout_s: u64,
}

/// Log output
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_file")]
    pub file: String,

    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_queue_dir() -> String { "./data".to_string() }
fn default_queue_extension() -> String { "txt".to_string() }

fn default_scan_period_s() -> u64 { 60 }
fn default_cooldown_s() -> u64 { 5 }

fn default_poll_interval_s() -> u64 { 10 }

fn default_probe_host() -> String { "www.google.com".to_string() }
fn default_probe_port() -> u16 { 80 }
fn default_probe_timeout_s() -> u64 { 5 }

fn default_shadow_endpoint() -> String { "127.0.0.1:8883".to_string() }
fn default_client_id() -> String { "myShadowClient".to_string() }
fn default_thing_name() -> String { "RPi_3Bplus_WPB_test".to_string() }
fn default_connect_timeout_s() -> u64 { 10 }
fn default_operation_timeout_s() -> u64 { 5 }

fn default_log_file() -> String { "transmit.log".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dir: default_queue_dir(),
            extension: default_queue_extension(),
        }
    }
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            scan_period_s: default_scan_period_s(),
            cooldown_s: default_cooldown_s(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_s: default_poll_interval_s(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            host: default_probe_host(),
            port: default_probe_port(),
            timeout_s: default_probe_timeout_s(),
        }
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            endpoint: default_shadow_endpoint(),
            client_id: default_client_id(),
            thing_name: default_thing_name(),
            connect_timeout_s: default_connect_timeout_s(),
            operation_timeout_s: default_operation_timeout_s(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            level: default_log_level(),
        }
    }
}

impl UploaderConfig {
    pub fn scan_period(&self) -> Duration {
        Duration::from_secs(self.scan_period_s)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_s)
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_s)
    }
}

impl ConnectivityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }
}

impl ShadowConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_s)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_s)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use shadow_uplink::config::Config;
    ///
    /// let config = Config::load("shadow-uplink.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path` if it exists, otherwise use defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("queue.dir", &self.queue.dir),
            ("queue.extension", &self.queue.extension),
            ("connectivity.host", &self.connectivity.host),
            ("shadow.endpoint", &self.shadow.endpoint),
            ("shadow.client_id", &self.shadow.client_id),
            ("shadow.thing_name", &self.shadow.thing_name),
            ("logging.level", &self.logging.level),
        ] {
            if value.is_empty() {
                return Err(invalid(format!("{} cannot be empty", name)));
            }
        }

        // scan_period_s = 0 is allowed: rescan immediately after a pass
        if self.uploader.cooldown_s == 0 || self.uploader.cooldown_s > 60 {
            return Err(invalid("cooldown_s must be between 1 and 60"));
        }

        for (name, value) in [
            ("poll_interval_s", self.supervisor.poll_interval_s),
            ("connectivity.timeout_s", self.connectivity.timeout_s),
            ("shadow.connect_timeout_s", self.shadow.connect_timeout_s),
            ("shadow.operation_timeout_s", self.shadow.operation_timeout_s),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be greater than 0", name)));
            }
        }

        if self.connectivity.port == 0 {
            return Err(invalid("connectivity.port must be greater than 0"));
        }

        if self.queue.extension.starts_with('.') {
            return Err(invalid("queue.extension must not start with '.'"));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> UplinkError {
    UplinkError::Config(toml::de::Error::custom(msg))
}
