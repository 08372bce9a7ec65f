use crate::orchestrator::LaunchTimings;
use crate::status::{RecapturePolicy, DEFAULT_DASHBOARD_APP_NAME};
use crate::utils;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DASHBOARD_URL: &str = "https://home-assistant.io";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Verbose logging
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardConfig {
    /// Page shown on the device while it is otherwise idle
    #[serde(default = "default_dashboard_url")]
    pub url: String,
    /// Display name the receiver reports while the dashboard app runs
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

fn default_dashboard_url() -> String {
    DEFAULT_DASHBOARD_URL.to_string()
}

fn default_app_name() -> String {
    DEFAULT_DASHBOARD_APP_NAME.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Friendly name or id of the device to control (first found when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Disregard HDMI-CEC standby/active-input reports from this device
    #[serde(default)]
    pub ignore_cec: bool,
    /// Models that fall back to their ambient screen while still reporting
    /// the dashboard, and so need a timed relaunch
    #[serde(default = "default_recapture_models")]
    pub recapture_models: Vec<String>,
}

fn default_recapture_models() -> Vec<String> {
    vec!["Google Nest Hub".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_mute_settle_ms")]
    pub mute_settle_ms: u64,
    #[serde(default = "default_unmute_delay_ms")]
    pub unmute_delay_ms: u64,
    #[serde(default = "default_recapture_timeout_secs")]
    pub recapture_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_mute_settle_ms() -> u64 {
    1000
}

fn default_unmute_delay_ms() -> u64 {
    5000
}

fn default_recapture_timeout_secs() -> u64 {
    600
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            url: default_dashboard_url(),
            app_name: default_app_name(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            display_name: None,
            ignore_cec: false,
            recapture_models: default_recapture_models(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            mute_settle_ms: default_mute_settle_ms(),
            unmute_delay_ms: default_unmute_delay_ms(),
            recapture_timeout_secs: default_recapture_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Values given on the command line; `None`/`false` leaves the config alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub device: Option<String>,
    pub ignore_cec: bool,
    pub debug: bool,
}

impl Config {
    /// Return the path to the configuration file.
    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("com", "mrmattias", "dashcast")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Load config from the default location. A missing file means defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Config::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&data)
            .with_context(|| format!("Invalid TOML config at {}", path.display()))
    }

    /// Resolve the effective configuration: file, then environment, then
    /// command line.
    pub fn resolve(path: Option<&str>, overrides: &Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(&utils::expand_tilde(path))?,
            None => Self::load()?,
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.apply_overrides(overrides);
        Ok(config)
    }

    /// Apply `DASHBOARD_URL`, `DISPLAY_NAME` and `IGNORE_CEC`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DASHBOARD_URL").filter(|v| !v.trim().is_empty()) {
            self.dashboard.url = url.trim().to_string();
        }
        if let Some(name) = lookup("DISPLAY_NAME").filter(|v| !v.trim().is_empty()) {
            self.device.display_name = Some(name.trim().to_string());
        }
        if let Some(flag) = lookup("IGNORE_CEC") {
            self.device.ignore_cec = utils::env_flag(&flag);
        }
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(url) = &overrides.url {
            self.dashboard.url = url.clone();
        }
        if let Some(device) = &overrides.device {
            self.device.display_name = Some(device.clone());
        }
        if overrides.ignore_cec {
            self.device.ignore_cec = true;
        }
        if overrides.debug {
            self.debug = true;
        }
    }

    /// Save config to file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = toml::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn launch_timings(&self) -> LaunchTimings {
        LaunchTimings {
            mute_settle: Duration::from_millis(self.timing.mute_settle_ms),
            unmute_delay: Duration::from_millis(self.timing.unmute_delay_ms),
            recapture_timeout: Duration::from_secs(self.timing.recapture_timeout_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.timing.poll_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timing.connect_timeout_secs.max(1))
    }

    pub fn recapture_policy(&self) -> RecapturePolicy {
        RecapturePolicy::new(self.device.recapture_models.clone())
    }
}
