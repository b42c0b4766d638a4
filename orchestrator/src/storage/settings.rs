//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;
use crate::models::server::Server;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Also write daily rolling log files into the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Record directory, defaults to `<base_dir>/data`
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub provisioning: ProvisioningSettings,

    /// Servers registered at startup
    #[serde(default)]
    pub servers: Vec<Server>,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            log_to_file: false,
            data_dir: None,
            api: ApiSettings::default(),
            health: HealthSettings::default(),
            provisioning: ProvisioningSettings::default(),
            servers: Vec::new(),
        }
    }
}

/// Local HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8787
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

/// Health cycle and retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound of the random delay before each probe
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,

    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_jitter_secs() -> u64 {
    5
}

fn default_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    2
}

fn default_probe_timeout_secs() -> u64 {
    10
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            jitter_secs: default_jitter_secs(),
            attempts: default_attempts(),
            base_delay_secs: default_base_delay_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Provisioning timeouts and target paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningSettings {
    #[serde(default = "default_provision_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_teardown_timeout_secs")]
    pub teardown_timeout_secs: u64,

    /// Build directory on deploy targets
    #[serde(default = "default_build_dir")]
    pub build_dir: String,
}

fn default_provision_timeout_secs() -> u64 {
    300
}

fn default_teardown_timeout_secs() -> u64 {
    60
}

fn default_build_dir() -> String {
    "/var/lib/orchestrator/builds".to_string()
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_provision_timeout_secs(),
            teardown_timeout_secs: default_teardown_timeout_secs(),
            build_dir: default_build_dir(),
        }
    }
}
