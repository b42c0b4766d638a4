//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::fsm::{HealthPolicy, TrackerSettings};
use crate::deploy::provisioner::ProvisionSettings;
use crate::models::server::Server;
use crate::registry::servers;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::health;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Enable local HTTP API
    pub enable_api: bool,

    /// HTTP API configuration
    pub server: ServerOptions,

    /// Enable the periodic health worker
    pub enable_health_worker: bool,

    pub health_worker: health::Options,

    /// Timeouts and health retry budget
    pub tracker: TrackerSettings,

    pub provisioning: ProvisionSettings,

    pub registry: servers::Options,

    /// Servers registered at startup, on top of the stored ones
    pub servers: Vec<Server>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            enable_api: true,
            server: ServerOptions::default(),
            enable_health_worker: true,
            health_worker: health::Options::default(),
            tracker: TrackerSettings::default(),
            provisioning: ProvisionSettings::default(),
            registry: servers::Options::default(),
            servers: Vec::new(),
        }
    }
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let data_dir = settings
            .data_dir
            .clone()
            .unwrap_or_else(|| layout.data_dir().path().to_path_buf());

        Self {
            storage: StorageOptions { layout, data_dir },
            enable_api: settings.api.enabled,
            server: ServerOptions {
                host: settings.api.host.clone(),
                port: settings.api.port,
            },
            health_worker: health::Options {
                interval: Duration::from_secs(settings.health.interval_secs),
                jitter: Duration::from_secs(settings.health.jitter_secs),
            },
            tracker: TrackerSettings {
                provision_timeout: Duration::from_secs(settings.provisioning.timeout_secs),
                teardown_timeout: Duration::from_secs(settings.provisioning.teardown_timeout_secs),
                health: HealthPolicy {
                    attempts: settings.health.attempts,
                    base_delay: Duration::from_secs(settings.health.base_delay_secs),
                    probe_timeout: Duration::from_secs(settings.health.probe_timeout_secs),
                },
            },
            provisioning: ProvisionSettings {
                build_dir: settings.provisioning.build_dir.clone(),
                ..Default::default()
            },
            servers: settings.servers.clone(),
            ..Default::default()
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Directory of the JSON record store
    pub data_dir: PathBuf,
}

impl Default for StorageOptions {
    fn default() -> Self {
        let layout = StorageLayout::default();
        let data_dir = layout.data_dir().path().to_path_buf();
        Self { layout, data_dir }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}
