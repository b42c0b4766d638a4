//! Server models

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the orchestrator reaches a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Commands run on the orchestrator's own host
    #[default]
    Local,

    /// Commands run through the system ssh client
    Ssh,
}

/// A deploy target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub transport: Transport,

    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

impl Server {
    /// A server backed by the local host
    pub fn local(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host: "127.0.0.1".to_string(),
            port: default_ssh_port(),
            user: default_user(),
            transport: Transport::Local,
            identity_file: None,
            labels: BTreeMap::new(),
        }
    }
}
