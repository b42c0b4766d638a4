//! Application state management

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::deploy::executor::{deploy_queue, DeployRequest, Orchestrator};
use crate::deploy::provisioner::ProvisionerFactory;
use crate::env::secrets::{FileSecretStore, SecretStore};
use crate::errors::OrchestratorError;
use crate::registry::servers::ServerRegistry;
use crate::storage::json::JsonStore;
use crate::storage::store::Store;

/// Main application state
pub struct AppState {
    pub version: String,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Open the stores, register servers and build the orchestrator.
    ///
    /// Returns the receiving end of the deploy queue for the deployer worker.
    pub async fn init(
        version: String,
        options: &AppOptions,
    ) -> Result<(Self, mpsc::Receiver<DeployRequest>), OrchestratorError> {
        info!("Initializing application state...");

        options.storage.layout.setup().await?;
        let store: Arc<dyn Store> = Arc::new(JsonStore::new(&options.storage.data_dir));
        let secrets: Arc<dyn SecretStore> = Arc::new(FileSecretStore::new(
            options.storage.layout.secrets_file().path(),
        ));

        let registry = Arc::new(ServerRegistry::new(options.registry.clone()));
        for server in &options.servers {
            store.save_server(server).await?;
        }
        for server in store.list_servers().await? {
            registry.register(server);
        }
        if registry.list().is_empty() {
            warn!("No servers registered, resources cannot be deployed");
        }

        let provisioners = Arc::new(ProvisionerFactory::new(
            options.provisioning.clone(),
            secrets.clone(),
        ));

        let (queue_tx, queue_rx) = deploy_queue();
        let orchestrator = Orchestrator::new(
            store,
            secrets,
            registry,
            provisioners,
            options.tracker.clone(),
        )
        .with_queue(queue_tx);

        let state = Self {
            version,
            orchestrator: Arc::new(orchestrator),
        };
        Ok((state, queue_rx))
    }
}
