//! Managed database provisioner

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::deploy::docker::{self, Docker, RunSpec};
use crate::deploy::provisioner::{base_handle, conclude, ProvisionSettings, Provisioner};
use crate::env::injector::EffectiveEnv;
use crate::env::secrets::SecretStore;
use crate::errors::{ProvisionError, TeardownError};
use crate::models::environment::SecretSlot;
use crate::models::resource::{DatabaseEngine, DatabaseSpec, Resource, ResourceKind};
use crate::models::server::Server;
use crate::models::workload::{Health, ProvisionHandle, ProvisionerKind, SubResource, TeardownReport};
use crate::registry::target::RemoteTarget;
use crate::utils::generate_password;

/// How an engine's official image is run
struct EngineProfile {
    image: &'static str,
    port: u16,
    data_dir: &'static str,
    health_cmd: &'static str,
}

fn profile(engine: DatabaseEngine) -> EngineProfile {
    match engine {
        DatabaseEngine::Postgres => EngineProfile {
            image: "postgres:16",
            port: 5432,
            data_dir: "/var/lib/postgresql/data",
            health_cmd: "pg_isready -U postgres",
        },
        DatabaseEngine::Mysql => EngineProfile {
            image: "mysql:8",
            port: 3306,
            data_dir: "/var/lib/mysql",
            health_cmd: "mysqladmin ping -h 127.0.0.1 --silent",
        },
        DatabaseEngine::Mongodb => EngineProfile {
            image: "mongo:7",
            port: 27017,
            data_dir: "/data/db",
            health_cmd: "mongosh --quiet --eval 'db.runCommand({ ping: 1 }).ok'",
        },
    }
}

/// Engine environment conventions for the official images
fn engine_env(spec: &DatabaseSpec, password: &str) -> Vec<(&'static str, String)> {
    let database = spec
        .initial_database
        .clone()
        .unwrap_or_else(|| spec.database_name.clone());
    match spec.engine {
        DatabaseEngine::Postgres => vec![
            ("POSTGRES_PASSWORD", password.to_string()),
            ("POSTGRES_DB", database),
        ],
        DatabaseEngine::Mysql => vec![
            ("MYSQL_ROOT_PASSWORD", password.to_string()),
            ("MYSQL_DATABASE", database),
        ],
        DatabaseEngine::Mongodb => vec![
            ("MONGO_INITDB_ROOT_USERNAME", "admin".to_string()),
            ("MONGO_INITDB_ROOT_PASSWORD", password.to_string()),
            ("MONGO_INITDB_DATABASE", database),
        ],
    }
}

fn database_spec(resource: &Resource) -> Result<&DatabaseSpec, ProvisionError> {
    match &resource.kind {
        ResourceKind::Database(spec) => Ok(spec),
        other => Err(ProvisionError::Config(format!(
            "{} resource is not a database",
            other.type_name()
        ))),
    }
}

/// Runs a database engine in a container with a named data volume
pub struct DatabaseProvisioner {
    settings: ProvisionSettings,
    secrets: Arc<dyn SecretStore>,
}

impl DatabaseProvisioner {
    pub fn new(settings: ProvisionSettings, secrets: Arc<dyn SecretStore>) -> Self {
        Self { settings, secrets }
    }
}

#[async_trait]
impl Provisioner for DatabaseProvisioner {
    fn kind(&self) -> ProvisionerKind {
        ProvisionerKind::Database
    }

    /// Generate and store a password when the definition has none
    async fn prepare(&self, resource: &mut Resource) -> Result<bool, ProvisionError> {
        let ResourceKind::Database(spec) = &mut resource.kind else {
            return Ok(false);
        };
        if spec.password.is_some() {
            return Ok(false);
        }

        let password = SecretString::from(generate_password());
        let reference = self
            .secrets
            .put(&password)
            .await
            .map_err(|e| ProvisionError::Secret(e.to_string()))?;
        spec.password = Some(SecretSlot::Sealed(reference));
        info!("Generated database password for resource {}", resource.id);
        Ok(true)
    }

    async fn provision(
        &self,
        resource: &Resource,
        server: &Server,
        target: &dyn RemoteTarget,
        env: &EffectiveEnv,
    ) -> Result<ProvisionHandle, ProvisionError> {
        let spec = database_spec(resource)?;
        let password = env.database_password().ok_or_else(|| {
            ProvisionError::Secret("database password was not resolved".to_string())
        })?;
        let engine = profile(spec.engine);
        let docker = Docker::new(target);
        let mut handle = self.planned_handle(resource, server);

        if docker
            .adopt_or_clear(&handle.workload, &handle.fingerprint)
            .await?
        {
            handle.adopted = true;
            return Ok(handle);
        }

        docker.pull(engine.image).await?;

        let mut run = RunSpec::new(&handle.workload, engine.image)
            .owned_by(&resource.id, &handle.fingerprint);
        run.labels
            .push((docker::LABEL_ADMIN_EMAIL.to_string(), spec.admin_email.clone()));
        run.volumes
            .push((docker::volume_name(&resource.id), engine.data_dir.to_string()));
        run.health_cmd = Some(engine.health_cmd.to_string());
        if let Some(port) = resource.port {
            run.ports.push((port, engine.port));
        }

        let env_file = docker::env_file_with(env, &engine_env(spec, password.expose_secret()))?;
        docker
            .run(&run, &self.settings.env_file(&resource.id), &env_file)
            .await?;

        info!(
            "Database {} ({}) running as {}",
            spec.database_name, engine.image, handle.workload
        );
        Ok(handle)
    }

    async fn teardown(
        &self,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
    ) -> Result<TeardownReport, TeardownError> {
        let docker = Docker::new(target);
        let mut report = TeardownReport::new();
        docker::record(
            &mut report,
            SubResource::Container,
            docker.remove_container(&handle.workload).await,
        );
        if let Some(volume) = &handle.volume {
            docker::record(
                &mut report,
                SubResource::Volume,
                docker.remove_volume(volume).await,
            );
        }
        conclude(report)
    }

    async fn health_check(
        &self,
        handle: &ProvisionHandle,
        target: &dyn RemoteTarget,
        timeout: Duration,
    ) -> Health {
        Docker::new(target)
            .health(&handle.workload, None, timeout)
            .await
    }

    fn planned_handle(&self, resource: &Resource, server: &Server) -> ProvisionHandle {
        let mut handle = base_handle(ProvisionerKind::Database, resource, server);
        handle.volume = Some(docker::volume_name(&resource.id));
        handle.image = database_spec(resource)
            .ok()
            .map(|spec| profile(spec.engine).image.to_string());
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::secrets::MemorySecretStore;

    fn database(password: Option<SecretSlot>) -> Resource {
        Resource::new(
            "db1",
            "main-db",
            "p1",
            "s1",
            ResourceKind::Database(DatabaseSpec {
                engine: DatabaseEngine::Postgres,
                database_name: "app".to_string(),
                admin_email: "ops@acme.io".to_string(),
                initial_database: None,
                password,
            }),
        )
    }

    #[tokio::test]
    async fn test_prepare_generates_and_stores_password_once() {
        let store = Arc::new(MemorySecretStore::new());
        let provisioner = DatabaseProvisioner::new(ProvisionSettings::default(), store.clone());
        let mut resource = database(None);

        assert!(provisioner.prepare(&mut resource).await.unwrap());
        assert_eq!(store.len(), 1);
        let fingerprint = resource.definition_fingerprint();

        assert!(!provisioner.prepare(&mut resource).await.unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(resource.definition_fingerprint(), fingerprint);

        let ResourceKind::Database(spec) = &resource.kind else {
            panic!("not a database");
        };
        let reference = spec.password.as_ref().and_then(|s| s.sealed_ref()).unwrap();
        assert_eq!(store.get(reference).await.unwrap().expose_secret().len(), 43);
    }

    #[test]
    fn test_engine_env_conventions() {
        let resource = database(None);
        let spec = database_spec(&resource).unwrap();
        let env = engine_env(spec, "pw");
        assert!(env.contains(&("POSTGRES_PASSWORD", "pw".to_string())));
        assert!(env.contains(&("POSTGRES_DB", "app".to_string())));
    }

    #[test]
    fn test_planned_handle_names_volume() {
        let provisioner =
            DatabaseProvisioner::new(ProvisionSettings::default(), Arc::new(MemorySecretStore::new()));
        let handle = provisioner.planned_handle(&database(None), &Server::local("s1", "edge"));
        assert_eq!(handle.workload, "orc-db1");
        assert_eq!(handle.volume.as_deref(), Some("orc-db1-data"));
        assert_eq!(handle.endpoint, None);
    }
}
