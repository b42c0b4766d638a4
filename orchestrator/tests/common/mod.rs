//! Shared fakes for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use orchestrator::deploy::executor::Orchestrator;
use orchestrator::deploy::fsm::{HealthPolicy, TrackerSettings};
use orchestrator::deploy::provisioner::{
    base_handle, conclude, Provisioner, SelectProvisioner,
};
use orchestrator::env::injector::EffectiveEnv;
use orchestrator::env::secrets::MemorySecretStore;
use orchestrator::errors::{ProvisionError, TargetError, TeardownError};
use orchestrator::models::definition::{ResourceDefinition, VariableDefinition};
use orchestrator::models::project::Project;
use orchestrator::models::resource::Resource;
use orchestrator::models::server::Server;
use orchestrator::models::workload::{
    Health, ProvisionHandle, ProvisionerKind, SubResource, TeardownReport,
};
use orchestrator::registry::servers::ServerRegistry;
use orchestrator::registry::target::{ExecOutput, RemoteCommand, RemoteTarget};
use orchestrator::storage::memory::MemoryStore;
use orchestrator::storage::store::Store;

pub const PROJECT_ID: &str = "proj-1";
pub const SERVER_ID: &str = "srv-1";

/// Docker's answer for a container that does not exist
pub fn missing() -> ExecOutput {
    ExecOutput::failed(1, "Error: No such object: orc-x")
}

// ================================ SCRIPTED TARGET ================================ //

struct Rule {
    pattern: String,
    responses: VecDeque<ExecOutput>,
}

#[derive(Debug, Clone)]
pub struct WrittenFile {
    pub path: String,
    pub contents: String,
    pub mode: u32,
}

/// Remote target answering commands from a script.
///
/// The first rule whose pattern occurs in the rendered command answers it.
/// A rule replays its responses in order and repeats the last one; commands
/// matching no rule succeed with empty output.
#[derive(Default)]
pub struct ScriptedTarget {
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
    files: Mutex<Vec<WrittenFile>>,
}

impl ScriptedTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, responses: Vec<ExecOutput>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            responses: responses.into(),
        });
        self
    }

    /// Add a rule ahead of the existing ones, for answers known only after setup
    pub fn script(&self, pattern: &str, responses: Vec<ExecOutput>) {
        self.rules.lock().unwrap().insert(
            0,
            Rule {
                pattern: pattern.to_string(),
                responses: responses.into(),
            },
        );
    }

    /// Position of the first command containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }

    pub fn files(&self) -> Vec<WrittenFile> {
        self.files.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteTarget for ScriptedTarget {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn exec(&self, command: &RemoteCommand) -> Result<ExecOutput, TargetError> {
        let line = command.to_shell();
        self.commands.lock().unwrap().push(line.clone());

        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules.iter_mut().find(|r| line.contains(&r.pattern)) else {
            return Ok(ExecOutput::ok(""));
        };
        let output = if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            rule.responses.front().cloned()
        };
        Ok(output.unwrap_or_default())
    }

    async fn write_file(
        &self,
        path: &str,
        contents: &SecretString,
        mode: u32,
    ) -> Result<(), TargetError> {
        self.files.lock().unwrap().push(WrittenFile {
            path: path.to_string(),
            contents: contents.expose_secret().to_string(),
            mode,
        });
        Ok(())
    }

    async fn health_check(&self, _endpoint: &str, _timeout: Duration) -> Health {
        Health::Up
    }
}

// =============================== FAKE PROVISIONER ================================ //

/// Provisioner with scripted outcomes that counts what it was asked to do
pub struct FakeProvisioner {
    delay: Mutex<Duration>,
    failure: Mutex<Option<ProvisionError>>,
    echo_env: AtomicBool,
    health: Mutex<VecDeque<Health>>,
    default_health: Mutex<Health>,
    retain_volume: Mutex<Option<String>>,
    provisions: AtomicUsize,
    probes: AtomicUsize,
    torn_down: Mutex<Vec<ProvisionHandle>>,
}

impl FakeProvisioner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delay: Mutex::new(Duration::ZERO),
            failure: Mutex::new(None),
            echo_env: AtomicBool::new(false),
            health: Mutex::new(VecDeque::new()),
            default_health: Mutex::new(Health::Up),
            retain_volume: Mutex::new(None),
            provisions: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            torn_down: Mutex::new(Vec::new()),
        })
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_failure(&self, failure: Option<ProvisionError>) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Fail with a message quoting every resolved variable
    pub fn echo_env_in_failure(&self) {
        self.echo_env.store(true, Ordering::SeqCst);
    }

    /// Probe results in order, then `then` forever
    pub fn set_health(&self, sequence: Vec<Health>, then: Health) {
        *self.health.lock().unwrap() = sequence.into();
        *self.default_health.lock().unwrap() = then;
    }

    pub fn retain_volume_on_teardown(&self, reason: &str) {
        *self.retain_volume.lock().unwrap() = Some(reason.to_string());
    }

    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn torn_down(&self) -> Vec<ProvisionHandle> {
        self.torn_down.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    fn kind(&self) -> ProvisionerKind {
        ProvisionerKind::Image
    }

    async fn provision(
        &self,
        resource: &Resource,
        server: &Server,
        _target: &dyn RemoteTarget,
        env: &EffectiveEnv,
    ) -> Result<ProvisionHandle, ProvisionError> {
        self.provisions.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.echo_env.load(Ordering::SeqCst) {
            return Err(ProvisionError::Runtime(format!(
                "container exited with env {:?}",
                env.expose()
            )));
        }
        if let Some(failure) = self.failure.lock().unwrap().clone() {
            return Err(failure);
        }
        Ok(self.planned_handle(resource, server))
    }

    async fn teardown(
        &self,
        handle: &ProvisionHandle,
        _target: &dyn RemoteTarget,
    ) -> Result<TeardownReport, TeardownError> {
        self.torn_down.lock().unwrap().push(handle.clone());
        let mut report = TeardownReport::new();
        report.removed(SubResource::Container);
        match self.retain_volume.lock().unwrap().clone() {
            Some(reason) => report.retained(SubResource::Volume, reason),
            None => report.removed(SubResource::Volume),
        }
        conclude(report)
    }

    async fn health_check(
        &self,
        _handle: &ProvisionHandle,
        _target: &dyn RemoteTarget,
        _timeout: Duration,
    ) -> Health {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let next = self.health.lock().unwrap().pop_front();
        next.unwrap_or(*self.default_health.lock().unwrap())
    }

    fn planned_handle(&self, resource: &Resource, server: &Server) -> ProvisionHandle {
        let mut handle = base_handle(ProvisionerKind::Image, resource, server);
        handle.volume = Some(format!("{}-data", handle.workload));
        handle
    }
}

/// Routes every resource to one fake provisioner
pub struct FakeSelector(pub Arc<FakeProvisioner>);

impl SelectProvisioner for FakeSelector {
    fn select(&self, _resource: &Resource) -> Arc<dyn Provisioner> {
        self.0.clone()
    }

    fn for_handle(&self, _handle: &ProvisionHandle) -> Arc<dyn Provisioner> {
        self.0.clone()
    }
}

// ==================================== HARNESS ==================================== //

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<MemoryStore>,
    pub secrets: Arc<MemorySecretStore>,
    pub target: Arc<ScriptedTarget>,
}

/// Short health backoff so paused-clock tests stay readable
pub fn fast_settings() -> TrackerSettings {
    TrackerSettings {
        health: HealthPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            probe_timeout: Duration::from_secs(1),
        },
        ..Default::default()
    }
}

/// Orchestrator over in-memory stores with one scripted server and a saved project
pub async fn harness(
    target: ScriptedTarget,
    provisioners: impl FnOnce(Arc<MemorySecretStore>) -> Arc<dyn SelectProvisioner>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let secrets = Arc::new(MemorySecretStore::new());
    let target = Arc::new(target);

    let registry = Arc::new(ServerRegistry::default());
    registry.register_with_target(Server::local(SERVER_ID, "edge"), target.clone());

    store
        .save_project(&Project::new(PROJECT_ID, "acme", "user-1", SERVER_ID))
        .await
        .unwrap();

    let orchestrator = Orchestrator::new(
        store.clone(),
        secrets.clone(),
        registry,
        provisioners(secrets.clone()),
        fast_settings(),
    );
    Harness {
        orchestrator,
        store,
        secrets,
        target,
    }
}

/// Harness routing every resource to `fake`
pub async fn fake_harness(fake: Arc<FakeProvisioner>) -> Harness {
    harness(ScriptedTarget::new(), move |_| Arc::new(FakeSelector(fake))).await
}

// ================================== DEFINITIONS ================================== //

pub fn website_definition() -> ResourceDefinition {
    ResourceDefinition {
        name: "marketing-site".to_string(),
        kind: "website".to_string(),
        project_id: PROJECT_ID.to_string(),
        server_id: SERVER_ID.to_string(),
        repository_url: Some("https://github.com/acme/site".to_string()),
        environment_variables: vec![
            VariableDefinition::plain("NODE_ENV", "production"),
            VariableDefinition::secret("API_TOKEN", "tok-secret-123"),
        ],
        ..Default::default()
    }
}

pub fn database_definition() -> ResourceDefinition {
    ResourceDefinition {
        name: "main-db".to_string(),
        kind: "database".to_string(),
        project_id: PROJECT_ID.to_string(),
        server_id: SERVER_ID.to_string(),
        database_type: Some("postgres".to_string()),
        database_name: Some("app".to_string()),
        admin_email: Some("ops@acme.dev".to_string()),
        ..Default::default()
    }
}
