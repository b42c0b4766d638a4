//! Orchestrator lifecycle tests against fake and scripted targets

mod common;

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;

use common::*;
use orchestrator::deploy::executor::{deploy_queue, DeployAction, HealthOutcome};
use orchestrator::deploy::fsm::{ResourceFsm, ResourceStatus, StatusEvent};
use orchestrator::deploy::provisioner::{ProvisionSettings, ProvisionerFactory};
use orchestrator::env::secrets::SecretStore;
use orchestrator::errors::{OrchestratorError, ProvisionError};
use orchestrator::models::context::RequestContext;
use orchestrator::models::definition::{ResourceDefinition, VariableDefinition};
use orchestrator::models::resource::{Resource, ResourceKind};
use orchestrator::models::view::ResourceView;
use orchestrator::models::workload::{Health, Removal, SubResource};
use orchestrator::registry::target::ExecOutput;
use orchestrator::storage::store::Store;

fn ctx() -> RequestContext {
    RequestContext::new(Some("tester".to_string()))
}

fn events(resource: &Resource) -> Vec<String> {
    resource.history().iter().map(|c| c.event.clone()).collect()
}

async fn real_harness(target: ScriptedTarget) -> Harness {
    harness(target, |secrets| {
        Arc::new(ProvisionerFactory::new(ProvisionSettings::default(), secrets))
    })
    .await
}

// --- Submission

#[tokio::test]
async fn test_submit_seals_secrets_and_attaches_to_project() {
    let h = fake_harness(FakeProvisioner::new()).await;

    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();

    let resource = h.store.load_resource(&id).await.unwrap();
    assert_eq!(resource.status(), ResourceStatus::Created);
    assert!(!serde_json::to_string(&resource)
        .unwrap()
        .contains("tok-secret-123"));
    assert_eq!(h.secrets.len(), 1);

    let project = h.store.load_project(PROJECT_ID).await.unwrap();
    assert_eq!(project.resource_ids, vec![id]);
}

#[tokio::test]
async fn test_submit_to_unknown_project_is_rejected() {
    let h = fake_harness(FakeProvisioner::new()).await;
    let mut definition = website_definition();
    definition.project_id = "missing".to_string();

    match h.orchestrator.submit(&ctx(), &definition).await {
        Err(OrchestratorError::ValidationError(e)) => assert_eq!(e.field, "projectId"),
        other => panic!("expected validation error, got {:?}", other),
    }
    assert!(h.secrets.is_empty());
    assert!(h.store.list_resources().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resume_pending_queues_created_resources() {
    let h = fake_harness(FakeProvisioner::new()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();

    let (tx, mut rx) = deploy_queue();
    let orchestrator = h.orchestrator.with_queue(tx);
    let queued = orchestrator
        .resume_pending(&RequestContext::system())
        .await
        .unwrap();
    assert_eq!(queued, 1);

    let request = rx.recv().await.unwrap();
    assert_eq!(request.resource_id, id);
    assert_eq!(request.action, DeployAction::Deploy);
}

// --- Provisioning through the real provisioners

#[tokio::test]
async fn test_website_deploys_from_repository() {
    let target = ScriptedTarget::new()
        .on("docker inspect", vec![missing(), ExecOutput::ok("running||")])
        .on("test -f", vec![ExecOutput::failed(1, "")]);
    let h = real_harness(target).await;

    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();
    let status = h.orchestrator.deploy(&ctx(), &id).await.unwrap();
    assert_eq!(status, ResourceStatus::Running);

    let resource = h.store.load_resource(&id).await.unwrap();
    assert_eq!(events(&resource), vec!["deploy", "healthy"]);
    assert!(resource.error().is_none());
    let handle = resource.handle.as_ref().unwrap();
    assert_eq!(handle.workload, format!("orc-{}", id));
    assert!(!handle.adopted);

    assert!(h.target.ran("git clone"));
    assert!(h.target.ran("docker build"));
    assert!(h.target.ran("docker run"));
    assert!(h
        .target
        .commands()
        .iter()
        .all(|c| !c.contains("tok-secret-123")));

    let files = h.target.files();
    assert!(files.iter().any(|f| f.path.contains("Dockerfile")));
    let env_file = files
        .iter()
        .find(|f| f.contents.contains("API_TOKEN="))
        .unwrap();
    assert_eq!(env_file.mode, 0o600);
    assert!(env_file.contents.contains("API_TOKEN=tok-secret-123"));
    assert!(env_file.contents.contains("NODE_ENV=production"));

    let project = h.store.load_project(PROJECT_ID).await.unwrap();
    assert_eq!(project.status(), ResourceStatus::Running);
}

#[tokio::test]
async fn test_database_password_is_generated_and_hidden() {
    let target = ScriptedTarget::new().on(
        "docker inspect",
        vec![missing(), ExecOutput::ok("running||healthy")],
    );
    let h = real_harness(target).await;

    let id = h
        .orchestrator
        .submit(&ctx(), &database_definition())
        .await
        .unwrap();
    assert_eq!(
        h.orchestrator.deploy(&ctx(), &id).await.unwrap(),
        ResourceStatus::Running
    );

    let resource = h.store.load_resource(&id).await.unwrap();
    let ResourceKind::Database(spec) = &resource.kind else {
        panic!("expected a database resource");
    };
    let reference = spec
        .password
        .as_ref()
        .and_then(|slot| slot.sealed_ref())
        .unwrap();
    let password = h.secrets.get(reference).await.unwrap();
    let password = password.expose_secret();
    assert!(password.len() >= 16);

    let view = serde_json::to_string(&ResourceView::from(&resource)).unwrap();
    assert!(view.contains("\"hasPassword\":true"));
    assert!(!view.contains(password));
    assert!(h.target.commands().iter().all(|c| !c.contains(password)));

    let env_file = h
        .target
        .files()
        .into_iter()
        .find(|f| f.contents.contains("POSTGRES_PASSWORD="))
        .unwrap();
    assert_eq!(env_file.mode, 0o600);
    assert!(env_file
        .contents
        .contains(&format!("POSTGRES_PASSWORD={}", password)));
    assert!(env_file.contents.contains("POSTGRES_DB=app"));

    let run = h
        .target
        .commands()
        .into_iter()
        .find(|c| c.contains("docker run"))
        .unwrap();
    assert!(run.contains("--label orchestrator.admin-email=ops@acme.dev"));
    assert!(run.contains("orc-") && run.contains("-data:/var/lib/postgresql/data"));
}

#[tokio::test]
async fn test_incomplete_teardown_keeps_resource_running() {
    let target = ScriptedTarget::new()
        .on(
            "docker inspect",
            vec![missing(), ExecOutput::ok("running||healthy")],
        )
        .on(
            "docker volume rm",
            vec![ExecOutput::failed(1, "Error response from daemon: volume is in use")],
        );
    let h = real_harness(target).await;

    let id = h
        .orchestrator
        .submit(&ctx(), &database_definition())
        .await
        .unwrap();
    h.orchestrator.deploy(&ctx(), &id).await.unwrap();

    let report = match h.orchestrator.stop(&ctx(), &id).await {
        Err(OrchestratorError::TeardownError(e)) => e.report,
        other => panic!("expected teardown error, got {:?}", other),
    };
    assert_eq!(report.outcome(SubResource::Container), Some(&Removal::Removed));
    assert!(matches!(
        report.outcome(SubResource::Volume),
        Some(Removal::Retained { reason }) if reason.contains("in use")
    ));

    let resource = h.store.load_resource(&id).await.unwrap();
    assert_eq!(resource.status(), ResourceStatus::Running);
    assert!(resource.handle.is_some());
    assert!(resource.error().unwrap().contains("volume=retained"));
}

#[tokio::test]
async fn test_unchanged_workload_is_adopted() {
    let h = real_harness(ScriptedTarget::new()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();
    let fingerprint = h
        .store
        .load_resource(&id)
        .await
        .unwrap()
        .definition_fingerprint();
    h.target.script(
        "docker inspect",
        vec![ExecOutput::ok(format!("running|{}|", fingerprint))],
    );

    let status = h.orchestrator.deploy(&ctx(), &id).await.unwrap();
    assert_eq!(status, ResourceStatus::Running);

    let resource = h.store.load_resource(&id).await.unwrap();
    assert!(resource.handle.as_ref().unwrap().adopted);
    for command in ["git clone", "docker build", "docker run", "docker rm"] {
        assert!(!h.target.ran(command), "unexpected {}", command);
    }
    assert!(h.target.files().is_empty());
}

#[tokio::test]
async fn test_stale_workload_is_replaced() {
    let target = ScriptedTarget::new()
        .on(
            "docker inspect",
            vec![
                ExecOutput::ok("running|0123456789abcdef|"),
                ExecOutput::ok("running||"),
            ],
        )
        .on("test -f", vec![ExecOutput::failed(1, "")]);
    let h = real_harness(target).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();

    let status = h.orchestrator.deploy(&ctx(), &id).await.unwrap();
    assert_eq!(status, ResourceStatus::Running);
    assert!(!h.store.load_resource(&id).await.unwrap().handle.unwrap().adopted);

    let removed = h.target.position("docker rm -f").unwrap();
    let cloned = h.target.position("git clone").unwrap();
    let started = h.target.position("docker run").unwrap();
    assert!(removed < cloned && cloned < started);
}

fn compose_definition() -> ResourceDefinition {
    ResourceDefinition {
        name: "stack".to_string(),
        kind: "service".to_string(),
        project_id: PROJECT_ID.to_string(),
        server_id: SERVER_ID.to_string(),
        service_type: Some("docker".to_string()),
        docker_compose_content: Some("services:\n  web:\n    image: nginx:alpine\n".to_string()),
        environment_variables: vec![VariableDefinition::secret("DB_PASSWORD", "pw-secret-9")],
        ..Default::default()
    }
}

fn compose_target() -> ScriptedTarget {
    ScriptedTarget::new()
        .on("ps -a -q", vec![ExecOutput::ok("c1\n")])
        .on("--status running", vec![ExecOutput::ok("c1\n")])
}

#[tokio::test]
async fn test_compose_deploy_survives_env_file_cleanup_failure() {
    let target = compose_target().on(
        "/.env",
        vec![ExecOutput::failed(1, "rm: cannot remove '.env': Operation not permitted")],
    );
    let h = real_harness(target).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &compose_definition())
        .await
        .unwrap();

    let status = h.orchestrator.deploy(&ctx(), &id).await.unwrap();
    assert_eq!(status, ResourceStatus::Running);
    assert!(h.store.load_resource(&id).await.unwrap().error().is_none());

    let env_file = h
        .target
        .files()
        .into_iter()
        .find(|f| f.path.ends_with("/.env"))
        .unwrap();
    assert_eq!(env_file.mode, 0o600);
    assert!(env_file.contents.contains("DB_PASSWORD=pw-secret-9"));

    // Removal is attempted once the project is up
    let up = h.target.position("up -d").unwrap();
    let cleanup = h.target.position("/.env").unwrap();
    assert!(up < cleanup);
}

#[tokio::test]
async fn test_running_compose_project_is_adopted() {
    let h = real_harness(compose_target()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &compose_definition())
        .await
        .unwrap();
    let fingerprint = h
        .store
        .load_resource(&id)
        .await
        .unwrap()
        .definition_fingerprint();
    h.target
        .script(".orchestrator-fingerprint", vec![ExecOutput::ok(fingerprint)]);

    let status = h.orchestrator.deploy(&ctx(), &id).await.unwrap();
    assert_eq!(status, ResourceStatus::Running);
    assert!(h
        .store
        .load_resource(&id)
        .await
        .unwrap()
        .handle
        .unwrap()
        .adopted);
    assert!(!h.target.ran("up -d"));
    assert!(h.target.files().is_empty());
}

// --- Lifecycle with a fake provisioner

#[tokio::test(start_paused = true)]
async fn test_concurrent_deploys_are_rejected() {
    let fake = FakeProvisioner::new();
    fake.set_delay(Duration::from_secs(1));
    let h = fake_harness(fake.clone()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();

    let (ctx_a, ctx_b) = (ctx(), ctx());
    let (first, second) = tokio::join!(
        h.orchestrator.deploy(&ctx_a, &id),
        h.orchestrator.deploy(&ctx_b, &id)
    );
    assert_eq!(first.unwrap(), ResourceStatus::Running);
    assert!(matches!(second, Err(OrchestratorError::InFlight(_))));
    assert_eq!(fake.provisions(), 1);
    assert!(!h.orchestrator.is_busy(&id));
}

#[tokio::test(start_paused = true)]
async fn test_workload_that_never_comes_up_ends_in_error() {
    let fake = FakeProvisioner::new();
    fake.set_health(vec![], Health::Down);
    let h = fake_harness(fake.clone()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();

    let status = h.orchestrator.deploy(&ctx(), &id).await.unwrap();
    assert_eq!(status, ResourceStatus::Error);
    assert_eq!(fake.probes(), 3);

    let resource = h.store.load_resource(&id).await.unwrap();
    assert_eq!(events(&resource), vec!["deploy", "unhealthy"]);
    assert_eq!(
        resource.error(),
        Some("workload did not report up after 3 health checks (last: down)")
    );
    // The workload exists, so it stays attached for teardown
    assert!(resource.handle.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_health_comes_up_on_a_later_attempt() {
    let fake = FakeProvisioner::new();
    fake.set_health(vec![Health::Unknown, Health::Down], Health::Up);
    let h = fake_harness(fake.clone()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();

    assert_eq!(
        h.orchestrator.deploy(&ctx(), &id).await.unwrap(),
        ResourceStatus::Running
    );
    assert_eq!(fake.probes(), 3);
}

#[tokio::test]
async fn test_failed_provision_then_redeploy() {
    let fake = FakeProvisioner::new();
    fake.set_failure(Some(ProvisionError::Build {
        status: Some(1),
        log: "npm ERR! missing script: build".to_string(),
    }));
    let h = fake_harness(fake.clone()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();

    let err = h.orchestrator.deploy(&ctx(), &id).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::ProvisionError(ProvisionError::Build { .. })
    ));
    let resource = h.store.load_resource(&id).await.unwrap();
    assert_eq!(resource.status(), ResourceStatus::Failed);
    assert!(resource.error().unwrap().contains("npm ERR! missing script"));
    assert!(resource.handle.is_none());

    // Deploy only starts from created
    assert!(matches!(
        h.orchestrator.deploy(&ctx(), &id).await,
        Err(OrchestratorError::InvalidTransition { .. })
    ));

    fake.set_failure(None);
    assert_eq!(
        h.orchestrator.redeploy(&ctx(), &id).await.unwrap(),
        ResourceStatus::Running
    );
    assert_eq!(fake.provisions(), 2);
    // Nothing was provisioned before, so nothing to tear down
    assert!(fake.torn_down().is_empty());

    let resource = h.store.load_resource(&id).await.unwrap();
    assert_eq!(
        events(&resource),
        vec!["deploy", "provision_failed", "redeploy", "healthy"]
    );
    assert!(resource.error().is_none());
}

#[tokio::test]
async fn test_redeploy_tears_down_running_workload_first() {
    let fake = FakeProvisioner::new();
    let h = fake_harness(fake.clone()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();
    h.orchestrator.deploy(&ctx(), &id).await.unwrap();

    assert_eq!(
        h.orchestrator.redeploy(&ctx(), &id).await.unwrap(),
        ResourceStatus::Running
    );
    let torn_down = fake.torn_down();
    assert_eq!(torn_down.len(), 1);
    assert_eq!(torn_down[0].workload, format!("orc-{}", id));
    assert_eq!(fake.provisions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_provision_timeout_cleans_up_and_errors() {
    let fake = FakeProvisioner::new();
    fake.set_delay(Duration::from_secs(3600));
    let h = fake_harness(fake.clone()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();

    match h.orchestrator.deploy(&ctx(), &id).await {
        Err(OrchestratorError::Timeout { operation, after }) => {
            assert_eq!(operation, "provisioning");
            assert_eq!(after, h.orchestrator.settings().provision_timeout);
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    let resource = h.store.load_resource(&id).await.unwrap();
    assert_eq!(resource.status(), ResourceStatus::Error);
    assert_eq!(events(&resource), vec!["deploy", "timed_out"]);
    assert!(resource.handle.is_none());

    let torn_down = fake.torn_down();
    assert_eq!(torn_down.len(), 1);
    assert_eq!(torn_down[0].workload, format!("orc-{}", id));
}

#[tokio::test]
async fn test_provision_errors_are_scrubbed() {
    let fake = FakeProvisioner::new();
    fake.echo_env_in_failure();
    let h = fake_harness(fake).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();

    let err = h.orchestrator.deploy(&ctx(), &id).await.unwrap_err();
    assert!(!err.to_string().contains("tok-secret-123"));

    let resource = h.store.load_resource(&id).await.unwrap();
    let stored = resource.error().unwrap();
    assert!(!stored.contains("tok-secret-123"));
    assert!(stored.contains("[REDACTED]"));
    assert!(stored.contains("production"));
}

#[tokio::test]
async fn test_stop_then_health_is_skipped() {
    let fake = FakeProvisioner::new();
    let h = fake_harness(fake.clone()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();
    h.orchestrator.deploy(&ctx(), &id).await.unwrap();

    let report = h.orchestrator.stop(&ctx(), &id).await.unwrap();
    assert!(report.is_complete());

    let resource = h.store.load_resource(&id).await.unwrap();
    assert_eq!(resource.status(), ResourceStatus::Stopped);
    assert!(resource.handle.is_none());

    let probes = fake.probes();
    assert_eq!(
        h.orchestrator.check_health(&ctx(), &id).await.unwrap(),
        HealthOutcome::Skipped
    );
    assert_eq!(fake.probes(), probes);

    // A stopped resource cannot be stopped again
    assert!(matches!(
        h.orchestrator.stop(&ctx(), &id).await,
        Err(OrchestratorError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_delete_releases_secrets_and_detaches() {
    let fake = FakeProvisioner::new();
    let h = fake_harness(fake.clone()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();
    h.orchestrator.deploy(&ctx(), &id).await.unwrap();

    let report = h.orchestrator.delete(&ctx(), &id).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(fake.torn_down().len(), 1);
    assert!(h.secrets.is_empty());

    assert!(matches!(
        h.orchestrator.status(&id).await,
        Err(OrchestratorError::StoreError(_))
    ));
    let project = h.store.load_project(PROJECT_ID).await.unwrap();
    assert!(project.resource_ids.is_empty());
}

// --- Health rounds

#[tokio::test(start_paused = true)]
async fn test_running_resource_goes_to_error_after_consecutive_downs() {
    let fake = FakeProvisioner::new();
    let h = fake_harness(fake.clone()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();
    h.orchestrator.deploy(&ctx(), &id).await.unwrap();

    fake.set_health(vec![Health::Down, Health::Down], Health::Up);
    assert_eq!(
        h.orchestrator.check_health(&ctx(), &id).await.unwrap(),
        HealthOutcome::Up
    );
    assert_eq!(
        h.store.load_resource(&id).await.unwrap().status(),
        ResourceStatus::Running
    );

    fake.set_health(vec![], Health::Down);
    assert_eq!(
        h.orchestrator.check_health(&ctx(), &id).await.unwrap(),
        HealthOutcome::Down
    );
    let resource = h.store.load_resource(&id).await.unwrap();
    assert_eq!(resource.status(), ResourceStatus::Error);
    assert!(resource.error().unwrap().contains("3 times in a row"));
}

#[tokio::test(start_paused = true)]
async fn test_inconclusive_probe_keeps_status() {
    let fake = FakeProvisioner::new();
    let h = fake_harness(fake.clone()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();
    h.orchestrator.deploy(&ctx(), &id).await.unwrap();

    fake.set_health(vec![Health::Down, Health::Unknown], Health::Down);
    assert_eq!(
        h.orchestrator.check_health(&ctx(), &id).await.unwrap(),
        HealthOutcome::Inconclusive
    );
    assert_eq!(
        h.store.load_resource(&id).await.unwrap().status(),
        ResourceStatus::Running
    );
}

#[tokio::test]
async fn test_interrupted_deploy_is_marked_error() {
    let h = fake_harness(FakeProvisioner::new()).await;
    let id = h
        .orchestrator
        .submit(&ctx(), &website_definition())
        .await
        .unwrap();

    // A deploy that was cut off after the status change
    let mut resource = h.store.load_resource(&id).await.unwrap();
    let transition = ResourceFsm::from_status(resource.status())
        .process(StatusEvent::Deploy)
        .unwrap();
    resource.apply(&transition);
    h.store.save_resource(&resource).await.unwrap();

    assert_eq!(
        h.orchestrator.check_health(&ctx(), &id).await.unwrap(),
        HealthOutcome::Down
    );
    let resource = h.store.load_resource(&id).await.unwrap();
    assert_eq!(resource.status(), ResourceStatus::Error);
    assert_eq!(resource.error(), Some("provisioning was interrupted"));
}
