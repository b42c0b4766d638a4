//! HTTP API tests driven through the router

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use common::*;
use orchestrator::deploy::executor::{deploy_queue, DeployAction, DeployRequest};
use orchestrator::server::serve::router;
use orchestrator::server::state::ServerState;
use orchestrator::storage::memory::MemoryStore;
use orchestrator::storage::store::Store;

struct Api {
    app: Router,
    queue: mpsc::Receiver<DeployRequest>,
    fake: Arc<FakeProvisioner>,
    store: Arc<MemoryStore>,
}

async fn api() -> Api {
    let fake = FakeProvisioner::new();
    let h = fake_harness(fake.clone()).await;
    let (tx, rx) = deploy_queue();
    let orchestrator = Arc::new(h.orchestrator.with_queue(tx));
    let state = Arc::new(ServerState::new("0.1.0-test".to_string(), orchestrator));
    Api {
        app: router(state),
        queue: rx,
        fake,
        store: h.store,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-actor", "alice");
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn website_body() -> Value {
    json!({
        "name": "marketing-site",
        "type": "website",
        "projectId": PROJECT_ID,
        "serverId": SERVER_ID,
        "repositoryUrl": "https://github.com/acme/site",
        "environmentVariables": [
            { "key": "NODE_ENV", "value": "production" },
            { "key": "API_TOKEN", "value": "tok-secret-123", "isSecret": true }
        ]
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let api = api().await;
    let (status, body) = send(&api.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], "0.1.0-test");
}

#[tokio::test]
async fn test_submit_queues_and_hides_secrets() {
    let mut api = api().await;

    let (status, body) = send(&api.app, "POST", "/resources", Some(website_body())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["id"].as_str().unwrap().to_string();

    let request = api.queue.recv().await.unwrap();
    assert_eq!(request.resource_id, id);
    assert_eq!(request.action, DeployAction::Deploy);
    assert_eq!(request.context.actor(), "alice");

    let (status, view) = send(&api.app, "GET", &format!("/resources/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "created");
    assert_eq!(view["type"], "website");
    assert!(!view.to_string().contains("tok-secret-123"));
    let secret = view["environmentVariables"]
        .as_array()
        .unwrap()
        .iter()
        .find(|v| v["key"] == "API_TOKEN")
        .unwrap();
    assert_eq!(secret["isSecret"], true);
    assert!(secret["value"].is_null());

    let (status, list) = send(&api.app, "GET", "/resources", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_definition_names_the_field() {
    let api = api().await;
    let mut body = website_body();
    body["type"] = json!("mainframe");

    let (status, error) = send(&api.app, "POST", "/resources", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["field"], "type");

    let mut body = website_body();
    body["environmentVariables"] = json!([
        { "key": "A", "value": "1" },
        { "key": "A", "value": "2" }
    ]);
    let (status, error) = send(&api.app, "POST", "/resources", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["field"], "environmentVariables[1]");
}

#[tokio::test]
async fn test_unknown_resource_is_not_found() {
    let api = api().await;
    let (status, _) = send(&api.app, "GET", "/resources/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&api.app, "GET", "/resources/bad%20id", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stop_of_created_resource_conflicts() {
    let api = api().await;
    let (_, body) = send(&api.app, "POST", "/resources", Some(website_body())).await;
    let id = body["id"].as_str().unwrap();

    let (status, error) = send(&api.app, "POST", &format!("/resources/{}/stop", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(error["error"].as_str().unwrap().contains("created"));
}

#[tokio::test]
async fn test_redeploy_is_queued() {
    let mut api = api().await;
    let (_, body) = send(&api.app, "POST", "/resources", Some(website_body())).await;
    let id = body["id"].as_str().unwrap().to_string();
    api.queue.recv().await.unwrap();

    let (status, _) =
        send(&api.app, "POST", &format!("/resources/{}/redeploy", id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let request = api.queue.recv().await.unwrap();
    assert_eq!(request.action, DeployAction::Redeploy);
    // Queued only; nothing ran yet
    assert_eq!(api.fake.provisions(), 0);
}

#[tokio::test]
async fn test_projects_round_trip() {
    let api = api().await;
    let (status, body) = send(
        &api.app,
        "POST",
        "/projects",
        Some(json!({
            "name": "storefront",
            "ownerId": "user-2",
            "serverId": SERVER_ID,
            "environmentVariables": [
                { "key": "STRIPE_KEY", "value": "sk_live_abc", "isSecret": true }
            ],
            "environments": [
                { "name": "prod", "kind": "prod", "variables": [] }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap();

    let (status, project) = send(&api.app, "GET", &format!("/projects/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(project["name"], "storefront");
    assert!(!project.to_string().contains("sk_live_abc"));

    // The harness project plus the new one
    assert_eq!(api.store.list_projects().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_delete_removes_resource() {
    let api = api().await;
    let (_, body) = send(&api.app, "POST", "/resources", Some(website_body())).await;
    let id = body["id"].as_str().unwrap().to_string();

    let (status, report) = send(&api.app, "DELETE", &format!("/resources/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(report["entries"].as_array().unwrap().is_empty());

    let (status, _) = send(&api.app, "GET", &format!("/resources/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
