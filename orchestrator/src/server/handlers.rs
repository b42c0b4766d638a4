//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::errors::{OrchestratorError, StoreError};
use crate::models::context::RequestContext;
use crate::models::definition::{ProjectDefinition, ResourceDefinition};
use crate::models::workload::TeardownReport;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error body returned by every handler
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TeardownReport>,
}

/// Maps orchestrator errors onto HTTP statuses
pub struct ApiError(pub OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = ErrorResponse {
            error: self.0.to_string(),
            field: None,
            report: None,
        };
        let status = match &self.0 {
            OrchestratorError::ValidationError(e) => {
                body.field = Some(e.field.clone());
                StatusCode::UNPROCESSABLE_ENTITY
            }
            OrchestratorError::StoreError(StoreError::NotFound { .. })
            | OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::StoreError(StoreError::InvalidId(_)) => StatusCode::BAD_REQUEST,
            OrchestratorError::InFlight(_)
            | OrchestratorError::InvalidTransition { .. }
            | OrchestratorError::NoTargetError(_)
            | OrchestratorError::ResolutionError(_) => StatusCode::CONFLICT,
            OrchestratorError::ProvisionError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestratorError::TeardownError(e) => {
                body.report = Some(e.report.clone());
                StatusCode::BAD_GATEWAY
            }
            OrchestratorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            OrchestratorError::ShutdownError(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => {
                error!("Request failed: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "orchestrator".to_string(),
        version: state.version.clone(),
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Returned for accepted submissions
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub id: String,
}

pub async fn create_project_handler(
    State(state): State<Arc<ServerState>>,
    ctx: RequestContext,
    Json(definition): Json<ProjectDefinition>,
) -> ApiResult<impl IntoResponse> {
    let id = state.orchestrator.submit_project(&ctx, &definition).await?;
    Ok((StatusCode::CREATED, Json(AcceptedResponse { id })))
}

pub async fn get_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.project(&id).await?))
}

/// Accept a resource; provisioning continues in the background
pub async fn submit_handler(
    State(state): State<Arc<ServerState>>,
    ctx: RequestContext,
    Json(definition): Json<ResourceDefinition>,
) -> ApiResult<impl IntoResponse> {
    let id = state.orchestrator.submit(&ctx, &definition).await?;
    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { id })))
}

pub async fn list_resources_handler(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.list().await?))
}

pub async fn get_resource_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.status(&id).await?))
}

pub async fn redeploy_handler(
    State(state): State<Arc<ServerState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.orchestrator.schedule_redeploy(&ctx, &id).await?;
    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { id })))
}

pub async fn stop_handler(
    State(state): State<Arc<ServerState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.stop(&ctx, &id).await?))
}

pub async fn delete_handler(
    State(state): State<Arc<ServerState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.delete(&ctx, &id).await?))
}

pub async fn servers_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.orchestrator.registry().list())
}
