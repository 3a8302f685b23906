// HTTP handlers for the workflow and auth services
// Each handler authenticates through the interceptor, then calls the session's client

use std::any::Any;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{Stream, StreamExt};
use tracing::{debug, error};

use super::auth::{AuthInterceptor, AuthenticatedSession, InterceptedRequest, IS_AUTHORIZED_METHOD, IS_VALID_TOKEN_METHOD};
use super::metadata::RequestMetadata;
use super::types::{
    Empty, ErrorResponse, GetWorkflowMetricsResponse, IsAuthorizedRequest, IsAuthorizedResponse,
    IsValidTokenRequest, IsValidTokenResponse, ListWorkflowsQuery, ListWorkflowsResponse,
    ValidateWorkflowRequest,
};
use crate::engine::ResourceAttributes;
use crate::models::Workflow;
use crate::{ControlPlaneError, ErrorCode, Result};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Shared state of the API router
#[derive(Clone)]
pub struct ApiState {
    pub interceptor: AuthInterceptor,
}

impl ApiState {
    pub fn new(interceptor: AuthInterceptor) -> Self {
        Self { interceptor }
    }

    async fn session<R: InterceptedRequest>(
        &self,
        method: &str,
        headers: &HeaderMap,
        request: &mut R,
    ) -> Result<AuthenticatedSession> {
        let mut metadata = RequestMetadata::from_headers(headers);
        debug!(method = %method, "Authenticating call");
        self.interceptor
            .authorize_unary(method, &mut metadata, request)
            .await
    }

    fn stream_session(&self, method: &str, headers: &HeaderMap) -> Result<AuthenticatedSession> {
        debug!(method = %method, "Authenticating stream");
        self.interceptor
            .authorize_stream(&RequestMetadata::from_headers(headers))
    }
}

type WorkflowPath = Path<(String, String)>;

fn event_stream<S, T>(items: S) -> Sse<impl Stream<Item = std::result::Result<Event, serde_json::Error>>>
where
    S: Stream<Item = T> + Send + 'static,
    T: serde::Serialize,
{
    Sse::new(items.map(|item| Event::default().json_data(item))).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

pub async fn create_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(namespace): Path<String>,
    Json(mut workflow): Json<Workflow>,
) -> Result<Json<Workflow>> {
    let session = state
        .session("/api.WorkflowService/CreateWorkflow", &headers, &mut workflow)
        .await?;
    Ok(Json(session.client.create_workflow(&namespace, workflow).await?))
}

pub async fn validate_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(namespace): Path<String>,
    Json(mut request): Json<ValidateWorkflowRequest>,
) -> Result<Json<Empty>> {
    let session = state
        .session("/api.WorkflowService/ValidateWorkflow", &headers, &mut request)
        .await?;
    session
        .client
        .validate_workflow(&namespace, &request.manifest)
        .await?;
    Ok(Json(Empty {}))
}

pub async fn get_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((namespace, name)): WorkflowPath,
) -> Result<Json<Workflow>> {
    let session = state
        .session("/api.WorkflowService/GetWorkflow", &headers, &mut ())
        .await?;
    Ok(Json(session.client.get_workflow(&namespace, &name).await?))
}

pub async fn list_workflows(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(namespace): Path<String>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<ListWorkflowsResponse>> {
    let session = state
        .session("/api.WorkflowService/ListWorkflows", &headers, &mut ())
        .await?;
    let workflows = session
        .client
        .list_workflows(
            &namespace,
            &query.workflow_template_uid,
            &query.workflow_template_version,
        )
        .await?;
    Ok(Json(ListWorkflowsResponse {
        count: workflows.len(),
        workflows,
    }))
}

/// Status snapshots as server-sent events until the workflow finishes
pub async fn watch_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((namespace, name)): WorkflowPath,
) -> Result<Response> {
    let session = state.stream_session("/api.WorkflowService/WatchWorkflow", &headers)?;
    let snapshots = session.client.watch_workflow(&namespace, &name).await?;
    Ok(event_stream(snapshots).into_response())
}

/// Log lines of one step container as server-sent events
pub async fn get_workflow_logs(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((namespace, name, pod_name, container_name)): Path<(String, String, String, String)>,
) -> Result<Response> {
    let session = state.stream_session("/api.WorkflowService/GetWorkflowLogs", &headers)?;
    let entries = session
        .client
        .get_workflow_logs(&namespace, &name, &pod_name, &container_name)
        .await?;
    Ok(event_stream(entries).into_response())
}

pub async fn get_workflow_metrics(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((namespace, name, pod_name)): Path<(String, String, String)>,
) -> Result<Json<GetWorkflowMetricsResponse>> {
    let session = state
        .session("/api.WorkflowService/GetWorkflowMetrics", &headers, &mut ())
        .await?;
    let metrics = session
        .client
        .get_workflow_metrics(&namespace, &name, &pod_name)
        .await?;
    Ok(Json(GetWorkflowMetricsResponse { metrics }))
}

pub async fn retry_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((namespace, name)): WorkflowPath,
) -> Result<Json<Workflow>> {
    let session = state
        .session("/api.WorkflowService/RetryWorkflow", &headers, &mut ())
        .await?;
    Ok(Json(session.client.retry_workflow(&namespace, &name).await?))
}

pub async fn resubmit_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((namespace, name)): WorkflowPath,
) -> Result<Json<Workflow>> {
    let session = state
        .session("/api.WorkflowService/ResubmitWorkflow", &headers, &mut ())
        .await?;
    Ok(Json(session.client.resubmit_workflow(&namespace, &name).await?))
}

pub async fn resume_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((namespace, name)): WorkflowPath,
) -> Result<Json<Workflow>> {
    let session = state
        .session("/api.WorkflowService/ResumeWorkflow", &headers, &mut ())
        .await?;
    Ok(Json(session.client.resume_workflow(&namespace, &name).await?))
}

pub async fn suspend_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((namespace, name)): WorkflowPath,
) -> Result<Json<Empty>> {
    let session = state
        .session("/api.WorkflowService/SuspendWorkflow", &headers, &mut ())
        .await?;
    session.client.suspend_workflow(&namespace, &name).await?;
    Ok(Json(Empty {}))
}

pub async fn terminate_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((namespace, name)): WorkflowPath,
) -> Result<Json<Empty>> {
    let session = state
        .session("/api.WorkflowService/TerminateWorkflow", &headers, &mut ())
        .await?;
    session.client.terminate_workflow(&namespace, &name).await?;
    Ok(Json(Empty {}))
}

/// Login check: exchange a service account token digest for the raw token
pub async fn is_valid_token(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(mut request): Json<IsValidTokenRequest>,
) -> Result<Json<IsValidTokenResponse>> {
    let session = state
        .session(IS_VALID_TOKEN_METHOD, &headers, &mut request)
        .await?;
    Ok(Json(IsValidTokenResponse {
        username: request.username,
        token: session.token,
    }))
}

pub async fn is_authorized(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(mut request): Json<IsAuthorizedRequest>,
) -> Result<Json<IsAuthorizedResponse>> {
    let session = state
        .session(IS_AUTHORIZED_METHOD, &headers, &mut request)
        .await?;
    let attributes = ResourceAttributes::from(&request.is_authorized);
    let authorized = session.is_authorized(&attributes).await?;
    Ok(Json(IsAuthorizedResponse { authorized }))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "control-plane",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Fallback for unknown routes
pub async fn not_found() -> impl IntoResponse {
    ControlPlaneError::NotFound(ErrorCode::NotFound.generic_message().to_string())
}

/// Panic handler for `CatchPanicLayer`
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %detail, "Handler panicked");
    ControlPlaneError::Unknown(ErrorCode::Unknown.generic_message().to_string()).into_response()
}

fn status_of(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error response implementation
impl IntoResponse for ControlPlaneError {
    fn into_response(self) -> Response {
        let code = self.code();
        let classified = matches!(
            self,
            ControlPlaneError::NotFound(_)
                | ControlPlaneError::InvalidArgument(_)
                | ControlPlaneError::PermissionDenied(_)
                | ControlPlaneError::Unauthenticated(_)
                | ControlPlaneError::Unknown(_)
        );
        if !classified {
            error!(code = ?code, error = %self, "Call failed");
        }

        let body = ErrorResponse {
            code,
            message: self.public_message(),
        };
        (status_of(code), Json(body)).into_response()
    }
}
