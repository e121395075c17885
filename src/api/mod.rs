//! JSON API over the [`Queue`], for operators and web front ends.
//!
//! Every route except login requires a session token in the
//! `AuthorizationToken` header. Read-Only users may read, Standard Users
//! may also manage jobs, Administrators may manage the queue and resources.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::auth::{Authenticator, Role, TokenStore, User};
use crate::error::Error;
use crate::job::Job;
use crate::scheduler::{Queue, ResourceInfo};
use crate::tool::Tool;

pub const TOKEN_HEADER: &str = "AuthorizationToken";

#[derive(Clone)]
pub struct ApiState {
    pub queue: Arc<Queue>,
    pub tokens: Arc<TokenStore>,
    pub authenticator: Arc<dyn Authenticator>,
}

/// Error body: `{"status": <code>, "errors": [...]}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    messages: Vec<String>,
}

impl ApiError {
    fn many(errors: Vec<Error>) -> Self {
        let status = errors
            .first()
            .map(status_for)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            messages: errors.iter().map(ToString::to_string).collect(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            messages: vec![message.into()],
        }
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Authentication => StatusCode::UNAUTHORIZED,
        Error::Forbidden => StatusCode::FORBIDDEN,
        Error::JobNotFound(_) | Error::ToolNotFound(_) | Error::ResourceNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        Error::AlreadyFinished { .. }
        | Error::InvalidTransition { .. }
        | Error::DuplicateResource(_) => StatusCode::CONFLICT,
        Error::InvalidParameter(_) | Error::StackReorder { .. } => StatusCode::BAD_REQUEST,
        Error::Unavailable(_) | Error::Transport(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self {
            status: status_for(&err),
            messages: vec![err.to_string()],
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": self.status.as_u16(),
            "errors": self.messages,
        }));
        (self.status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn ok() -> ApiResult<serde_json::Value> {
    Ok(Json(json!({ "status": 200 })))
}

fn collected(errors: Vec<Error>) -> ApiResult<serde_json::Value> {
    if errors.is_empty() {
        ok()
    } else {
        Err(ApiError::many(errors))
    }
}

async fn authorize(state: &ApiState, headers: &HeaderMap, required: Role) -> Result<User, ApiError> {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::Authentication)?;
    if !state.tokens.check_token(token).await {
        return Err(Error::Authentication.into());
    }
    let user = state.tokens.get_user(token).await?;
    if !user.allowed(required) {
        tracing::info!(user = %user.username, required = %required, "Request forbidden");
        return Err(Error::Forbidden.into());
    }
    Ok(user)
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/login", post(login_handler))
        .route("/api/logout", get(logout_handler))
        .route("/api/jobs", get(list_jobs_handler).post(create_job_handler))
        .route(
            "/api/jobs/{id}",
            get(read_job_handler)
                .put(update_job_handler)
                .delete(delete_job_handler),
        )
        .route("/api/queue", axum::routing::put(update_queue_handler))
        .route(
            "/api/resources",
            get(list_resources_handler).post(create_resource_handler),
        )
        .route(
            "/api/resources/{id}",
            get(read_resource_handler)
                .put(update_resource_handler)
                .delete(delete_resource_handler),
        )
        .route("/api/tools", get(list_tools_handler))
        .route("/api/types", get(list_types_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_api(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) -> crate::error::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, state, shutdown).await
}

pub async fn serve_listener(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> crate::error::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "Starting API server");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("API server stopped");
    Ok(())
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    role: Option<Role>,
}

async fn login_handler(
    State(state): State<ApiState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let user = state.authenticator.login(&req.username, &req.password).await?;
    let role = user.effective_role();
    let token = TokenStore::generate_token();
    tracing::info!(user = %user.username, role = ?role, "User logged in");
    state.tokens.add_token(token.clone(), user).await;
    Ok(Json(LoginResponse { token, role }))
}

async fn logout_handler(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<serde_json::Value> {
    let user = authorize(&state, &headers, Role::ReadOnly).await?;
    if let Some(token) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        state.tokens.remove_token(token).await;
    }
    tracing::info!(user = %user.username, "User logged out");
    ok()
}

async fn list_jobs_handler(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Vec<Job>> {
    authorize(&state, &headers, Role::ReadOnly).await?;
    Ok(Json(state.queue.all_jobs().await))
}

#[derive(Deserialize)]
struct CreateJobRequest {
    #[serde(rename = "toolid")]
    tool_id: Uuid,
    name: String,
    #[serde(default)]
    params: HashMap<String, String>,
}

#[derive(Serialize)]
struct CreateJobResponse {
    #[serde(rename = "jobid")]
    job_id: Uuid,
}

async fn create_job_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<CreateJobRequest>,
) -> ApiResult<CreateJobResponse> {
    let user = authorize(&state, &headers, Role::StandardUser).await?;
    let mut job = Job::new(req.tool_id, req.name, user.username);
    job.parameters = req.params;
    let job_id = state.queue.add_job(job).await?;
    Ok(Json(CreateJobResponse { job_id }))
}

async fn read_job_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Job> {
    authorize(&state, &headers, Role::ReadOnly).await?;
    Ok(Json(state.queue.job_info(id).await?))
}

#[derive(Deserialize)]
struct StatusChange {
    status: String,
}

async fn update_job_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusChange>,
) -> ApiResult<serde_json::Value> {
    authorize(&state, &headers, Role::StandardUser).await?;
    match req.status.as_str() {
        "pause" => state.queue.pause_job(id).await?,
        "resume" => state.queue.resume_job(id).await?,
        "quit" => state.queue.quit_job(id).await?,
        other => return Err(ApiError::bad_request(format!("unknown job action '{}'", other))),
    }
    ok()
}

async fn delete_job_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    authorize(&state, &headers, Role::StandardUser).await?;
    state.queue.remove_job(id).await?;
    ok()
}

#[derive(Deserialize)]
struct QueueUpdate {
    status: Option<String>,
    order: Option<Vec<String>>,
}

async fn update_queue_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<QueueUpdate>,
) -> ApiResult<serde_json::Value> {
    authorize(&state, &headers, Role::Administrator).await?;
    if let Some(order) = req.order {
        return collected(state.queue.stack_reorder(&order).await);
    }
    match req.status.as_deref() {
        Some("pause") => collected(state.queue.pause_queue().await),
        Some("resume") => {
            state.queue.resume_queue().await;
            ok()
        }
        Some(other) => Err(ApiError::bad_request(format!("unknown queue action '{}'", other))),
        None => Err(ApiError::bad_request("expected 'status' or 'order'")),
    }
}

async fn list_resources_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Vec<ResourceInfo>> {
    authorize(&state, &headers, Role::ReadOnly).await?;
    Ok(Json(state.queue.get_resources().await))
}

#[derive(Deserialize)]
struct CreateResourceRequest {
    address: String,
    name: String,
    key: String,
}

#[derive(Serialize)]
struct CreateResourceResponse {
    #[serde(rename = "resourceid")]
    resource_id: Uuid,
}

async fn create_resource_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<CreateResourceRequest>,
) -> ApiResult<CreateResourceResponse> {
    authorize(&state, &headers, Role::Administrator).await?;
    let resource_id = state
        .queue
        .add_resource(&req.address, &req.name, &req.key)
        .await?;
    Ok(Json(CreateResourceResponse { resource_id }))
}

#[derive(Serialize)]
struct ResourceDetail {
    #[serde(flatten)]
    resource: ResourceInfo,
    jobs: Vec<Job>,
}

async fn read_resource_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<ResourceDetail> {
    authorize(&state, &headers, Role::ReadOnly).await?;
    let resource = state.queue.get_resource(id).await?;
    let jobs = state.queue.jobs_by_resource(id).await;
    Ok(Json(ResourceDetail { resource, jobs }))
}

async fn update_resource_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusChange>,
) -> ApiResult<serde_json::Value> {
    authorize(&state, &headers, Role::Administrator).await?;
    match req.status.as_str() {
        "pause" => collected(state.queue.pause_resource(id).await),
        "resume" => {
            state.queue.resume_resource(id).await?;
            ok()
        }
        other => Err(ApiError::bad_request(format!("unknown resource action '{}'", other))),
    }
}

async fn delete_resource_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    authorize(&state, &headers, Role::Administrator).await?;
    collected(state.queue.remove_resource(id).await)
}

async fn list_tools_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<HashMap<Uuid, Tool>> {
    authorize(&state, &headers, Role::ReadOnly).await?;
    Ok(Json(state.queue.tools().await))
}

async fn list_types_handler(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Vec<String>> {
    authorize(&state, &headers, Role::ReadOnly).await?;
    Ok(Json(state.queue.types().await))
}
