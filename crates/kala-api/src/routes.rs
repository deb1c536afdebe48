//! Thin CRUD mapping onto `JobCache`/`RunningGate` operations. No
//! scheduling logic lives here — every handler is a direct call into the
//! engine.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use kala_core::error::CacheError;
use kala_core::job::{JobType, RemoteConfig};
use kala_core::{IsoDuration, JobCache, NewJob};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::auth::{require_token, AuthToken};

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<JobCache>,
}

pub fn router(state: AppState, token: String) -> Router {
    let protected = Router::new()
        .route("/api/v1/job", post(create_job).get(list_jobs))
        .route("/api/v1/job/all", delete(delete_all))
        .route("/api/v1/job/start/{id}", post(start_job))
        .route("/api/v1/job/enable/{id}", post(enable_job))
        .route("/api/v1/job/disable/{id}", post(disable_job))
        .route("/api/v1/job/stats/{id}", get(job_stats))
        .route("/api/v1/job/{id}", get(get_job).delete(delete_job))
        .route("/api/v1/stats", get(system_stats))
        .route_layer(axum::middleware::from_fn_with_state(AuthToken(token), require_token))
        .with_state(state);

    let public = Router::new().route("/api/v1/health", get(health));

    Router::new().merge(public).merge(protected).layer(CorsLayer::permissive())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub remote_properties: Option<RemoteConfig>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub epsilon: Option<String>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub resume_at_next_scheduled_time: bool,
    #[serde(default)]
    pub template_delimiters: Option<String>,
    #[serde(default)]
    pub parent_jobs: Vec<Uuid>,
    #[serde(default)]
    pub dependent_jobs: Vec<Uuid>,
    #[serde(default)]
    pub on_failure_job: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: Uuid,
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        let status = match &e {
            CacheError::DoesntExist(_) => StatusCode::NOT_FOUND,
            CacheError::RunningJobDelete(_)
            | CacheError::DoneJobDisable(_)
            | CacheError::InvalidJob(_)
            | CacheError::CyclicDependency => StatusCode::BAD_REQUEST,
            CacheError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<Response, ApiError> {
    let epsilon = match &req.epsilon {
        Some(s) if !s.trim().is_empty() => {
            Some(IsoDuration::parse(s).map_err(|e| ApiError(StatusCode::BAD_REQUEST, e.to_string()))?)
        }
        _ => None,
    };

    let input = NewJob {
        name: req.name,
        owner: req.owner,
        group_name: req.group_name,
        content: req.content,
        job_type: req.job_type,
        command: req.command,
        remote: req.remote_properties,
        schedule_str: req.schedule,
        epsilon,
        retries: req.retries,
        resume_at_next_scheduled_time: req.resume_at_next_scheduled_time,
        template_delimiters: req.template_delimiters,
        parent_jobs: req.parent_jobs,
        dependent_jobs: req.dependent_jobs,
        on_failure_job: req.on_failure_job,
    };

    let job = state.cache.create(input).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: job.id })).into_response())
}

async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    let views = state.cache.list_views().await;
    let jobs: HashMap<Uuid, _> = views.into_iter().map(|v| (v.id, v)).collect();
    Json(serde_json::json!({ "jobs": jobs }))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response, ApiError> {
    let job = state.cache.get(id).ok_or(CacheError::DoesntExist(id))?;
    Ok(Json(job.view()).into_response())
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub force: bool,
}

async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode, ApiError> {
    state.cache.delete(id, !params.force).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_all(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.cache.delete_all().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    let job = state.cache.get(id).ok_or(CacheError::DoesntExist(id))?;
    state.cache.run_job_now(job).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.cache.enable(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disable_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.cache.disable(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn job_stats(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response, ApiError> {
    let job = state.cache.get(id).ok_or(CacheError::DoesntExist(id))?;
    Ok(Json(job.stats()).into_response())
}

async fn system_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.system_stats().await)
}
