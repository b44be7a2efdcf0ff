//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::web::state::AppState;
use study_planner_core::domain::{ScheduleItem, StudyPlan, Topic};
use study_planner_core::ports::PortError;

/// Default page size for plan listings.
const DEFAULT_PAGE_SIZE: u32 = 9;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        generate_topics_handler,
        generate_plan_handler,
        refine_plan_handler,
        list_study_plans_handler,
        get_study_plan_handler,
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        crate::web::auth::me_handler,
    ),
    components(
        schemas(
            GenerateTopicsRequest,
            GeneratePlanRequest,
            RefinePlanRequest,
            TopicsResponse,
            PlanResponse,
            PlanListResponse,
            crate::web::auth::SignupRequest,
            crate::web::auth::LoginRequest,
            crate::web::auth::AuthResponse,
            crate::web::auth::MeResponse,
        )
    ),
    tags(
        (name = "Study Planner API", description = "API endpoints for generating and refining study plans.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request and Response Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTopicsRequest {
    pub prompt: String,
    pub level: String,
    #[serde(default)]
    pub exclude_topics: Vec<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopicsResponse {
    #[schema(value_type = Vec<Object>)]
    pub topics: Vec<Topic>,
    pub tokens_used: i64,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePlanRequest {
    pub prompt: String,
    pub level: String,
    #[serde(default)]
    pub selected_topics: Vec<String>,
}

/// A generated (and, when the save succeeded, stored) plan.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub title: String,
    pub description: String,
    #[schema(value_type = Vec<Object>)]
    pub schedule: Vec<ScheduleItem>,
    pub tokens_used: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub study_plan_id: Option<Uuid>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefinePlanRequest {
    pub study_plan_id: Uuid,
    pub additional_topics: Vec<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanListResponse {
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<StudyPlan>,
    pub total: i64,
    pub page: u32,
    pub total_pages: u32,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

fn bad_request(message: &str) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.to_string())
}

/// Maps orchestration errors onto HTTP responses. Generation detail never
/// reaches the caller; it is logged and replaced with `failure_message`.
fn map_service_error(e: PortError, failure_message: &str) -> (StatusCode, String) {
    match e {
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
        other => {
            error!("{failure_message}: {other}");
            (StatusCode::INTERNAL_SERVER_ERROR, failure_message.to_string())
        }
    }
}

//=========================================================================================
// AI Workflow Handlers
//=========================================================================================

/// Generate a curated batch of candidate topics for a subject and level.
#[utoipa::path(
    post,
    path = "/ai/generate-topics",
    request_body = GenerateTopicsRequest,
    responses(
        (status = 200, description = "Exactly 20 candidate topics", body = TopicsResponse),
        (status = 400, description = "Missing prompt or level"),
        (status = 401, description = "No active session"),
        (status = 500, description = "Generation failed")
    )
)]
pub async fn generate_topics_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<GenerateTopicsRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let prompt = req.prompt.trim();
    let level = req.level.trim();
    if prompt.is_empty() || level.is_empty() {
        return Err(bad_request("prompt and level are required"));
    }

    let generated = state
        .planner
        .generate_topics(Some(user_id), prompt, level, &req.exclude_topics)
        .await
        .map_err(|e| map_service_error(e, "Failed to generate topics"))?;

    Ok(Json(TopicsResponse {
        topics: generated.topics,
        tokens_used: generated.tokens_used,
    }))
}

/// Generate a full study plan and persist it for the current user.
#[utoipa::path(
    post,
    path = "/ai/generate-plan",
    request_body = GeneratePlanRequest,
    responses(
        (status = 200, description = "The generated plan", body = PlanResponse),
        (status = 400, description = "Missing prompt or level"),
        (status = 401, description = "No active session"),
        (status = 500, description = "Generation failed")
    )
)]
pub async fn generate_plan_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<GeneratePlanRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let prompt = req.prompt.trim();
    let level = req.level.trim();
    if prompt.is_empty() || level.is_empty() {
        return Err(bad_request("prompt and level are required"));
    }

    let outcome = state
        .planner
        .generate_plan(user_id, prompt, level, &req.selected_topics)
        .await
        .map_err(|e| map_service_error(e, "Failed to generate plan"))?;

    Ok(Json(PlanResponse {
        title: outcome.plan.title,
        description: outcome.plan.description,
        schedule: outcome.plan.schedule,
        tokens_used: outcome.plan.tokens_used,
        study_plan_id: outcome.study_plan_id,
    }))
}

/// Merge additional topics into an existing plan owned by the current user.
#[utoipa::path(
    post,
    path = "/ai/refine-plan",
    request_body = RefinePlanRequest,
    responses(
        (status = 200, description = "The refined plan", body = PlanResponse),
        (status = 400, description = "No additional topics supplied"),
        (status = 401, description = "No active session"),
        (status = 404, description = "Study plan not found"),
        (status = 500, description = "Generation failed")
    )
)]
pub async fn refine_plan_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<RefinePlanRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.additional_topics.is_empty() {
        return Err(bad_request("additionalTopics must not be empty"));
    }

    let refined = state
        .planner
        .refine_plan(user_id, req.study_plan_id, &req.additional_topics)
        .await
        .map_err(|e| map_service_error(e, "Failed to refine plan"))?;

    Ok(Json(PlanResponse {
        title: refined.title,
        description: refined.description,
        schedule: refined.schedule,
        tokens_used: refined.tokens_used,
        study_plan_id: None,
    }))
}

//=========================================================================================
// Study Plan Handlers
//=========================================================================================

/// List the current user's plans, newest first.
#[utoipa::path(
    get,
    path = "/study-plans",
    params(
        ("page" = Option<u32>, Query, description = "1-based page number, defaults to 1"),
        ("limit" = Option<u32>, Query, description = "Page size, defaults to 9")
    ),
    responses(
        (status = 200, description = "One page of plans", body = PlanListResponse),
        (status = 401, description = "No active session"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_study_plans_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100);

    let plans_page = state
        .plans
        .list_by_owner(user_id, page, limit)
        .await
        .map_err(|e| map_service_error(e, "Failed to list study plans"))?;

    Ok(Json(PlanListResponse {
        data: plans_page.items,
        total: plans_page.total,
        page: plans_page.page,
        total_pages: plans_page.total_pages,
    }))
}

/// Fetch a single plan by id.
#[utoipa::path(
    get,
    path = "/study-plans/{id}",
    params(
        ("id" = Uuid, Path, description = "The plan's id")
    ),
    responses(
        (status = 200, description = "The plan"),
        (status = 401, description = "No active session"),
        (status = 404, description = "Study plan not found"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_study_plan_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let plan = state
        .plans
        .get_by_id(id)
        .await
        .map_err(|e| map_service_error(e, "Failed to load study plan"))?
        .ok_or((
            StatusCode::NOT_FOUND,
            "Study plan not found".to_string(),
        ))?;

    Ok(Json(plan))
}
