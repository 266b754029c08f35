use axum::Json;
use axum::extract::{Path, Query};
use axum::routing::{patch, post};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::repository;
use crate::error::AppError;
use crate::models::*;
use crate::services::{BlockStatusChange, ReconcileReport, block_status, composer};
use crate::state::AppState;

#[derive(Deserialize)]
struct AssignmentQueryParams {
    #[serde(default)]
    include_inactive: bool,
}

#[derive(Deserialize)]
struct SetStatusRequest {
    status: BlockStatus,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/students/{student_id}/assignments",
            get(list_assignments).post(create_assignment),
        )
        .route(
            "/assignments/{id}",
            patch(update_assignment).delete(delete_assignment),
        )
        .route("/students/{student_id}/template", post(create_template_block))
        .route("/students/{student_id}/template/{weekday}", get(list_template_blocks))
        .route("/students/{student_id}/reconcile", post(run_reconciliation))
        .route("/students/{student_id}/schedule/{date}", get(compose_schedule))
        .route(
            "/students/{student_id}/schedule/{date}/blocks/{block_id}",
            get(get_block_status).put(set_block_status),
        )
        .route(
            "/students/{student_id}/schedule/{date}/blocks/{block_id}/advance",
            post(advance_block_status),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

async fn list_assignments(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Query(params): Query<AssignmentQueryParams>,
) -> Result<Json<Vec<Assignment>>, AppError> {
    let assignments =
        repository::fetch_assignments(&state.db, &student_id, params.include_inactive).await?;
    Ok(Json(assignments))
}

async fn create_assignment(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Json(req): Json<NewAssignmentRequest>,
) -> Result<(StatusCode, Json<Assignment>), AppError> {
    if req.title.trim().is_empty() {
        return Err(AppError::BadRequest("title must not be empty".to_string()));
    }
    let assignment =
        repository::insert_assignment(&state.db, NewAssignment::manual(&student_id, req)).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

async fn update_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateAssignmentRequest>,
) -> Result<Json<Assignment>, AppError> {
    let assignment = repository::update_assignment(&state.db, &id, req)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(assignment))
}

async fn delete_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let ok = repository::delete_assignment(&state.db, &id).await?;
    if ok {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

async fn create_template_block(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Json(req): Json<NewTemplateBlockRequest>,
) -> Result<(StatusCode, Json<ScheduleTemplateBlock>), AppError> {
    if !(0..=6).contains(&req.weekday) {
        return Err(AppError::BadRequest(format!(
            "weekday must be 0 (Monday) to 6 (Sunday), got {}",
            req.weekday
        )));
    }
    if req.end_time <= req.start_time {
        return Err(AppError::BadRequest("end_time must be after start_time".to_string()));
    }
    let block = repository::insert_template_block(&state.db, &student_id, req).await?;
    Ok((StatusCode::CREATED, Json(block)))
}

async fn list_template_blocks(
    State(state): State<AppState>,
    Path((student_id, weekday)): Path<(String, i64)>,
) -> Result<Json<Vec<ScheduleTemplateBlock>>, AppError> {
    let blocks = repository::fetch_blocks_for_weekday(&state.db, &student_id, weekday).await?;
    Ok(Json(blocks))
}

async fn run_reconciliation(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> Result<Json<ReconcileReport>, AppError> {
    let report = state.reconciler().run_reconciliation(&student_id).await?;
    Ok(Json(report))
}

async fn compose_schedule(
    State(state): State<AppState>,
    Path((student_id, date)): Path<(String, NaiveDate)>,
) -> Result<Json<ComposedSchedule>, AppError> {
    let schedule =
        composer::compose_schedule(&state.db, &student_id, date, &state.config.near_duplicate)
            .await?;
    Ok(Json(schedule))
}

async fn get_block_status(
    State(state): State<AppState>,
    Path((student_id, date, block_id)): Path<(String, NaiveDate, i64)>,
) -> Result<Json<BlockStatusChange>, AppError> {
    let status = block_status::get_block_status(&state.db, &student_id, date, block_id).await?;
    Ok(Json(status))
}

async fn advance_block_status(
    State(state): State<AppState>,
    Path((student_id, date, block_id)): Path<(String, NaiveDate, i64)>,
) -> Result<Json<BlockStatusChange>, AppError> {
    let status =
        block_status::advance_block_status(&state.db, &student_id, date, block_id).await?;
    Ok(Json(status))
}

async fn set_block_status(
    State(state): State<AppState>,
    Path((student_id, date, block_id)): Path<(String, NaiveDate, i64)>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<BlockStatusChange>, AppError> {
    let status =
        block_status::set_block_status(&state.db, &student_id, date, block_id, req.status).await?;
    Ok(Json(status))
}
