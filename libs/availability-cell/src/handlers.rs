use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AvailabilityQuery, CreateRecurringWindowRequest, CreateTimeBlockRequest,
    RecurringWindow, TimeBlockView,
};
use crate::services::{ScheduleService, SlotGenerator};

// ==============================================================================
// PUBLIC HANDLERS (NO AUTHENTICATION REQUIRED)
// ==============================================================================

/// Bookable `HH:mm` start times for one professional, location and day.
#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Vec<String>>, AppError> {
    let generator = SlotGenerator::from_config(&state)?;

    let slots = generator.compute_availability(&query).await?;

    Ok(Json(slots))
}

// ==============================================================================
// PROTECTED SCHEDULE MANAGEMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_schedules(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<RecurringWindow>>, AppError> {
    let schedule_service = ScheduleService::new(&state)?;

    let windows = schedule_service.list_recurring_windows(&user.id, auth.token()).await?;

    Ok(Json(windows))
}

#[axum::debug_handler]
pub async fn add_schedule(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateRecurringWindowRequest>,
) -> Result<(StatusCode, Json<RecurringWindow>), AppError> {
    let schedule_service = ScheduleService::new(&state)?;

    let window = schedule_service.add_recurring_window(&user.id, request, auth.token()).await?;

    Ok((StatusCode::CREATED, Json(window)))
}

#[axum::debug_handler]
pub async fn remove_schedule(
    State(state): State<Arc<AppConfig>>,
    Path(schedule_id): Path<i64>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let schedule_service = ScheduleService::new(&state)?;

    schedule_service.remove_recurring_window(&user.id, schedule_id, auth.token()).await?;

    Ok(Json(json!({
        "message": "Schedule removed",
        "schedule_id": schedule_id
    })))
}

#[axum::debug_handler]
pub async fn list_time_blocks(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<TimeBlockView>>, AppError> {
    let schedule_service = ScheduleService::new(&state)?;

    let blocks = schedule_service.list_time_blocks(&user.id, auth.token()).await?;

    Ok(Json(blocks))
}

#[axum::debug_handler]
pub async fn add_time_block(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateTimeBlockRequest>,
) -> Result<(StatusCode, Json<TimeBlockView>), AppError> {
    let schedule_service = ScheduleService::new(&state)?;

    let block = schedule_service.add_time_block(&user.id, request, auth.token()).await?;

    Ok((StatusCode::CREATED, Json(block)))
}

#[axum::debug_handler]
pub async fn remove_time_block(
    State(state): State<Arc<AppConfig>>,
    Path(block_id): Path<i64>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let schedule_service = ScheduleService::new(&state)?;

    schedule_service.remove_time_block(&user.id, block_id, auth.token()).await?;

    Ok(Json(json!({
        "message": "Time block removed",
        "block_id": block_id
    })))
}
