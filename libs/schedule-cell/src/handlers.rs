use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{auth::User, error::AppError};
use shared_utils::extractor::require_staff;

use crate::models::{
    parse_time_label, BookSlotRequest, CancelBookingRequest, HoldSlotRequest,
    PublishScheduleRequest, ScheduleFilter, SlotKey,
};
use crate::services::engine::SlotReservationEngine;

#[derive(Clone)]
pub struct ScheduleState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<SlotReservationEngine>,
}

fn slot_key(doctor_id: Uuid, date: NaiveDate, time: &str) -> Result<SlotKey, AppError> {
    let time = parse_time_label(time)?;
    Ok(SlotKey::new(doctor_id, date, time))
}

/// Free slots across published schedules, filtered by doctor, specialty and date.
pub async fn available_slots(
    State(state): State<ScheduleState>,
    Query(filter): Query<ScheduleFilter>,
) -> Result<Json<Value>, AppError> {
    let slots = state.engine.available_slots(&filter).await?;

    Ok(Json(json!({
        "slots": slots,
        "total": slots.len()
    })))
}

pub async fn publish_schedule(
    State(state): State<ScheduleState>,
    Extension(user): Extension<User>,
    Json(request): Json<PublishScheduleRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    info!("User {} publishing schedule for doctor {} on {}", user.id, request.doctor_id, request.date);

    let table = state.engine.publish(request).await?;

    Ok(Json(json!({
        "success": true,
        "schedule": table
    })))
}

pub async fn get_schedule(
    State(state): State<ScheduleState>,
    Path((doctor_id, date)): Path<(Uuid, NaiveDate)>,
) -> Result<Json<Value>, AppError> {
    let table = state.engine.get_table(doctor_id, date).await?;
    Ok(Json(json!(table)))
}

pub async fn hold_slot(
    State(state): State<ScheduleState>,
    Extension(user): Extension<User>,
    Path((doctor_id, date, time)): Path<(Uuid, NaiveDate, String)>,
    Json(request): Json<HoldSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let key = slot_key(doctor_id, date, &time)?;

    let ttl = request
        .ttl_seconds
        .map(|seconds| {
            i64::try_from(seconds)
                .ok()
                .and_then(Duration::try_seconds)
                .ok_or_else(|| AppError::ValidationError("ttl_seconds is too large".to_string()))
        })
        .transpose()?;

    let slot = state.engine.hold(&key, &user.id, ttl).await?;

    Ok(Json(json!({
        "success": true,
        "slot": slot
    })))
}

pub async fn release_slot(
    State(state): State<ScheduleState>,
    Extension(user): Extension<User>,
    Path((doctor_id, date, time)): Path<(Uuid, NaiveDate, String)>,
) -> Result<Json<Value>, AppError> {
    let key = slot_key(doctor_id, date, &time)?;
    let slot = state.engine.release(&key, &user.id).await?;

    Ok(Json(json!({
        "success": true,
        "slot": slot
    })))
}

pub async fn book_slot(
    State(state): State<ScheduleState>,
    Extension(user): Extension<User>,
    Path((doctor_id, date, time)): Path<(Uuid, NaiveDate, String)>,
    Json(request): Json<BookSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let key = slot_key(doctor_id, date, &time)?;
    let slot = state
        .engine
        .book(&key, &user.id, &request.appointment_ref)
        .await?;

    Ok(Json(json!({
        "success": true,
        "slot": slot
    })))
}

pub async fn cancel_booking(
    State(state): State<ScheduleState>,
    Extension(user): Extension<User>,
    Path((doctor_id, date, time)): Path<(Uuid, NaiveDate, String)>,
    Json(request): Json<CancelBookingRequest>,
) -> Result<Json<Value>, AppError> {
    let key = slot_key(doctor_id, date, &time)?;
    info!("User {} cancelling booking {} on {}", user.id, request.appointment_ref, key);

    let slot = state.engine.cancel(&key, &request.appointment_ref).await?;

    Ok(Json(json!({
        "success": true,
        "slot": slot
    })))
}

pub async fn block_slot(
    State(state): State<ScheduleState>,
    Extension(user): Extension<User>,
    Path((doctor_id, date, time)): Path<(Uuid, NaiveDate, String)>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let key = slot_key(doctor_id, date, &time)?;
    let slot = state.engine.block(&key).await?;

    Ok(Json(json!({
        "success": true,
        "slot": slot
    })))
}

pub async fn unblock_slot(
    State(state): State<ScheduleState>,
    Extension(user): Extension<User>,
    Path((doctor_id, date, time)): Path<(Uuid, NaiveDate, String)>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let key = slot_key(doctor_id, date, &time)?;
    let slot = state.engine.unblock(&key).await?;

    Ok(Json(json!({
        "success": true,
        "slot": slot
    })))
}
