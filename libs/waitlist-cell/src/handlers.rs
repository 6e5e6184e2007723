use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use schedule_cell::SlotReservationEngine;
use shared_config::AppConfig;
use shared_models::{auth::User, error::AppError};

use crate::models::{AcceptOfferRequest, JoinWaitlistRequest};
use crate::services::coordinator::WaitlistCoordinator;

#[derive(Clone)]
pub struct WaitlistState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<SlotReservationEngine>,
    pub coordinator: Arc<WaitlistCoordinator>,
}

pub async fn join_waitlist(
    State(state): State<WaitlistState>,
    Extension(user): Extension<User>,
    Json(request): Json<JoinWaitlistRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Waitlist join request from user: {}", user.id);

    let entry = state.coordinator.join(&user.id, request).await?;

    Ok(Json(json!({
        "success": true,
        "entry": entry
    })))
}

pub async fn list_my_entries(
    State(state): State<WaitlistState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let entries = state.coordinator.list_for_patient(&user.id).await?;

    Ok(Json(json!({
        "entries": entries,
        "total": entries.len()
    })))
}

pub async fn withdraw_entry(
    State(state): State<WaitlistState>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let entry = state.coordinator.withdraw(entry_id, &user.id).await?;

    Ok(Json(json!({
        "success": true,
        "entry": entry
    })))
}

pub async fn accept_offer(
    State(state): State<WaitlistState>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
    Json(request): Json<AcceptOfferRequest>,
) -> Result<Json<Value>, AppError> {
    info!("User {} accepting offer on waitlist entry {}", user.id, entry_id);

    let entry = state
        .coordinator
        .accept_offer(&state.engine, entry_id, &user.id, &request.appointment_ref)
        .await?;

    Ok(Json(json!({
        "success": true,
        "entry": entry
    })))
}
