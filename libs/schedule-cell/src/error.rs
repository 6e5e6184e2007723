use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::SlotKey;

#[derive(Error, Debug)]
pub enum ReservationError {
    /// The slot was not in the expected state when the transition was
    /// applied. Expected under concurrency; callers re-query and decide.
    #[error("Slot {slot} conflict: expected {expected}, found {found}")]
    Conflict {
        slot: SlotKey,
        expected: String,
        found: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Schedule already published for doctor {doctor_id} on {date}")]
    DuplicateSchedule { doctor_id: Uuid, date: NaiveDate },

    #[error("Invalid slot set: {0}")]
    InvalidSlotSet(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl ReservationError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReservationError::Conflict { .. })
    }
}

impl From<redis::RedisError> for ReservationError {
    fn from(error: redis::RedisError) -> Self {
        ReservationError::Persistence(format!("redis: {}", error))
    }
}

impl From<deadpool_redis::PoolError> for ReservationError {
    fn from(error: deadpool_redis::PoolError) -> Self {
        ReservationError::Persistence(format!("redis pool: {}", error))
    }
}

impl From<serde_json::Error> for ReservationError {
    fn from(error: serde_json::Error) -> Self {
        ReservationError::Persistence(format!("corrupt slot record: {}", error))
    }
}

impl From<ReservationError> for AppError {
    fn from(error: ReservationError) -> Self {
        match error {
            ReservationError::Conflict { .. } | ReservationError::DuplicateSchedule { .. } => {
                AppError::Conflict(error.to_string())
            }
            ReservationError::NotFound(_) => AppError::NotFound(error.to_string()),
            ReservationError::InvalidSlotSet(_) | ReservationError::Validation(_) => {
                AppError::ValidationError(error.to_string())
            }
            ReservationError::Persistence(_) => AppError::Database(error.to_string()),
        }
    }
}
