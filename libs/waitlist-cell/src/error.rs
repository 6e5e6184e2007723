use thiserror::Error;
use uuid::Uuid;

use schedule_cell::ReservationError;
use shared_models::error::AppError;

use crate::models::WaitlistStatus;

#[derive(Error, Debug)]
pub enum WaitlistError {
    #[error("Waitlist entry not found: {0}")]
    NotFound(Uuid),

    #[error("Waitlist entry {id} is {status}, not active")]
    NotActive { id: Uuid, status: WaitlistStatus },

    #[error("Waitlist entry {0} belongs to another patient")]
    Forbidden(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Reservation(#[from] ReservationError),
}

impl From<redis::RedisError> for WaitlistError {
    fn from(error: redis::RedisError) -> Self {
        WaitlistError::Persistence(format!("redis: {}", error))
    }
}

impl From<deadpool_redis::PoolError> for WaitlistError {
    fn from(error: deadpool_redis::PoolError) -> Self {
        WaitlistError::Persistence(format!("redis pool: {}", error))
    }
}

impl From<serde_json::Error> for WaitlistError {
    fn from(error: serde_json::Error) -> Self {
        WaitlistError::Persistence(format!("corrupt waitlist record: {}", error))
    }
}

impl From<WaitlistError> for AppError {
    fn from(error: WaitlistError) -> Self {
        match error {
            WaitlistError::NotFound(_) => AppError::NotFound(error.to_string()),
            WaitlistError::NotActive { .. } | WaitlistError::Conflict(_) => {
                AppError::Conflict(error.to_string())
            }
            WaitlistError::Forbidden(_) => AppError::Forbidden(error.to_string()),
            WaitlistError::Validation(_) => AppError::ValidationError(error.to_string()),
            WaitlistError::Persistence(_) => AppError::Database(error.to_string()),
            WaitlistError::Reservation(inner) => inner.into(),
        }
    }
}
