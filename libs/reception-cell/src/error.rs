use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::AppointmentStatus;

/// Postgres `lock_not_available`, raised when `lock_timeout` expires.
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";
const PG_DEADLOCK_DETECTED: &str = "40P01";

#[derive(Error, Debug)]
pub enum ReceptionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Time slot {date} {time} is full ({capacity} active appointments)")]
    SlotFull {
        date: NaiveDate,
        time: NaiveTime,
        capacity: i64,
    },

    #[error("Either existingPatientId or a patient profile is required")]
    PatientUnresolved,

    #[error("Appointment {id} was already checked in (status: {status})")]
    AlreadyClaimed { id: Uuid, status: AppointmentStatus },

    #[error("Original appointment {0} not found")]
    OriginalAppointmentNotFound(Uuid),

    #[error("Patient {patient_id} already has an active appointment on {date}")]
    DuplicateBooking { patient_id: Uuid, date: NaiveDate },

    #[error("Timed out waiting for lock: {0}")]
    ConcurrencyTimeout(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type ReceptionResult<T> = Result<T, ReceptionError>;

impl ReceptionError {
    /// Stable classification reported to callers next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ReceptionError::Validation(_) => "validation",
            ReceptionError::SlotFull { .. } => "slot_full",
            ReceptionError::PatientUnresolved => "patient_unresolved",
            ReceptionError::AlreadyClaimed { .. } => "already_claimed",
            ReceptionError::OriginalAppointmentNotFound(_) => "original_appointment_not_found",
            ReceptionError::DuplicateBooking { .. } => "duplicate_booking",
            ReceptionError::ConcurrencyTimeout(_) => "concurrency_timeout",
            ReceptionError::Storage(_) => "storage",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ReceptionError::Validation(_) | ReceptionError::PatientUnresolved => {
                StatusCode::BAD_REQUEST
            }
            ReceptionError::OriginalAppointmentNotFound(_) => StatusCode::NOT_FOUND,
            ReceptionError::SlotFull { .. }
            | ReceptionError::AlreadyClaimed { .. }
            | ReceptionError::DuplicateBooking { .. } => StatusCode::CONFLICT,
            ReceptionError::ConcurrencyTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            ReceptionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ReceptionError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(PG_LOCK_NOT_AVAILABLE) | Some(PG_DEADLOCK_DETECTED) => {
                    ReceptionError::ConcurrencyTimeout(db.message().to_string())
                }
                _ => ReceptionError::Storage(err.to_string()),
            },
            sqlx::Error::PoolTimedOut => {
                ReceptionError::ConcurrencyTimeout("no database connection available".to_string())
            }
            _ => ReceptionError::Storage(err.to_string()),
        }
    }
}

impl IntoResponse for ReceptionError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        match &self {
            ReceptionError::Storage(_) => tracing::error!("Reception failed: {}: {}", status, message),
            _ => tracing::warn!("Reception rejected: {}: {}", status, message),
        }

        let body = Json(json!({
            "error": message,
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_conflicts_map_to_409() {
        let conflicts = [
            ReceptionError::SlotFull {
                date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                capacity: 10,
            },
            ReceptionError::AlreadyClaimed {
                id: Uuid::nil(),
                status: AppointmentStatus::Waiting,
            },
            ReceptionError::DuplicateBooking {
                patient_id: Uuid::nil(),
                date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
            },
        ];

        for err in conflicts {
            assert_eq!(err.status(), StatusCode::CONFLICT, "{}", err.kind());
        }
    }

    #[test]
    fn test_pool_timeout_is_a_concurrency_timeout() {
        let err = ReceptionError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), "concurrency_timeout");
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
