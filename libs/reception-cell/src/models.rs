// libs/reception-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ==============================================================================
// STATUS MODELS
// ==============================================================================

/// Lifecycle of an appointment.
///
/// `Ordered → Waiting → InProgress → Completed`, and any non-terminal state may be
/// `Cancelled`. Reception only ever produces `Ordered → Waiting` (claiming an online
/// booking) or a fresh `Waiting` appointment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Ordered,
    Waiting,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Statuses that occupy a slot and count toward a patient's daily booking.
    pub const ACTIVE: [AppointmentStatus; 3] = [
        AppointmentStatus::Ordered,
        AppointmentStatus::Waiting,
        AppointmentStatus::InProgress,
    ];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn valid_transitions(self) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;
        match self {
            Ordered => &[Waiting, Cancelled],
            Waiting => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: AppointmentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Ordered => "ordered",
            AppointmentStatus::Waiting => "waiting",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ordered" => Ok(AppointmentStatus::Ordered),
            "waiting" => Ok(AppointmentStatus::Waiting),
            "in_progress" => Ok(AppointmentStatus::InProgress),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    InProgress,
    Completed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Completed => "completed",
            QueueStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(QueueStatus::Waiting),
            "in_progress" => Ok(QueueStatus::InProgress),
            "completed" => Ok(QueueStatus::Completed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Closed,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Closed => "closed",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecordStatus::Active),
            "closed" => Ok(RecordStatus::Closed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status value: {0}")]
pub struct UnknownStatus(pub String);

// ==============================================================================
// STORED ENTITIES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub id: Uuid,
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub record_number: String,
    pub status: RecordStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub staff_id: i32,
    pub room_id: i32,
    pub medical_record_id: Option<Uuid>,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub service_type: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueTicket {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Uuid,
    pub medical_record_id: Uuid,
    pub room_id: i32,
    pub queue_date: NaiveDate,
    pub queue_number: i32,
    pub status: QueueStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReceptionType {
    /// Check-in that fulfils an appointment booked online beforehand.
    Online,
    /// Walk-in check-in with no prior booking.
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientProfile {
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub medical_history: Option<String>,
}

impl PatientProfile {
    /// Phone with spaces, dots and dashes removed; this is the value stored and matched on.
    pub fn normalized_phone(&self) -> String {
        normalize_phone(&self.phone)
    }
}

pub fn normalize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDetails {
    pub staff_id: i32,
    pub room_id: i32,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub notes: Option<String>,
    pub service_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceptionRequest {
    pub patient: Option<PatientProfile>,
    pub existing_patient_id: Option<Uuid>,
    pub appointment: AppointmentDetails,
    pub reception_type: ReceptionType,
    pub original_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceptionResponse {
    pub queue: QueueTicket,
    pub patient: PatientSummary,
    pub queue_number: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_ordered_can_be_claimed() {
        use AppointmentStatus::*;

        assert!(Ordered.can_transition_to(Waiting));
        for status in [Waiting, InProgress, Completed, Cancelled] {
            assert!(!status.can_transition_to(Waiting), "{} -> waiting", status);
        }
    }

    #[test]
    fn test_terminal_statuses_have_no_transitions() {
        assert!(AppointmentStatus::Completed.valid_transitions().is_empty());
        assert!(AppointmentStatus::Cancelled.valid_transitions().is_empty());
        assert!(AppointmentStatus::InProgress.can_transition_to(AppointmentStatus::Cancelled));
        assert!(!AppointmentStatus::Waiting.can_transition_to(AppointmentStatus::Ordered));
    }

    #[test]
    fn test_active_set() {
        let active: Vec<_> = [
            AppointmentStatus::Ordered,
            AppointmentStatus::Waiting,
            AppointmentStatus::InProgress,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
        ]
        .into_iter()
        .filter(|s| s.is_active())
        .collect();

        assert_eq!(active, AppointmentStatus::ACTIVE.to_vec());
    }

    #[test]
    fn test_status_strings_parse_back() {
        for status in AppointmentStatus::ACTIVE {
            assert_eq!(status.as_str().parse::<AppointmentStatus>(), Ok(status));
        }
        assert_eq!("closed".parse::<RecordStatus>(), Ok(RecordStatus::Closed));
        assert!("checked_in".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn test_request_uses_camel_case() {
        let request: ReceptionRequest = serde_json::from_value(serde_json::json!({
            "patient": { "fullName": "Tran Thi B", "phone": "090 123-4567" },
            "appointment": {
                "staffId": 3,
                "roomId": 2,
                "appointmentDate": "2026-10-17",
                "appointmentTime": "09:30:00"
            },
            "receptionType": "direct"
        }))
        .unwrap();

        assert_eq!(request.reception_type, ReceptionType::Direct);
        assert_eq!(request.appointment.room_id, 2);
        assert_eq!(request.patient.unwrap().normalized_phone(), "0901234567");
        assert!(request.existing_patient_id.is_none());
    }
}
