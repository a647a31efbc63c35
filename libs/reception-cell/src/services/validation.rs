use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::{ReceptionError, ReceptionResult};
use crate::models::{PatientProfile, ReceptionRequest, ReceptionType};

pub const MAX_NOTES_CHARS: usize = 1000;

/// Normalized phone: optional leading `+`, then 8 to 15 digits.
static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9]{8,15}$").expect("phone pattern is a valid regex"));

/// Checks a reception request before any transaction is opened.
///
/// A missing patient (no id and no profile) is not rejected here; the resolver reports it
/// as `PatientUnresolved`.
pub fn validate_request(request: &ReceptionRequest, today: NaiveDate) -> ReceptionResult<()> {
    let appointment = &request.appointment;

    if appointment.staff_id <= 0 {
        return Err(ReceptionError::Validation(
            "staffId must be a positive integer".to_string(),
        ));
    }

    if appointment.room_id <= 0 {
        return Err(ReceptionError::Validation(
            "roomId must be a positive integer".to_string(),
        ));
    }

    if let Some(notes) = &appointment.notes {
        if notes.chars().count() > MAX_NOTES_CHARS {
            return Err(ReceptionError::Validation(format!(
                "notes cannot exceed {} characters",
                MAX_NOTES_CHARS
            )));
        }
    }

    match request.reception_type {
        ReceptionType::Online => {
            if request.original_appointment_id.is_none() {
                return Err(ReceptionError::Validation(
                    "originalAppointmentId is required for online reception".to_string(),
                ));
            }
        }
        ReceptionType::Direct => {
            if appointment.appointment_date < today {
                return Err(ReceptionError::Validation(format!(
                    "appointmentDate {} is in the past",
                    appointment.appointment_date
                )));
            }
        }
    }

    if request.existing_patient_id.is_none() {
        if let Some(profile) = &request.patient {
            validate_profile(profile)?;
        }
    }

    Ok(())
}

pub fn validate_profile(profile: &PatientProfile) -> ReceptionResult<()> {
    if profile.full_name.trim().is_empty() {
        return Err(ReceptionError::Validation("fullName is required".to_string()));
    }

    if !PHONE_PATTERN.is_match(&profile.normalized_phone()) {
        return Err(ReceptionError::Validation(format!(
            "phone '{}' must contain 8 to 15 digits",
            profile.phone
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentDetails;
    use assert_matches::assert_matches;
    use chrono::NaiveTime;
    use uuid::Uuid;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    fn profile(full_name: &str, phone: &str) -> PatientProfile {
        PatientProfile {
            full_name: full_name.to_string(),
            phone: phone.to_string(),
            email: None,
            gender: None,
            address: None,
            medical_history: None,
        }
    }

    fn direct_request() -> ReceptionRequest {
        ReceptionRequest {
            patient: Some(profile("Nguyen Van A", "0901 234 567")),
            existing_patient_id: None,
            appointment: AppointmentDetails {
                staff_id: 1,
                room_id: 1,
                appointment_date: today(),
                appointment_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                notes: None,
                service_type: None,
            },
            reception_type: ReceptionType::Direct,
            original_appointment_id: None,
        }
    }

    #[test]
    fn test_valid_direct_request() {
        assert!(validate_request(&direct_request(), today()).is_ok());
    }

    #[test]
    fn test_rejects_non_positive_ids() {
        let mut request = direct_request();
        request.appointment.staff_id = 0;
        assert_matches!(
            validate_request(&request, today()),
            Err(ReceptionError::Validation(msg)) if msg.contains("staffId")
        );

        let mut request = direct_request();
        request.appointment.room_id = -2;
        assert_matches!(
            validate_request(&request, today()),
            Err(ReceptionError::Validation(msg)) if msg.contains("roomId")
        );
    }

    #[test]
    fn test_online_requires_original_appointment() {
        let mut request = direct_request();
        request.reception_type = ReceptionType::Online;
        assert_matches!(validate_request(&request, today()), Err(ReceptionError::Validation(_)));

        request.original_appointment_id = Some(Uuid::new_v4());
        assert!(validate_request(&request, today()).is_ok());
    }

    #[test]
    fn test_direct_date_cannot_be_in_the_past() {
        let mut request = direct_request();
        request.appointment.appointment_date = today().pred_opt().unwrap();
        assert_matches!(validate_request(&request, today()), Err(ReceptionError::Validation(_)));

        // Online check-ins honour whatever date was booked.
        request.reception_type = ReceptionType::Online;
        request.original_appointment_id = Some(Uuid::new_v4());
        assert!(validate_request(&request, today()).is_ok());
    }

    #[test]
    fn test_notes_length_limit() {
        let mut request = direct_request();
        request.appointment.notes = Some("x".repeat(MAX_NOTES_CHARS));
        assert!(validate_request(&request, today()).is_ok());

        request.appointment.notes = Some("x".repeat(MAX_NOTES_CHARS + 1));
        assert_matches!(validate_request(&request, today()), Err(ReceptionError::Validation(_)));
    }

    #[test]
    fn test_profile_rules() {
        assert!(validate_profile(&profile("Tran Thi B", "+84 901-234-567")).is_ok());
        assert!(validate_profile(&profile("   ", "0901234567")).is_err());
        assert!(validate_profile(&profile("Tran Thi B", "12345")).is_err());
        assert!(validate_profile(&profile("Tran Thi B", "0901abc567")).is_err());
    }

    #[test]
    fn test_profile_ignored_when_existing_patient_given() {
        let mut request = direct_request();
        request.patient = Some(profile("", "bad"));
        request.existing_patient_id = Some(Uuid::new_v4());
        assert!(validate_request(&request, today()).is_ok());
    }
}
