use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ReceptionError, ReceptionResult};
use crate::models::{Appointment, AppointmentDetails, AppointmentStatus};
use crate::store::{LockKey, ReceptionTx};

/// Produces the appointment a queue ticket is issued for: either the online booking being
/// checked in, or a new walk-in appointment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppointmentClaimer;

impl AppointmentClaimer {
    pub fn new() -> Self {
        Self
    }

    /// Moves an online booking from `Ordered` to `Waiting` under its row lock, filling in the
    /// details chosen at the desk. Only one reception can ever win this transition.
    pub async fn claim(
        &self,
        tx: &mut dyn ReceptionTx,
        appointment_id: Uuid,
        patient_id: Uuid,
        details: &AppointmentDetails,
        medical_record_id: Uuid,
        now: DateTime<Utc>,
    ) -> ReceptionResult<Appointment> {
        let mut appointment = tx
            .lock_appointment(appointment_id)
            .await?
            .ok_or(ReceptionError::OriginalAppointmentNotFound(appointment_id))?;

        if !appointment.status.can_transition_to(AppointmentStatus::Waiting) {
            warn!(
                "Appointment {} cannot be checked in from status {}",
                appointment_id, appointment.status
            );
            return Err(ReceptionError::AlreadyClaimed {
                id: appointment_id,
                status: appointment.status,
            });
        }

        appointment.patient_id = patient_id;
        appointment.staff_id = details.staff_id;
        appointment.room_id = details.room_id;
        appointment.appointment_date = details.appointment_date;
        appointment.appointment_time = details.appointment_time;
        appointment.medical_record_id = Some(medical_record_id);
        if details.notes.is_some() {
            appointment.notes = details.notes.clone();
        }
        if details.service_type.is_some() {
            appointment.service_type = details.service_type.clone();
        }
        appointment.status = AppointmentStatus::Waiting;
        appointment.updated_at = now;

        tx.update_appointment(&appointment).await?;
        info!("Checked in online appointment {}", appointment_id);
        Ok(appointment)
    }

    /// Books a walk-in as a `Waiting` appointment, at most one active appointment per patient
    /// and day.
    pub async fn create_direct(
        &self,
        tx: &mut dyn ReceptionTx,
        patient_id: Uuid,
        details: &AppointmentDetails,
        medical_record_id: Uuid,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> ReceptionResult<Appointment> {
        let date = details.appointment_date;
        tx.lock(LockKey::PatientDay(patient_id, date)).await?;

        if tx.has_active_appointment_on(patient_id, date).await? {
            warn!("Patient {} already has an active appointment on {}", patient_id, date);
            return Err(ReceptionError::DuplicateBooking { patient_id, date });
        }

        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id,
            staff_id: details.staff_id,
            room_id: details.room_id,
            medical_record_id: Some(medical_record_id),
            appointment_date: date,
            appointment_time: details.appointment_time,
            status: AppointmentStatus::Waiting,
            notes: details.notes.clone(),
            service_type: details.service_type.clone(),
            created_by: Some(created_by.to_string()),
            created_at: now,
            updated_at: now,
        };

        tx.insert_appointment(&appointment).await?;
        info!("Booked walk-in appointment {} for patient {}", appointment.id, patient_id);
        Ok(appointment)
    }
}
