use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::ReceptionResult;
use crate::models::{Appointment, QueueStatus, QueueTicket};
use crate::store::{LockKey, ReceptionTx};

/// Issues queue numbers 1, 2, 3, ... per room and day.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueSequencer;

impl QueueSequencer {
    pub fn new() -> Self {
        Self
    }

    /// The (room, date) lock is taken before reading the current maximum, so even the first
    /// ticket of the day is allocated by exactly one transaction at a time.
    pub async fn assign(
        &self,
        tx: &mut dyn ReceptionTx,
        appointment: &Appointment,
        medical_record_id: Uuid,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> ReceptionResult<QueueTicket> {
        let room_id = appointment.room_id;
        let queue_date = appointment.appointment_date;

        tx.lock(LockKey::Queue(room_id, queue_date)).await?;

        let queue_number = tx
            .max_queue_number(room_id, queue_date)
            .await?
            .map_or(1, |max| max + 1);

        let ticket = QueueTicket {
            id: Uuid::new_v4(),
            patient_id: appointment.patient_id,
            appointment_id: appointment.id,
            medical_record_id,
            room_id,
            queue_date,
            queue_number,
            status: QueueStatus::Waiting,
            created_by: created_by.to_string(),
            created_at: now,
        };

        tx.insert_queue_ticket(&ticket).await?;
        info!("Room {} on {}: issued number {}", room_id, queue_date, queue_number);
        Ok(ticket)
    }
}
