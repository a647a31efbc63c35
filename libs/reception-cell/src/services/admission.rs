use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ReceptionError, ReceptionResult};
use crate::store::{LockKey, ReceptionTx};

/// Caps the number of active appointments per (date, time) slot.
#[derive(Debug, Clone, Copy)]
pub struct SlotAdmissionGuard {
    capacity: i64,
}

impl SlotAdmissionGuard {
    pub fn new(capacity: i64) -> Self {
        Self { capacity }
    }

    /// Locks the slot and checks it still has room. The lock is held until the transaction
    /// ends, so the count stays valid for the insert or claim that follows.
    ///
    /// `claiming` is the online appointment about to move into this slot; it is left out of
    /// the count because claiming it never adds a second occupant.
    pub async fn admit(
        &self,
        tx: &mut dyn ReceptionTx,
        date: NaiveDate,
        time: NaiveTime,
        claiming: Option<Uuid>,
    ) -> ReceptionResult<i64> {
        tx.lock(LockKey::Slot(date, time)).await?;

        let occupied = tx.count_active_in_slot(date, time, claiming).await?;
        if occupied >= self.capacity {
            warn!(
                "Slot {} {} is full: {} of {} taken",
                date, time, occupied, self.capacity
            );
            return Err(ReceptionError::SlotFull {
                date,
                time,
                capacity: self.capacity,
            });
        }

        debug!("Slot {} {} admits, {} of {} taken", date, time, occupied, self.capacity);
        Ok(occupied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Appointment, AppointmentStatus};
    use crate::store::{MemoryReceptionStore, ReceptionStore};
    use assert_matches::assert_matches;
    use chrono::Utc;
    use std::time::Duration;

    fn slot() -> (NaiveDate, NaiveTime) {
        (
            NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        )
    }

    fn booked(patient_id: Uuid, status: AppointmentStatus) -> Appointment {
        let (date, time) = slot();
        let now = Utc::now();
        Appointment {
            id: Uuid::new_v4(),
            patient_id,
            staff_id: 1,
            room_id: 1,
            medical_record_id: None,
            appointment_date: date,
            appointment_time: time,
            status,
            notes: None,
            service_type: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_terminal_appointments_do_not_occupy_the_slot() {
        let store = MemoryReceptionStore::new(Duration::from_secs(1));
        let patient = store.seed_patient("Pham Van D", "0933000111");
        store.seed_appointment(booked(patient.id, AppointmentStatus::Waiting));
        store.seed_appointment(booked(patient.id, AppointmentStatus::Cancelled));
        store.seed_appointment(booked(patient.id, AppointmentStatus::Completed));

        let guard = SlotAdmissionGuard::new(2);
        let (date, time) = slot();
        let mut tx = store.begin().await.unwrap();

        assert_eq!(guard.admit(tx.as_mut(), date, time, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_full_slot_rejects_unless_claiming_an_occupant() {
        let store = MemoryReceptionStore::new(Duration::from_secs(1));
        let patient = store.seed_patient("Pham Van D", "0933000111");
        let ordered = booked(patient.id, AppointmentStatus::Ordered);
        store.seed_appointment(ordered.clone());
        store.seed_appointment(booked(patient.id, AppointmentStatus::InProgress));

        let guard = SlotAdmissionGuard::new(2);
        let (date, time) = slot();
        let mut tx = store.begin().await.unwrap();

        assert_matches!(
            guard.admit(tx.as_mut(), date, time, None).await,
            Err(ReceptionError::SlotFull { capacity: 2, .. })
        );
        assert_eq!(
            guard.admit(tx.as_mut(), date, time, Some(ordered.id)).await.unwrap(),
            1
        );
    }
}
