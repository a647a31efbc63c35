//! Transactional storage seam for the reception workflow.
//!
//! A [`ReceptionStore`] hands out one [`ReceptionTx`] per reception. Every read and write of
//! the workflow goes through that handle, and the handle is either committed or rolled back as
//! a whole. Locks taken through the handle (keyed locks and appointment row locks) are held
//! until commit or rollback.

mod memory;
mod postgres;

pub use memory::MemoryReceptionStore;
pub use postgres::PgReceptionStore;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ReceptionResult;
use crate::models::{Appointment, MedicalRecord, PatientSummary, QueueTicket};

/// Serialization scope for one critical section of the workflow.
///
/// Transactions acquire keys in declaration order (slot first, queue last), so two
/// receptions can never wait on each other in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Admission count and insert/claim for one (date, time) slot.
    Slot(NaiveDate, NaiveTime),
    /// Get-or-create of a patient identity by phone.
    Phone(String),
    /// Get-or-create of the patient's active medical record.
    ActiveRecord(Uuid),
    /// Direct-path duplicate booking guard for one patient and day.
    PatientDay(Uuid, NaiveDate),
    /// Row lock on an existing appointment.
    Appointment(Uuid),
    /// Queue number allocation for one (room, date).
    Queue(i32, NaiveDate),
}

impl LockKey {
    /// 64-bit id for `pg_advisory_xact_lock`, stable across processes and releases.
    pub fn advisory_id(&self) -> i64 {
        let digest = Sha256::digest(self.to_string().as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(bytes)
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Slot(date, time) => write!(f, "slot:{}T{}", date, time),
            LockKey::Phone(phone) => write!(f, "phone:{}", phone),
            LockKey::ActiveRecord(patient_id) => write!(f, "active_record:{}", patient_id),
            LockKey::PatientDay(patient_id, date) => {
                write!(f, "patient_day:{}:{}", patient_id, date)
            }
            LockKey::Appointment(id) => write!(f, "appointment:{}", id),
            LockKey::Queue(room_id, date) => write!(f, "queue:{}:{}", room_id, date),
        }
    }
}

/// A patient identity plus the login it is created with.
#[derive(Debug, Clone)]
pub struct NewPatient {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub medical_history: Option<String>,
    /// Username of the login; reception uses the phone number.
    pub username: String,
    pub credential_hash: String,
    pub created_at: DateTime<Utc>,
}

impl NewPatient {
    pub fn summary(&self) -> PatientSummary {
        PatientSummary {
            id: self.id,
            full_name: self.full_name.clone(),
            phone: self.phone.clone(),
            email: self.email.clone(),
        }
    }
}

#[async_trait]
pub trait ReceptionStore: Send + Sync {
    async fn begin(&self) -> ReceptionResult<Box<dyn ReceptionTx>>;
}

#[async_trait]
pub trait ReceptionTx: Send {
    /// Blocks until `key` is held by this transaction or the lock timeout elapses.
    /// Re-acquiring a key already held is a no-op.
    async fn lock(&mut self, key: LockKey) -> ReceptionResult<()>;

    /// Appointments in an active status at exactly `date`/`time`, minus `exclude`.
    async fn count_active_in_slot(
        &mut self,
        date: NaiveDate,
        time: NaiveTime,
        exclude: Option<Uuid>,
    ) -> ReceptionResult<i64>;

    async fn get_patient(&mut self, id: Uuid) -> ReceptionResult<Option<PatientSummary>>;

    async fn find_patient_by_phone(&mut self, phone: &str) -> ReceptionResult<Option<PatientSummary>>;

    /// Inserts the patient unless the phone is taken. The login is created, or reused when one
    /// with the same username already exists. Returns `None` on conflict; the caller re-reads
    /// to pick up the winner.
    async fn insert_patient_if_absent(
        &mut self,
        patient: &NewPatient,
    ) -> ReceptionResult<Option<PatientSummary>>;

    async fn find_active_record(&mut self, patient_id: Uuid) -> ReceptionResult<Option<MedicalRecord>>;

    /// Inserts `record` unless the patient already has an active one. Returns `None` on conflict.
    async fn insert_record_if_absent(
        &mut self,
        record: &MedicalRecord,
    ) -> ReceptionResult<Option<MedicalRecord>>;

    /// Reads an appointment with an exclusive row lock held until the transaction ends.
    async fn lock_appointment(&mut self, id: Uuid) -> ReceptionResult<Option<Appointment>>;

    async fn update_appointment(&mut self, appointment: &Appointment) -> ReceptionResult<()>;

    async fn has_active_appointment_on(
        &mut self,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> ReceptionResult<bool>;

    async fn insert_appointment(&mut self, appointment: &Appointment) -> ReceptionResult<()>;

    async fn max_queue_number(
        &mut self,
        room_id: i32,
        date: NaiveDate,
    ) -> ReceptionResult<Option<i32>>;

    async fn insert_queue_ticket(&mut self, ticket: &QueueTicket) -> ReceptionResult<()>;

    async fn commit(self: Box<Self>) -> ReceptionResult<()>;

    async fn rollback(self: Box<Self>) -> ReceptionResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_ids_are_stable_and_distinct() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();

        let queue = LockKey::Queue(3, date);
        assert_eq!(queue.advisory_id(), LockKey::Queue(3, date).advisory_id());
        assert_ne!(queue.advisory_id(), LockKey::Queue(4, date).advisory_id());

        let slot = LockKey::Slot(date, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_ne!(slot.advisory_id(), queue.advisory_id());
        assert_eq!(slot.to_string(), "slot:2026-10-17T09:00:00");
    }
}
