// libs/reception-cell/src/store/memory.rs
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{LockKey, NewPatient, ReceptionStore, ReceptionTx};
use crate::error::{ReceptionError, ReceptionResult};
use crate::models::{Appointment, MedicalRecord, PatientSummary, QueueTicket, RecordStatus};

/// Idle lock entries are swept once the table grows past this size.
const LOCK_TABLE_SWEEP_THRESHOLD: usize = 1024;

/// In-process transactional store.
///
/// Writes are staged per transaction and applied atomically on commit; other transactions
/// only ever see committed rows. Keyed locks stand in for advisory locks, appointment row
/// locks and the waits a unique index imposes on concurrent inserts. Rooms act as the
/// foreign key target of queue tickets.
#[derive(Clone)]
pub struct MemoryReceptionStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    tables: Mutex<Tables>,
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
    lock_timeout: Duration,
}

#[derive(Default)]
struct Tables {
    patients: HashMap<Uuid, NewPatient>,
    records: HashMap<Uuid, MedicalRecord>,
    appointments: HashMap<Uuid, Appointment>,
    queue: Vec<QueueTicket>,
    rooms: HashSet<i32>,
}

#[derive(Default)]
struct Staged {
    patients: Vec<NewPatient>,
    records: Vec<MedicalRecord>,
    appointments: HashMap<Uuid, Appointment>,
    queue: Vec<QueueTicket>,
}

impl MemoryReceptionStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                tables: Mutex::new(Tables::default()),
                locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    pub fn add_room(&self, room_id: i32) {
        self.inner.tables().rooms.insert(room_id);
    }

    /// Registers an already-known patient, as created by the patient management screens.
    pub fn seed_patient(&self, full_name: &str, phone: &str) -> PatientSummary {
        let patient = NewPatient {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            full_name: full_name.to_string(),
            phone: phone.to_string(),
            email: None,
            gender: None,
            address: None,
            medical_history: None,
            username: phone.to_string(),
            credential_hash: String::new(),
            created_at: Utc::now(),
        };
        let summary = patient.summary();
        self.inner.tables().patients.insert(patient.id, patient);
        summary
    }

    /// Stores an appointment as written by the online booking flow.
    pub fn seed_appointment(&self, appointment: Appointment) {
        self.inner
            .tables()
            .appointments
            .insert(appointment.id, appointment);
    }

    pub fn patients(&self) -> Vec<PatientSummary> {
        self.inner
            .tables()
            .patients
            .values()
            .map(NewPatient::summary)
            .collect()
    }

    pub fn medical_records(&self) -> Vec<MedicalRecord> {
        self.inner.tables().records.values().cloned().collect()
    }

    pub fn appointments(&self) -> Vec<Appointment> {
        self.inner.tables().appointments.values().cloned().collect()
    }

    pub fn queue_tickets(&self) -> Vec<QueueTicket> {
        self.inner.tables().queue.clone()
    }
}

impl MemoryInner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(&self, key: &LockKey) -> ReceptionResult<OwnedMutexGuard<()>> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() > LOCK_TABLE_SWEEP_THRESHOLD {
                // Held or awaited locks have a second owner (guard or waiter).
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        tokio::time::timeout(self.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                warn!("Lock wait on {} exceeded {:?}", key, self.lock_timeout);
                ReceptionError::ConcurrencyTimeout(key.to_string())
            })
    }
}

#[async_trait]
impl ReceptionStore for MemoryReceptionStore {
    async fn begin(&self) -> ReceptionResult<Box<dyn ReceptionTx>> {
        Ok(Box::new(MemoryTx {
            inner: Arc::clone(&self.inner),
            held: HashMap::new(),
            staged: Staged::default(),
        }))
    }
}

/// Dropping the handle without committing discards staged writes and releases its locks.
pub struct MemoryTx {
    inner: Arc<MemoryInner>,
    held: HashMap<LockKey, OwnedMutexGuard<()>>,
    staged: Staged,
}

impl Tables {
    fn patients<'a>(&'a self, staged: &'a Staged) -> impl Iterator<Item = &'a NewPatient> + 'a {
        self.patients.values().chain(staged.patients.iter())
    }

    fn records<'a>(&'a self, staged: &'a Staged) -> impl Iterator<Item = &'a MedicalRecord> + 'a {
        self.records.values().chain(staged.records.iter())
    }

    fn appointments<'a>(
        &'a self,
        staged: &'a Staged,
    ) -> impl Iterator<Item = &'a Appointment> + 'a {
        self.appointments
            .values()
            .filter(move |a| !staged.appointments.contains_key(&a.id))
            .chain(staged.appointments.values())
    }

    fn queue<'a>(&'a self, staged: &'a Staged) -> impl Iterator<Item = &'a QueueTicket> + 'a {
        self.queue.iter().chain(staged.queue.iter())
    }

    fn patient_exists(&self, staged: &Staged, id: Uuid) -> bool {
        self.patients(staged).any(|p| p.id == id)
    }

    /// Unique constraints re-checked against committed rows right before applying.
    fn check_unique(&self, staged: &Staged) -> ReceptionResult<()> {
        for patient in &staged.patients {
            if self
                .patients
                .values()
                .any(|p| p.phone == patient.phone || p.username == patient.username)
            {
                return Err(unique_violation("patients.phone", &patient.phone));
            }
        }

        for record in &staged.records {
            if self.records.values().any(|r| {
                r.record_number == record.record_number
                    || (r.patient_id == record.patient_id
                        && r.status == RecordStatus::Active
                        && record.status == RecordStatus::Active)
            }) {
                return Err(unique_violation("medical_records.active", &record.patient_id.to_string()));
            }
        }

        for ticket in &staged.queue {
            if self.queue.iter().any(|t| {
                t.room_id == ticket.room_id
                    && t.queue_date == ticket.queue_date
                    && t.queue_number == ticket.queue_number
            }) {
                return Err(unique_violation(
                    "queue_tickets.number",
                    &format!("{}/{}/{}", ticket.room_id, ticket.queue_date, ticket.queue_number),
                ));
            }
        }

        Ok(())
    }

    fn apply(&mut self, staged: Staged) {
        for patient in staged.patients {
            self.patients.insert(patient.id, patient);
        }
        for record in staged.records {
            self.records.insert(record.id, record);
        }
        self.appointments.extend(staged.appointments);
        self.queue.extend(staged.queue);
    }
}

fn unique_violation(constraint: &str, value: &str) -> ReceptionError {
    ReceptionError::Storage(format!(
        "duplicate key value violates unique constraint {} ({})",
        constraint, value
    ))
}

fn foreign_key_violation(constraint: &str, value: &str) -> ReceptionError {
    ReceptionError::Storage(format!(
        "insert violates foreign key constraint {} ({})",
        constraint, value
    ))
}

#[async_trait]
impl ReceptionTx for MemoryTx {
    async fn lock(&mut self, key: LockKey) -> ReceptionResult<()> {
        if self.held.contains_key(&key) {
            return Ok(());
        }

        let guard = self.inner.acquire(&key).await?;
        debug!("Acquired {}", key);
        self.held.insert(key, guard);
        Ok(())
    }

    async fn count_active_in_slot(
        &mut self,
        date: NaiveDate,
        time: NaiveTime,
        exclude: Option<Uuid>,
    ) -> ReceptionResult<i64> {
        let tables = self.inner.tables();
        let count = tables
            .appointments(&self.staged)
            .filter(|a| a.appointment_date == date && a.appointment_time == time)
            .filter(|a| a.status.is_active())
            .filter(|a| Some(a.id) != exclude)
            .count();
        Ok(count as i64)
    }

    async fn get_patient(&mut self, id: Uuid) -> ReceptionResult<Option<PatientSummary>> {
        let tables = self.inner.tables();
        let patient = tables.patients(&self.staged).find(|p| p.id == id);
        Ok(patient.map(NewPatient::summary))
    }

    async fn find_patient_by_phone(&mut self, phone: &str) -> ReceptionResult<Option<PatientSummary>> {
        let tables = self.inner.tables();
        let patient = tables.patients(&self.staged).find(|p| p.phone == phone);
        Ok(patient.map(NewPatient::summary))
    }

    async fn insert_patient_if_absent(
        &mut self,
        patient: &NewPatient,
    ) -> ReceptionResult<Option<PatientSummary>> {
        // A unique index makes a concurrent insert of the same phone wait for the first writer.
        self.lock(LockKey::Phone(patient.phone.clone())).await?;

        let tables = self.inner.tables();
        let taken = tables
            .patients(&self.staged)
            .any(|p| p.phone == patient.phone || p.username == patient.username);
        if taken {
            return Ok(None);
        }
        drop(tables);

        self.staged.patients.push(patient.clone());
        Ok(Some(patient.summary()))
    }

    async fn find_active_record(&mut self, patient_id: Uuid) -> ReceptionResult<Option<MedicalRecord>> {
        let tables = self.inner.tables();
        let record = tables
            .records(&self.staged)
            .find(|r| r.patient_id == patient_id && r.status == RecordStatus::Active)
            .cloned();
        Ok(record)
    }

    async fn insert_record_if_absent(
        &mut self,
        record: &MedicalRecord,
    ) -> ReceptionResult<Option<MedicalRecord>> {
        self.lock(LockKey::ActiveRecord(record.patient_id)).await?;

        let tables = self.inner.tables();
        if !tables.patient_exists(&self.staged, record.patient_id) {
            return Err(foreign_key_violation(
                "medical_records.patient_id",
                &record.patient_id.to_string(),
            ));
        }
        let active_exists = tables
            .records(&self.staged)
            .any(|r| r.patient_id == record.patient_id && r.status == RecordStatus::Active);
        if active_exists {
            return Ok(None);
        }
        if tables
            .records(&self.staged)
            .any(|r| r.record_number == record.record_number)
        {
            return Err(unique_violation("medical_records.record_number", &record.record_number));
        }
        drop(tables);

        self.staged.records.push(record.clone());
        Ok(Some(record.clone()))
    }

    async fn lock_appointment(&mut self, id: Uuid) -> ReceptionResult<Option<Appointment>> {
        self.lock(LockKey::Appointment(id)).await?;

        let tables = self.inner.tables();
        let appointment = tables.appointments(&self.staged).find(|a| a.id == id).cloned();
        Ok(appointment)
    }

    async fn update_appointment(&mut self, appointment: &Appointment) -> ReceptionResult<()> {
        if !self.held.contains_key(&LockKey::Appointment(appointment.id)) {
            return Err(ReceptionError::Storage(format!(
                "appointment {} updated without holding its row lock",
                appointment.id
            )));
        }

        self.staged
            .appointments
            .insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn has_active_appointment_on(
        &mut self,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> ReceptionResult<bool> {
        let tables = self.inner.tables();
        let exists = tables.appointments(&self.staged).any(|a| {
            a.patient_id == patient_id && a.appointment_date == date && a.status.is_active()
        });
        Ok(exists)
    }

    async fn insert_appointment(&mut self, appointment: &Appointment) -> ReceptionResult<()> {
        let tables = self.inner.tables();
        if !tables.patient_exists(&self.staged, appointment.patient_id) {
            return Err(foreign_key_violation(
                "appointments.patient_id",
                &appointment.patient_id.to_string(),
            ));
        }
        if tables.appointments(&self.staged).any(|a| a.id == appointment.id) {
            return Err(unique_violation("appointments.id", &appointment.id.to_string()));
        }
        drop(tables);

        self.staged
            .appointments
            .insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn max_queue_number(
        &mut self,
        room_id: i32,
        date: NaiveDate,
    ) -> ReceptionResult<Option<i32>> {
        let tables = self.inner.tables();
        let max = tables
            .queue(&self.staged)
            .filter(|t| t.room_id == room_id && t.queue_date == date)
            .map(|t| t.queue_number)
            .max();
        Ok(max)
    }

    async fn insert_queue_ticket(&mut self, ticket: &QueueTicket) -> ReceptionResult<()> {
        let tables = self.inner.tables();
        if !tables.rooms.contains(&ticket.room_id) {
            return Err(foreign_key_violation(
                "queue_tickets.room_id",
                &ticket.room_id.to_string(),
            ));
        }
        if !tables.appointments(&self.staged).any(|a| a.id == ticket.appointment_id) {
            return Err(foreign_key_violation(
                "queue_tickets.appointment_id",
                &ticket.appointment_id.to_string(),
            ));
        }
        let duplicate = tables.queue(&self.staged).any(|t| {
            t.room_id == ticket.room_id
                && t.queue_date == ticket.queue_date
                && t.queue_number == ticket.queue_number
        });
        if duplicate {
            return Err(unique_violation(
                "queue_tickets.number",
                &format!("{}/{}/{}", ticket.room_id, ticket.queue_date, ticket.queue_number),
            ));
        }
        drop(tables);

        self.staged.queue.push(ticket.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> ReceptionResult<()> {
        let MemoryTx { inner, held, staged } = *self;

        {
            let mut tables = inner.tables();
            tables.check_unique(&staged)?;
            tables.apply(staged);
        }

        debug!("Committed, releasing {} locks", held.len());
        drop(held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ReceptionResult<()> {
        debug!("Rolled back, releasing {} locks", self.held.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentStatus;
    use assert_matches::assert_matches;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    fn appointment(patient_id: Uuid, status: AppointmentStatus) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: Uuid::new_v4(),
            patient_id,
            staff_id: 1,
            room_id: 1,
            medical_record_id: None,
            appointment_date: date(),
            appointment_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            status,
            notes: None,
            service_type: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_staged_writes_are_private_until_commit() {
        let store = MemoryReceptionStore::new(Duration::from_secs(1));
        let patient = store.seed_patient("Le Van C", "0912000111");

        let mut writer = store.begin().await.unwrap();
        writer
            .insert_appointment(&appointment(patient.id, AppointmentStatus::Waiting))
            .await
            .unwrap();

        let mut reader = store.begin().await.unwrap();
        assert!(!reader.has_active_appointment_on(patient.id, date()).await.unwrap());
        assert!(writer.has_active_appointment_on(patient.id, date()).await.unwrap());

        writer.commit().await.unwrap();
        assert!(reader.has_active_appointment_on(patient.id, date()).await.unwrap());
        assert_eq!(store.appointments().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let store = MemoryReceptionStore::new(Duration::from_secs(1));
        let patient = store.seed_patient("Le Van C", "0912000111");

        let mut tx = store.begin().await.unwrap();
        tx.insert_appointment(&appointment(patient.id, AppointmentStatus::Waiting))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(store.appointments().is_empty());
    }

    #[tokio::test]
    async fn test_held_key_times_out_other_transactions() {
        let store = MemoryReceptionStore::new(Duration::from_millis(50));
        let key = LockKey::Queue(1, date());

        let mut first = store.begin().await.unwrap();
        first.lock(key.clone()).await.unwrap();
        // Re-entrant within the same transaction.
        first.lock(key.clone()).await.unwrap();

        let mut second = store.begin().await.unwrap();
        assert_matches!(
            second.lock(key.clone()).await,
            Err(ReceptionError::ConcurrencyTimeout(_))
        );

        first.rollback().await.unwrap();
        second.lock(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_ticket_requires_known_room() {
        let store = MemoryReceptionStore::new(Duration::from_secs(1));
        let patient = store.seed_patient("Le Van C", "0912000111");
        let booked = appointment(patient.id, AppointmentStatus::Waiting);

        let mut tx = store.begin().await.unwrap();
        tx.insert_appointment(&booked).await.unwrap();

        let ticket = QueueTicket {
            id: Uuid::new_v4(),
            patient_id: patient.id,
            appointment_id: booked.id,
            medical_record_id: Uuid::new_v4(),
            room_id: 42,
            queue_date: date(),
            queue_number: 1,
            status: crate::models::QueueStatus::Waiting,
            created_by: "staff".to_string(),
            created_at: Utc::now(),
        };

        assert_matches!(
            tx.insert_queue_ticket(&ticket).await,
            Err(ReceptionError::Storage(msg)) if msg.contains("foreign key")
        );
    }

    #[tokio::test]
    async fn test_update_requires_row_lock() {
        let store = MemoryReceptionStore::new(Duration::from_secs(1));
        let patient = store.seed_patient("Le Van C", "0912000111");
        let booked = appointment(patient.id, AppointmentStatus::Ordered);
        store.seed_appointment(booked.clone());

        let mut tx = store.begin().await.unwrap();
        assert_matches!(tx.update_appointment(&booked).await, Err(ReceptionError::Storage(_)));

        let locked = tx.lock_appointment(booked.id).await.unwrap().unwrap();
        tx.update_appointment(&locked).await.unwrap();
    }
}
