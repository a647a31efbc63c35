// libs/reception-cell/src/store/postgres.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::{LockKey, NewPatient, ReceptionStore, ReceptionTx};
use crate::error::{ReceptionError, ReceptionResult};
use crate::models::{Appointment, MedicalRecord, PatientSummary, QueueTicket};

/// Tables touched by reception. Rooms, logins and patients are normally owned by other
/// services; they are created here so a fresh database is usable on its own.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS users (
    id              UUID PRIMARY KEY,
    username        TEXT NOT NULL UNIQUE,
    password_hash   TEXT NOT NULL,
    role            TEXT NOT NULL DEFAULT 'patient',
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS patients (
    id              UUID PRIMARY KEY,
    user_id         UUID NOT NULL REFERENCES users(id),
    full_name       TEXT NOT NULL,
    phone           TEXT NOT NULL UNIQUE,
    email           TEXT,
    gender          TEXT,
    address         TEXT,
    medical_history TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS medical_records (
    id              UUID PRIMARY KEY,
    patient_id      UUID NOT NULL REFERENCES patients(id),
    record_number   TEXT NOT NULL UNIQUE,
    status          TEXT NOT NULL,
    notes           TEXT,
    created_at      TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS medical_records_one_active
    ON medical_records (patient_id) WHERE status = 'active';

CREATE TABLE IF NOT EXISTS appointments (
    id                  UUID PRIMARY KEY,
    patient_id          UUID NOT NULL REFERENCES patients(id),
    staff_id            INTEGER NOT NULL,
    room_id             INTEGER NOT NULL,
    medical_record_id   UUID REFERENCES medical_records(id),
    appointment_date    DATE NOT NULL,
    appointment_time    TIME NOT NULL,
    status              TEXT NOT NULL,
    notes               TEXT,
    service_type        TEXT,
    created_by          TEXT,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS appointments_slot
    ON appointments (appointment_date, appointment_time);
CREATE INDEX IF NOT EXISTS appointments_patient_day
    ON appointments (patient_id, appointment_date);

CREATE TABLE IF NOT EXISTS queue_tickets (
    id                  UUID PRIMARY KEY,
    patient_id          UUID NOT NULL REFERENCES patients(id),
    appointment_id      UUID NOT NULL REFERENCES appointments(id),
    medical_record_id   UUID NOT NULL REFERENCES medical_records(id),
    room_id             INTEGER NOT NULL REFERENCES rooms(id),
    queue_date          DATE NOT NULL,
    queue_number        INTEGER NOT NULL,
    status              TEXT NOT NULL,
    created_by          TEXT NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL,
    UNIQUE (room_id, queue_date, queue_number)
);
"#;

/// Advisory lock id held while the schema is created.
const SCHEMA_LOCK_ID: i64 = 0x7265_6365_7074_696f;

const APPOINTMENT_COLUMNS: &str = "id, patient_id, staff_id, room_id, medical_record_id, \
     appointment_date, appointment_time, status, notes, service_type, created_by, \
     created_at, updated_at";

#[derive(Clone)]
pub struct PgReceptionStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgReceptionStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Idempotent. Concurrent callers are serialized, since `CREATE ... IF NOT EXISTS` is not
    /// safe against itself.
    pub async fn ensure_schema(&self) -> ReceptionResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_ID)
            .execute(&mut *tx)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&mut *tx).await?;
        tx.commit().await?;

        info!("Reception schema is in place");
        Ok(())
    }
}

#[async_trait]
impl ReceptionStore for PgReceptionStore {
    async fn begin(&self) -> ReceptionResult<Box<dyn ReceptionTx>> {
        let mut tx = self.pool.begin().await?;

        // Bounds every lock wait in this transaction: advisory locks, row locks and
        // unique-index waits alike. SET does not take bind parameters.
        let statement = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&statement).execute(&mut *tx).await?;

        Ok(Box::new(PgReceptionTx { tx }))
    }
}

pub struct PgReceptionTx {
    tx: Transaction<'static, Postgres>,
}

#[derive(sqlx::FromRow)]
struct PatientRow {
    id: Uuid,
    full_name: String,
    phone: String,
    email: Option<String>,
}

impl From<PatientRow> for PatientSummary {
    fn from(row: PatientRow) -> Self {
        PatientSummary {
            id: row.id,
            full_name: row.full_name,
            phone: row.phone,
            email: row.email,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    patient_id: Uuid,
    record_number: String,
    status: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for MedicalRecord {
    type Error = ReceptionError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(MedicalRecord {
            id: row.id,
            patient_id: row.patient_id,
            record_number: row.record_number,
            status: row
                .status
                .parse()
                .map_err(|e| ReceptionError::Storage(format!("medical_records.status: {}", e)))?,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AppointmentRow {
    id: Uuid,
    patient_id: Uuid,
    staff_id: i32,
    room_id: i32,
    medical_record_id: Option<Uuid>,
    appointment_date: NaiveDate,
    appointment_time: NaiveTime,
    status: String,
    notes: Option<String>,
    service_type: Option<String>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = ReceptionError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            id: row.id,
            patient_id: row.patient_id,
            staff_id: row.staff_id,
            room_id: row.room_id,
            medical_record_id: row.medical_record_id,
            appointment_date: row.appointment_date,
            appointment_time: row.appointment_time,
            status: row
                .status
                .parse()
                .map_err(|e| ReceptionError::Storage(format!("appointments.status: {}", e)))?,
            notes: row.notes,
            service_type: row.service_type,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl ReceptionTx for PgReceptionTx {
    async fn lock(&mut self, key: LockKey) -> ReceptionResult<()> {
        // Transaction-scoped advisory locks stack per session, so re-locking is harmless.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key.advisory_id())
            .execute(&mut *self.tx)
            .await?;
        debug!("Acquired {}", key);
        Ok(())
    }

    async fn count_active_in_slot(
        &mut self,
        date: NaiveDate,
        time: NaiveTime,
        exclude: Option<Uuid>,
    ) -> ReceptionResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM appointments \
             WHERE appointment_date = $1 AND appointment_time = $2 \
               AND status IN ('ordered', 'waiting', 'in_progress') \
               AND ($3::uuid IS NULL OR id <> $3)",
        )
        .bind(date)
        .bind(time)
        .bind(exclude)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn get_patient(&mut self, id: Uuid) -> ReceptionResult<Option<PatientSummary>> {
        let row = sqlx::query_as::<_, PatientRow>(
            "SELECT id, full_name, phone, email FROM patients WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(PatientSummary::from))
    }

    async fn find_patient_by_phone(&mut self, phone: &str) -> ReceptionResult<Option<PatientSummary>> {
        let row = sqlx::query_as::<_, PatientRow>(
            "SELECT id, full_name, phone, email FROM patients WHERE phone = $1",
        )
        .bind(phone)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(PatientSummary::from))
    }

    async fn insert_patient_if_absent(
        &mut self,
        patient: &NewPatient,
    ) -> ReceptionResult<Option<PatientSummary>> {
        let row = sqlx::query_as::<_, PatientRow>(
            "WITH new_user AS ( \
                 INSERT INTO users (id, username, password_hash, role, created_at) \
                 VALUES ($2, $9, $10, 'patient', $11) \
                 ON CONFLICT (username) DO NOTHING \
                 RETURNING id \
             ), \
             login AS ( \
                 SELECT id FROM new_user \
                 UNION ALL \
                 SELECT id FROM users \
                 WHERE username = $9 AND NOT EXISTS (SELECT 1 FROM new_user) \
             ) \
             INSERT INTO patients \
                 (id, user_id, full_name, phone, email, gender, address, medical_history, created_at) \
             SELECT $1, login.id, $3, $4, $5, $6, $7, $8, $11 FROM login \
             ON CONFLICT (phone) DO NOTHING \
             RETURNING id, full_name, phone, email",
        )
        .bind(patient.id)
        .bind(patient.user_id)
        .bind(&patient.full_name)
        .bind(&patient.phone)
        .bind(&patient.email)
        .bind(&patient.gender)
        .bind(&patient.address)
        .bind(&patient.medical_history)
        .bind(&patient.username)
        .bind(&patient.credential_hash)
        .bind(patient.created_at)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(PatientSummary::from))
    }

    async fn find_active_record(&mut self, patient_id: Uuid) -> ReceptionResult<Option<MedicalRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT id, patient_id, record_number, status, notes, created_at \
             FROM medical_records WHERE patient_id = $1 AND status = 'active'",
        )
        .bind(patient_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(MedicalRecord::try_from).transpose()
    }

    async fn insert_record_if_absent(
        &mut self,
        record: &MedicalRecord,
    ) -> ReceptionResult<Option<MedicalRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            "INSERT INTO medical_records (id, patient_id, record_number, status, notes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (patient_id) WHERE status = 'active' DO NOTHING \
             RETURNING id, patient_id, record_number, status, notes, created_at",
        )
        .bind(record.id)
        .bind(record.patient_id)
        .bind(&record.record_number)
        .bind(record.status.as_str())
        .bind(&record.notes)
        .bind(record.created_at)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(MedicalRecord::try_from).transpose()
    }

    async fn lock_appointment(&mut self, id: Uuid) -> ReceptionResult<Option<Appointment>> {
        let sql = format!(
            "SELECT {} FROM appointments WHERE id = $1 FOR UPDATE",
            APPOINTMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Appointment::try_from).transpose()
    }

    async fn update_appointment(&mut self, appointment: &Appointment) -> ReceptionResult<()> {
        let result = sqlx::query(
            "UPDATE appointments \
             SET staff_id = $2, room_id = $3, medical_record_id = $4, status = $5, \
                 notes = $6, service_type = $7, updated_at = $8, \
                 patient_id = $9, appointment_date = $10, appointment_time = $11 \
             WHERE id = $1",
        )
        .bind(appointment.id)
        .bind(appointment.staff_id)
        .bind(appointment.room_id)
        .bind(appointment.medical_record_id)
        .bind(appointment.status.as_str())
        .bind(&appointment.notes)
        .bind(&appointment.service_type)
        .bind(appointment.updated_at)
        .bind(appointment.patient_id)
        .bind(appointment.appointment_date)
        .bind(appointment.appointment_time)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(ReceptionError::Storage(format!(
                "appointment {} disappeared during update",
                appointment.id
            )));
        }
        Ok(())
    }

    async fn has_active_appointment_on(
        &mut self,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> ReceptionResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS ( \
                 SELECT 1 FROM appointments \
                 WHERE patient_id = $1 AND appointment_date = $2 \
                   AND status IN ('ordered', 'waiting', 'in_progress') \
             )",
        )
        .bind(patient_id)
        .bind(date)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_appointment(&mut self, appointment: &Appointment) -> ReceptionResult<()> {
        let sql = format!(
            "INSERT INTO appointments ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            APPOINTMENT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(appointment.id)
            .bind(appointment.patient_id)
            .bind(appointment.staff_id)
            .bind(appointment.room_id)
            .bind(appointment.medical_record_id)
            .bind(appointment.appointment_date)
            .bind(appointment.appointment_time)
            .bind(appointment.status.as_str())
            .bind(&appointment.notes)
            .bind(&appointment.service_type)
            .bind(&appointment.created_by)
            .bind(appointment.created_at)
            .bind(appointment.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn max_queue_number(
        &mut self,
        room_id: i32,
        date: NaiveDate,
    ) -> ReceptionResult<Option<i32>> {
        let max = sqlx::query_scalar::<_, Option<i32>>(
            "SELECT MAX(queue_number) FROM queue_tickets WHERE room_id = $1 AND queue_date = $2",
        )
        .bind(room_id)
        .bind(date)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(max)
    }

    async fn insert_queue_ticket(&mut self, ticket: &QueueTicket) -> ReceptionResult<()> {
        sqlx::query(
            "INSERT INTO queue_tickets \
                 (id, patient_id, appointment_id, medical_record_id, room_id, queue_date, \
                  queue_number, status, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(ticket.id)
        .bind(ticket.patient_id)
        .bind(ticket.appointment_id)
        .bind(ticket.medical_record_id)
        .bind(ticket.room_id)
        .bind(ticket.queue_date)
        .bind(ticket.queue_number)
        .bind(ticket.status.as_str())
        .bind(&ticket.created_by)
        .bind(ticket.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> ReceptionResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ReceptionResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
