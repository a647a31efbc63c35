use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{error, info, instrument};

use crate::clock::Clock;
use crate::error::{ReceptionError, ReceptionResult};
use crate::models::{ReceptionRequest, ReceptionResponse, ReceptionType};
use crate::services::{
    validate_request, AppointmentClaimer, PatientResolver, QueueSequencer, RecordProvisioner,
    SlotAdmissionGuard,
};
use crate::store::{ReceptionStore, ReceptionTx};

/// Runs a front-desk check-in as one transaction:
/// admission, patient, medical record, appointment, queue ticket.
#[derive(Clone)]
pub struct ReceptionService {
    store: Arc<dyn ReceptionStore>,
    clock: Arc<dyn Clock>,
    admission: SlotAdmissionGuard,
    patients: PatientResolver,
    records: RecordProvisioner,
    claimer: AppointmentClaimer,
    sequencer: QueueSequencer,
}

impl ReceptionService {
    pub fn new(store: Arc<dyn ReceptionStore>, clock: Arc<dyn Clock>, slot_capacity: i64) -> Self {
        Self {
            store,
            clock,
            admission: SlotAdmissionGuard::new(slot_capacity),
            patients: PatientResolver::new(),
            records: RecordProvisioner::new(),
            claimer: AppointmentClaimer::new(),
            sequencer: QueueSequencer::new(),
        }
    }

    /// Either every row of the check-in is committed or none is.
    #[instrument(
        skip(self, request),
        fields(
            reception_type = ?request.reception_type,
            room_id = request.appointment.room_id,
            date = %request.appointment.appointment_date,
        )
    )]
    pub async fn receive(
        &self,
        request: ReceptionRequest,
        created_by: &str,
    ) -> ReceptionResult<ReceptionResponse> {
        let now = self.clock.now();
        validate_request(&request, now.date_naive())?;

        let mut tx = self.store.begin().await?;
        match self.run_steps(tx.as_mut(), &request, created_by, now).await {
            Ok(response) => {
                tx.commit().await?;
                info!(
                    "Patient {} queued as number {} in room {}",
                    response.patient.id, response.queue_number, response.queue.room_id
                );
                Ok(response)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!("Rollback after '{}' failed: {}", err, rollback_err);
                }
                Err(err)
            }
        }
    }

    async fn run_steps(
        &self,
        tx: &mut dyn ReceptionTx,
        request: &ReceptionRequest,
        created_by: &str,
        now: DateTime<FixedOffset>,
    ) -> ReceptionResult<ReceptionResponse> {
        let details = &request.appointment;
        let now_utc = now.with_timezone(&Utc);
        let claiming = match request.reception_type {
            ReceptionType::Online => request.original_appointment_id,
            ReceptionType::Direct => None,
        };

        self.admission
            .admit(tx, details.appointment_date, details.appointment_time, claiming)
            .await?;

        let patient_id = self
            .patients
            .resolve(tx, request.existing_patient_id, request.patient.as_ref(), now_utc)
            .await?;

        let record = self.records.provision(tx, patient_id, now).await?;

        let appointment = match claiming {
            Some(appointment_id) => {
                self.claimer
                    .claim(tx, appointment_id, patient_id, details, record.id, now_utc)
                    .await?
            }
            None => {
                self.claimer
                    .create_direct(tx, patient_id, details, record.id, created_by, now_utc)
                    .await?
            }
        };

        let queue = self
            .sequencer
            .assign(tx, &appointment, record.id, created_by, now_utc)
            .await?;

        let patient = tx.get_patient(patient_id).await?.ok_or_else(|| {
            ReceptionError::Storage(format!("patient {} missing after reception", patient_id))
        })?;

        Ok(ReceptionResponse {
            queue_number: queue.queue_number,
            queue,
            patient,
        })
    }
}
