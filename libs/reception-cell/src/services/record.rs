use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ReceptionError, ReceptionResult};
use crate::models::{MedicalRecord, RecordStatus};
use crate::store::{LockKey, ReceptionTx};

pub const DEFAULT_RECORD_NOTE: &str = "Opened at reception";

/// `MR-<local yyyyMMddHHmmss>-<first 8 hex digits of the patient id>`.
pub fn record_number(now: DateTime<FixedOffset>, patient_id: Uuid) -> String {
    let hex = patient_id.simple().to_string().to_uppercase();
    format!("MR-{}-{}", now.format("%Y%m%d%H%M%S"), &hex[..8])
}

/// Finds or opens the patient's single active medical record.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordProvisioner;

impl RecordProvisioner {
    pub fn new() -> Self {
        Self
    }

    pub async fn provision(
        &self,
        tx: &mut dyn ReceptionTx,
        patient_id: Uuid,
        now: DateTime<FixedOffset>,
    ) -> ReceptionResult<MedicalRecord> {
        tx.lock(LockKey::ActiveRecord(patient_id)).await?;

        if let Some(record) = tx.find_active_record(patient_id).await? {
            debug!("Patient {} has active record {}", patient_id, record.record_number);
            return Ok(record);
        }

        let record = MedicalRecord {
            id: Uuid::new_v4(),
            patient_id,
            record_number: record_number(now, patient_id),
            status: RecordStatus::Active,
            notes: Some(DEFAULT_RECORD_NOTE.to_string()),
            created_at: now.with_timezone(&Utc),
        };

        if let Some(created) = tx.insert_record_if_absent(&record).await? {
            info!("Opened record {} for patient {}", created.record_number, patient_id);
            return Ok(created);
        }

        tx.find_active_record(patient_id).await?.ok_or_else(|| {
            ReceptionError::Storage(format!(
                "active record insert for patient {} conflicted but no row is visible",
                patient_id
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryReceptionStore, ReceptionStore};
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use std::time::Duration;

    fn local_now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 17, 8, 5, 9)
            .unwrap()
    }

    #[test]
    fn test_record_number_format() {
        let patient_id = Uuid::parse_str("1a2b3c4d-0000-4000-8000-000000000000").unwrap();
        assert_eq!(
            record_number(local_now(), patient_id),
            "MR-20261017080509-1A2B3C4D"
        );
    }

    #[tokio::test]
    async fn test_second_provision_returns_same_record() {
        let store = MemoryReceptionStore::new(Duration::from_secs(1));
        let patient = store.seed_patient("Vu Van F", "0955000111");
        let provisioner = RecordProvisioner::new();

        let mut tx = store.begin().await.unwrap();
        let first = provisioner.provision(tx.as_mut(), patient.id, local_now()).await.unwrap();
        let again = provisioner.provision(tx.as_mut(), patient.id, local_now()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let later = provisioner.provision(tx.as_mut(), patient.id, local_now()).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(first.id, later.id);
        assert_eq!(first.status, RecordStatus::Active);
        assert_eq!(store.medical_records().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_patient_fails_on_foreign_key() {
        let store = MemoryReceptionStore::new(Duration::from_secs(1));
        let mut tx = store.begin().await.unwrap();

        assert_matches!(
            RecordProvisioner::new()
                .provision(tx.as_mut(), Uuid::new_v4(), local_now())
                .await,
            Err(ReceptionError::Storage(_))
        );
    }
}
