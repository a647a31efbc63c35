use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use shared_utils::password::hash_credential;

use crate::error::{ReceptionError, ReceptionResult};
use crate::models::PatientProfile;
use crate::store::{LockKey, NewPatient, ReceptionTx};

/// Turns a reception's patient input into a patient id, creating the patient on first visit.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatientResolver;

impl PatientResolver {
    pub fn new() -> Self {
        Self
    }

    /// An explicit id wins and is taken as-is. Otherwise the profile's phone is the identity:
    /// an existing patient with that phone is reused, or a patient and its login are created.
    pub async fn resolve(
        &self,
        tx: &mut dyn ReceptionTx,
        existing_patient_id: Option<Uuid>,
        profile: Option<&PatientProfile>,
        now: DateTime<Utc>,
    ) -> ReceptionResult<Uuid> {
        if let Some(id) = existing_patient_id {
            debug!("Using existing patient {}", id);
            return Ok(id);
        }

        let profile = profile.ok_or(ReceptionError::PatientUnresolved)?;
        let phone = profile.normalized_phone();

        tx.lock(LockKey::Phone(phone.clone())).await?;

        if let Some(found) = tx.find_patient_by_phone(&phone).await? {
            debug!("Phone {} belongs to patient {}", phone, found.id);
            return Ok(found.id);
        }

        let credential_hash = hash_phone_credential(&phone).await?;
        let patient = NewPatient {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            full_name: profile.full_name.trim().to_string(),
            phone: phone.clone(),
            email: profile.email.clone(),
            gender: profile.gender.clone(),
            address: profile.address.clone(),
            medical_history: profile.medical_history.clone(),
            username: phone.clone(),
            credential_hash,
            created_at: now,
        };

        if let Some(created) = tx.insert_patient_if_absent(&patient).await? {
            info!("Registered patient {} for phone {}", created.id, phone);
            return Ok(created.id);
        }

        // Lost the insert race; the winner's row is visible now.
        tx.find_patient_by_phone(&phone)
            .await?
            .map(|winner| winner.id)
            .ok_or_else(|| {
                ReceptionError::Storage(format!(
                    "patient insert for phone {} conflicted but no row is visible",
                    phone
                ))
            })
    }
}

/// The phone number is the initial password of a patient created at the front desk.
async fn hash_phone_credential(phone: &str) -> ReceptionResult<String> {
    let secret = phone.to_string();
    tokio::task::spawn_blocking(move || hash_credential(&secret))
        .await
        .map_err(|e| ReceptionError::Storage(format!("credential hashing task failed: {}", e)))?
        .map_err(|e| ReceptionError::Storage(format!("credential hashing failed: {}", e)))
}
