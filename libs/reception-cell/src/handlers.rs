use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    Extension,
};
use tracing::info;

use shared_models::auth::User;

use crate::error::ReceptionError;
use crate::models::{ReceptionRequest, ReceptionResponse};
use crate::router::ReceptionState;

/// Check a patient in and hand out a queue number
pub async fn receive_patient(
    State(state): State<Arc<ReceptionState>>,
    Extension(user): Extension<User>,
    payload: Result<Json<ReceptionRequest>, JsonRejection>,
) -> Result<Json<ReceptionResponse>, ReceptionError> {
    let Json(request) = payload.map_err(|e| ReceptionError::Validation(e.body_text()))?;

    info!(
        "Reception ({:?}) for room {} requested by {}",
        request.reception_type,
        request.appointment.room_id,
        user.actor()
    );

    let response = state.service.receive(request, user.actor()).await?;
    Ok(Json(response))
}
