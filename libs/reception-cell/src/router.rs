use std::sync::Arc;

use axum::{middleware, routing::post, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::receive_patient;
use crate::services::ReceptionService;

pub struct ReceptionState {
    pub config: Arc<AppConfig>,
    pub service: ReceptionService,
}

pub fn reception_routes(state: Arc<ReceptionState>) -> Router {
    Router::new()
        .route("/", post(receive_patient))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ))
        .with_state(state)
}
