use std::sync::Arc;

use axum::{http::Uri, routing::get, Router};

use reception_cell::{reception_routes, ReceptionState};
use shared_models::error::AppError;

pub fn create_router(state: Arc<ReceptionState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic reception API is running!" }))
        .nest("/reception", reception_routes(state))
        .fallback(not_found)
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}
