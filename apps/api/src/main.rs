use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use reception_cell::clock::ClinicClock;
use reception_cell::services::ReceptionService;
use reception_cell::store::{MemoryReceptionStore, PgReceptionStore, ReceptionStore};
use reception_cell::ReceptionState;
use shared_config::AppConfig;
use shared_database::connect_pool;

/// Rooms registered when running without a database.
const IN_MEMORY_ROOMS: i32 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic reception API server");

    let config = Arc::new(AppConfig::from_env());

    let store: Arc<dyn ReceptionStore> = if config.database_url.is_some() {
        let pool = connect_pool(&config).await?;
        let store = PgReceptionStore::new(pool, config.lock_timeout());
        store.ensure_schema().await?;
        Arc::new(store)
    } else {
        warn!("Using the in-memory store; receptions are lost on restart");
        let store = MemoryReceptionStore::new(config.lock_timeout());
        for room_id in 1..=IN_MEMORY_ROOMS {
            store.add_room(room_id);
        }
        Arc::new(store)
    };

    let clock = Arc::new(ClinicClock::from_offset_minutes(
        config.clinic_utc_offset_minutes,
    ));
    let service = ReceptionService::new(store, clock, config.slot_capacity);
    let state = Arc::new(ReceptionState {
        config: config.clone(),
        service,
    });

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
