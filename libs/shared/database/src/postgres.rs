use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use shared_config::AppConfig;

/// Builds the Postgres pool shared by every request. Connections are checked out per
/// transaction, so the pool size bounds how many receptions run at once.
pub async fn connect_pool(config: &AppConfig) -> Result<PgPool> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow!("DATABASE_URL is not configured"))?;

    debug!(
        "Connecting to Postgres with up to {} connections",
        config.database_max_connections
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        // Waiting for a pooled connection is bounded like any other lock wait.
        .acquire_timeout(config.lock_timeout() + Duration::from_secs(1))
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("Postgres health check failed")?;

    info!("Postgres pool initialized successfully");
    Ok(pool)
}
