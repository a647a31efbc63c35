use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_SLOT_CAPACITY: i64 = 10;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    /// Maximum number of non-terminal appointments in one (date, time) slot.
    pub slot_capacity: i64,
    pub lock_timeout_ms: u64,
    /// Offset of the clinic's local time from UTC, used for "today" and record numbers.
    pub clinic_utc_offset_minutes: i32,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            jwt_secret: String::new(),
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            clinic_utc_offset_minutes: 0,
            port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .or_else(|| {
                    warn!("DATABASE_URL not set, reception will run against the in-memory store");
                    None
                }),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", defaults.database_max_connections),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            slot_capacity: parse_or("SLOT_CAPACITY", defaults.slot_capacity),
            lock_timeout_ms: parse_or("LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
            clinic_utc_offset_minutes: parse_or("CLINIC_UTC_OFFSET_MINUTES", defaults.clinic_utc_offset_minutes),
            port: parse_or("PORT", defaults.port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        self.database_url.is_some() && !self.jwt_secret.is_empty()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
