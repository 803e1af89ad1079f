use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::models::TaxonomyConfig;
use crate::services::category_service::CategoryTaxonomy;

/// Tunables for the in-memory room registry.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomSettings {
    /// A room with no connections is evicted once idle for this long.
    pub idle_grace_seconds: u64,
    pub sweep_interval_seconds: u64,
    /// Per-room broadcast buffer; slower receivers lose the oldest events.
    pub event_buffer: usize,
    pub persist_max_attempts: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            idle_grace_seconds: 300,
            sweep_interval_seconds: 30,
            event_buffer: 256,
            persist_max_attempts: 5,
        }
    }
}

impl RoomSettings {
    pub fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.idle_grace_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Absent means the process runs on the in-memory entity store.
    pub mongo_uri: Option<String>,
    pub mongo_database: String,
    /// JSON quiz seed for the in-memory store.
    pub seed_file: Option<String>,
    pub jwt_secret: String,
    pub rooms: RoomSettings,
    pub taxonomy: CategoryTaxonomy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            mongo_uri: None,
            mongo_database: "quizroom".to_string(),
            seed_file: None,
            jwt_secret: "dev-secret-only-for-local-testing".to_string(),
            rooms: RoomSettings::default(),
            taxonomy: CategoryTaxonomy::builtin(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml + APP__ overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or(defaults.bind_addr);

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .ok()
            .filter(|uri| !uri.trim().is_empty());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let seed_file = settings
            .get_string("database.seed_file")
            .or_else(|_| env::var("SEED_FILE"))
            .ok();

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            Err(_) => {
                tracing::warn!("Using default JWT secret (dev mode only)");
                defaults.jwt_secret
            }
        };

        let room_defaults = RoomSettings::default();
        let rooms = RoomSettings {
            idle_grace_seconds: read_u64(&settings, "rooms.idle_grace_seconds")?
                .unwrap_or(room_defaults.idle_grace_seconds),
            sweep_interval_seconds: read_u64(&settings, "rooms.sweep_interval_seconds")?
                .unwrap_or(room_defaults.sweep_interval_seconds),
            event_buffer: read_u64(&settings, "rooms.event_buffer")?
                .map(|v| v.max(1) as usize)
                .unwrap_or(room_defaults.event_buffer),
            persist_max_attempts: read_u64(&settings, "rooms.persist_max_attempts")?
                .map(|v| v.max(1) as usize)
                .unwrap_or(room_defaults.persist_max_attempts),
        };

        let taxonomy = match settings.get::<TaxonomyConfig>("taxonomy") {
            Ok(table) => CategoryTaxonomy::from_config(table)
                .map_err(|e| config::ConfigError::Message(format!("invalid taxonomy: {}", e)))?,
            Err(config::ConfigError::NotFound(_)) => defaults.taxonomy,
            Err(e) => return Err(e),
        };

        Ok(Config {
            bind_addr,
            mongo_uri,
            mongo_database,
            seed_file,
            jwt_secret,
            rooms,
            taxonomy,
        })
    }
}

fn read_u64(settings: &config::Config, key: &str) -> Result<Option<u64>, config::ConfigError> {
    match settings.get_int(key) {
        Ok(value) if value >= 0 => Ok(Some(value as u64)),
        Ok(value) => Err(config::ConfigError::Message(format!(
            "{} must not be negative (got {})",
            key, value
        ))),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn load_applies_env_overrides() {
        env::set_var("APP__ROOMS__IDLE_GRACE_SECONDS", "42");
        env::set_var("APP__SERVER__BIND_ADDR", "127.0.0.1:9000");

        let config = Config::load().unwrap();
        assert_eq!(config.rooms.idle_grace_seconds, 42);
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.rooms.event_buffer, 256);
        assert_eq!(config.taxonomy.default_category(), "umum");

        env::remove_var("APP__ROOMS__IDLE_GRACE_SECONDS");
        env::remove_var("APP__SERVER__BIND_ADDR");
    }

    #[test]
    #[serial]
    fn negative_durations_are_rejected() {
        env::set_var("APP__ROOMS__SWEEP_INTERVAL_SECONDS", "-5");
        assert!(Config::load().is_err());
        env::remove_var("APP__ROOMS__SWEEP_INTERVAL_SECONDS");
    }
}
