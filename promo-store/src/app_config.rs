use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout() -> u64 { 3 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// Which offer store / transition queue pair the process runs on
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub lease_seconds: u64,
    pub retry_backoff_seconds: u64,
    pub max_attempts: u32,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 1000,
            batch_size: 50,
            lease_seconds: 30,
            retry_backoff_seconds: 15,
            max_attempts: 10,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, e.g. config/test.toml
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `PROMO__SERVER__PORT=8080`
            .add_source(config::Environment::with_prefix("PROMO").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_defaults_when_section_missing() {
        let s = config::Config::builder()
            .set_override("server.port", 3000).unwrap()
            .set_override("database.url", "postgres://localhost/promo").unwrap()
            .set_override("redis.url", "redis://127.0.0.1").unwrap()
            .set_override("store.backend", "memory").unwrap()
            .build()
            .unwrap();

        let config: Config = s.try_deserialize().unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.worker.batch_size, 50);
        assert_eq!(config.worker.lease(), Duration::from_secs(30));
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_partial_worker_section_keeps_other_defaults() {
        let s = config::Config::builder()
            .set_override("server.port", 3000).unwrap()
            .set_override("database.url", "postgres://localhost/promo").unwrap()
            .set_override("redis.url", "redis://127.0.0.1").unwrap()
            .set_override("worker.enabled", false).unwrap()
            .build()
            .unwrap();

        let config: Config = s.try_deserialize().unwrap();
        assert!(!config.worker.enabled);
        assert_eq!(config.worker.poll_interval(), Duration::from_millis(1000));
        assert_eq!(config.worker.retry_backoff(), Duration::from_secs(15));
        assert_eq!(config.worker.max_attempts, 10);
    }
}
