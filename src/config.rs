//! Engine configuration, loaded from the environment
//!
//! Mirrors the teacher's `dotenvy` dependency (present in its root workspace
//! manifest) and the original Python system's reliance on environment
//! configuration for Redis/Postgres connection strings.

use std::time::Duration;

/// Engine-wide configuration collected from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Postgres connection string for the authoritative state store.
    pub database_url: String,

    /// Redis connection string backing the snapshot cache and distributed lock.
    pub redis_url: String,

    /// Default snapshot cache TTL.
    pub cache_ttl: Duration,

    /// Soft wall-clock limit for handler execution (retryable timeout).
    pub handler_soft_timeout: Duration,

    /// Hard wall-clock limit for handler execution (handler considered lost).
    pub handler_hard_timeout: Duration,

    /// Default circuit breaker failure threshold.
    pub circuit_failure_threshold: u32,

    /// Default circuit breaker recovery timeout.
    pub circuit_recovery_timeout: Duration,

    /// Worker pool max concurrency.
    pub worker_max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/workflow_engine".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            cache_ttl: Duration::from_secs(3600),
            handler_soft_timeout: Duration::from_secs(570), // 9.5 min
            handler_hard_timeout: Duration::from_secs(600), // 10 min
            circuit_failure_threshold: 5,
            circuit_recovery_timeout: Duration::from_secs(60),
            worker_max_concurrency: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Reads a `.env` file if present (via `dotenvy`), then overlays
    /// `std::env::var` values on top of [`EngineConfig::default`].
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        Self {
            database_url: env_or("DATABASE_URL", defaults.database_url),
            redis_url: env_or("REDIS_URL", defaults.redis_url),
            cache_ttl: env_secs_or("CACHE_TTL_SECONDS", defaults.cache_ttl),
            handler_soft_timeout: env_secs_or(
                "HANDLER_SOFT_TIMEOUT_SECONDS",
                defaults.handler_soft_timeout,
            ),
            handler_hard_timeout: env_secs_or(
                "HANDLER_HARD_TIMEOUT_SECONDS",
                defaults.handler_hard_timeout,
            ),
            circuit_failure_threshold: env_u32_or(
                "CIRCUIT_FAILURE_THRESHOLD",
                defaults.circuit_failure_threshold,
            ),
            circuit_recovery_timeout: env_secs_or(
                "CIRCUIT_RECOVERY_TIMEOUT_SECONDS",
                defaults.circuit_recovery_timeout,
            ),
            worker_max_concurrency: env_u32_or(
                "WORKER_MAX_CONCURRENCY",
                defaults.worker_max_concurrency as u32,
            ) as usize,
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_secs_or(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_u32_or(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = EngineConfig::default();
        assert_eq!(config.handler_soft_timeout, Duration::from_secs(570));
        assert_eq!(config.handler_hard_timeout, Duration::from_secs(600));
        assert_eq!(config.circuit_recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.circuit_failure_threshold, 5);
    }
}
