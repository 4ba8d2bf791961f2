//! Configuration module for environment variables and client settings
//!
//! Everything the stack recognizes lives in one strongly-typed struct,
//! validated once at startup. There is no process-global configuration;
//! the validated [`ClientConfig`] is handed to
//! [`ForgeClient::new`](crate::client::ForgeClient::new) and owned by it.

use std::env;
use std::time::Duration;

use crate::error::ClientError;
use crate::pool::Role;

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend API endpoints and auth
    pub backend: BackendConfig,

    /// Logical connection pool sizing and health checking
    pub pool: PoolConfig,

    /// Query result cache
    pub cache: CacheConfig,

    /// Bulk write batching
    pub batch: BatchConfig,

    /// Shared retry policy for transient transport failures
    pub retry: RetryConfig,

    /// Query metric retention
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// PostgREST-style endpoints, at least one with the write role.
    pub endpoints: Vec<EndpointConfig>,
    /// Bearer token sent with every request.
    pub api_key: String,
    /// Per-request timeout on outbound calls.
    pub request_timeout: Duration,
}

/// One configured backend target. Read replicas get `Role::Read`; the
/// primary gets `Role::Write` (and also serves reads when acquired as such).
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub url: String,
    pub role: Role,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum live connections per role.
    pub max_per_role: usize,
    /// Bounded wait when every connection of a role is busy.
    pub acquire_timeout: Duration,
    /// Interval between background health sweeps.
    pub health_check_interval: Duration,
    /// Consecutive failed checks before a connection is excluded.
    pub unhealthy_after_failures: u32,
    /// How long an excluded connection sits out before being re-checked.
    pub unhealthy_cooldown: Duration,
    /// Idle connections older than this are pruned by the health sweep.
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when the caller does not specify one.
    pub default_ttl: Duration,
    /// Entry cap; LRU eviction kicks in beyond this.
    pub max_entries: usize,
    /// Interval between expired-entry sweeps.
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Items per chunk for bulk operations.
    pub batch_size: usize,
    /// Chunks executed at once. 1 means strictly sequential.
    pub max_concurrency: usize,
}

/// Retry configuration for transient transport failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Metrics older than this are pruned.
    pub retention: Duration,
    /// Interval between background prune passes.
    pub prune_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_role: 4,
            acquire_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
            unhealthy_after_failures: 3,
            unhealthy_cooldown: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_millis(30_000),
            max_entries: 500,
            sweep_interval: Duration::from_secs(10),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_concurrency: 1,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3600),
            prune_interval: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// `FORGE_BACKEND_URL` and `FORGE_API_KEY` are required. An optional
    /// comma-separated `FORGE_READ_REPLICA_URLS` adds read-role endpoints;
    /// replica regions come from `FORGE_READ_REPLICA_REGIONS` (same order,
    /// defaulting to the primary region). Everything else has defaults.
    pub fn from_env() -> Result<Self, ClientError> {
        let primary_url = env::var("FORGE_BACKEND_URL")
            .map_err(|_| ClientError::Validation("FORGE_BACKEND_URL is required".into()))?;
        let api_key = env::var("FORGE_API_KEY")
            .map_err(|_| ClientError::Validation("FORGE_API_KEY is required".into()))?;
        let primary_region =
            env::var("FORGE_BACKEND_REGION").unwrap_or_else(|_| "default".to_string());

        let mut endpoints = vec![EndpointConfig {
            url: primary_url,
            role: Role::Write,
            region: primary_region.clone(),
        }];

        if let Ok(replicas) = env::var("FORGE_READ_REPLICA_URLS") {
            let regions: Vec<String> = env::var("FORGE_READ_REPLICA_REGIONS")
                .map(|s| s.split(',').map(|r| r.trim().to_string()).collect())
                .unwrap_or_default();
            for (i, u) in replicas.split(',').filter(|u| !u.trim().is_empty()).enumerate() {
                endpoints.push(EndpointConfig {
                    url: u.trim().to_string(),
                    role: Role::Read,
                    region: regions
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| primary_region.clone()),
                });
            }
        }

        let config = Self {
            backend: BackendConfig {
                endpoints,
                api_key,
                request_timeout: Duration::from_millis(env_u64(
                    "FORGE_REQUEST_TIMEOUT_MS",
                    10_000,
                )),
            },
            pool: PoolConfig {
                max_per_role: env_u64("FORGE_MAX_CONNECTIONS", 4) as usize,
                acquire_timeout: Duration::from_millis(env_u64("FORGE_ACQUIRE_TIMEOUT_MS", 5_000)),
                ..PoolConfig::default()
            },
            cache: CacheConfig {
                default_ttl: Duration::from_millis(env_u64("FORGE_DEFAULT_TTL_MS", 30_000)),
                max_entries: env_u64("FORGE_MAX_CACHE_ENTRIES", 500) as usize,
                ..CacheConfig::default()
            },
            batch: BatchConfig {
                batch_size: env_u64("FORGE_BATCH_SIZE", 50) as usize,
                max_concurrency: env_u64("FORGE_BATCH_CONCURRENCY", 1) as usize,
            },
            retry: RetryConfig::default(),
            metrics: MetricsConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate once at startup. Anything that would silently misbehave at
    /// runtime (zero sizes, missing write endpoint, bad URLs) is rejected
    /// here instead.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.backend.endpoints.is_empty() {
            return Err(ClientError::Validation(
                "at least one backend endpoint is required".into(),
            ));
        }
        if !self.backend.endpoints.iter().any(|e| e.role == Role::Write) {
            return Err(ClientError::Validation(
                "a write-role endpoint is required".into(),
            ));
        }
        for endpoint in &self.backend.endpoints {
            url::Url::parse(&endpoint.url).map_err(|e| {
                ClientError::Validation(format!("invalid endpoint url {}: {e}", endpoint.url))
            })?;
        }
        if self.backend.api_key.is_empty() {
            return Err(ClientError::Validation("api_key must not be empty".into()));
        }
        if self.pool.max_per_role == 0 {
            return Err(ClientError::Validation("max_per_role must be > 0".into()));
        }
        if self.cache.max_entries == 0 {
            return Err(ClientError::Validation("max_entries must be > 0".into()));
        }
        if self.batch.batch_size == 0 {
            return Err(ClientError::Validation("batch_size must be > 0".into()));
        }
        if self.batch.max_concurrency == 0 {
            return Err(ClientError::Validation(
                "max_concurrency must be > 0 (1 means sequential)".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ClientError::Validation("max_attempts must be > 0".into()));
        }
        Ok(())
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) fn test_config() -> ClientConfig {
    ClientConfig {
        backend: BackendConfig {
            endpoints: vec![
                EndpointConfig {
                    url: "http://localhost:54321".into(),
                    role: Role::Write,
                    region: "local".into(),
                },
                EndpointConfig {
                    url: "http://localhost:54322".into(),
                    role: Role::Read,
                    region: "local".into(),
                },
            ],
            api_key: "test-key".into(),
            request_timeout: Duration::from_millis(10_000),
        },
        pool: PoolConfig::default(),
        cache: CacheConfig::default(),
        batch: BatchConfig::default(),
        retry: RetryConfig {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            ..RetryConfig::default()
        },
        metrics: MetricsConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        test_config().validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_pool() {
        let mut config = test_config();
        config.pool.max_per_role = 0;
        assert!(matches!(config.validate(), Err(ClientError::Validation(_))));
    }

    #[test]
    fn test_rejects_missing_write_endpoint() {
        let mut config = test_config();
        config.backend.endpoints.retain(|e| e.role == Role::Read);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_url() {
        let mut config = test_config();
        config.backend.endpoints[0].url = "not a url".into();
        assert!(config.validate().is_err());
    }
}
