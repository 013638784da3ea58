//! Configuration management for the quotaguard server.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::error::{QuotaGuardError, Result};
use crate::ratelimit::{FailurePolicy, RateLimitConfig};

/// Prefix of environment variables overriding file settings.
pub const ENV_PREFIX: &str = "QUOTAGUARD";

/// Main configuration for the quotaguard service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

/// Scalar settings that may come from the environment, e.g.
/// `QUOTAGUARD_DEFAULT_LIMIT=60` or `QUOTAGUARD_REDIS_URL=redis://cache:6379`.
///
/// Path overrides are only read from the file: environment keys are
/// case-folded, which would break case-sensitive path matching.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    listen_addr: Option<SocketAddr>,
    default_limit: Option<u32>,
    default_period: Option<u64>,
    limit_per_user: Option<bool>,
    redis_url: Option<String>,
    key_prefix: Option<String>,
    per_path_buckets: Option<bool>,
    failure_policy: Option<FailurePolicy>,
    store_timeout_ms: Option<u64>,
}

impl ServiceConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServiceConfig = serde_yaml::from_str(&contents)
            .map_err(|e| QuotaGuardError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load the optional file, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let env = ::config::Config::builder()
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize::<EnvOverrides>())
            .map_err(|e| QuotaGuardError::Config(e.to_string()))?;
        config.apply(env);

        config.rate_limiting.validate()?;
        Ok(config)
    }

    fn apply(&mut self, env: EnvOverrides) {
        let limits = &mut self.rate_limiting;
        if let Some(addr) = env.listen_addr {
            self.server.listen_addr = addr;
        }
        if let Some(limit) = env.default_limit {
            limits.default_limit = limit;
        }
        if let Some(period) = env.default_period {
            limits.default_period = period;
        }
        if let Some(per_user) = env.limit_per_user {
            limits.limit_per_user = per_user;
        }
        if let Some(url) = env.redis_url {
            limits.redis_url = Some(url);
        }
        if let Some(prefix) = env.key_prefix {
            limits.key_prefix = prefix;
        }
        if let Some(per_path) = env.per_path_buckets {
            limits.per_path_buckets = per_path;
        }
        if let Some(policy) = env.failure_policy {
            limits.failure_policy = policy;
        }
        if let Some(timeout) = env.store_timeout_ms {
            limits.store_timeout_ms = timeout;
        }
    }
}
