//! Pool configuration
//!
//! Validated at construction; a pool never starts with inconsistent limits.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Minimum number of connections to maintain
    pub min_connections: usize,

    /// Maximum number of connections allowed
    pub max_connections: usize,

    /// Abort threshold for creating a single connection
    pub connection_creation_timeout: Duration,

    /// Maximum time a connection can sit idle before being reaped
    pub idle_timeout: Duration,

    /// Default deadline for acquiring a connection
    pub acquire_timeout: Duration,

    /// Reserved for callers; acquire itself never retries
    pub retry_attempts: u32,

    /// Start the monitoring loop on `start()`
    pub enable_monitoring: bool,

    /// Monitoring loop period
    pub stats_collection_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 20,
            connection_creation_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            enable_monitoring: true,
            stats_collection_interval: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Validate configuration, collecting every violation into one error
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.max_connections == 0 {
            problems.push("max_connections must be positive".to_string());
        }

        if self.min_connections >= self.max_connections {
            problems.push(format!(
                "min_connections ({}) must be less than max_connections ({})",
                self.min_connections, self.max_connections
            ));
        }

        if self.connection_creation_timeout.is_zero() {
            problems.push("connection_creation_timeout must be positive".to_string());
        }

        if self.acquire_timeout.is_zero() {
            problems.push("acquire_timeout must be positive".to_string());
        }

        if self.idle_timeout.is_zero() {
            problems.push("idle_timeout must be positive".to_string());
        }

        if self.stats_collection_interval.is_zero() {
            problems.push("stats_collection_interval must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(problems.join(", ")))
        }
    }
}
