//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the pool engine.
///
/// Every field is optional when deserializing; missing fields take the
/// values from [`PoolConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Minimum number of resources kept alive (pre-warmed at launch)
    pub min_size: usize,
    /// Maximum number of live resources (idle + borrowed)
    pub max_size: usize,
    /// How long a borrow request may wait for a free resource
    pub acquire_timeout: Duration,
    /// Idle resources older than this are evicted
    pub idle_timeout: Duration,
    /// Resources older than this are evicted regardless of use
    pub max_lifetime: Duration,
    /// How often background maintenance runs; `None` disables it
    pub idle_check_interval: Option<Duration>,
    /// Log lifecycle events at `INFO` instead of `DEBUG`
    pub verbose: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(3600),
            idle_check_interval: None,
            verbose: false,
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::configuration("max_size must be greater than 0"));
        }
        if self.min_size > self.max_size {
            return Err(Error::configuration(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(Error::configuration(
                "acquire_timeout must be greater than zero",
            ));
        }
        if self.idle_check_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(Error::configuration(
                "idle_check_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}
