//! Pool configuration
//!
//! Deserializable so applications can embed it in their own config files.

use serde::{Deserialize, Serialize};

/// Connection pool and transaction worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of general threads, each owning one lazily opened connection
    pub pool_size: usize,
    /// Live transaction workers above which a warning is logged
    pub max_transaction_workers: usize,
    /// How many times a general interaction is re-run after a lost connection
    pub reconnect_retries: u32,
    /// Allow savepoints on SQLite connections
    pub sqlite_savepoints: bool,
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            max_transaction_workers: 16,
            reconnect_retries: 1,
            sqlite_savepoints: false,
            thread_name_prefix: "tether-orm".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_reconnect_retries(mut self, retries: u32) -> Self {
        self.reconnect_retries = retries;
        self
    }

    pub fn with_sqlite_savepoints(mut self, enabled: bool) -> Self {
        self.sqlite_savepoints = enabled;
        self
    }

    pub fn with_max_transaction_workers(mut self, max: usize) -> Self {
        self.max_transaction_workers = max;
        self
    }

    pub(crate) fn validate(&self) -> crate::error::OrmResult<()> {
        if self.pool_size == 0 {
            return Err(crate::error::OrmError::Configuration(
                "pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
