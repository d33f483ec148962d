//! Transaction Savepoints
//!
//! Provides savepoint management for nested transactions and partial rollbacks.
//! One manager lives on each root transaction, so names are unique per
//! physical connection.

use crate::backends::Connection;
use crate::error::{OrmError, OrmResult};
use std::sync::atomic::{AtomicU64, Ordering};

/// Savepoint manager for handling nested transactions
#[derive(Debug, Default)]
pub struct SavepointManager {
    savepoint_count: AtomicU64,
}

impl SavepointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new savepoint named `savepoint_<n>`
    pub fn create_savepoint(&self, conn: &mut dyn Connection) -> OrmResult<String> {
        let n = self.savepoint_count.fetch_add(1, Ordering::Relaxed) + 1;
        let savepoint_name = format!("savepoint_{}", n);

        let sql = format!("SAVEPOINT {}", savepoint_name);
        conn.execute(&sql, &[])
            .map_err(|e| OrmError::Transaction(format!("Failed to create savepoint: {}", e)))?;

        Ok(savepoint_name)
    }

    /// Release a savepoint, keeping its changes in the enclosing transaction
    pub fn release_savepoint(&self, conn: &mut dyn Connection, savepoint_name: &str) -> OrmResult<()> {
        let sql = format!("RELEASE SAVEPOINT {}", savepoint_name);
        conn.execute(&sql, &[])
            .map_err(|e| OrmError::Transaction(format!("Failed to release savepoint: {}", e)))?;

        Ok(())
    }

    /// Rollback to a savepoint and discard it
    pub fn rollback_to_savepoint(&self, conn: &mut dyn Connection, savepoint_name: &str) -> OrmResult<()> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", savepoint_name);
        conn.execute(&sql, &[]).map_err(|e| {
            OrmError::Transaction(format!("Failed to rollback to savepoint: {}", e))
        })?;
        self.release_savepoint(conn, savepoint_name)
    }

    /// Get the current savepoint count
    pub fn savepoint_count(&self) -> u64 {
        self.savepoint_count.load(Ordering::Relaxed)
    }
}
