//! Schema cache
//!
//! Column lists per table, learned by probing the table once through the
//! caller's executor and shared by every thread afterwards.

use crate::error::{OrmError, OrmResult};
use crate::query::Executor;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct SchemaCache {
    tables: DashMap<String, Arc<Vec<String>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered column names of `table`, probing with `SELECT * ... LIMIT 1`
    /// on first use.
    pub fn get_schema(&self, table: &str, ex: &dyn Executor) -> OrmResult<Arc<Vec<String>>> {
        if let Some(columns) = self.tables.get(table) {
            return Ok(columns.clone());
        }
        let sql = format!("SELECT * FROM {} LIMIT 1", ex.dialect().quote_identifier(table));
        let rs = ex.fetch_all(&sql, &[]).map_err(|e| match e {
            OrmError::Database(reason) => {
                tracing::debug!("Schema probe for '{}' failed: {}", table, reason);
                OrmError::ImaginaryTable(table.to_string())
            }
            other => other,
        })?;
        Ok(self.remember(table, rs.columns))
    }

    /// Cache `columns` unless the table is already known; returns the cached list.
    pub fn remember(&self, table: &str, columns: Vec<String>) -> Arc<Vec<String>> {
        self.tables
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(columns))
            .clone()
    }

    pub fn cached(&self, table: &str) -> Option<Arc<Vec<String>>> {
        self.tables.get(table).map(|c| c.clone())
    }

    pub fn forget(&self, table: &str) {
        self.tables.remove(table);
    }

    pub fn clear(&self) {
        self.tables.clear();
    }
}
