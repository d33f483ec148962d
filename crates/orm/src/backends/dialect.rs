//! Dialect adapters
//!
//! The query builder emits `?` placeholders and unquoted keywords; a
//! [`DialectAdapter`] finalizes that text for one database and answers the
//! handful of questions where SQLite, MySQL and PostgreSQL disagree.

use super::DatabaseBackendType;
use crate::config::PoolConfig;
use crate::error::{OrmError, OrmResult};
use std::fmt::Debug;
use std::sync::Arc;

pub trait DialectAdapter: Send + Sync + Debug {
    fn backend_type(&self) -> DatabaseBackendType;

    /// Placeholder for the zero-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    fn quote_identifier(&self, identifier: &str) -> String;

    /// Statement returning the id generated by the last insert on this connection.
    fn last_insert_id_sql(&self) -> &'static str;

    /// Complete INSERT for a row with no explicit values.
    fn empty_insert_sql(&self, quoted_table: &str) -> String {
        format!("INSERT INTO {} DEFAULT VALUES", quoted_table)
    }

    /// Name of the column a `SELECT count(*)` comes back as.
    fn count_column(&self) -> &'static str {
        "count(*)"
    }

    /// Whether inserts bind NULL for every unset schema column.
    fn include_blank_in_insert(&self) -> bool {
        false
    }

    fn supports_multi_row_insert(&self) -> bool {
        true
    }

    fn supports_savepoints(&self) -> bool {
        true
    }

    /// Rewrite `?` placeholders outside of quoted text into dialect placeholders.
    fn finalize(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len() + 8);
        let mut index = 0;
        let mut quote: Option<char> = None;
        for c in sql.chars() {
            match quote {
                Some(q) => {
                    if c == q {
                        quote = None;
                    }
                    out.push(c);
                }
                None => match c {
                    '\'' | '"' | '`' => {
                        quote = Some(c);
                        out.push(c);
                    }
                    '?' => {
                        out.push_str(&self.placeholder(index));
                        index += 1;
                    }
                    _ => out.push(c),
                },
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqliteDialect {
    savepoints: bool,
}

impl SqliteDialect {
    /// SQLite savepoints are off unless explicitly enabled.
    pub const fn with_savepoints(savepoints: bool) -> Self {
        Self { savepoints }
    }
}

impl DialectAdapter for SqliteDialect {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn last_insert_id_sql(&self) -> &'static str {
        "SELECT last_insert_rowid()"
    }

    fn include_blank_in_insert(&self) -> bool {
        true
    }

    fn supports_multi_row_insert(&self) -> bool {
        false
    }

    fn supports_savepoints(&self) -> bool {
        self.savepoints
    }

    fn finalize(&self, sql: &str) -> String {
        sql.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl DialectAdapter for MySqlDialect {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::MySQL
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn last_insert_id_sql(&self) -> &'static str {
        "SELECT LAST_INSERT_ID()"
    }

    fn empty_insert_sql(&self, quoted_table: &str) -> String {
        format!("INSERT INTO {} VALUES ()", quoted_table)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl DialectAdapter for PostgresDialect {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn last_insert_id_sql(&self) -> &'static str {
        "SELECT lastval()"
    }

    fn count_column(&self) -> &'static str {
        "count"
    }
}

/// Select the adapter for a driver name.
pub fn dialect_for(driver: &str, config: &PoolConfig) -> OrmResult<Arc<dyn DialectAdapter>> {
    let adapter: Arc<dyn DialectAdapter> = match driver.parse::<DatabaseBackendType>()? {
        DatabaseBackendType::SQLite => Arc::new(SqliteDialect::with_savepoints(config.sqlite_savepoints)),
        DatabaseBackendType::MySQL => Arc::new(MySqlDialect),
        DatabaseBackendType::PostgreSQL => Arc::new(PostgresDialect),
    };
    Ok(adapter)
}

/// Fail with `Unsupported` when the dialect cannot issue savepoints.
pub(crate) fn require_savepoints(dialect: &dyn DialectAdapter) -> OrmResult<()> {
    if dialect.supports_savepoints() {
        Ok(())
    } else {
        Err(OrmError::Unsupported(format!(
            "savepoints are not available for {}",
            dialect.backend_type()
        )))
    }
}
