//! Database Backend Abstractions
//!
//! This module provides the blocking driver boundary used by the pool and
//! transaction worker threads, plus the dialect adapters that turn
//! dialect-agnostic SQL into SQLite, MySQL or PostgreSQL text.

pub mod core;
pub mod dialect;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export core traits and types
pub use self::core::*;
pub use dialect::{dialect_for, DialectAdapter, MySqlDialect, PostgresDialect, SqliteDialect};
#[cfg(feature = "postgres")]
pub use postgres::PostgresConnectionFactory;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnectionFactory;

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::MySQL => write!(f, "mysql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = crate::error::OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(DatabaseBackendType::PostgreSQL),
            "mysql" | "mariadb" => Ok(DatabaseBackendType::MySQL),
            "sqlite" | "sqlite3" => Ok(DatabaseBackendType::SQLite),
            _ => Err(crate::error::OrmError::UnsupportedDriver(s.to_string())),
        }
    }
}
