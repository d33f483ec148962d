//! SQLite Backend Implementation
//!
//! Blocking driver on top of rusqlite. Every connection runs in WAL mode with
//! a busy timeout. Read-write driver transactions start with
//! `BEGIN IMMEDIATE` so concurrent writers queue on the database lock instead
//! of deadlocking on a lock upgrade; read-only ones stay deferred and never
//! wait on a writer.

use super::core::*;
use crate::error::{OrmError, OrmResult};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{ffi, params_from_iter, ErrorCode, ToSql};
use std::path::PathBuf;
use std::time::Duration;

impl ToSql for DatabaseValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            DatabaseValue::Null => ToSqlOutput::Owned(Value::Null),
            DatabaseValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(*b as i64)),
            DatabaseValue::Int32(i) => ToSqlOutput::Owned(Value::Integer(*i as i64)),
            DatabaseValue::Int64(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            DatabaseValue::Float64(f) => ToSqlOutput::Owned(Value::Real(*f)),
            DatabaseValue::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            DatabaseValue::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> DatabaseValue {
    match value {
        ValueRef::Null => DatabaseValue::Null,
        ValueRef::Integer(i) => DatabaseValue::Int64(i),
        ValueRef::Real(f) => DatabaseValue::Float64(f),
        ValueRef::Text(t) => DatabaseValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => DatabaseValue::Bytes(b.to_vec()),
    }
}

pub(crate) fn map_sqlite_error(err: rusqlite::Error) -> OrmError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if failure.code == ErrorCode::ConstraintViolation
            && matches!(
                failure.extended_code,
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            )
        {
            return OrmError::UniqueViolation(message.clone().unwrap_or_else(|| err.to_string()));
        }
    }
    OrmError::Database(err.to_string())
}

/// Opens SQLite connections to one database file.
#[derive(Debug, Clone)]
pub struct SqliteConnectionFactory {
    path: PathBuf,
    busy_timeout: Duration,
    wal: bool,
}

impl SqliteConnectionFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
            wal: true,
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn connect(&self) -> OrmResult<Box<dyn Connection>> {
        let conn = rusqlite::Connection::open(&self.path).map_err(|e| {
            OrmError::Connection(format!("Failed to open {}: {}", self.path.display(), e))
        })?;
        conn.busy_timeout(self.busy_timeout).map_err(map_sqlite_error)?;
        if self.wal {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
                .map_err(map_sqlite_error)?;
        }
        tracing::debug!("Opened SQLite connection to {}", self.path.display());
        Ok(Box::new(SqliteConnection { conn }))
    }

    fn driver_name(&self) -> &str {
        "sqlite"
    }
}

pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl Connection for SqliteConnection {
    fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ResultSet> {
        let mut stmt = self.conn.prepare(sql).map_err(map_sqlite_error)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = stmt.query(params_from_iter(params.iter())).map_err(map_sqlite_error)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqlite_error)? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(from_value_ref(row.get_ref(index).map_err(map_sqlite_error)?));
            }
            out.push(values);
        }
        Ok(ResultSet::new(columns, out))
    }

    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter()))
            .map_err(map_sqlite_error)?;
        Ok(affected as u64)
    }

    fn begin(&mut self, mode: AccessMode) -> OrmResult<()> {
        let sql = match mode {
            AccessMode::ReadWrite => "BEGIN IMMEDIATE",
            AccessMode::ReadOnly => "BEGIN DEFERRED",
        };
        self.conn.execute_batch(sql).map_err(map_sqlite_error)
    }

    fn commit(&mut self) -> OrmResult<()> {
        self.conn.execute_batch("COMMIT").map_err(map_sqlite_error)
    }

    fn rollback(&mut self) -> OrmResult<()> {
        self.conn.execute_batch("ROLLBACK").map_err(map_sqlite_error)
    }
}
