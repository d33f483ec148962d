//! PostgreSQL Backend Implementation
//!
//! Uses sqlx as the underlying driver. Each connection owns a current-thread
//! tokio runtime and blocks on it, which keeps the connection bound to the
//! pool or transaction worker thread that opened it.

use super::core::*;
use crate::error::{OrmError, OrmResult};
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection as _, Executor as _, Postgres, Row as _, TypeInfo, ValueRef as _};

fn map_pg_error(err: sqlx::Error) -> OrmError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            OrmError::UniqueViolation(db.message().to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            OrmError::ConnectionLost(err.to_string())
        }
        _ => OrmError::Database(err.to_string()),
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q DatabaseValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.as_str()),
        DatabaseValue::Bytes(b) => query.bind(b.as_slice()),
    }
}

fn decode_column(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row.try_get_raw(index).map_err(map_pg_error)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = raw.type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index).map_err(map_pg_error)?),
        "INT2" => DatabaseValue::Int32(row.try_get::<i16, _>(index).map_err(map_pg_error)? as i32),
        "INT4" => DatabaseValue::Int32(row.try_get(index).map_err(map_pg_error)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index).map_err(map_pg_error)?),
        "FLOAT4" => DatabaseValue::Float64(row.try_get::<f32, _>(index).map_err(map_pg_error)? as f64),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index).map_err(map_pg_error)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index).map_err(map_pg_error)?),
        _ => DatabaseValue::String(row.try_get(index).map_err(|e| {
            OrmError::Database(format!("Cannot decode column of type {}: {}", type_name, e))
        })?),
    };
    Ok(value)
}

/// Opens PostgreSQL connections from a connection URL.
#[derive(Debug, Clone)]
pub struct PostgresConnectionFactory {
    url: String,
}

impl PostgresConnectionFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ConnectionFactory for PostgresConnectionFactory {
    fn connect(&self) -> OrmResult<Box<dyn Connection>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| OrmError::Connection(format!("Failed to build driver runtime: {}", e)))?;
        let conn = runtime
            .block_on(PgConnection::connect(&self.url))
            .map_err(|e| OrmError::Connection(format!("Failed to connect to PostgreSQL: {}", e)))?;
        tracing::debug!("Opened PostgreSQL connection");
        Ok(Box::new(PostgresConnection { runtime, conn }))
    }

    fn driver_name(&self) -> &str {
        "postgres"
    }
}

pub struct PostgresConnection {
    runtime: tokio::runtime::Runtime,
    conn: PgConnection,
}

impl PostgresConnection {
    fn simple(&mut self, sql: &str) -> OrmResult<()> {
        let conn = &mut self.conn;
        self.runtime
            .block_on(conn.execute(sql))
            .map(|_| ())
            .map_err(map_pg_error)
    }
}

impl Connection for PostgresConnection {
    fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ResultSet> {
        let conn = &mut self.conn;
        self.runtime.block_on(async move {
            let mut query = sqlx::query(sql);
            for value in params {
                query = bind_value(query, value);
            }
            let rows = query.fetch_all(&mut *conn).await.map_err(map_pg_error)?;

            let columns: Vec<String> = match rows.first() {
                Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
                None => {
                    let described = conn.describe(sql).await.map_err(map_pg_error)?;
                    described.columns().iter().map(|c| c.name().to_string()).collect()
                }
            };

            let mut out = Vec::with_capacity(rows.len());
            for row in &rows {
                let mut values = Vec::with_capacity(columns.len());
                for index in 0..columns.len() {
                    values.push(decode_column(row, index)?);
                }
                out.push(values);
            }
            Ok(ResultSet::new(columns, out))
        })
    }

    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let conn = &mut self.conn;
        self.runtime.block_on(async move {
            let mut query = sqlx::query(sql);
            for value in params {
                query = bind_value(query, value);
            }
            let result = query.execute(&mut *conn).await.map_err(map_pg_error)?;
            Ok(result.rows_affected())
        })
    }

    // Readers never block on writers under MVCC, so both modes open the same way
    fn begin(&mut self, _mode: AccessMode) -> OrmResult<()> {
        self.simple("BEGIN")
    }

    fn commit(&mut self) -> OrmResult<()> {
        self.simple("COMMIT")
    }

    fn rollback(&mut self) -> OrmResult<()> {
        self.simple("ROLLBACK")
    }
}
