//! Statement execution
//!
//! [`Executor`] is the seam between query building and connections: a
//! [`Transaction`] executes on its pinned connection, a pool session on the
//! general thread's connection. The helpers here combine the SQL builders
//! with an executor and convert rows into attribute maps.

use super::sql_generation::{SelectOptions, SqlBuilder};
use super::where_clause::Where;
use crate::backends::{DatabaseValue, DialectAdapter, ResultSet};
use crate::error::{OrmError, OrmResult};
use crate::model::Attributes;
use crate::registry::registry;
use crate::transaction::Transaction;

/// Runs finalized statements. Takes `&self` so nested helpers and hooks can
/// share one executor.
pub trait Executor {
    fn dialect(&self) -> &dyn DialectAdapter;

    /// Run a statement written with `?` placeholders and return its rows.
    fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ResultSet>;

    /// Run a statement written with `?` placeholders and return the affected row count.
    fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// The transaction statements run in, when the executor is one.
    fn transaction(&self) -> Option<&Transaction> {
        None
    }
}

pub(crate) fn log_query(sql: &str, params: &[DatabaseValue]) {
    if registry().log_queries() {
        tracing::info!(target: "tether_orm::query", sql = %sql, params = ?params, "query");
    }
}

/// Result of a select: one optional row when the options ask for a single
/// row, otherwise a list.
#[derive(Debug, Clone, PartialEq)]
pub enum Selected {
    One(Option<Attributes>),
    Many(Vec<Attributes>),
}

impl Selected {
    pub fn into_vec(self) -> Vec<Attributes> {
        match self {
            Selected::One(row) => row.into_iter().collect(),
            Selected::Many(rows) => rows,
        }
    }
}

pub fn rows_to_attributes(rs: ResultSet) -> Vec<Attributes> {
    let ResultSet { columns, rows } = rs;
    rows.into_iter()
        .map(|row| columns.iter().cloned().zip(row).collect())
        .collect()
}

pub fn select(ex: &dyn Executor, table: &str, options: &SelectOptions) -> OrmResult<Selected> {
    let stmt = SqlBuilder::new(ex.dialect()).build_select(table, options);
    let rs = ex.fetch_all(&stmt.statement.sql, &stmt.statement.params)?;
    if options.select.is_none() {
        registry().schema().remember(table, rs.columns.clone());
    }
    let mut rows = rows_to_attributes(rs);
    Ok(if stmt.single {
        Selected::One(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    } else {
        Selected::Many(rows)
    })
}

pub fn insert(ex: &dyn Executor, table: &str, values: &Attributes) -> OrmResult<u64> {
    let stmt = SqlBuilder::new(ex.dialect()).build_insert(table, values);
    ex.execute(&stmt.sql, &stmt.params)
}

pub fn insert_many(ex: &dyn Executor, table: &str, rows: &[Attributes]) -> OrmResult<u64> {
    let mut affected = 0;
    for stmt in SqlBuilder::new(ex.dialect()).build_insert_many(table, rows) {
        affected += ex.execute(&stmt.sql, &stmt.params)?;
    }
    Ok(affected)
}

pub fn update(ex: &dyn Executor, table: &str, values: &Attributes, filter: Option<&Where>) -> OrmResult<u64> {
    let stmt = SqlBuilder::new(ex.dialect()).build_update(table, values, filter)?;
    ex.execute(&stmt.sql, &stmt.params)
}

pub fn delete(ex: &dyn Executor, table: &str, filter: Option<&Where>) -> OrmResult<u64> {
    let stmt = SqlBuilder::new(ex.dialect()).build_delete(table, filter);
    ex.execute(&stmt.sql, &stmt.params)
}

/// Row count, read from the dialect's count column (or the first column).
pub fn count(ex: &dyn Executor, table: &str, filter: Option<&Where>) -> OrmResult<i64> {
    let stmt = SqlBuilder::new(ex.dialect()).build_count(table, filter);
    let rs = ex.fetch_all(&stmt.sql, &stmt.params)?;
    let index = rs.column_index(ex.dialect().count_column()).unwrap_or(0);
    rs.rows
        .first()
        .and_then(|row| row.get(index))
        .and_then(DatabaseValue::as_i64)
        .ok_or_else(|| OrmError::Database(format!("count on '{}' returned no value", table)))
}

/// Id generated by the last insert on the executor's connection.
pub fn last_insert_id(ex: &dyn Executor) -> OrmResult<i64> {
    let rs = ex.fetch_all(ex.dialect().last_insert_id_sql(), &[])?;
    rs.scalar()
        .and_then(DatabaseValue::as_i64)
        .ok_or_else(|| OrmError::Database("could not read the last insert id".to_string()))
}
