//! SQL statement generation
//!
//! Builders produce dialect-agnostic text with `?` placeholders; table and
//! column names coming from attribute maps are quoted by the dialect.
//! Executors finalize the placeholders right before the driver call.

use super::where_clause::Where;
use crate::backends::{DatabaseValue, DialectAdapter};
use crate::error::{OrmError, OrmResult};
use crate::model::Attributes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// `LIMIT n`; a count of 1 yields a single row
    Count(u64),
    /// `LIMIT count OFFSET offset`; always yields a list
    Page { count: u64, offset: u64 },
}

/// Options shared by entity lookups and raw selects
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub id: Option<i64>,
    pub filter: Option<Where>,
    pub select: Option<String>,
    pub group_by: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<Limit>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Add a condition, joined with AND to any existing one
    pub fn filter(mut self, filter: Where) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = Some(columns.into());
        self
    }

    pub fn group_by(mut self, group: impl Into<String>) -> Self {
        self.group_by = Some(group.into());
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn limit(mut self, count: u64) -> Self {
        self.limit = Some(Limit::Count(count));
        self
    }

    pub fn page(mut self, count: u64, offset: u64) -> Self {
        self.limit = Some(Limit::Page { count, offset });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub statement: Statement,
    /// The caller expects at most one row
    pub single: bool,
}

pub struct SqlBuilder<'d> {
    dialect: &'d dyn DialectAdapter,
}

impl<'d> SqlBuilder<'d> {
    pub fn new(dialect: &'d dyn DialectAdapter) -> Self {
        Self { dialect }
    }

    fn table(&self, table: &str) -> String {
        self.dialect.quote_identifier(table)
    }

    fn push_where(sql: &mut String, params: &mut Vec<DatabaseValue>, filter: Option<&Where>) {
        if let Some(filter) = filter.filter(|w| !w.is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(filter.clause());
            params.extend(filter.params().iter().cloned());
        }
    }

    pub fn build_select(&self, table: &str, options: &SelectOptions) -> SelectStatement {
        let mut sql = format!(
            "SELECT {} FROM {}",
            options.select.as_deref().unwrap_or("*"),
            self.table(table)
        );
        let mut params = Vec::new();

        // A lookup by id ignores any other filter
        let filter = match options.id {
            Some(id) => Some(Where::new("id = ?").bind(id)),
            None => options.filter.clone(),
        };
        Self::push_where(&mut sql, &mut params, filter.as_ref());

        if let Some(group) = &options.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(group);
        }
        if let Some(order) = &options.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }

        let mut single = options.id.is_some();
        match options.limit {
            Some(Limit::Count(count)) => {
                sql.push_str(&format!(" LIMIT {}", count));
                single |= count == 1;
            }
            Some(Limit::Page { count, offset }) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", count, offset));
            }
            None => {}
        }

        SelectStatement {
            statement: Statement { sql, params },
            single,
        }
    }

    pub fn build_insert(&self, table: &str, values: &Attributes) -> Statement {
        if values.is_empty() {
            return Statement {
                sql: self.dialect.empty_insert_sql(&self.table(table)),
                params: Vec::new(),
            };
        }
        let columns: Vec<String> = values.keys().map(|c| self.dialect.quote_identifier(c)).collect();
        let placeholders = vec!["?"; values.len()].join(", ");
        Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table(table),
                columns.join(", "),
                placeholders
            ),
            params: values.values().cloned().collect(),
        }
    }

    /// Insert several rows. Columns come from the first row; values missing
    /// from later rows are bound as NULL.
    pub fn build_insert_many(&self, table: &str, rows: &[Attributes]) -> Vec<Statement> {
        let Some(first) = rows.first() else {
            return Vec::new();
        };
        if first.is_empty() || !self.dialect.supports_multi_row_insert() {
            return rows.iter().map(|row| self.build_insert(table, row)).collect();
        }

        let columns: Vec<&String> = first.keys().collect();
        let row_placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
        let mut params = Vec::with_capacity(columns.len() * rows.len());
        for row in rows {
            for column in &columns {
                params.push(row.get(*column).cloned().unwrap_or(DatabaseValue::Null));
            }
        }
        let quoted: Vec<String> = columns.iter().map(|c| self.dialect.quote_identifier(c)).collect();
        vec![Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES {}",
                self.table(table),
                quoted.join(", "),
                vec![row_placeholders; rows.len()].join(", ")
            ),
            params,
        }]
    }

    /// SET parameters come before WHERE parameters.
    pub fn build_update(&self, table: &str, values: &Attributes, filter: Option<&Where>) -> OrmResult<Statement> {
        if values.is_empty() {
            return Err(OrmError::Query(format!("No columns to update in '{}'", table)));
        }
        let assignments: Vec<String> = values
            .keys()
            .map(|c| format!("{} = ?", self.dialect.quote_identifier(c)))
            .collect();
        let mut sql = format!("UPDATE {} SET {}", self.table(table), assignments.join(", "));
        let mut params: Vec<DatabaseValue> = values.values().cloned().collect();
        Self::push_where(&mut sql, &mut params, filter);
        Ok(Statement { sql, params })
    }

    pub fn build_delete(&self, table: &str, filter: Option<&Where>) -> Statement {
        let mut sql = format!("DELETE FROM {}", self.table(table));
        let mut params = Vec::new();
        Self::push_where(&mut sql, &mut params, filter);
        Statement { sql, params }
    }

    pub fn build_count(&self, table: &str, filter: Option<&Where>) -> Statement {
        let mut sql = format!("SELECT count(*) FROM {}", self.table(table));
        let mut params = Vec::new();
        Self::push_where(&mut sql, &mut params, filter);
        Statement { sql, params }
    }
}
