//! Query Methods - finders and aggregates on entity types
//!
//! Implemented on `Arc<EntityType>` because every record built from a row
//! keeps a handle to its type.

use super::{route, route_read, Attributes, EntityType, Record};
use crate::error::OrmResult;
use crate::query::execution::{self, Selected};
use crate::query::{dict_to_where, Executor, SelectOptions, Where};
use crate::registry::registry;
use crate::transaction::Transaction;
use std::sync::Arc;

/// Options for [`EntityType::find`]
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    select: SelectOptions,
    transaction: Option<Transaction>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: i64) -> Self {
        self.select = self.select.id(id);
        self
    }

    pub fn filter(mut self, filter: Where) -> Self {
        self.select = self.select.filter(filter);
        self
    }

    pub fn group_by(mut self, group: impl Into<String>) -> Self {
        self.select = self.select.group_by(group);
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.select = self.select.order_by(order);
        self
    }

    pub fn limit(mut self, count: u64) -> Self {
        self.select = self.select.limit(count);
        self
    }

    pub fn page(mut self, count: u64, offset: u64) -> Self {
        self.select = self.select.page(count, offset);
        self
    }

    /// Run the lookup inside `transaction` instead of on the pool
    pub fn transaction(mut self, transaction: Transaction) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn select_options(&self) -> &SelectOptions {
        &self.select
    }
}

impl From<SelectOptions> for FindOptions {
    fn from(select: SelectOptions) -> Self {
        Self {
            select,
            transaction: None,
        }
    }
}

/// Result of a find: one optional record for id and `limit(1)` lookups,
/// otherwise a list
#[derive(Debug, Clone, PartialEq)]
pub enum Found {
    One(Option<Record>),
    Many(Vec<Record>),
}

impl Found {
    /// The single record, or the first of a list
    pub fn one(self) -> Option<Record> {
        match self {
            Found::One(record) => record,
            Found::Many(records) => records.into_iter().next(),
        }
    }

    pub fn into_vec(self) -> Vec<Record> {
        match self {
            Found::One(record) => record.into_iter().collect(),
            Found::Many(records) => records,
        }
    }
}

impl EntityType {
    pub fn find_with(self: &Arc<Self>, ex: &dyn Executor, options: &SelectOptions) -> OrmResult<Found> {
        Ok(match execution::select(ex, self.table(), options)? {
            Selected::One(row) => Found::One(match row {
                Some(row) => Some(Record::init_from_row(self, row, ex)?),
                None => None,
            }),
            Selected::Many(rows) => Found::Many(
                rows.into_iter()
                    .map(|row| Record::init_from_row(self, row, ex))
                    .collect::<OrmResult<Vec<_>>>()?,
            ),
        })
    }

    pub async fn find(self: &Arc<Self>, options: impl Into<FindOptions>) -> OrmResult<Found> {
        let FindOptions { select, transaction } = options.into();
        let entity = self.clone();
        route_read(transaction, move |ex| entity.find_with(ex, &select)).await
    }

    /// Records whose columns equal every given attribute
    pub fn find_by_with(self: &Arc<Self>, ex: &dyn Executor, attrs: &Attributes) -> OrmResult<Vec<Record>> {
        let mut options = SelectOptions::new();
        if let Some(filter) = dict_to_where(attrs, "AND")? {
            options = options.filter(filter);
        }
        Ok(self.find_with(ex, &options)?.into_vec())
    }

    pub async fn find_by(self: &Arc<Self>, attrs: Attributes) -> OrmResult<Vec<Record>> {
        dict_to_where(&attrs, "AND")?;
        let entity = self.clone();
        route_read(None, move |ex| entity.find_by_with(ex, &attrs)).await
    }

    /// The first record matching `attrs`, inserting one when none exists.
    /// A record that fails validation is returned unsaved with its errors.
    pub fn find_or_create_with(self: &Arc<Self>, ex: &dyn Executor, attrs: &Attributes) -> OrmResult<Record> {
        if let Some(found) = self.find_by_with(ex, attrs)?.into_iter().next() {
            return Ok(found);
        }
        let mut record = Record::from_attributes(self, attrs.clone());
        record.save_with(ex)?;
        Ok(record)
    }

    /// [`find_or_create_with`](Self::find_or_create_with) in its own
    /// transaction. When a concurrent caller inserts the same row first and
    /// the insert hits a unique constraint, the winner's row is returned.
    pub async fn find_or_create(self: &Arc<Self>, attrs: Attributes) -> OrmResult<Record> {
        dict_to_where(&attrs, "AND")?;
        let pool = registry().pool()?;
        let entity = self.clone();
        let lookup = attrs.clone();
        match pool.transactional(move |txn| entity.find_or_create_with(txn, &lookup)).await {
            Err(e) if e.is_unique_violation() => {
                tracing::debug!("find_or_create on {} lost a uniqueness race; reading the winner", self.name());
                self.find_by(attrs).await?.into_iter().next().ok_or(e)
            }
            other => other,
        }
    }

    pub fn count_with(self: &Arc<Self>, ex: &dyn Executor, filter: Option<&Where>) -> OrmResult<i64> {
        execution::count(ex, self.table(), filter)
    }

    pub async fn count(self: &Arc<Self>, filter: Option<Where>) -> OrmResult<i64> {
        let entity = self.clone();
        route_read(None, move |ex| entity.count_with(ex, filter.as_ref())).await
    }

    pub fn all_with(self: &Arc<Self>, ex: &dyn Executor) -> OrmResult<Vec<Record>> {
        Ok(self.find_with(ex, &SelectOptions::new())?.into_vec())
    }

    pub async fn all(self: &Arc<Self>) -> OrmResult<Vec<Record>> {
        let entity = self.clone();
        route_read(None, move |ex| entity.all_with(ex)).await
    }

    pub fn exists_with(self: &Arc<Self>, ex: &dyn Executor, filter: Option<&Where>) -> OrmResult<bool> {
        let mut options = SelectOptions::new().select("id").limit(1);
        if let Some(filter) = filter {
            options = options.filter(filter.clone());
        }
        Ok(execution::select(ex, self.table(), &options)?.into_vec().len() == 1)
    }

    pub async fn exists(self: &Arc<Self>, filter: Option<Where>) -> OrmResult<bool> {
        let entity = self.clone();
        route_read(None, move |ex| entity.exists_with(ex, filter.as_ref())).await
    }

    /// Delete matching rows without loading records or running hooks
    pub fn delete_all_with(self: &Arc<Self>, ex: &dyn Executor, filter: Option<&Where>) -> OrmResult<u64> {
        execution::delete(ex, self.table(), filter)
    }

    pub async fn delete_all(self: &Arc<Self>, filter: Option<Where>) -> OrmResult<u64> {
        let entity = self.clone();
        route(None, move |ex| entity.delete_all_with(ex, filter.as_ref())).await
    }
}
