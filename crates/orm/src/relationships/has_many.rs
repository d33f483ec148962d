//! Has-many relationships: target rows hold the foreign key

use super::has_one::{owner_filter, owner_values, require_saved};
use super::resolution::ResolvedRelationship;
use crate::backends::DatabaseValue;
use crate::error::OrmResult;
use crate::model::{route, route_read, Record};
use crate::query::{execution, Executor, SelectOptions, Where};
use crate::transaction::Transaction;
use std::sync::Arc;

pub struct HasMany {
    owner_id: i64,
    transaction: Option<Transaction>,
    rel: Arc<ResolvedRelationship>,
}

impl HasMany {
    pub(crate) fn new(owner_id: i64, transaction: Option<Transaction>, rel: Arc<ResolvedRelationship>) -> Self {
        Self {
            owner_id,
            transaction,
            rel,
        }
    }

    pub fn relationship(&self) -> &ResolvedRelationship {
        &self.rel
    }

    /// The owner's filter joined with any caller filter
    fn scoped(rel: &ResolvedRelationship, owner_id: i64, extra: Option<&Where>) -> OrmResult<Where> {
        let base = owner_filter(rel, owner_id)?;
        Ok(match extra {
            Some(extra) => base.and(extra.clone()),
            None => base,
        })
    }

    fn fetch(ex: &dyn Executor, rel: &ResolvedRelationship, owner_id: i64, options: &SelectOptions) -> OrmResult<Vec<Record>> {
        let mut options = options.clone();
        // An id narrows the relationship instead of replacing its scope
        if let Some(id) = options.id.take() {
            options = options.filter(Where::new("id = ?").bind(id));
        }
        options.filter = Some(Self::scoped(rel, owner_id, options.filter.as_ref())?);
        Ok(rel.target()?.find_with(ex, &options)?.into_vec())
    }

    /// Related records. A filter in `options` is ANDed with the relationship's own.
    pub fn get_with(&self, ex: &dyn Executor, options: &SelectOptions) -> OrmResult<Vec<Record>> {
        Self::fetch(ex, &self.rel, self.owner_id, options)
    }

    pub async fn get(&self, options: SelectOptions) -> OrmResult<Vec<Record>> {
        let rel = self.rel.clone();
        let owner_id = self.owner_id;
        route_read(self.transaction.clone(), move |ex| Self::fetch(ex, &rel, owner_id, &options)).await
    }

    fn tally(ex: &dyn Executor, rel: &ResolvedRelationship, owner_id: i64, extra: Option<&Where>) -> OrmResult<i64> {
        let filter = Self::scoped(rel, owner_id, extra)?;
        rel.target()?.count_with(ex, Some(&filter))
    }

    pub fn count_with(&self, ex: &dyn Executor, filter: Option<&Where>) -> OrmResult<i64> {
        Self::tally(ex, &self.rel, self.owner_id, filter)
    }

    pub async fn count(&self, filter: Option<Where>) -> OrmResult<i64> {
        let rel = self.rel.clone();
        let owner_id = self.owner_id;
        route_read(self.transaction.clone(), move |ex| Self::tally(ex, &rel, owner_id, filter.as_ref())).await
    }

    /// Detach every current row, then attach the rows with `ids`
    fn replace(ex: &dyn Executor, rel: &ResolvedRelationship, owner_id: i64, ids: &[i64]) -> OrmResult<()> {
        let target = rel.target()?;
        execution::update(
            ex,
            target.table(),
            &owner_values(rel, None),
            Some(&owner_filter(rel, owner_id)?),
        )?;
        if !ids.is_empty() {
            let filter = Where::in_list("id", ids.iter().map(|&id| DatabaseValue::from(id)))?;
            execution::update(ex, target.table(), &owner_values(rel, Some(owner_id)), Some(&filter))?;
        }
        Ok(())
    }

    /// Make `others` exactly the related records. Every record must be
    /// saved; otherwise nothing is written.
    pub fn set_with(&self, ex: &dyn Executor, others: &[Record]) -> OrmResult<()> {
        let ids = require_saved(&self.rel, &others.iter().collect::<Vec<_>>())?;
        Self::replace(ex, &self.rel, self.owner_id, &ids)
    }

    pub async fn set(&self, others: &[Record]) -> OrmResult<()> {
        let ids = require_saved(&self.rel, &others.iter().collect::<Vec<_>>())?;
        let rel = self.rel.clone();
        let owner_id = self.owner_id;
        route(self.transaction.clone(), move |ex| Self::replace(ex, &rel, owner_id, &ids)).await
    }

    pub fn clear_with(&self, ex: &dyn Executor) -> OrmResult<()> {
        self.set_with(ex, &[])
    }

    pub async fn clear(&self) -> OrmResult<()> {
        self.set(&[]).await
    }
}
