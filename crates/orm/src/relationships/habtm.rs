//! Has-and-belongs-to-many relationships through a join table
//!
//! Join rows hold two columns: the owner's foreign key and the target's
//! association foreign key. Reads first select the owner's join rows, then
//! the targets by id.

use super::has_one::require_saved;
use super::resolution::ResolvedRelationship;
use crate::backends::DatabaseValue;
use crate::error::{OrmError, OrmResult};
use crate::model::{route, route_read, Attributes, Record};
use crate::query::{execution, Executor, SelectOptions, Where};
use crate::transaction::Transaction;
use std::sync::Arc;

pub struct Habtm {
    owner_id: i64,
    transaction: Option<Transaction>,
    rel: Arc<ResolvedRelationship>,
}

fn join_table(rel: &ResolvedRelationship) -> OrmResult<&str> {
    rel.join_table().ok_or_else(|| {
        OrmError::InvalidRelationship(format!("{}.{} has no join table", rel.owner_name(), rel.name()))
    })
}

/// Target ids from the owner's join rows, optionally narrowed by `join_where`
fn target_ids(
    ex: &dyn Executor,
    rel: &ResolvedRelationship,
    owner_id: i64,
    join_where: Option<&Where>,
) -> OrmResult<Vec<i64>> {
    let mut filter = Where::eq(rel.foreign_key(), owner_id)?;
    if let Some(extra) = join_where {
        filter = filter.and(extra.clone());
    }
    let options = SelectOptions::new().select(rel.association_foreign_key()).filter(filter);
    let rows = execution::select(ex, join_table(rel)?, &options)?.into_vec();
    Ok(rows
        .iter()
        .filter_map(|row| row.get(rel.association_foreign_key()).and_then(DatabaseValue::as_i64))
        .collect())
}

fn id_filter(ids: &[i64]) -> OrmResult<Where> {
    Where::in_list("id", ids.iter().map(|&id| DatabaseValue::from(id)))
}

impl Habtm {
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

    pub fn join_table(&self) -> OrmResult<&str> {
        join_table(&self.rel)
    }

    fn fetch(
        ex: &dyn Executor,
        rel: &ResolvedRelationship,
        owner_id: i64,
        options: &SelectOptions,
        join_where: Option<&Where>,
    ) -> OrmResult<Vec<Record>> {
        let ids = target_ids(ex, rel, owner_id, join_where)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut options = options.clone();
        if let Some(id) = options.id.take() {
            options = options.filter(Where::new("id = ?").bind(id));
        }
        let by_id = id_filter(&ids)?;
        options.filter = Some(match options.filter.take() {
            Some(extra) => by_id.and(extra),
            None => by_id,
        });
        Ok(rel.target()?.find_with(ex, &options)?.into_vec())
    }

    /// Related records. `options.filter` applies to the target table,
    /// `join_where` to the join table.
    pub fn get_with(&self, ex: &dyn Executor, options: &SelectOptions, join_where: Option<&Where>) -> OrmResult<Vec<Record>> {
        Self::fetch(ex, &self.rel, self.owner_id, options, join_where)
    }

    pub async fn get(&self, options: SelectOptions, join_where: Option<Where>) -> OrmResult<Vec<Record>> {
        let rel = self.rel.clone();
        let owner_id = self.owner_id;
        route_read(self.transaction.clone(), move |ex| {
            Self::fetch(ex, &rel, owner_id, &options, join_where.as_ref())
        })
        .await
    }

    fn tally(ex: &dyn Executor, rel: &ResolvedRelationship, owner_id: i64, filter: Option<&Where>) -> OrmResult<i64> {
        let ids = target_ids(ex, rel, owner_id, None)?;
        match filter {
            _ if ids.is_empty() => Ok(0),
            None => Ok(ids.len() as i64),
            Some(extra) => {
                let filter = id_filter(&ids)?.and(extra.clone());
                rel.target()?.count_with(ex, Some(&filter))
            }
        }
    }

    /// Number of related records, optionally narrowed by a filter on the target table
    pub fn count_with(&self, ex: &dyn Executor, filter: Option<&Where>) -> OrmResult<i64> {
        Self::tally(ex, &self.rel, self.owner_id, filter)
    }

    pub async fn count(&self, filter: Option<Where>) -> OrmResult<i64> {
        let rel = self.rel.clone();
        let owner_id = self.owner_id;
        route_read(self.transaction.clone(), move |ex| Self::tally(ex, &rel, owner_id, filter.as_ref())).await
    }

    fn replace(ex: &dyn Executor, rel: &ResolvedRelationship, owner_id: i64, ids: &[i64]) -> OrmResult<()> {
        let table = join_table(rel)?;
        execution::delete(ex, table, Some(&Where::eq(rel.foreign_key(), owner_id)?))?;
        if ids.is_empty() {
            return Ok(());
        }
        let rows: Vec<Attributes> = ids
            .iter()
            .map(|&id| {
                let mut row = Attributes::new();
                row.insert(rel.foreign_key().to_string(), owner_id.into());
                row.insert(rel.association_foreign_key().to_string(), id.into());
                row
            })
            .collect();
        execution::insert_many(ex, table, &rows)?;
        Ok(())
    }

    /// Replace the owner's join rows with one row per record in `others`.
    /// Every record must be saved; otherwise nothing is written.
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
