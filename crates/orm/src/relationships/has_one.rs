//! Has-one relationships: the target row holds the foreign key

use super::resolution::ResolvedRelationship;
use crate::error::{OrmError, OrmResult};
use crate::model::{route, route_read, Attributes, Record};
use crate::query::{execution, Executor, SelectOptions, Where};
use crate::transaction::Transaction;
use std::sync::Arc;

/// Rows of the target that belong to the owner: `fk = owner id`, plus the
/// type column for the inverse side of a polymorphic belongs-to
pub(crate) fn owner_filter(rel: &ResolvedRelationship, owner_id: i64) -> OrmResult<Where> {
    let filter = Where::eq(rel.foreign_key(), owner_id)?;
    Ok(match rel.type_column() {
        Some(column) => filter.and(Where::eq(column, rel.owner_name())?),
        None => filter,
    })
}

/// Foreign key values that attach a target row to the owner
pub(crate) fn owner_values(rel: &ResolvedRelationship, owner_id: Option<i64>) -> Attributes {
    let mut values = Attributes::new();
    values.insert(rel.foreign_key().to_string(), owner_id.into());
    if let Some(column) = rel.type_column() {
        let type_name = owner_id.map(|_| rel.owner_name().to_string());
        values.insert(column.to_string(), type_name.into());
    }
    values
}

/// Fail before any statement runs unless every record is saved and of the target type
pub(crate) fn require_saved(rel: &ResolvedRelationship, others: &[&Record]) -> OrmResult<Vec<i64>> {
    others
        .iter()
        .map(|other| {
            if rel.target_name() != Some(other.type_name()) {
                return Err(OrmError::InvalidRelationship(format!(
                    "{}.{} holds {} records, got a {}",
                    rel.owner_name(),
                    rel.name(),
                    rel.target_name().unwrap_or_default(),
                    other.type_name()
                )));
            }
            other.id().ok_or_else(|| {
                OrmError::ReferenceNotSaved(format!(
                    "all {} records must be saved before defining {}.{}",
                    other.type_name(),
                    rel.owner_name(),
                    rel.name()
                ))
            })
        })
        .collect()
}

pub struct HasOne {
    owner_id: i64,
    transaction: Option<Transaction>,
    rel: Arc<ResolvedRelationship>,
}

impl HasOne {
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

    fn fetch(ex: &dyn Executor, rel: &ResolvedRelationship, owner_id: i64) -> OrmResult<Option<Record>> {
        let options = SelectOptions::new().filter(owner_filter(rel, owner_id)?).limit(1);
        Ok(rel.target()?.find_with(ex, &options)?.one())
    }

    pub fn get_with(&self, ex: &dyn Executor) -> OrmResult<Option<Record>> {
        Self::fetch(ex, &self.rel, self.owner_id)
    }

    pub async fn get(&self) -> OrmResult<Option<Record>> {
        let rel = self.rel.clone();
        let owner_id = self.owner_id;
        route_read(self.transaction.clone(), move |ex| Self::fetch(ex, &rel, owner_id)).await
    }

    fn attach(ex: &dyn Executor, rel: &ResolvedRelationship, owner_id: i64, other_id: i64) -> OrmResult<()> {
        let target = rel.target()?;
        let filter = Where::new("id = ?").bind(other_id);
        execution::update(ex, target.table(), &owner_values(rel, Some(owner_id)), Some(&filter))?;
        Ok(())
    }

    /// Point `other`'s row at the owner. Only the target row is written;
    /// `other` itself is not updated in memory.
    pub fn set_with(&self, ex: &dyn Executor, other: &Record) -> OrmResult<()> {
        let other_id = require_saved(&self.rel, &[other])?[0];
        Self::attach(ex, &self.rel, self.owner_id, other_id)
    }

    pub async fn set(&self, other: &Record) -> OrmResult<()> {
        let other_id = require_saved(&self.rel, &[other])?[0];
        let rel = self.rel.clone();
        let owner_id = self.owner_id;
        route(self.transaction.clone(), move |ex| Self::attach(ex, &rel, owner_id, other_id)).await
    }
}
