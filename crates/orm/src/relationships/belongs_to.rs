//! Belongs-to relationships: the owner's row holds the foreign key

use super::resolution::ResolvedRelationship;
use crate::backends::DatabaseValue;
use crate::error::{OrmError, OrmResult};
use crate::model::{route_read, Record};
use crate::query::{Executor, SelectOptions};
use crate::registry::registry;
use std::sync::Arc;

/// Handle for a belongs-to relationship. Borrows the owner mutably because
/// `set` and `clear` write the foreign key on the owner and save it.
pub struct BelongsTo<'a> {
    owner: &'a mut Record,
    rel: Arc<ResolvedRelationship>,
}

/// Target row referenced by `fk`; the type comes from `type_name` when polymorphic
fn lookup(
    ex: &dyn Executor,
    rel: &ResolvedRelationship,
    fk: Option<i64>,
    type_name: Option<&str>,
) -> OrmResult<Option<Record>> {
    let Some(fk) = fk else {
        return Ok(None);
    };
    let target = if rel.is_polymorphic() {
        match type_name {
            Some(name) => registry().get_class(name)?,
            None => return Ok(None),
        }
    } else {
        rel.target()?
    };
    Ok(target.find_with(ex, &SelectOptions::new().id(fk))?.one())
}

impl<'a> BelongsTo<'a> {
    pub(crate) fn new(owner: &'a mut Record, rel: Arc<ResolvedRelationship>) -> Self {
        Self { owner, rel }
    }

    pub fn relationship(&self) -> &ResolvedRelationship {
        &self.rel
    }

    /// Current foreign key value on the owner
    pub fn foreign_key_value(&self) -> Option<i64> {
        self.owner.get_i64(self.rel.association_foreign_key())
    }

    fn type_name(&self) -> Option<String> {
        self.rel
            .type_column()
            .and_then(|column| self.owner.get_str(column))
            .map(str::to_string)
    }

    pub fn get_with(&self, ex: &dyn Executor) -> OrmResult<Option<Record>> {
        lookup(ex, &self.rel, self.foreign_key_value(), self.type_name().as_deref())
    }

    pub async fn get(&self) -> OrmResult<Option<Record>> {
        let rel = self.rel.clone();
        let fk = self.foreign_key_value();
        let type_name = self.type_name();
        route_read(self.owner.transaction.clone(), move |ex| {
            lookup(ex, &rel, fk, type_name.as_deref())
        })
        .await
    }

    /// Point the owner at `other` without saving
    fn assign(&mut self, other: &Record) -> OrmResult<()> {
        let id = other.id().ok_or_else(|| {
            OrmError::ReferenceNotSaved(format!(
                "{} must be saved before it can be assigned to {}.{}",
                other.type_name(),
                self.rel.owner_name(),
                self.rel.name()
            ))
        })?;
        match self.rel.type_column() {
            Some(column) => self.owner.set(column, other.type_name()),
            None => {
                if self.rel.target_name() != Some(other.type_name()) {
                    return Err(OrmError::InvalidRelationship(format!(
                        "{}.{} expects a {}, got a {}",
                        self.rel.owner_name(),
                        self.rel.name(),
                        self.rel.target_name().unwrap_or_default(),
                        other.type_name()
                    )));
                }
            }
        }
        self.owner.set(self.rel.association_foreign_key(), id);
        Ok(())
    }

    fn unassign(&mut self) {
        self.owner.set(self.rel.association_foreign_key(), DatabaseValue::Null);
        if let Some(column) = self.rel.type_column() {
            self.owner.set(column, DatabaseValue::Null);
        }
    }

    /// Reference `other` (which must be saved) and save the owner
    pub fn set_with(&mut self, ex: &dyn Executor, other: &Record) -> OrmResult<bool> {
        self.assign(other)?;
        self.owner.save_with(ex)
    }

    pub async fn set(&mut self, other: &Record) -> OrmResult<bool> {
        self.assign(other)?;
        self.owner.save().await
    }

    /// Null the foreign key (and type column) and save the owner
    pub fn clear_with(&mut self, ex: &dyn Executor) -> OrmResult<bool> {
        self.unassign();
        self.owner.save_with(ex)
    }

    pub async fn clear(&mut self) -> OrmResult<bool> {
        self.unassign();
        self.owner.save().await
    }
}
