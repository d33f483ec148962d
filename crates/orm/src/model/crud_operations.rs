//! CRUD Operations - save, delete and refresh for records
//!
//! Inserts and updates write the columns of the table's cached schema. The
//! `id` column is never written; inserts read it back through the dialect's
//! last-insert-id statement.

use super::{route, route_read, Attributes, Record};
use crate::backends::DatabaseValue;
use crate::connection::ConnectionPool;
use crate::error::{OrmError, OrmResult};
use crate::query::{execution, Executor, SelectOptions, Where};
use crate::registry::registry;
use crate::relationships::RelationshipType;
use crate::transaction::Transaction;
use crate::validation::Errors;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Rolls back a pinned transaction once the record that began it, and every
/// clone of that record, is dropped without committing or rolling back.
pub(crate) struct PinGuard {
    pool: ConnectionPool,
    txn_id: u64,
    armed: AtomicBool,
}

impl PinGuard {
    fn new(pool: ConnectionPool, txn_id: u64) -> Self {
        Self {
            pool,
            txn_id,
            armed: AtomicBool::new(true),
        }
    }

    pub(crate) fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        if self.armed.load(Ordering::Acquire) && self.pool.abandon(self.txn_id) {
            tracing::warn!("Pinned transaction {} was dropped unfinished; rolling back", self.txn_id);
        }
    }
}

impl Record {
    /// Values for every schema column except `id`. Unset columns are
    /// included as NULL only with `include_blank`.
    fn column_values(&self, columns: &[String], include_blank: bool) -> Attributes {
        columns
            .iter()
            .filter(|column| column.as_str() != "id")
            .filter_map(|column| {
                let value = self.attributes.get(column).cloned().unwrap_or(DatabaseValue::Null);
                (include_blank || !value.is_null()).then(|| (column.clone(), value))
            })
            .collect()
    }

    fn id_filter(id: i64) -> Where {
        Where::new("id = ?").bind(id)
    }

    fn insert_with(&mut self, ex: &dyn Executor) -> OrmResult<()> {
        let table = self.entity.table().to_string();
        let columns = registry().schema().get_schema(&table, ex)?;
        let values = self.column_values(&columns, ex.dialect().include_blank_in_insert());
        execution::insert(ex, &table, &values)?;
        let id = execution::last_insert_id(ex)?;
        self.id = Some(id);
        tracing::debug!("Inserted {} {}", self.entity.name(), id);
        Ok(())
    }

    fn update_with(&mut self, ex: &dyn Executor, id: i64) -> OrmResult<()> {
        let table = self.entity.table().to_string();
        let columns = registry().schema().get_schema(&table, ex)?;
        let values = self.column_values(&columns, true);
        if values.is_empty() {
            return Ok(());
        }
        execution::update(ex, &table, &values, Some(&Self::id_filter(id)))?;
        Ok(())
    }

    /// Run every validator of the entity type, replacing [`errors`](Self::errors).
    pub fn is_valid_with(&mut self, ex: &dyn Executor) -> OrmResult<bool> {
        let mut errors = Errors::new();
        for validator in self.entity.validators() {
            validator.validate(self, &mut errors, ex)?;
        }
        self.errors = errors;
        Ok(self.errors.is_empty())
    }

    pub async fn is_valid(&mut self) -> OrmResult<bool> {
        let snapshot = self.clone();
        let checked = route_read(self.transaction.clone(), move |ex| {
            let mut record = snapshot.clone();
            record.is_valid_with(ex)?;
            Ok(record)
        })
        .await?;
        self.errors = checked.errors;
        Ok(self.errors.is_empty())
    }

    /// Insert or update the record. Returns `false` when validation failed
    /// or a hook vetoed the write; nothing was written in that case.
    pub fn save_with(&mut self, ex: &dyn Executor) -> OrmResult<bool> {
        if self.deleted {
            return Err(OrmError::SaveError(format!(
                "cannot save a previously deleted {}",
                self.entity.name()
            )));
        }
        if !self.is_valid_with(ex)? {
            tracing::debug!("Not saving invalid {}: {}", self.entity.name(), self.errors);
            return Ok(false);
        }

        let hooks = self.entity.hooks().clone();
        match self.id {
            None => {
                if !hooks.before_create(self, ex)? || !hooks.before_save(self, ex)? {
                    return Ok(false);
                }
                self.insert_with(ex)?;
            }
            Some(id) => {
                if !hooks.before_update(self, ex)? || !hooks.before_save(self, ex)? {
                    return Ok(false);
                }
                self.update_with(ex, id)?;
            }
        }
        Ok(true)
    }

    pub async fn save(&mut self) -> OrmResult<bool> {
        if self.deleted {
            return Err(OrmError::SaveError(format!(
                "cannot save a previously deleted {}",
                self.entity.name()
            )));
        }
        let snapshot = self.clone();
        let (saved, record) = route(self.transaction.clone(), move |ex| {
            let mut record = snapshot.clone();
            let saved = record.save_with(ex)?;
            Ok((saved, record))
        })
        .await?;
        self.absorb(record);
        Ok(saved)
    }

    /// Delete the row after clearing the record's join-table rows. The
    /// record keeps its attributes but loses its id and cannot be saved again.
    pub fn delete_with(&mut self, ex: &dyn Executor) -> OrmResult<bool> {
        let id = self.id.ok_or_else(|| {
            OrmError::ReferenceNotSaved(format!("cannot delete an unsaved {}", self.entity.name()))
        })?;
        let hooks = self.entity.hooks().clone();
        if !hooks.before_delete(self, ex)? {
            return Ok(false);
        }

        let entity = self.entity.clone();
        for relationship in entity.relationships() {
            if relationship.kind() == RelationshipType::HasAndBelongsToMany {
                self.habtm(relationship.name())?.clear_with(ex)?;
            }
        }
        execution::delete(ex, entity.table(), Some(&Self::id_filter(id)))?;
        self.id = None;
        self.deleted = true;
        tracing::debug!("Deleted {} {}", entity.name(), id);
        Ok(true)
    }

    pub async fn delete(&mut self) -> OrmResult<bool> {
        if self.id.is_none() {
            return Err(OrmError::ReferenceNotSaved(format!(
                "cannot delete an unsaved {}",
                self.entity.name()
            )));
        }
        let snapshot = self.clone();
        let (deleted, record) = route(self.transaction.clone(), move |ex| {
            let mut record = snapshot.clone();
            let deleted = record.delete_with(ex)?;
            Ok((deleted, record))
        })
        .await?;
        self.absorb(record);
        Ok(deleted)
    }

    /// Reload the attributes from the record's row
    pub fn refresh_with(&mut self, ex: &dyn Executor) -> OrmResult<()> {
        let id = self.id.ok_or_else(|| {
            OrmError::CannotRefresh(format!("{} without an id", self.entity.name()))
        })?;
        let entity = self.entity.clone();
        let row = execution::select(ex, entity.table(), &SelectOptions::new().id(id))?
            .into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| OrmError::CannotRefresh(format!("{} {}: row no longer exists", entity.name(), id)))?;
        self.attributes = row.into_iter().filter(|(column, _)| column != "id").collect();
        Ok(())
    }

    pub async fn refresh(&mut self) -> OrmResult<()> {
        let snapshot = self.clone();
        let record = route_read(self.transaction.clone(), move |ex| {
            let mut record = snapshot.clone();
            record.refresh_with(ex)?;
            Ok(record)
        })
        .await?;
        self.absorb(record);
        Ok(())
    }

    /// Start a transaction on a dedicated worker and pin it to this record.
    /// Async operations on the record then run inside it until it is
    /// committed or rolled back.
    pub async fn begin_transaction(&mut self) -> OrmResult<()> {
        if self.transaction.is_some() {
            return Err(OrmError::TransactionAlreadyStarted);
        }
        let pool = registry().pool()?;
        let handle = pool.start_transaction_worker().await?;
        let txn_id = handle.transaction().id();
        tracing::debug!("Pinned transaction {} to {}", txn_id, self);
        self.transaction = Some(handle.transaction().clone());
        self.pin = Some(Arc::new(PinGuard::new(pool, txn_id)));
        Ok(())
    }

    fn take_transaction(&mut self) -> OrmResult<Transaction> {
        if let Some(pin) = self.pin.take() {
            pin.disarm();
        }
        self.transaction.take().ok_or_else(|| {
            OrmError::TransactionNotStarted(format!("no transaction is pinned to {}", self))
        })
    }

    pub async fn commit_transaction(&mut self) -> OrmResult<()> {
        let pool = registry().pool()?;
        let txn = self.take_transaction()?;
        pool.commit_transaction(&txn).await
    }

    pub async fn rollback_transaction(&mut self) -> OrmResult<()> {
        let pool = registry().pool()?;
        let txn = self.take_transaction()?;
        pool.rollback_transaction(&txn).await
    }
}
