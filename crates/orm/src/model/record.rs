use super::crud_operations::PinGuard;
use super::{Attributes, EntityType};
use crate::backends::DatabaseValue;
use crate::error::OrmResult;
use crate::query::Executor;
use crate::transaction::Transaction;
use crate::validation::Errors;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::sync::Arc;

/// One row of an entity type.
///
/// The id lives outside the attribute map and is `None` until the record is
/// inserted. A record may carry a pinned [`Transaction`]; its async
/// operations then run on that transaction's worker.
#[derive(Clone)]
pub struct Record {
    pub(crate) entity: Arc<EntityType>,
    pub(crate) id: Option<i64>,
    pub(crate) attributes: Attributes,
    pub(crate) deleted: bool,
    pub(crate) errors: Errors,
    pub(crate) transaction: Option<Transaction>,
    // Set on the record that began the pinned transaction, shared by its clones
    pub(crate) pin: Option<Arc<PinGuard>>,
}

impl Record {
    pub fn new(entity: &Arc<EntityType>) -> Self {
        Self {
            entity: entity.clone(),
            id: None,
            attributes: Attributes::new(),
            deleted: false,
            errors: Errors::new(),
            transaction: None,
            pin: None,
        }
    }

    pub fn from_attributes(entity: &Arc<EntityType>, attributes: Attributes) -> Self {
        let mut record = Self::new(entity);
        for (key, value) in attributes {
            record.set(key, value);
        }
        record
    }

    /// A record built from a fetched row, before `after_init` runs
    pub(crate) fn from_row(entity: &Arc<EntityType>, mut row: Attributes) -> Self {
        let id = row.shift_remove("id").and_then(|v| v.as_i64());
        let mut record = Self::new(entity);
        record.id = id;
        record.attributes = row;
        record
    }

    pub(crate) fn init_from_row(entity: &Arc<EntityType>, row: Attributes, ex: &dyn Executor) -> OrmResult<Self> {
        let mut record = Self::from_row(entity, row);
        entity.hooks().clone().after_init(&mut record, ex)?;
        Ok(record)
    }

    /// Builder form of [`set`](Self::set)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Set an attribute. Setting `id` changes the record's id.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<DatabaseValue>) {
        let key = key.into();
        let value = value.into();
        if key == "id" {
            self.id = value.as_i64();
        } else {
            self.attributes.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&DatabaseValue> {
        self.attributes.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(DatabaseValue::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(DatabaseValue::as_i64)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Messages from the last validation
    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    pub fn entity(&self) -> &Arc<EntityType> {
        &self.entity
    }

    pub fn type_name(&self) -> &str {
        self.entity.name()
    }

    /// The transaction pinned to this record, if any
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// Pin a transaction started elsewhere, so several records share it.
    /// Passing `None` unpins without finishing the transaction. Either way a
    /// transaction this record began is no longer rolled back when the
    /// record is dropped; the caller finishes it.
    pub fn set_transaction(&mut self, transaction: Option<Transaction>) {
        if let Some(pin) = self.pin.take() {
            pin.disarm();
        }
        self.transaction = transaction;
    }

    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::with_capacity(self.attributes.len() + 1);
        map.insert("id".to_string(), self.id.map_or(JsonValue::Null, JsonValue::from));
        for (key, value) in &self.attributes {
            map.insert(key.clone(), value.to_json());
        }
        JsonValue::Object(map)
    }

    /// Take the persisted state of `other`, keeping this record's pinned transaction
    pub(crate) fn absorb(&mut self, other: Record) {
        self.id = other.id;
        self.attributes = other.attributes;
        self.deleted = other.deleted;
        self.errors = other.errors;
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.entity.name() == other.entity.name() && self.id == other.id
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.entity.name())
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("deleted", &self.deleted)
            .finish()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.entity.name())?;
        match self.id {
            Some(id) => write!(f, " id={}", id)?,
            None => write!(f, " (unsaved)")?,
        }
        for (key, value) in &self.attributes {
            write!(f, " {}={}", key, value)?;
        }
        write!(f, ">")
    }
}
