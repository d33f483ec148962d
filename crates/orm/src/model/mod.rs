//! Model System - entity types, records and their persistence operations
//!
//! - `entity`: [`EntityType`] descriptors and their builder
//! - `record`: [`Record`], one row of an entity type
//! - `crud_operations`: save, delete, refresh, validation and transaction pinning
//! - `query_methods`: finders and aggregate operations on entity types
//! - `lifecycle`: [`ModelHooks`]
//!
//! Every operation comes in two forms. `*_with` runs synchronously on an
//! [`Executor`] and is what hooks, validators and transactional functions use
//! on a worker thread. The async form routes the same work through the
//! record's pinned transaction, or through the pool when none is pinned.

pub mod crud_operations;
pub mod entity;
pub mod lifecycle;
pub mod query_methods;
pub mod record;

pub use entity::{EntityType, EntityTypeBuilder};
pub use lifecycle::{ModelHooks, NoHooks};
pub use query_methods::{FindOptions, Found};
pub use record::Record;

use crate::backends::DatabaseValue;
use crate::error::OrmResult;
use crate::query::Executor;
use crate::registry::registry;
use crate::transaction::Transaction;
use indexmap::IndexMap;

/// Column values in insertion order
pub type Attributes = IndexMap<String, DatabaseValue>;

/// Run `f` on the worker owning `transaction`, or on the pool without one.
pub(crate) async fn route<R, F>(transaction: Option<Transaction>, mut f: F) -> OrmResult<R>
where
    F: FnMut(&dyn Executor) -> OrmResult<R> + Send + 'static,
    R: Send + 'static,
{
    let pool = registry().pool()?;
    match transaction {
        Some(txn) => pool.submit_to_worker(&txn, move |txn| f(txn)).await,
        None => pool.run_interaction(f).await,
    }
}

/// [`route`] for lookups. Without a transaction the work runs as a read-only
/// interaction, so it never waits on a writer holding the database lock.
pub(crate) async fn route_read<R, F>(transaction: Option<Transaction>, mut f: F) -> OrmResult<R>
where
    F: FnMut(&dyn Executor) -> OrmResult<R> + Send + 'static,
    R: Send + 'static,
{
    let pool = registry().pool()?;
    match transaction {
        Some(txn) => pool.submit_to_worker(&txn, move |txn| f(txn)).await,
        None => pool.run_read_interaction(f).await,
    }
}
