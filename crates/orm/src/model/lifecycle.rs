//! Lifecycle hooks
//!
//! Hooks run on the thread executing the statement, inside the same
//! transaction, and may issue their own queries through the executor they
//! receive. Returning `Ok(false)` from a `before_*` hook vetoes the write
//! without raising an error.

use super::Record;
use crate::error::OrmResult;
use crate::query::Executor;

pub trait ModelHooks: Send + Sync {
    /// Before an unsaved record is inserted, ahead of `before_save`
    fn before_create(&self, _record: &mut Record, _ex: &dyn Executor) -> OrmResult<bool> {
        Ok(true)
    }

    /// Before a saved record is updated, ahead of `before_save`
    fn before_update(&self, _record: &mut Record, _ex: &dyn Executor) -> OrmResult<bool> {
        Ok(true)
    }

    fn before_save(&self, _record: &mut Record, _ex: &dyn Executor) -> OrmResult<bool> {
        Ok(true)
    }

    fn before_delete(&self, _record: &mut Record, _ex: &dyn Executor) -> OrmResult<bool> {
        Ok(true)
    }

    /// After a record has been built from a fetched row
    fn after_init(&self, _record: &mut Record, _ex: &dyn Executor) -> OrmResult<()> {
        Ok(())
    }
}

/// Hooks that allow everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ModelHooks for NoHooks {}
