//! Transaction Support
//!
//! Savepoint bookkeeping for nested transactions with partial rollback.

pub mod savepoints;

pub use savepoints::SavepointManager;
