//! Query Builder Module - dialect-agnostic statements, WHERE combinators and
//! the executor seam that runs them.

pub mod execution;
pub mod sql_generation;
pub mod where_clause;

pub use execution::{Executor, Selected};
pub use sql_generation::{Limit, SelectOptions, SelectStatement, SqlBuilder, Statement};
pub use where_clause::{dict_to_where, join_multiple_wheres, join_where, validate_identifier, Where};
