//! # tether-orm: asynchronous ORM with transaction-pinned workers
//!
//! Rows are handled as [`Record`]s of registered [`EntityType`]s, with
//! belongs-to, has-one, has-many and has-and-belongs-to-many relationships
//! resolved by naming convention.
//!
//! Statements run on blocking database connections owned by threads:
//! general pool threads for independent work, and one dedicated worker per
//! open transaction so everything inside a transaction runs on the thread
//! and connection that began it. Async callers only await the result.
//!
//! ```no_run
//! use tether_orm::prelude::*;
//!
//! # async fn demo() -> OrmResult<()> {
//! let pool = ConnectionPool::new(SqliteConnectionFactory::new("app.db"), PoolConfig::default())?;
//! registry().set_pool(pool);
//! let users = registry().register(
//!     EntityType::builder("User")
//!         .relationship(Relationship::has_many("pictures"))
//!         .validator(PresenceOf::new(&["first_name"]))
//!         .build()?,
//! );
//! registry().register(EntityType::builder("Picture").relationship(Relationship::belongs_to("user")).build()?);
//!
//! let mut user = Record::new(&users).with("first_name", "Ada");
//! user.save().await?;
//! let pictures = user.has_many("pictures")?.get(SelectOptions::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod query;
pub mod registry;
pub mod relationships;
pub mod schema;
pub mod transaction;
pub mod transactions;
pub mod validation;

#[cfg(test)]
mod testing;

pub use backends::{
    AccessMode, Connection, ConnectionFactory, DatabaseBackendType, DatabaseValue, DialectAdapter, ResultSet,
};
#[cfg(feature = "postgres")]
pub use backends::PostgresConnectionFactory;
#[cfg(feature = "sqlite")]
pub use backends::SqliteConnectionFactory;
pub use config::PoolConfig;
pub use connection::{ConnectionPool, Pending, PoolStats, WorkerHandle};
pub use error::{OrmError, OrmResult};
pub use model::{Attributes, EntityType, FindOptions, Found, ModelHooks, Record};
pub use query::{Executor, SelectOptions, Where};
pub use registry::registry;
pub use relationships::{Relationship, RelationshipType};
pub use transaction::{Transaction, TransactionKind};

pub mod prelude {
    #[cfg(feature = "sqlite")]
    pub use crate::backends::SqliteConnectionFactory;
    pub use crate::config::PoolConfig;
    pub use crate::connection::ConnectionPool;
    pub use crate::error::{OrmError, OrmResult};
    pub use crate::model::{Attributes, EntityType, FindOptions, Found, ModelHooks, Record};
    pub use crate::query::{join_where, Executor, SelectOptions, Where};
    pub use crate::registry::registry;
    pub use crate::relationships::Relationship;
    pub use crate::transaction::Transaction;
    pub use crate::validation::{CustomValidator, Errors, LengthOf, PresenceOf, UniquenessOf, Validator};
}
