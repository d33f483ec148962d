//! Error types for the ORM system
//!
//! Every fallible operation in the crate returns [`OrmResult`]. Driver
//! failures are mapped into the variants below at the driver boundary so
//! callers can match on unique violations and lost connections without
//! knowing which database is in use.

/// Result type alias for ORM operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for ORM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrmError {
    /// No connection pool has been installed in the registry
    #[error("No connection pool configured; call registry().set_pool(...) first")]
    PoolNotConfigured,

    /// The pool's driver has no dialect adapter
    #[error("Unsupported database driver '{0}'")]
    UnsupportedDriver(String),

    /// Invalid pool or driver configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The schema probe for a table failed
    #[error("Table '{0}' does not exist")]
    ImaginaryTable(String),

    #[error("You never registered the entity type named '{0}'")]
    ClassNotRegistered(String),

    /// A relationship was used with a record that has no id yet
    #[error("Reference not saved: {0}")]
    ReferenceNotSaved(String),

    #[error("Invalid relationship: {0}")]
    InvalidRelationship(String),

    /// The record has no id, or its row no longer exists
    #[error("Cannot refresh {0}")]
    CannotRefresh(String),

    #[error("Save error: {0}")]
    SaveError(String),

    /// The transaction has no live worker or has already finished
    #[error("Transaction not started: {0}")]
    TransactionNotStarted(String),

    #[error("A transaction is already pinned to this record")]
    TransactionAlreadyStarted,

    /// Misuse of a transaction: wrong thread, inactive parent, double commit
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// An error escaped a transactional unit of work, which was rolled back
    #[error("Transaction aborted: {0}")]
    TransactionAborted(Box<OrmError>),

    /// Opening a connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// An established connection dropped; the operation may be retried
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Query building error
    #[error("Query error: {0}")]
    Query(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl OrmError {
    /// The innermost error, looking through `TransactionAborted` wrappers
    pub fn root_cause(&self) -> &OrmError {
        match self {
            OrmError::TransactionAborted(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// True for thread-affinity and lifecycle misuse of transactions
    pub fn is_transaction_error(&self) -> bool {
        matches!(
            self.root_cause(),
            OrmError::Transaction(_)
                | OrmError::TransactionNotStarted(_)
                | OrmError::TransactionAlreadyStarted
        ) || matches!(self, OrmError::TransactionAborted(_))
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.root_cause(), OrmError::UniqueViolation(_))
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self.root_cause(), OrmError::ConnectionLost(_))
    }

    /// Wrap an error escaping a transactional function, without nesting wrappers
    pub(crate) fn aborted(err: OrmError) -> OrmError {
        match err {
            OrmError::TransactionAborted(_) => err,
            other => OrmError::TransactionAborted(Box::new(other)),
        }
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Query(format!("JSON conversion failed: {}", err))
    }
}
