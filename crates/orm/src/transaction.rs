//! Transaction Management
//!
//! A [`Transaction`] pins one physical connection to the thread that began
//! it. Transactions form a tree: the root owns the connection, nested
//! transactions share it and only take effect when the root commits, and
//! savepoint transactions can roll back their own work without aborting the
//! root.
//!
//! Each thread has an ambient transaction. Beginning a transaction while
//! one is ambient creates a child of it; committing or rolling back makes
//! the parent ambient again.

use crate::backends::{dialect::require_savepoints, AccessMode, Connection, DatabaseValue, DialectAdapter, ResultSet};
use crate::connection::{PoolCounters, PoolShared};
use crate::error::{OrmError, OrmResult};
use crate::query::execution::{log_query, Executor};
use crate::transactions::SavepointManager;
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

thread_local! {
    static AMBIENT: RefCell<Option<Transaction>> = const { RefCell::new(None) };
    static WORKER_THREAD: Cell<bool> = const { Cell::new(false) };
}

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Flag the current thread as a pool or transaction worker thread.
pub(crate) fn mark_worker_thread() {
    WORKER_THREAD.with(|flag| flag.set(true));
}

/// Whether the current thread is a pool thread or a transaction worker.
pub fn is_worker_thread() -> bool {
    WORKER_THREAD.with(|flag| flag.get())
}

pub(crate) fn clear_ambient() {
    set_ambient(None);
}

fn set_ambient(txn: Option<Transaction>) {
    AMBIENT.with(|ambient| *ambient.borrow_mut() = txn);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionKind {
    Root,
    Nested,
    Savepoint(String),
}

const OPEN: u8 = 0;
const COMMITTED: u8 = 1;
const ROLLED_BACK: u8 = 2;

/// Resources shared by every transaction in one tree.
struct RootState {
    id: u64,
    connection: Mutex<Option<Box<dyn Connection>>>,
    dialect: Arc<dyn DialectAdapter>,
    counters: Arc<PoolCounters>,
    savepoints: SavepointManager,
    outcome: AtomicU8,
}

impl RootState {
    fn is_open(&self) -> bool {
        self.outcome.load(Ordering::Acquire) == OPEN
    }

    fn with_connection<R>(&self, f: impl FnOnce(&mut dyn Connection) -> OrmResult<R>) -> OrmResult<R> {
        let mut guard = self.connection.lock();
        match guard.as_mut() {
            Some(conn) => f(conn.as_mut()),
            None => Err(OrmError::TransactionNotStarted(format!(
                "transaction {} has no open connection",
                self.id
            ))),
        }
    }

    fn commit(&self) -> OrmResult<()> {
        self.with_connection(|conn| conn.commit())?;
        self.outcome.store(COMMITTED, Ordering::Release);
        self.connection.lock().take();
        self.counters.transaction_finished(true);
        Ok(())
    }

    fn rollback(&self) -> OrmResult<()> {
        self.outcome.store(ROLLED_BACK, Ordering::Release);
        let conn = self.connection.lock().take();
        self.counters.transaction_finished(false);
        match conn {
            Some(mut conn) => conn.rollback(),
            None => Ok(()),
        }
    }
}

struct TransactionNode {
    kind: TransactionKind,
    parent: Option<Transaction>,
    root: Arc<RootState>,
    active: AtomicBool,
    owner: ThreadId,
}

/// Handle to one level of a transaction tree. Clones refer to the same level.
#[derive(Clone)]
pub struct Transaction {
    node: Arc<TransactionNode>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id())
            .field("kind", &self.node.kind)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Transaction {
    /// The ambient transaction of the current thread.
    pub fn current() -> Option<Transaction> {
        AMBIENT.with(|ambient| ambient.borrow().clone())
    }

    pub(crate) fn begin(shared: &PoolShared, savepoint: bool, thread_check: bool) -> OrmResult<Transaction> {
        if thread_check && !is_worker_thread() {
            return Err(OrmError::Transaction(
                "transactions must only be started on a database worker thread".to_string(),
            ));
        }
        let owner = thread::current().id();

        let txn = match Self::current() {
            None => {
                let mut conn = shared.factory.connect()?;
                conn.begin(AccessMode::ReadWrite)?;
                shared.counters.transaction_started();
                let root = Arc::new(RootState {
                    id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
                    connection: Mutex::new(Some(conn)),
                    dialect: shared.dialect.clone(),
                    counters: shared.counters.clone(),
                    savepoints: SavepointManager::new(),
                    outcome: AtomicU8::new(OPEN),
                });
                Self::node(TransactionKind::Root, None, root, owner)
            }
            Some(parent) => {
                if !parent.is_active() {
                    return Err(OrmError::Transaction("parent transaction is inactive".to_string()));
                }
                let root = parent.node.root.clone();
                let kind = if savepoint {
                    require_savepoints(&*root.dialect)?;
                    let name = root.with_connection(|conn| root.savepoints.create_savepoint(conn))?;
                    TransactionKind::Savepoint(name)
                } else {
                    TransactionKind::Nested
                };
                Self::node(kind, Some(parent), root, owner)
            }
        };

        tracing::debug!("Began {:?} transaction {}", txn.node.kind, txn.id());
        set_ambient(Some(txn.clone()));
        Ok(txn)
    }

    fn node(kind: TransactionKind, parent: Option<Transaction>, root: Arc<RootState>, owner: ThreadId) -> Self {
        Self {
            node: Arc::new(TransactionNode {
                kind,
                parent,
                root,
                active: AtomicBool::new(true),
                owner,
            }),
        }
    }

    /// Id of the physical transaction; shared by every level of one tree.
    pub fn id(&self) -> u64 {
        self.node.root.id
    }

    pub fn kind(&self) -> &TransactionKind {
        &self.node.kind
    }

    pub fn is_root(&self) -> bool {
        self.node.kind == TransactionKind::Root
    }

    pub fn parent(&self) -> Option<&Transaction> {
        self.node.parent.as_ref()
    }

    pub fn owner_thread(&self) -> ThreadId {
        self.node.owner
    }

    pub fn is_active(&self) -> bool {
        self.node.active.load(Ordering::Acquire) && self.node.root.is_open()
    }

    fn parent_active(&self) -> bool {
        match &self.node.parent {
            Some(parent) => parent.is_active(),
            None => self.is_active(),
        }
    }

    fn check_owner(&self) -> OrmResult<()> {
        if thread::current().id() != self.node.owner {
            return Err(OrmError::Transaction(format!(
                "transaction {} can only be used from the thread that began it",
                self.id()
            )));
        }
        Ok(())
    }

    fn check_usable(&self) -> OrmResult<()> {
        self.check_owner()?;
        if !self.is_active() {
            return Err(OrmError::TransactionNotStarted(format!(
                "transaction {} is no longer active",
                self.id()
            )));
        }
        Ok(())
    }

    /// Commit this level. Only the root commit reaches the database; a
    /// savepoint is released.
    pub fn commit(&self) -> OrmResult<()> {
        self.check_owner()?;
        if !self.node.root.is_open() {
            return Err(OrmError::TransactionNotStarted(format!(
                "transaction {} has already finished",
                self.id()
            )));
        }
        if !self.node.active.load(Ordering::Acquire) || !self.parent_active() {
            return Err(OrmError::Transaction("this transaction is inactive".to_string()));
        }

        set_ambient(self.node.parent.clone());
        match &self.node.kind {
            TransactionKind::Root => {
                if let Err(e) = self.node.root.commit() {
                    tracing::error!("Commit of transaction {} failed: {}", self.id(), e);
                    return Err(e);
                }
            }
            TransactionKind::Nested => {}
            TransactionKind::Savepoint(name) => {
                let root = &self.node.root;
                root.with_connection(|conn| root.savepoints.release_savepoint(conn, name))?;
            }
        }
        self.node.active.store(false, Ordering::Release);
        tracing::debug!("Committed {:?} transaction {}", self.node.kind, self.id());
        Ok(())
    }

    /// Roll back this level. A nested rollback aborts its parent as well, up
    /// to the nearest savepoint or the root. Rolling back a finished
    /// transaction does nothing.
    pub fn rollback(&self) -> OrmResult<()> {
        self.check_owner()?;
        if !self.node.active.load(Ordering::Acquire) || !self.parent_active() {
            return Ok(());
        }

        set_ambient(self.node.parent.clone());
        self.node.active.store(false, Ordering::Release);
        tracing::debug!("Rolling back {:?} transaction {}", self.node.kind, self.id());
        match (&self.node.kind, &self.node.parent) {
            (TransactionKind::Root, _) => self.node.root.rollback(),
            (TransactionKind::Nested, Some(parent)) => parent.rollback(),
            (TransactionKind::Nested, None) => Ok(()),
            (TransactionKind::Savepoint(name), _) => {
                let root = &self.node.root;
                root.with_connection(|conn| root.savepoints.rollback_to_savepoint(conn, name))
            }
        }
    }

    /// Run `f` in this transaction, committing on success and rolling back
    /// on error or panic.
    pub fn run<R>(self, f: impl FnOnce(&Transaction) -> OrmResult<R>) -> OrmResult<R> {
        let guard = RollbackOnUnwind(&self);
        let result = f(&self);
        drop(guard);

        match result {
            Ok(value) => {
                if self.is_active() {
                    if let Err(e) = self.commit() {
                        if let Err(rollback_err) = self.rollback() {
                            tracing::warn!("Rollback after failed commit also failed: {}", rollback_err);
                        }
                        return Err(e);
                    }
                    Ok(value)
                } else if self.node.root.outcome.load(Ordering::Acquire) == ROLLED_BACK {
                    Err(OrmError::Transaction(format!(
                        "transaction {} was rolled back before it could commit",
                        self.id()
                    )))
                } else {
                    Ok(value)
                }
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback() {
                    tracing::warn!("Rollback of transaction {} failed: {}", self.id(), rollback_err);
                }
                Err(e)
            }
        }
    }
}

struct RollbackOnUnwind<'a>(&'a Transaction);

impl Drop for RollbackOnUnwind<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            let _ = self.0.rollback();
        }
    }
}

impl Executor for Transaction {
    fn dialect(&self) -> &dyn DialectAdapter {
        &*self.node.root.dialect
    }

    fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ResultSet> {
        self.check_usable()?;
        let sql = self.dialect().finalize(sql);
        log_query(&sql, params);
        self.node.root.with_connection(|conn| conn.fetch_all(&sql, params))
    }

    fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        self.check_usable()?;
        let sql = self.dialect().finalize(sql);
        log_query(&sql, params);
        self.node.root.with_connection(|conn| conn.execute(&sql, params))
    }

    fn transaction(&self) -> Option<&Transaction> {
        Some(self)
    }
}
