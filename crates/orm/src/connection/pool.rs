//! Connection Pool Management
//!
//! The pool owns a fixed set of general threads, each with one lazily opened
//! connection, for work that needs no transaction beyond its own job. Work
//! inside a long-lived transaction goes to a dedicated
//! [`TransactionWorker`] instead, so an open transaction never holds up the
//! general threads and never migrates between threads.

use super::statistics::{ActiveWorker, PoolCounters, PoolStats};
use super::worker::{panic_message, TransactionWorker};
use crate::backends::{dialect_for, AccessMode, Connection, ConnectionFactory, DatabaseValue, DialectAdapter, ResultSet};
use crate::config::PoolConfig;
use crate::error::{OrmError, OrmResult};
use crate::query::execution::{log_query, Executor};
use crate::transaction::{clear_ambient, is_worker_thread, mark_worker_thread, Transaction};
use crossbeam_channel::{unbounded, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Database connection pool error types
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Pool is closed")]
    PoolClosed,

    #[error("Failed to spawn {kind} thread: {reason}")]
    ThreadSpawn { kind: &'static str, reason: String },

    #[error("No transaction worker owns transaction {0}")]
    UnknownTransaction(u64),
}

impl From<PoolError> for OrmError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::PoolClosed => OrmError::Connection("Database pool is closed".to_string()),
            PoolError::ThreadSpawn { .. } => OrmError::Connection(err.to_string()),
            PoolError::UnknownTransaction(id) => OrmError::TransactionNotStarted(format!(
                "cannot execute operation in transaction {}",
                id
            )),
        }
    }
}

/// State shared by the pool handle, its threads and every root transaction.
pub(crate) struct PoolShared {
    pub(crate) factory: Arc<dyn ConnectionFactory>,
    pub(crate) dialect: Arc<dyn DialectAdapter>,
    pub(crate) config: PoolConfig,
    pub(crate) counters: Arc<PoolCounters>,
}

type PoolJob = Box<dyn FnOnce(&mut ConnectionSlot) + Send + 'static>;

enum PoolMessage {
    Run(PoolJob),
    Shutdown,
}

/// The connection owned by one general thread.
struct ConnectionSlot {
    shared: Arc<PoolShared>,
    conn: Option<Box<dyn Connection>>,
}

impl ConnectionSlot {
    fn connection(&mut self) -> OrmResult<&mut Box<dyn Connection>> {
        if self.conn.is_none() {
            self.conn = Some(self.shared.factory.connect()?);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| OrmError::Connection("connection slot is empty".to_string()))
    }

    /// Run `f` inside a driver transaction, reconnecting after lost connections.
    fn interact<R, F>(&mut self, mode: AccessMode, f: &mut F) -> OrmResult<R>
    where
        F: FnMut(&dyn Executor) -> OrmResult<R>,
    {
        let mut attempt = 0;
        loop {
            let result = self.interact_once(mode, f);
            match result {
                Err(e) if e.is_connection_lost() => {
                    self.conn = None;
                    if attempt < self.shared.config.reconnect_retries {
                        attempt += 1;
                        self.shared.counters.reconnect();
                        tracing::warn!(
                            "Lost database connection ({}); reconnecting and retrying (attempt {})",
                            e,
                            attempt
                        );
                        continue;
                    }
                    self.shared.counters.interaction(false);
                    return Err(e);
                }
                other => {
                    self.shared.counters.interaction(other.is_ok());
                    return other;
                }
            }
        }
    }

    fn interact_once<R, F>(&mut self, mode: AccessMode, f: &mut F) -> OrmResult<R>
    where
        F: FnMut(&dyn Executor) -> OrmResult<R>,
    {
        let shared = self.shared.clone();
        let conn = self.connection()?;
        conn.begin(mode)?;
        let outcome = {
            let session = PoolSession {
                conn: RefCell::new(&mut *conn),
                dialect: &*shared.dialect,
            };
            f(&session)
        };
        match outcome {
            Ok(value) => {
                conn.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = conn.rollback() {
                    tracing::warn!("Rollback of pool interaction failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}

/// Executor over a general thread's connection for the span of one job.
struct PoolSession<'a> {
    conn: RefCell<&'a mut Box<dyn Connection>>,
    dialect: &'a dyn DialectAdapter,
}

impl Executor for PoolSession<'_> {
    fn dialect(&self) -> &dyn DialectAdapter {
        self.dialect
    }

    fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<ResultSet> {
        let sql = self.dialect.finalize(sql);
        log_query(&sql, params);
        self.conn.borrow_mut().fetch_all(&sql, params)
    }

    fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let sql = self.dialect.finalize(sql);
        log_query(&sql, params);
        self.conn.borrow_mut().execute(&sql, params)
    }
}

/// A transaction bound to its worker thread.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    transaction: Transaction,
    worker: Arc<TransactionWorker>,
}

impl WorkerHandle {
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn worker_name(&self) -> &str {
        self.worker.name()
    }
}

/// A worker and the root transaction it owns.
struct WorkerEntry {
    worker: Arc<TransactionWorker>,
    transaction: Transaction,
}

struct PoolInner {
    shared: Arc<PoolShared>,
    sender: Sender<PoolMessage>,
    workers: DashMap<u64, WorkerEntry>,
    // Abandoned workers that may still be draining their queue
    retired: Mutex<Vec<Arc<TransactionWorker>>>,
    closed: AtomicBool,
}

/// Handle to the general threads and transaction workers of one database.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("driver", &self.inner.shared.factory.driver_name())
            .field("pool_size", &self.inner.shared.config.pool_size)
            .field("transaction_workers", &self.inner.workers.len())
            .finish()
    }
}

impl ConnectionPool {
    /// Create the pool and start its general threads. Connections open on first use.
    pub fn new(factory: impl ConnectionFactory + 'static, config: PoolConfig) -> OrmResult<Self> {
        config.validate()?;
        let dialect = dialect_for(factory.driver_name(), &config)?;
        let shared = Arc::new(PoolShared {
            factory: Arc::new(factory),
            dialect,
            config,
            counters: Arc::new(PoolCounters::default()),
        });

        let (sender, receiver) = unbounded::<PoolMessage>();
        for index in 0..shared.config.pool_size {
            let receiver = receiver.clone();
            let slot_shared = shared.clone();
            let name = format!("{}-pool-{}", shared.config.thread_name_prefix, index);
            std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    mark_worker_thread();
                    let mut slot = ConnectionSlot { shared: slot_shared, conn: None };
                    for message in receiver.iter() {
                        match message {
                            PoolMessage::Run(job) => job(&mut slot),
                            PoolMessage::Shutdown => break,
                        }
                    }
                    clear_ambient();
                    tracing::debug!("Pool thread {} exiting", name);
                })
                .map_err(|e| PoolError::ThreadSpawn {
                    kind: "pool",
                    reason: e.to_string(),
                })?;
        }

        tracing::debug!(
            "Started {} pool threads for {} database",
            shared.config.pool_size,
            shared.dialect.backend_type()
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                shared,
                sender,
                workers: DashMap::new(),
                retired: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn dialect(&self) -> Arc<dyn DialectAdapter> {
        self.inner.shared.dialect.clone()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.shared.config
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.shared.counters.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop the general threads once their queued jobs have run, and roll
    /// back every transaction still open on a worker.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for _ in 0..self.inner.shared.config.pool_size {
            let _ = self.inner.sender.send(PoolMessage::Shutdown);
        }
        let open: Vec<u64> = self.inner.workers.iter().map(|entry| *entry.key()).collect();
        for txn_id in open {
            self.abandon(txn_id);
        }
        tracing::debug!("Connection pool closed");
    }

    /// [`close`](Self::close), then wait until every transaction worker has exited.
    pub async fn shutdown(&self) {
        self.close();
        let retired = std::mem::take(&mut *self.inner.retired.lock());
        for worker in retired {
            worker.join().await;
        }
    }

    /// Roll back the transaction on its worker and stop the worker without
    /// waiting for either. Returns false when no worker owns `txn_id`.
    pub(crate) fn abandon(&self, txn_id: u64) -> bool {
        let WorkerEntry { worker, transaction } = match self.inner.workers.remove(&txn_id) {
            Some((_, entry)) => entry,
            None => return false,
        };
        let queued = worker.submit(move || {
            if !transaction.is_active() {
                return Ok(());
            }
            tracing::warn!("Rolling back abandoned transaction {}", transaction.id());
            transaction.rollback()
        });
        if let Err(e) = queued {
            tracing::warn!("Could not queue rollback of transaction {}: {}", txn_id, e);
        }
        if worker.stop() {
            self.inner.shared.counters.worker_stopped();
        }
        let mut retired = self.inner.retired.lock();
        retired.retain(|w| !w.has_exited());
        retired.push(worker);
        true
    }

    /// Run `f` on any general thread inside its own driver transaction:
    /// committed when `f` succeeds, rolled back when it fails.
    pub async fn run_interaction<R, F>(&self, f: F) -> OrmResult<R>
    where
        F: FnMut(&dyn Executor) -> OrmResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.interaction(AccessMode::ReadWrite, f).await
    }

    /// [`run_interaction`](Self::run_interaction) for work that only reads.
    /// On SQLite it does not wait for the write lock, so it proceeds while a
    /// transaction is open on a worker. Writing from `f` is an error there
    /// whenever another writer holds the lock.
    pub async fn run_read_interaction<R, F>(&self, f: F) -> OrmResult<R>
    where
        F: FnMut(&dyn Executor) -> OrmResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.interaction(AccessMode::ReadOnly, f).await
    }

    async fn interaction<R, F>(&self, mode: AccessMode, f: F) -> OrmResult<R>
    where
        F: FnMut(&dyn Executor) -> OrmResult<R> + Send + 'static,
        R: Send + 'static,
    {
        if self.is_closed() {
            return Err(PoolError::PoolClosed.into());
        }
        let (tx, rx) = oneshot::channel();
        let mut f = f;
        let job: PoolJob = Box::new(move |slot| {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| slot.interact(mode, &mut f))) {
                Ok(result) => result,
                Err(payload) => {
                    slot.conn = None;
                    Err(OrmError::Database(format!(
                        "pool job panicked: {}",
                        panic_message(&*payload)
                    )))
                }
            };
            let _ = tx.send(result);
        });
        self.inner
            .sender
            .send(PoolMessage::Run(job))
            .map_err(|_| PoolError::PoolClosed)?;
        rx.await.unwrap_or_else(|_| Err(PoolError::PoolClosed.into()))
    }

    /// Begin a transaction on the current thread: a root when none is
    /// ambient, otherwise a nested transaction sharing the ambient connection.
    /// With `thread_check` the caller must be a pool or worker thread.
    pub fn begin(&self, thread_check: bool) -> OrmResult<Transaction> {
        Transaction::begin(&self.inner.shared, false, thread_check)
    }

    /// Like [`begin`](Self::begin), but a nested transaction is a savepoint
    /// that can roll back on its own.
    pub fn begin_savepoint(&self, thread_check: bool) -> OrmResult<Transaction> {
        Transaction::begin(&self.inner.shared, true, thread_check)
    }

    /// Run `f` as a unit of work. Off worker threads it runs in a fresh
    /// transaction on a new worker; on a worker thread it joins the ambient
    /// transaction synchronously and the returned [`Pending`] is already
    /// resolved.
    pub fn transactional<R, F>(&self, f: F) -> Pending<R>
    where
        F: FnOnce(&Transaction) -> OrmResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.dispatch_unit(false, f)
    }

    /// [`transactional`](Self::transactional) using a savepoint when nested.
    pub fn transactional_savepoint<R, F>(&self, f: F) -> Pending<R>
    where
        F: FnOnce(&Transaction) -> OrmResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.dispatch_unit(true, f)
    }

    fn dispatch_unit<R, F>(&self, savepoint: bool, f: F) -> Pending<R>
    where
        F: FnOnce(&Transaction) -> OrmResult<R> + Send + 'static,
        R: Send + 'static,
    {
        if is_worker_thread() {
            return Pending::ready(run_unit(&self.inner.shared, savepoint, f));
        }

        let shared = self.inner.shared.clone();
        let worker = match TransactionWorker::spawn(&shared.config.thread_name_prefix) {
            Ok(worker) => worker,
            Err(e) => return Pending::ready(Err(e)),
        };
        // Dropped with the job, whether it returns, panics or never runs
        let active = ActiveWorker::start(&shared.counters);
        let submitted = worker.submit(move || {
            let _active = active;
            run_unit(&shared, savepoint, f)
        });
        worker.stop();
        match submitted {
            Ok(rx) => Pending::waiting(rx),
            Err(e) => Pending::ready(Err(e)),
        }
    }

    /// Start a worker thread holding a new root transaction.
    pub async fn start_transaction_worker(&self) -> OrmResult<WorkerHandle> {
        let shared = self.inner.shared.clone();
        let worker = Arc::new(TransactionWorker::spawn(&shared.config.thread_name_prefix)?);
        let live = shared.counters.worker_started();
        if live >= shared.config.max_transaction_workers as u64 {
            tracing::warn!(
                "{} transaction workers are running (configured maximum {}); long-lived transactions may be leaking",
                live,
                shared.config.max_transaction_workers
            );
        }

        let init_shared = shared.clone();
        match worker.run(move || Transaction::begin(&init_shared, false, true)).await {
            Ok(transaction) => {
                self.inner.workers.insert(
                    transaction.id(),
                    WorkerEntry {
                        worker: worker.clone(),
                        transaction: transaction.clone(),
                    },
                );
                tracing::debug!("Transaction {} bound to {}", transaction.id(), worker.name());
                Ok(WorkerHandle { transaction, worker })
            }
            Err(e) => {
                tracing::warn!("Could not start transaction on {}: {}", worker.name(), e);
                worker.stop();
                shared.counters.worker_stopped();
                Err(e)
            }
        }
    }

    fn worker_for(&self, txn: &Transaction) -> OrmResult<Arc<TransactionWorker>> {
        self.inner
            .workers
            .get(&txn.id())
            .map(|entry| entry.value().worker.clone())
            .ok_or_else(|| PoolError::UnknownTransaction(txn.id()).into())
    }

    /// Queue `f` on the worker owning `txn`. Jobs for one transaction run in
    /// submission order.
    pub async fn submit_to_worker<R, F>(&self, txn: &Transaction, f: F) -> OrmResult<R>
    where
        F: FnOnce(&Transaction) -> OrmResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let worker = self.worker_for(txn)?;
        let txn = txn.clone();
        worker.run(move || f(&txn)).await
    }

    /// Commit `txn` on its worker, then stop the worker. A failed commit is
    /// rolled back before the error is returned.
    pub async fn commit_transaction(&self, txn: &Transaction) -> OrmResult<()> {
        let worker = self.worker_for(txn)?;
        let target = txn.clone();
        let result = worker
            .run(move || match target.commit() {
                Ok(()) => Ok(()),
                Err(e) => {
                    if let Err(rollback_err) = target.rollback() {
                        tracing::warn!("Rollback after failed commit also failed: {}", rollback_err);
                    }
                    Err(e)
                }
            })
            .await;
        self.retire(txn.id(), &worker).await;
        result
    }

    /// Roll back `txn` on its worker, then stop the worker.
    pub async fn rollback_transaction(&self, txn: &Transaction) -> OrmResult<()> {
        let worker = self.worker_for(txn)?;
        let target = txn.clone();
        let result = worker.run(move || target.rollback()).await;
        self.retire(txn.id(), &worker).await;
        result
    }

    /// Stop a worker after its queued jobs without finishing its transaction.
    pub async fn stop_worker(&self, handle: &WorkerHandle) {
        self.retire(handle.transaction.id(), &handle.worker).await;
    }

    async fn retire(&self, txn_id: u64, worker: &TransactionWorker) {
        self.inner.workers.remove(&txn_id);
        if worker.stop() {
            self.inner.shared.counters.worker_stopped();
        }
        worker.join().await;
    }
}

fn run_unit<R, F>(shared: &PoolShared, savepoint: bool, f: F) -> OrmResult<R>
where
    F: FnOnce(&Transaction) -> OrmResult<R>,
{
    let txn = Transaction::begin(shared, savepoint, true)?;
    txn.run(f).map_err(OrmError::aborted)
}

enum PendingState<R> {
    Ready(Option<OrmResult<R>>),
    Waiting(oneshot::Receiver<OrmResult<R>>),
}

/// Result of a transactional unit of work. Await it from async code, or
/// call [`wait`](Pending::wait) on a worker thread.
pub struct Pending<R> {
    state: PendingState<R>,
}

impl<R> Unpin for Pending<R> {}

impl<R> Pending<R> {
    fn ready(result: OrmResult<R>) -> Self {
        Self {
            state: PendingState::Ready(Some(result)),
        }
    }

    fn waiting(rx: oneshot::Receiver<OrmResult<R>>) -> Self {
        Self {
            state: PendingState::Waiting(rx),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, PendingState::Ready(_))
    }

    /// Block until the result is available. Must not be called from async
    /// code while the unit is still running on another thread.
    pub fn wait(self) -> OrmResult<R> {
        match self.state {
            PendingState::Ready(result) => result.unwrap_or_else(|| Err(taken())),
            PendingState::Waiting(rx) => rx.blocking_recv().unwrap_or_else(|_| Err(abandoned())),
        }
    }
}

impl<R> Future for Pending<R> {
    type Output = OrmResult<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            PendingState::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| Err(taken()))),
            PendingState::Waiting(rx) => Pin::new(rx).poll(cx).map(|r| r.unwrap_or_else(|_| Err(abandoned()))),
        }
    }
}

fn taken() -> OrmError {
    OrmError::Transaction("transactional result was already taken".to_string())
}

fn abandoned() -> OrmError {
    OrmError::TransactionNotStarted("transaction worker stopped before the unit of work finished".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingFactory;

    fn pool(factory: &RecordingFactory, config: PoolConfig) -> ConnectionPool {
        ConnectionPool::new(factory.clone(), config).unwrap()
    }

    #[tokio::test]
    async fn test_run_interaction_commits_and_reuses_connection() {
        let factory = RecordingFactory::new("postgres");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(1));
        for _ in 0..2 {
            pool.run_interaction(|ex| ex.execute("UPDATE t SET a = ?", &[1.into()])).await.unwrap();
        }
        assert_eq!(factory.connects(), 1);
        assert_eq!(
            factory.log(),
            vec!["BEGIN", "UPDATE t SET a = $1", "COMMIT", "BEGIN", "UPDATE t SET a = $1", "COMMIT"]
        );
        assert_eq!(pool.stats().interactions, 2);
    }

    #[tokio::test]
    async fn test_run_interaction_rolls_back_on_error() {
        let factory = RecordingFactory::new("postgres");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(1));
        let err = pool
            .run_interaction(|ex| {
                ex.execute("DELETE FROM t", &[])?;
                Err::<(), _>(OrmError::Query("stop".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::Query(_)));
        assert_eq!(factory.log(), vec!["BEGIN", "DELETE FROM t", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_read_interaction_begins_read_only() {
        let factory = RecordingFactory::new("sqlite");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(1));
        pool.run_read_interaction(|ex| ex.fetch_all("SELECT * FROM t", &[])).await.unwrap();
        assert_eq!(factory.log(), vec!["BEGIN READ ONLY", "SELECT * FROM t", "COMMIT"]);
    }

    #[tokio::test]
    async fn test_lost_connection_is_retried_once() {
        let factory = RecordingFactory::new("mysql");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(1));
        factory.fail_next(OrmError::ConnectionLost("server has gone away".into()));
        let value = pool.run_interaction(|_| Ok(5)).await.unwrap();
        assert_eq!(value, 5);
        assert_eq!(factory.connects(), 2);
        assert_eq!(pool.stats().reconnects, 1);

        factory.fail_next(OrmError::ConnectionLost("gone".into()));
        factory.fail_next(OrmError::ConnectionLost("gone again".into()));
        let err = pool.run_interaction(|_| Ok(())).await.unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_retries_are_configurable() {
        let factory = RecordingFactory::new("mysql");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(1).with_reconnect_retries(0));
        factory.fail_next(OrmError::ConnectionLost("gone".into()));
        assert!(pool.run_interaction(|_| Ok(())).await.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_driver_is_rejected() {
        let factory = RecordingFactory::new("odbc");
        let err = ConnectionPool::new(factory, PoolConfig::default()).unwrap_err();
        assert!(matches!(err, OrmError::UnsupportedDriver(_)));
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let factory = RecordingFactory::new("sqlite");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(2));
        pool.close();
        assert!(pool.run_interaction(|_| Ok(())).await.is_err());
    }

    #[tokio::test]
    async fn test_worker_transaction_lifecycle() {
        let factory = RecordingFactory::new("postgres");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(1));
        let handle = pool.start_transaction_worker().await.unwrap();
        let txn = handle.transaction().clone();

        let thread = pool
            .submit_to_worker(&txn, |t| {
                t.execute("INSERT INTO t DEFAULT VALUES", &[])?;
                Ok(std::thread::current().id())
            })
            .await
            .unwrap();
        assert_eq!(thread, txn.owner_thread());
        assert_eq!(pool.stats().active_workers, 1);

        pool.commit_transaction(&txn).await.unwrap();
        assert_eq!(factory.log(), vec!["BEGIN", "INSERT INTO t DEFAULT VALUES", "COMMIT"]);
        assert_eq!(pool.stats().active_workers, 0);

        let err = pool.submit_to_worker(&txn, |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, OrmError::TransactionNotStarted(_)));
    }

    #[tokio::test]
    async fn test_close_rolls_back_open_workers() {
        let factory = RecordingFactory::new("postgres");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(1));
        let first = pool.start_transaction_worker().await.unwrap();
        let second = pool.start_transaction_worker().await.unwrap();
        assert_eq!(pool.stats().active_workers, 2);

        tokio::time::timeout(std::time::Duration::from_secs(5), pool.shutdown())
            .await
            .expect("workers did not exit");

        assert_eq!(pool.stats().active_workers, 0);
        assert!(!first.transaction().is_active());
        assert!(!second.transaction().is_active());
        assert_eq!(factory.log(), vec!["BEGIN", "BEGIN", "ROLLBACK", "ROLLBACK"]);
        assert!(pool.commit_transaction(first.transaction()).await.is_err());
    }

    #[tokio::test]
    async fn test_abandon_is_a_no_op_after_commit() {
        let factory = RecordingFactory::new("postgres");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(1));
        let handle = pool.start_transaction_worker().await.unwrap();
        pool.commit_transaction(handle.transaction()).await.unwrap();
        assert!(!pool.abandon(handle.transaction().id()));
        assert_eq!(factory.log(), vec!["BEGIN", "COMMIT"]);
    }

    #[tokio::test]
    async fn test_panicking_unit_releases_worker_count() {
        let factory = RecordingFactory::new("postgres");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(1));
        let err = pool
            .transactional(|_| -> OrmResult<()> { panic!("unit exploded") })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unit exploded"));
        assert_eq!(pool.stats().active_workers, 0);
        assert_eq!(factory.log(), vec!["BEGIN", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_failed_worker_start_tears_down() {
        let factory = RecordingFactory::new("postgres");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(1));
        factory.fail_next(OrmError::Connection("refused".into()));
        assert!(pool.start_transaction_worker().await.is_err());
        assert_eq!(pool.stats().active_workers, 0);
    }

    #[tokio::test]
    async fn test_transactional_nests_on_worker_thread() {
        let factory = RecordingFactory::new("postgres");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(1));
        let inner_pool = pool.clone();
        let ids = pool
            .transactional(move |outer| {
                let inner = inner_pool.transactional(|t| Ok(t.id()));
                assert!(inner.is_ready());
                Ok((outer.id(), inner.wait()?))
            })
            .await
            .unwrap();
        assert_eq!(ids.0, ids.1);
        assert_eq!(factory.connects(), 1);
        assert_eq!(factory.log(), vec!["BEGIN", "COMMIT"]);
    }

    #[tokio::test]
    async fn test_transactional_wraps_escaping_errors() {
        let factory = RecordingFactory::new("postgres");
        let pool = pool(&factory, PoolConfig::default().with_pool_size(1));
        let err = pool
            .transactional(|_| -> OrmResult<()> { Err(OrmError::Query("bad".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::TransactionAborted(_)));
        assert!(matches!(err.root_cause(), OrmError::Query(_)));
        assert_eq!(factory.log(), vec!["BEGIN", "ROLLBACK"]);
    }
}
