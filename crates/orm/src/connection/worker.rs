//! Transaction worker threads
//!
//! A [`TransactionWorker`] is one OS thread draining a FIFO job queue. An
//! open transaction is bound to exactly one worker so every statement of
//! the transaction runs on the thread that owns its connection.

use crate::error::{OrmError, OrmResult};
use crossbeam_channel::{unbounded, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{oneshot, watch};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum WorkerMessage {
    Run(Job),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Stopped,
}

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

pub struct TransactionWorker {
    id: u64,
    name: String,
    sender: Sender<WorkerMessage>,
    running: AtomicBool,
    exited: watch::Receiver<bool>,
}

impl std::fmt::Debug for TransactionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionWorker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl TransactionWorker {
    /// Start a worker thread named `<prefix>-txn-<id>`.
    pub fn spawn(prefix: &str) -> OrmResult<Self> {
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-txn-{}", prefix, id);
        let (sender, receiver) = unbounded::<WorkerMessage>();
        let (exited_tx, exited_rx) = watch::channel(false);

        let thread_name = name.clone();
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                crate::transaction::mark_worker_thread();
                tracing::debug!("Transaction worker {} started", thread_name);
                for message in receiver.iter() {
                    match message {
                        WorkerMessage::Run(job) => job(),
                        WorkerMessage::Stop => break,
                    }
                }
                crate::transaction::clear_ambient();
                tracing::debug!("Transaction worker {} stopped", thread_name);
                let _ = exited_tx.send(true);
            })
            .map_err(|e| OrmError::Connection(format!("Failed to spawn worker thread: {}", e)))?;

        Ok(Self {
            id,
            name,
            sender,
            running: AtomicBool::new(true),
            exited: exited_rx,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        if self.running.load(Ordering::Acquire) {
            WorkerState::Running
        } else {
            WorkerState::Stopped
        }
    }

    /// Enqueue a job. Its result, or its panic as an error, arrives on the receiver.
    pub fn submit<R, F>(&self, job: F) -> OrmResult<oneshot::Receiver<OrmResult<R>>>
    where
        F: FnOnce() -> OrmResult<R> + Send + 'static,
        R: Send + 'static,
    {
        if self.state() == WorkerState::Stopped {
            return Err(stopped_error());
        }
        let (tx, rx) = oneshot::channel();
        let wrapped: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
                Err(OrmError::Database(format!("worker job panicked: {}", panic_message(&*payload))))
            });
            let _ = tx.send(result);
        });
        self.sender
            .send(WorkerMessage::Run(wrapped))
            .map_err(|_| stopped_error())?;
        Ok(rx)
    }

    /// Submit a job and wait for its result.
    pub async fn run<R, F>(&self, job: F) -> OrmResult<R>
    where
        F: FnOnce() -> OrmResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let rx = self.submit(job)?;
        rx.await.unwrap_or_else(|_| Err(stopped_error()))
    }

    /// Refuse new jobs and exit once the queued ones have run.
    /// Returns false if the worker was already stopping.
    pub fn stop(&self) -> bool {
        if self.running.swap(false, Ordering::AcqRel) {
            let _ = self.sender.send(WorkerMessage::Stop);
            true
        } else {
            false
        }
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Wait until the thread has drained its queue and exited.
    pub async fn join(&self) {
        let mut exited = self.exited.clone();
        while !*exited.borrow() {
            if exited.changed().await.is_err() {
                break;
            }
        }
    }
}

fn stopped_error() -> OrmError {
    OrmError::TransactionNotStarted("cannot submit jobs to a stopped transaction worker".to_string())
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
