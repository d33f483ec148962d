//! In-memory driver doubles for unit tests.

use crate::backends::{AccessMode, Connection, ConnectionFactory, DatabaseValue, ResultSet};
use crate::error::{OrmError, OrmResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Records every statement and transaction command it receives.
#[derive(Clone, Default)]
pub struct RecordingConnection {
    pub log: Arc<Mutex<Vec<String>>>,
    pub responses: Arc<Mutex<VecDeque<ResultSet>>>,
    pub failures: Arc<Mutex<VecDeque<OrmError>>>,
}

impl RecordingConnection {
    fn record(&self, sql: &str) -> OrmResult<()> {
        self.log.lock().push(sql.to_string());
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Connection for RecordingConnection {
    fn fetch_all(&mut self, sql: &str, _params: &[DatabaseValue]) -> OrmResult<ResultSet> {
        self.record(sql)?;
        Ok(self.responses.lock().pop_front().unwrap_or_default())
    }

    fn execute(&mut self, sql: &str, _params: &[DatabaseValue]) -> OrmResult<u64> {
        self.record(sql)?;
        Ok(1)
    }

    fn begin(&mut self, mode: AccessMode) -> OrmResult<()> {
        self.record(match mode {
            AccessMode::ReadWrite => "BEGIN",
            AccessMode::ReadOnly => "BEGIN READ ONLY",
        })
    }

    fn commit(&mut self) -> OrmResult<()> {
        self.record("COMMIT")
    }

    fn rollback(&mut self) -> OrmResult<()> {
        self.record("ROLLBACK")
    }
}

/// Hands out [`RecordingConnection`]s sharing one log.
#[derive(Clone)]
pub struct RecordingFactory {
    driver: &'static str,
    template: RecordingConnection,
    connects: Arc<AtomicUsize>,
}

impl RecordingFactory {
    pub fn new(driver: &'static str) -> Self {
        Self {
            driver,
            template: RecordingConnection::default(),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.template.log.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Queue a result for the next `fetch_all` on any connection.
    pub fn respond(&self, rs: ResultSet) {
        self.template.responses.lock().push_back(rs);
    }

    /// Make the next recorded command fail.
    pub fn fail_next(&self, err: OrmError) {
        self.template.failures.lock().push_back(err);
    }
}

impl ConnectionFactory for RecordingFactory {
    fn connect(&self) -> OrmResult<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.template.clone()))
    }

    fn driver_name(&self) -> &str {
        self.driver
    }
}
