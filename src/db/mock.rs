//! Mock database clients for testing.
//!
//! Provide in-memory handles so the registry, service and HTTP layers can be
//! exercised without a database server.

use super::executor::collect_rows;
use super::{ColumnInfo, DatabaseBackend, DatabaseClient, QueryResult, Row, Value};
use crate::error::{ExplorerError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A mock database client that returns a canned result set.
///
/// Every statement yields the configured columns and rows, with `sql` set to
/// the statement that was run. Executed statements are recorded in order.
///
/// A cancelled statement is followed by an asynchronous interrupt step, the
/// way the real backends stop the statement on the server. It only runs if
/// the executing future is still being polled after the token fires.
pub struct MockDatabaseClient {
    columns: Vec<ColumnInfo>,
    rows: Vec<Row>,
    delay: Option<Duration>,
    executed: Mutex<Vec<String>>,
    interrupted: AtomicUsize,
    closed: AtomicBool,
}

impl MockDatabaseClient {
    /// Creates a client returning a single `result` TEXT column with one row.
    pub fn new() -> Self {
        Self::with_rows(
            vec![ColumnInfo::new("result", "TEXT")],
            vec![vec![Value::from("ok")]],
        )
    }

    /// Creates a client returning the given columns and rows.
    pub fn with_rows(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            delay: None,
            executed: Mutex::new(Vec::new()),
            interrupted: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Waits `delay` before each row, so cancellation can be observed.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Statements executed so far, oldest first.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|sqls| sqls.clone())
            .unwrap_or_default()
    }

    /// Number of cancelled statements that were interrupted.
    pub fn interrupted(&self) -> usize {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    async fn execute_query(&self, sql: &str, cancel: &CancellationToken) -> Result<QueryResult> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(sql.to_string());
        }

        let delay = self.delay;
        let rows = Box::pin(futures::stream::unfold(
            self.rows.clone().into_iter(),
            move |mut remaining| async move {
                let row = remaining.next()?;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Some((Ok(row), remaining))
            },
        ));

        let outcome = collect_rows(
            QueryResult::with_columns(sql, self.columns.clone()),
            rows,
            cancel,
            Row::clone,
        )
        .await;

        if outcome.is_err() && cancel.is_cancelled() {
            tokio::task::yield_now().await;
            self.interrupted.fetch_add(1, Ordering::SeqCst);
        }
        outcome
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A client whose every statement fails with the configured driver message.
pub struct FailingDatabaseClient {
    message: String,
}

impl FailingDatabaseClient {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl DatabaseClient for FailingDatabaseClient {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Mysql
    }

    async fn execute_query(&self, _sql: &str, _cancel: &CancellationToken) -> Result<QueryResult> {
        Err(ExplorerError::query(self.message.clone()))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
