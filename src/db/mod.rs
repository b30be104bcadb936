//! Database abstraction layer for data-explorer.
//!
//! Provides a trait-based interface for database operations, allowing
//! different database backends to be used interchangeably.

pub mod dispatch;
mod executor;
mod maxcompute;
mod mock;
mod mysql;
mod postgres;
mod types;

pub use dispatch::{open, route, Dialer, DriverDispatch, DriverRoute};
pub use executor::collect_rows;
pub use maxcompute::{MaxComputeClient, MaxComputeDsn};
pub use mock::{FailingDatabaseClient, MockDatabaseClient};
pub use mysql::MySqlClient;
pub use postgres::PostgresClient;
pub use types::{ColumnInfo, QueryResult, Row, Value};

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    Mysql,
    MaxCompute,
}

impl DatabaseBackend {
    /// Returns the backend as a string for logs and API output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::MaxCompute => "maxcompute",
        }
    }

    /// Returns the URL scheme sqlx expects for this backend, if any.
    pub fn url_scheme(&self) -> Option<&'static str> {
        match self {
            Self::Postgres => Some("postgres"),
            Self::Mysql => Some("mysql"),
            Self::MaxCompute => None,
        }
    }
}

/// An opened, pooled connection shared by every query against one
/// configured connection id.
pub type DatabaseHandle = Arc<dyn DatabaseClient>;

/// Trait defining the interface for database clients.
///
/// Implementations must be safe for concurrent use: one handle serves every
/// in-flight query for its connection id.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Returns which backend this client talks to.
    fn backend(&self) -> DatabaseBackend;

    /// Executes a single SQL statement and returns the fully buffered result.
    ///
    /// Column names and driver type names are captured before any row is
    /// read. Cancelling `cancel` aborts the in-flight driver call, releases
    /// the underlying cursor and returns a query error.
    async fn execute_query(&self, sql: &str, cancel: &CancellationToken) -> Result<QueryResult>;

    /// Closes the underlying pool.
    async fn close(&self) -> Result<()>;
}
