//! Shared fixtures: an in-memory state database and mock connections.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use data_explorer::config::ConnectionDescriptor;
use data_explorer::connection::ConnectionRegistry;
use data_explorer::db::{
    ColumnInfo, DatabaseHandle, Dialer, FailingDatabaseClient, MockDatabaseClient, Value,
};
use data_explorer::error::{ExplorerError, Result};
use data_explorer::persistence::StateDb;
use data_explorer::query::QueryService;
use data_explorer::server::AppState;

/// Dials mock clients by DSN:
/// `mock://rows` returns two rows, `mock://slow` streams rows slowly,
/// `mock://broken` fails every query and anything else fails to dial.
pub struct MockDialer {
    pub rows: Arc<MockDatabaseClient>,
    pub slow: Arc<MockDatabaseClient>,
}

impl MockDialer {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(MockDatabaseClient::with_rows(
                vec![ColumnInfo::new("id", "INT8"), ColumnInfo::new("name", "TEXT")],
                vec![
                    vec![Value::Int(1), Value::from("alice")],
                    vec![Value::Int(2), Value::from("bob")],
                ],
            )),
            slow: Arc::new(
                MockDatabaseClient::with_rows(
                    vec![ColumnInfo::new("n", "INT8")],
                    (0..1000).map(|n| vec![Value::Int(n)]).collect(),
                )
                .with_delay(Duration::from_millis(10)),
            ),
        }
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, dsn: &str) -> Result<DatabaseHandle> {
        match dsn {
            "mock://rows" => Ok(self.rows.clone()),
            "mock://slow" => Ok(self.slow.clone()),
            "mock://broken" => Ok(Arc::new(FailingDatabaseClient::new(
                "relation \"missing\" does not exist",
            ))),
            _ => Err(ExplorerError::dial("connection refused")),
        }
    }
}

pub fn descriptors() -> Vec<ConnectionDescriptor> {
    vec![
        ConnectionDescriptor::new("rows", "mock://rows"),
        ConnectionDescriptor::new("broken", "mock://broken"),
        ConnectionDescriptor::new("down", "postgres://u:p@127.0.0.1:1/db"),
        ConnectionDescriptor::new("slow", "mock://slow"),
    ]
}

/// Query service over mock connections, plus the mock serving `rows`.
pub fn mock_service() -> (Arc<QueryService>, Arc<MockDatabaseClient>) {
    let dialer = MockDialer::new();
    let rows = dialer.rows.clone();
    let registry = ConnectionRegistry::with_dialer(descriptors(), Arc::new(dialer));
    (Arc::new(QueryService::new(Arc::new(registry))), rows)
}

/// Application state over an in-memory store and mock connections.
pub async fn mock_state() -> (AppState, Arc<MockDatabaseClient>) {
    let (state, dialer) = mock_state_with_dialer().await;
    (state, dialer.rows.clone())
}

/// Like [`mock_state`], keeping every mock the dialer hands out.
pub async fn mock_state_with_dialer() -> (AppState, MockDialer) {
    let store = Arc::new(StateDb::open_in_memory().await.unwrap());
    let dialer = MockDialer::new();
    let mocks = MockDialer {
        rows: dialer.rows.clone(),
        slow: dialer.slow.clone(),
    };
    let registry = ConnectionRegistry::with_dialer(descriptors(), Arc::new(dialer));
    let service = Arc::new(QueryService::new(Arc::new(registry)));
    (AppState::new(store, service), mocks)
}
