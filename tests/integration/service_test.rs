//! Query service tests over the mock registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use data_explorer::db::{ColumnInfo, DatabaseHandle, Dialer, MockDatabaseClient, Value};
use data_explorer::error::ExplorerError;
use data_explorer::query::QueryService;
use tokio_util::sync::CancellationToken;

use super::common::mock_service;

#[tokio::test]
async fn test_run_returns_raw_and_compiled_sql() {
    let (service, rows) = mock_service();
    let params = HashMap::from([("limit".to_string(), "10".to_string())]);

    let run = service
        .run(
            "rows",
            "select id, name from users limit ${limit}",
            Some(&params),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(run.query, "select id, name from users limit ${limit}");
    assert_eq!(run.sql, "select id, name from users limit 10");
    assert_eq!(run.result.column_names, vec!["id", "name"]);
    assert_eq!(run.result.column_types, vec!["INT8", "TEXT"]);
    assert_eq!(run.result.records.len(), 2);
    for row in &run.result.records {
        assert_eq!(row.len(), run.result.column_names.len());
    }
    assert_eq!(rows.executed(), vec!["select id, name from users limit 10"]);
}

#[tokio::test]
async fn test_concurrent_runs_share_one_handle() {
    let (service, rows) = mock_service();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .run("rows", &format!("select {i}"), None, &CancellationToken::new())
                    .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(rows.executed().len(), 8);
    assert!(service.registry().is_open("rows"));
}

#[tokio::test]
async fn test_stage_errors_keep_their_kind() {
    let (service, _) = mock_service();
    let cancel = CancellationToken::new();

    let err = service.run("nope", "select 1", None, &cancel).await.unwrap_err();
    assert!(matches!(err, ExplorerError::UnknownConnectionId(_)));

    let err = service.run("down", "select 1", None, &cancel).await.unwrap_err();
    assert!(matches!(err, ExplorerError::Dial(_)));
    assert!(!service.registry().is_open("down"));

    let err = service.run("broken", "select 1", None, &cancel).await.unwrap_err();
    assert!(matches!(err, ExplorerError::Query(_)));
    assert!(err.to_string().contains("relation \"missing\" does not exist"));
}

#[tokio::test]
async fn test_cancelled_run_leaves_handle_usable() {
    struct SlowDialer(Arc<MockDatabaseClient>);

    #[async_trait::async_trait]
    impl Dialer for SlowDialer {
        async fn dial(&self, _dsn: &str) -> data_explorer::error::Result<DatabaseHandle> {
            Ok(self.0.clone())
        }
    }

    let slow = Arc::new(
        MockDatabaseClient::with_rows(
            vec![ColumnInfo::new("n", "INT8")],
            (0..500).map(|n| vec![Value::Int(n)]).collect(),
        )
        .with_delay(Duration::from_millis(5)),
    );
    let registry = data_explorer::connection::ConnectionRegistry::with_dialer(
        vec![data_explorer::config::ConnectionDescriptor::new("slow", "mock://slow")],
        Arc::new(SlowDialer(slow.clone())),
    );
    let service = QueryService::new(Arc::new(registry));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(2),
        service.run("slow", "select n from big", None, &cancel),
    )
    .await
    .expect("cancelled run should return promptly")
    .unwrap_err();
    assert_eq!(err.to_string(), "Query error: query cancelled");

    // The cached handle still serves new queries.
    assert!(service.registry().is_open("slow"));
    let fresh = CancellationToken::new();
    let handle = service.registry().resolve("slow", &fresh).await.unwrap();
    assert!(Arc::ptr_eq(
        &handle,
        &(slow.clone() as DatabaseHandle)
    ));
}
