//! HTTP API tests over an in-memory store and mock connections.

use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use data_explorer::server::router;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

use super::common::{mock_state, mock_state_with_dialer};

async fn app() -> Router {
    let (state, _) = mock_state().await;
    router(state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<JsonValue>) -> (StatusCode, JsonValue) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_ping() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/ping", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "pong" }));
}

#[tokio::test]
async fn test_list_connections_reports_open_state() {
    let app = app().await;

    let (_, before) = send(&app, Method::GET, "/api/connections", None).await;
    assert_eq!(before[0], json!({ "id": "rows", "backend": null, "open": false }));
    assert_eq!(before[2]["backend"], json!("postgres"));

    send(
        &app,
        Method::POST,
        "/api/query",
        Some(json!({ "connection_id": "rows", "query": "select 1" })),
    )
    .await;

    let (_, after) = send(&app, Method::GET, "/api/connections", None).await;
    assert_eq!(after[0]["open"], json!(true));
    assert_eq!(after[1]["open"], json!(false));
}

#[tokio::test]
async fn test_ad_hoc_query() {
    let app = app().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/query",
        Some(json!({
            "connection_id": "rows",
            "query": "select id, name from users where id <= ${max}",
            "params": { "max": "2" }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], json!("select id, name from users where id <= ${max}"));
    assert_eq!(body["sql"], json!("select id, name from users where id <= 2"));
    assert_eq!(body["params"], json!({ "max": "2" }));
    assert_eq!(
        body["result"],
        json!({
            "sql": "select id, name from users where id <= 2",
            "column_names": ["id", "name"],
            "column_types": ["INT8", "TEXT"],
            "records": [[1, "alice"], [2, "bob"]],
        })
    );
}

#[tokio::test]
async fn test_ad_hoc_query_errors() {
    let app = app().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/query",
        Some(json!({ "connection_id": "nope", "query": "select 1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Unknown connection id: nope" }));

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/query",
        Some(json!({ "connection_id": "down", "query": "select 1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/query",
        Some(json!({ "connection_id": "broken", "query": "select * from missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("does not exist"));

    let (status, body) = send(&app, Method::POST, "/api/query", Some(json!({ "query": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_issue_crud() {
    let app = app().await;

    let (status, issue) = send(
        &app,
        Method::POST,
        "/api/issues",
        Some(json!({ "title": "Late shipments", "description": "EU only" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = issue["id"].as_i64().unwrap();

    let (_, listed) = send(&app, Method::GET, "/api/issues?page=1&page_size=10", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, far) = send(
        &app,
        Method::GET,
        "/api/issues?page=9223372036854775807&page_size=2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(far, json!([]));

    let (status, patched) = send(
        &app,
        Method::PATCH,
        &format!("/api/issues/{id}"),
        Some(json!({ "title": "Late shipments (EU)" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["title"], json!("Late shipments (EU)"));
    assert_eq!(patched["description"], json!("EU only"));

    let (status, fetched) = send(&app, Method::GET, &format!("/api/issues/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["sections"], json!([]));

    let (status, _) = send(&app, Method::DELETE, &format!("/api/issues/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, Method::GET, &format!("/api/issues/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, Method::GET, "/api/issues/not-a-number", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sections_and_saved_queries() {
    let app = app().await;

    let (_, issue) = send(&app, Method::POST, "/api/issues", Some(json!({ "title": "i" }))).await;
    let issue_id = issue["id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/issues/9999/sections",
        Some(json!({ "header": "h" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, section) = send(
        &app,
        Method::POST,
        &format!("/api/issues/{issue_id}/sections"),
        Some(json!({ "header": "Counts", "body": "", "footer": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let section_id = section["id"].as_i64().unwrap();

    let queries_uri = format!("/api/issues/{issue_id}/sections/{section_id}/queries");

    let (status, saved) = send(
        &app,
        Method::POST,
        &queries_uri,
        Some(json!({
            "connection_id": "rows",
            "title": "users",
            "query": "select id, name from ${table}",
            "params": { "table": "users" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["connection_id"], json!("rows"));
    assert_eq!(saved["query"], json!("select id, name from ${table}"));
    assert_eq!(saved["sql"], json!("select id, name from users"));
    assert_eq!(saved["result"]["records"], json!([[1, "alice"], [2, "bob"]]));
    assert!(saved["duration"].is_i64());
    let query_id = saved["id"].as_i64().unwrap();

    // A failing run returns the error but keeps the saved query.
    let (status, _) = send(
        &app,
        Method::POST,
        &queries_uri,
        Some(json!({ "connection_id": "broken", "query": "select * from missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (_, listed) = send(&app, Method::GET, &queries_uri, None).await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[1]["result"], JsonValue::Null);

    let (status, fetched) = send(&app, Method::GET, &format!("{queries_uri}/{query_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], json!("users"));

    let (status, renamed) = send(
        &app,
        Method::PATCH,
        &format!("/api/queries/{query_id}"),
        Some(json!({ "title": "all users" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["title"], json!("all users"));

    let (status, detail) = send(
        &app,
        Method::GET,
        &format!("/api/issues/{issue_id}/sections/{section_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["header"], json!("Counts"));
    assert_eq!(detail["queries"].as_array().unwrap().len(), 2);

    let (status, patched) = send(
        &app,
        Method::PATCH,
        &format!("/api/sections/{section_id}"),
        Some(json!({ "footer": "done" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["footer"], json!("done"));

    let (status, _) = send(&app, Method::DELETE, &format!("/api/queries/{query_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/sections/{section_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, Method::GET, &format!("{queries_uri}/{query_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_client_disconnect_interrupts_running_query() {
    let (state, mocks) = mock_state_with_dialer().await;
    let app = router(state);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/query")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "connection_id": "slow", "query": "select n from big" }).to_string(),
        ))
        .unwrap();

    let in_flight = tokio::spawn(app.oneshot(request));
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Dropping the request future is what a client disconnect looks like to the handler.
    in_flight.abort();

    let deadline = Instant::now() + Duration::from_secs(2);
    while mocks.slow.interrupted() == 0 {
        assert!(Instant::now() < deadline, "running query was never interrupted");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(mocks.slow.executed(), vec!["select n from big"]);
}
