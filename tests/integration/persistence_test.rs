//! State database tests against an on-disk file.

use std::collections::HashMap;
use std::time::Duration;

use data_explorer::db::{ColumnInfo, QueryResult, Value};
use data_explorer::persistence::{
    issues, queries, sections, NewQuery, Page, SectionPatch, StateDb,
};
use tempfile::tempdir;

#[tokio::test]
async fn test_issue_hierarchy_round_trip_on_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.db");

    let params = HashMap::from([("day".to_string(), "2024-03-01".to_string())]);
    let (issue_id, section_id, query_id) = {
        let db = StateDb::open(&path).await.unwrap();

        let issue = issues::create_issue(db.pool(), "Missing orders", "gap on March 1st")
            .await
            .unwrap();
        let section = sections::create_section(db.pool(), issue.id, "Orders", "raw counts", "")
            .await
            .unwrap();
        let saved = queries::create_query(
            db.pool(),
            &NewQuery {
                issue_id: issue.id,
                section_id: section.id,
                connection_id: "pg",
                title: "orders per day",
                query: "select count(*) as n from orders where day = '${day}'",
                params: Some(&params),
            },
        )
        .await
        .unwrap();

        let mut result = QueryResult::with_columns(
            "select count(*) as n from orders where day = '2024-03-01'",
            vec![ColumnInfo::new("n", "INT8")],
        );
        result.records.push(vec![Value::Int(0)]);
        queries::record_query_result(
            db.pool(),
            saved.id,
            &result.sql,
            &result,
            Duration::from_millis(40),
        )
        .await
        .unwrap();

        db.close().await;
        (issue.id, section.id, saved.id)
    };

    let db = StateDb::open(&path).await.unwrap();

    let detail = issues::get_issue_detail(db.pool(), issue_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.issue.title, "Missing orders");
    assert_eq!(detail.sections.len(), 1);

    let section = sections::get_section(db.pool(), issue_id, section_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(section.queries.len(), 1);

    let query = &section.queries[0];
    assert_eq!(query.id, query_id);
    assert_eq!(query.params.as_ref(), Some(&params));
    assert_eq!(
        query.sql.as_deref(),
        Some("select count(*) as n from orders where day = '2024-03-01'")
    );
    assert_eq!(query.duration_ms, Some(40));
    assert_eq!(
        query.result.as_ref().and_then(|r| r.get("records")).cloned(),
        Some(serde_json::json!([[0]]))
    );

    db.close().await;
}

#[tokio::test]
async fn test_patch_and_delete_through_hierarchy() {
    let db = StateDb::open_in_memory().await.unwrap();

    let issue = issues::create_issue(db.pool(), "t", "d").await.unwrap();
    let section = sections::create_section(db.pool(), issue.id, "h", "b", "f")
        .await
        .unwrap();

    sections::patch_section(
        db.pool(),
        section.id,
        &SectionPatch {
            header: Some("Findings".to_string()),
            footer: Some(String::new()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let listed = sections::list_sections(db.pool(), issue.id, Page::default())
        .await
        .unwrap();
    assert_eq!(listed[0].header, "Findings");
    assert_eq!(listed[0].body, "b");
    assert_eq!(listed[0].footer, "");

    assert!(issues::delete_issue(db.pool(), issue.id).await.unwrap());
    assert!(sections::list_sections(db.pool(), issue.id, Page::default())
        .await
        .unwrap()
        .is_empty());
}
