//! Saved queries and their last results.
//!
//! Params and results are stored as JSON text.

use super::{db_error, sections, Page};
use crate::db::QueryResult;
use crate::error::{ExplorerError, Result};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// A query saved in a section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedQuery {
    pub id: i64,
    pub issue_id: i64,
    pub section_id: i64,
    pub connection_id: String,
    pub title: String,
    /// Query text as submitted, placeholders intact.
    pub query: String,
    pub params: Option<HashMap<String, String>>,
    /// Compiled SQL of the last successful run.
    pub sql: Option<String>,
    /// Result of the last successful run.
    pub result: Option<serde_json::Value>,
    /// Duration of the last successful run, in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Raw database row for a saved query.
#[derive(Debug, Clone, FromRow)]
struct SavedQueryRow {
    id: i64,
    issue_id: i64,
    section_id: i64,
    connection_id: String,
    title: String,
    query: String,
    params: Option<String>,
    sql: Option<String>,
    result: Option<String>,
    duration_ms: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl From<SavedQueryRow> for SavedQuery {
    fn from(row: SavedQueryRow) -> Self {
        Self {
            id: row.id,
            issue_id: row.issue_id,
            section_id: row.section_id,
            connection_id: row.connection_id,
            title: row.title,
            query: row.query,
            params: row.params.as_deref().and_then(|p| parse_json(row.id, "params", p)),
            sql: row.sql,
            result: row.result.as_deref().and_then(|r| parse_json(row.id, "result", r)),
            duration_ms: row.duration_ms,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Parses a stored JSON column; unreadable values are dropped.
fn parse_json<T: serde::de::DeserializeOwned>(id: i64, column: &str, text: &str) -> Option<T> {
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Ignoring unreadable {column} of query {id}: {e}");
            None
        }
    }
}

/// Fields of a query to create.
#[derive(Debug, Clone)]
pub struct NewQuery<'a> {
    pub issue_id: i64,
    pub section_id: i64,
    pub connection_id: &'a str,
    pub title: &'a str,
    pub query: &'a str,
    pub params: Option<&'a HashMap<String, String>>,
}

const SELECT_QUERY: &str = r#"
    SELECT id, issue_id, section_id, connection_id, title, query, params,
           sql, result, duration_ms, created_at, updated_at
    FROM queries
"#;

/// Saves a new query in a section of an issue. The section must belong to
/// the issue.
pub async fn create_query(pool: &SqlitePool, new: &NewQuery<'_>) -> Result<SavedQuery> {
    match sections::find_section(pool, new.section_id).await? {
        Some(section) if section.issue_id == new.issue_id => {}
        _ => {
            return Err(ExplorerError::not_found(format!(
                "section {} of issue {}",
                new.section_id, new.issue_id
            )))
        }
    }

    let params = new
        .params
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| ExplorerError::internal(format!("Failed to encode params: {e}")))?;

    let row: SavedQueryRow = sqlx::query_as(
        r#"
        INSERT INTO queries (issue_id, section_id, connection_id, title, query, params)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id, issue_id, section_id, connection_id, title, query, params,
                  sql, result, duration_ms, created_at, updated_at
        "#,
    )
    .bind(new.issue_id)
    .bind(new.section_id)
    .bind(new.connection_id)
    .bind(new.title)
    .bind(new.query)
    .bind(params)
    .fetch_one(pool)
    .await
    .map_err(db_error("Failed to create query"))?;

    Ok(row.into())
}

/// Stores the outcome of a successful run.
pub async fn record_query_result(
    pool: &SqlitePool,
    id: i64,
    sql: &str,
    result: &QueryResult,
    duration: Duration,
) -> Result<()> {
    let result = serde_json::to_string(result)
        .map_err(|e| ExplorerError::internal(format!("Failed to encode result: {e}")))?;
    let duration_ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);

    let updated = sqlx::query(
        r#"
        UPDATE queries
        SET sql = ?, result = ?, duration_ms = ?, updated_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(sql)
    .bind(result)
    .bind(duration_ms)
    .bind(id)
    .execute(pool)
    .await
    .map_err(db_error("Failed to record query result"))?;

    if updated.rows_affected() == 0 {
        return Err(ExplorerError::not_found(format!("query {id}")));
    }
    Ok(())
}

/// Lists one page of a section's queries, oldest first.
pub async fn list_queries(
    pool: &SqlitePool,
    issue_id: i64,
    section_id: i64,
    page: Page,
) -> Result<Vec<SavedQuery>> {
    let rows: Vec<SavedQueryRow> = sqlx::query_as(&format!(
        "{SELECT_QUERY} WHERE issue_id = ? AND section_id = ? ORDER BY id LIMIT ? OFFSET ?"
    ))
    .bind(issue_id)
    .bind(section_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await
    .map_err(db_error("Failed to list queries"))?;

    Ok(rows.into_iter().map(SavedQuery::from).collect())
}

/// Lists every query of a section, oldest first.
pub(crate) async fn all_queries(pool: &SqlitePool, section_id: i64) -> Result<Vec<SavedQuery>> {
    let rows: Vec<SavedQueryRow> =
        sqlx::query_as(&format!("{SELECT_QUERY} WHERE section_id = ? ORDER BY id"))
            .bind(section_id)
            .fetch_all(pool)
            .await
            .map_err(db_error("Failed to list queries"))?;

    Ok(rows.into_iter().map(SavedQuery::from).collect())
}

/// Gets a query by its full path.
pub async fn get_query(
    pool: &SqlitePool,
    issue_id: i64,
    section_id: i64,
    query_id: i64,
) -> Result<Option<SavedQuery>> {
    let row: Option<SavedQueryRow> = sqlx::query_as(&format!(
        "{SELECT_QUERY} WHERE id = ? AND issue_id = ? AND section_id = ?"
    ))
    .bind(query_id)
    .bind(issue_id)
    .bind(section_id)
    .fetch_optional(pool)
    .await
    .map_err(db_error("Failed to get query"))?;

    Ok(row.map(SavedQuery::from))
}

/// Gets a query by ID.
pub async fn find_query(pool: &SqlitePool, id: i64) -> Result<Option<SavedQuery>> {
    let row: Option<SavedQueryRow> = sqlx::query_as(&format!("{SELECT_QUERY} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_error("Failed to get query"))?;

    Ok(row.map(SavedQuery::from))
}

/// Renames a query. `None` leaves the title unchanged.
pub async fn patch_query(
    pool: &SqlitePool,
    id: i64,
    title: Option<&str>,
) -> Result<Option<SavedQuery>> {
    let row: Option<SavedQueryRow> = sqlx::query_as(
        r#"
        UPDATE queries
        SET title = COALESCE(?, title),
            updated_at = datetime('now')
        WHERE id = ?
        RETURNING id, issue_id, section_id, connection_id, title, query, params,
                  sql, result, duration_ms, created_at, updated_at
        "#,
    )
    .bind(title)
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(db_error("Failed to update query"))?;

    Ok(row.map(SavedQuery::from))
}

/// Deletes a query. Returns true if it existed.
pub async fn delete_query(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM queries WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .map_err(db_error("Failed to delete query"))?;

    Ok(result.rows_affected() > 0)
}
