//! Issues: the top of the investigation hierarchy.

use super::{db_error, sections, Page, Section};
use crate::error::Result;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

/// An investigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Issue {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

/// An issue together with its sections.
#[derive(Debug, Clone, Serialize)]
pub struct IssueDetail {
    #[serde(flatten)]
    pub issue: Issue,
    pub sections: Vec<Section>,
}

const SELECT_ISSUE: &str =
    "SELECT id, title, description, created_at, updated_at FROM issues";

/// Creates a new issue.
pub async fn create_issue(pool: &SqlitePool, title: &str, description: &str) -> Result<Issue> {
    sqlx::query_as(
        r#"
        INSERT INTO issues (title, description)
        VALUES (?, ?)
        RETURNING id, title, description, created_at, updated_at
        "#,
    )
    .bind(title)
    .bind(description)
    .fetch_one(pool)
    .await
    .map_err(db_error("Failed to create issue"))
}

/// Lists issues, oldest first.
pub async fn list_issues(pool: &SqlitePool, page: Page) -> Result<Vec<Issue>> {
    sqlx::query_as(&format!("{SELECT_ISSUE} ORDER BY id LIMIT ? OFFSET ?"))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await
        .map_err(db_error("Failed to list issues"))
}

/// Gets an issue by ID.
pub async fn get_issue(pool: &SqlitePool, id: i64) -> Result<Option<Issue>> {
    sqlx::query_as(&format!("{SELECT_ISSUE} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_error("Failed to get issue"))
}

/// Gets an issue with all of its sections.
pub async fn get_issue_detail(pool: &SqlitePool, id: i64) -> Result<Option<IssueDetail>> {
    let Some(issue) = get_issue(pool, id).await? else {
        return Ok(None);
    };
    let sections = sections::all_sections(pool, id).await?;
    Ok(Some(IssueDetail { issue, sections }))
}

/// Updates the given fields of an issue. `None` leaves a field unchanged.
///
/// Returns the updated issue, or `None` if it does not exist.
pub async fn patch_issue(
    pool: &SqlitePool,
    id: i64,
    title: Option<&str>,
    description: Option<&str>,
) -> Result<Option<Issue>> {
    sqlx::query_as(
        r#"
        UPDATE issues
        SET title = COALESCE(?, title),
            description = COALESCE(?, description),
            updated_at = datetime('now')
        WHERE id = ?
        RETURNING id, title, description, created_at, updated_at
        "#,
    )
    .bind(title)
    .bind(description)
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(db_error("Failed to update issue"))
}

/// Deletes an issue along with its sections and queries.
///
/// Returns true if the issue existed.
pub async fn delete_issue(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool
        .begin()
        .await
        .map_err(db_error("Failed to begin transaction"))?;

    sqlx::query("DELETE FROM queries WHERE issue_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to delete issue queries"))?;

    sqlx::query("DELETE FROM sections WHERE issue_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to delete issue sections"))?;

    let result = sqlx::query("DELETE FROM issues WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to delete issue"))?;

    tx.commit()
        .await
        .map_err(db_error("Failed to commit issue deletion"))?;

    Ok(result.rows_affected() > 0)
}
