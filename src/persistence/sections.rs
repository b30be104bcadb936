//! Sections of an issue. Each section holds free text and saved queries.

use super::{db_error, issues, queries, Page, SavedQuery};
use crate::error::{ExplorerError, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

/// A section of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Section {
    pub id: i64,
    pub issue_id: i64,
    pub header: String,
    pub body: String,
    pub footer: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A section together with its saved queries.
#[derive(Debug, Clone, Serialize)]
pub struct SectionDetail {
    #[serde(flatten)]
    pub section: Section,
    pub queries: Vec<SavedQuery>,
}

/// Fields to change on a section. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SectionPatch {
    pub header: Option<String>,
    pub body: Option<String>,
    pub footer: Option<String>,
}

const SELECT_SECTION: &str =
    "SELECT id, issue_id, header, body, footer, created_at, updated_at FROM sections";

/// Creates a section in an existing issue.
pub async fn create_section(
    pool: &SqlitePool,
    issue_id: i64,
    header: &str,
    body: &str,
    footer: &str,
) -> Result<Section> {
    if issues::get_issue(pool, issue_id).await?.is_none() {
        return Err(ExplorerError::not_found(format!("issue {issue_id}")));
    }

    sqlx::query_as(
        r#"
        INSERT INTO sections (issue_id, header, body, footer)
        VALUES (?, ?, ?, ?)
        RETURNING id, issue_id, header, body, footer, created_at, updated_at
        "#,
    )
    .bind(issue_id)
    .bind(header)
    .bind(body)
    .bind(footer)
    .fetch_one(pool)
    .await
    .map_err(db_error("Failed to create section"))
}

/// Lists one page of an issue's sections, oldest first.
pub async fn list_sections(pool: &SqlitePool, issue_id: i64, page: Page) -> Result<Vec<Section>> {
    sqlx::query_as(&format!(
        "{SELECT_SECTION} WHERE issue_id = ? ORDER BY id LIMIT ? OFFSET ?"
    ))
    .bind(issue_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await
    .map_err(db_error("Failed to list sections"))
}

/// Lists every section of an issue, oldest first.
pub(crate) async fn all_sections(pool: &SqlitePool, issue_id: i64) -> Result<Vec<Section>> {
    sqlx::query_as(&format!("{SELECT_SECTION} WHERE issue_id = ? ORDER BY id"))
        .bind(issue_id)
        .fetch_all(pool)
        .await
        .map_err(db_error("Failed to list sections"))
}

/// Gets a section by ID regardless of its issue.
pub async fn find_section(pool: &SqlitePool, id: i64) -> Result<Option<Section>> {
    sqlx::query_as(&format!("{SELECT_SECTION} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_error("Failed to get section"))
}

/// Gets a section of the given issue with all of its queries.
pub async fn get_section(
    pool: &SqlitePool,
    issue_id: i64,
    section_id: i64,
) -> Result<Option<SectionDetail>> {
    let section: Option<Section> =
        sqlx::query_as(&format!("{SELECT_SECTION} WHERE id = ? AND issue_id = ?"))
            .bind(section_id)
            .bind(issue_id)
            .fetch_optional(pool)
            .await
            .map_err(db_error("Failed to get section"))?;

    let Some(section) = section else {
        return Ok(None);
    };
    let queries = queries::all_queries(pool, section.id).await?;
    Ok(Some(SectionDetail { section, queries }))
}

/// Updates a section. Returns the updated section, or `None` if it does not
/// exist.
pub async fn patch_section(
    pool: &SqlitePool,
    id: i64,
    patch: &SectionPatch,
) -> Result<Option<Section>> {
    sqlx::query_as(
        r#"
        UPDATE sections
        SET header = COALESCE(?, header),
            body = COALESCE(?, body),
            footer = COALESCE(?, footer),
            updated_at = datetime('now')
        WHERE id = ?
        RETURNING id, issue_id, header, body, footer, created_at, updated_at
        "#,
    )
    .bind(patch.header.as_deref())
    .bind(patch.body.as_deref())
    .bind(patch.footer.as_deref())
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(db_error("Failed to update section"))
}

/// Deletes a section and its queries. Returns true if the section existed.
pub async fn delete_section(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool
        .begin()
        .await
        .map_err(db_error("Failed to begin transaction"))?;

    sqlx::query("DELETE FROM queries WHERE section_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to delete section queries"))?;

    let result = sqlx::query("DELETE FROM sections WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to delete section"))?;

    tx.commit()
        .await
        .map_err(db_error("Failed to commit section deletion"))?;

    Ok(result.rows_affected() > 0)
}
