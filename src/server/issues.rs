//! Handlers for issues and their sections.

use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, rejection::QueryRejection},
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::error::ApiResult;
use super::AppState;
use crate::error::ExplorerError;
use crate::persistence::{
    issues, sections, Issue, IssueDetail, Page, Section, SectionDetail, SectionPatch,
};

#[derive(Debug, Deserialize)]
pub struct CreateIssueRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct PatchIssueRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSectionRequest {
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub footer: String,
}

pub async fn create_issue(
    State(state): State<AppState>,
    body: Result<Json<CreateIssueRequest>, JsonRejection>,
) -> ApiResult<Json<Issue>> {
    let Json(request) = body?;
    let issue = issues::create_issue(state.pool(), &request.title, &request.description).await?;
    Ok(Json(issue))
}

pub async fn list_issues(
    State(state): State<AppState>,
    page: Result<Query<Page>, QueryRejection>,
) -> ApiResult<Json<Vec<Issue>>> {
    let Query(page) = page?;
    Ok(Json(issues::list_issues(state.pool(), page).await?))
}

pub async fn get_issue(
    State(state): State<AppState>,
    issue_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<IssueDetail>> {
    let Path(issue_id) = issue_id?;
    issues::get_issue_detail(state.pool(), issue_id)
        .await?
        .map(Json)
        .ok_or_else(|| issue_not_found(issue_id).into())
}

pub async fn patch_issue(
    State(state): State<AppState>,
    issue_id: Result<Path<i64>, PathRejection>,
    body: Result<Json<PatchIssueRequest>, JsonRejection>,
) -> ApiResult<Json<Issue>> {
    let Path(issue_id) = issue_id?;
    let Json(request) = body?;

    issues::patch_issue(
        state.pool(),
        issue_id,
        request.title.as_deref(),
        request.description.as_deref(),
    )
    .await?
    .map(Json)
    .ok_or_else(|| issue_not_found(issue_id).into())
}

pub async fn delete_issue(
    State(state): State<AppState>,
    issue_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(issue_id) = issue_id?;
    if issues::delete_issue(state.pool(), issue_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(issue_not_found(issue_id).into())
    }
}

pub async fn create_section(
    State(state): State<AppState>,
    issue_id: Result<Path<i64>, PathRejection>,
    body: Result<Json<CreateSectionRequest>, JsonRejection>,
) -> ApiResult<Json<Section>> {
    let Path(issue_id) = issue_id?;
    let Json(request) = body?;

    let section = sections::create_section(
        state.pool(),
        issue_id,
        &request.header,
        &request.body,
        &request.footer,
    )
    .await?;
    Ok(Json(section))
}

pub async fn list_sections(
    State(state): State<AppState>,
    issue_id: Result<Path<i64>, PathRejection>,
    page: Result<Query<Page>, QueryRejection>,
) -> ApiResult<Json<Vec<Section>>> {
    let Path(issue_id) = issue_id?;
    let Query(page) = page?;

    if issues::get_issue(state.pool(), issue_id).await?.is_none() {
        return Err(issue_not_found(issue_id).into());
    }
    Ok(Json(sections::list_sections(state.pool(), issue_id, page).await?))
}

pub async fn get_section(
    State(state): State<AppState>,
    ids: Result<Path<(i64, i64)>, PathRejection>,
) -> ApiResult<Json<SectionDetail>> {
    let Path((issue_id, section_id)) = ids?;
    sections::get_section(state.pool(), issue_id, section_id)
        .await?
        .map(Json)
        .ok_or_else(|| section_not_found(section_id).into())
}

pub async fn patch_section(
    State(state): State<AppState>,
    section_id: Result<Path<i64>, PathRejection>,
    body: Result<Json<SectionPatch>, JsonRejection>,
) -> ApiResult<Json<Section>> {
    let Path(section_id) = section_id?;
    let Json(patch) = body?;

    sections::patch_section(state.pool(), section_id, &patch)
        .await?
        .map(Json)
        .ok_or_else(|| section_not_found(section_id).into())
}

pub async fn delete_section(
    State(state): State<AppState>,
    section_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(section_id) = section_id?;
    if sections::delete_section(state.pool(), section_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(section_not_found(section_id).into())
    }
}

fn issue_not_found(id: i64) -> ExplorerError {
    ExplorerError::not_found(format!("issue {id}"))
}

fn section_not_found(id: i64) -> ExplorerError {
    ExplorerError::not_found(format!("section {id}"))
}
