//! Handlers that run SQL: ad-hoc runs and saved queries.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, rejection::QueryRejection},
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::error::ApiResult;
use super::AppState;
use crate::db::QueryResult;
use crate::error::ExplorerError;
use crate::persistence::{queries, NewQuery, Page, SavedQuery};
use crate::query::{QueryRun, QueryService};

#[derive(Debug, Deserialize)]
pub struct RunQueryRequest {
    pub connection_id: String,
    pub query: String,
    pub params: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct RunQueryResponse {
    pub query: String,
    pub params: Option<HashMap<String, String>>,
    pub sql: String,
    pub result: QueryResult,
    /// Milliseconds.
    pub duration: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateQueryRequest {
    pub connection_id: String,
    #[serde(default)]
    pub title: String,
    pub query: String,
    pub params: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct PatchQueryRequest {
    pub title: Option<String>,
}

/// Runs a query on its own task, tied to the calling request.
///
/// When the client disconnects, axum drops the handler future and with it the
/// drop guard, which cancels the token. The spawned task is not dropped, so
/// the backend still gets to stop the statement on the server before the task
/// ends.
pub(crate) async fn run_detached(
    service: Arc<QueryService>,
    connection_id: String,
    query: String,
    params: Option<HashMap<String, String>>,
) -> crate::error::Result<QueryRun> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let task = tokio::spawn(async move {
        service
            .run(&connection_id, &query, params.as_ref(), &cancel)
            .await
    });

    task.await
        .map_err(|e| ExplorerError::internal(format!("query task failed: {e}")))?
}

pub async fn run_query(
    State(state): State<AppState>,
    body: Result<Json<RunQueryRequest>, JsonRejection>,
) -> ApiResult<Json<RunQueryResponse>> {
    let Json(request) = body?;
    if request.query.trim().is_empty() {
        return Err(ExplorerError::bad_request("query must not be empty").into());
    }

    let run = run_detached(
        state.service.clone(),
        request.connection_id,
        request.query,
        request.params,
    )
    .await?;

    Ok(Json(RunQueryResponse {
        query: run.query,
        params: run.params,
        sql: run.sql,
        result: run.result,
        duration: u64::try_from(run.duration.as_millis()).unwrap_or(u64::MAX),
    }))
}

/// Saves the query, runs it, then stores the compiled SQL and result.
///
/// A failed run returns the error; the saved query is kept without a result.
pub async fn create_query(
    State(state): State<AppState>,
    ids: Result<Path<(i64, i64)>, PathRejection>,
    body: Result<Json<CreateQueryRequest>, JsonRejection>,
) -> ApiResult<Json<SavedQuery>> {
    let Path((issue_id, section_id)) = ids?;
    let Json(request) = body?;
    if request.query.trim().is_empty() {
        return Err(ExplorerError::bad_request("query must not be empty").into());
    }

    let saved = queries::create_query(
        state.pool(),
        &NewQuery {
            issue_id,
            section_id,
            connection_id: &request.connection_id,
            title: &request.title,
            query: &request.query,
            params: request.params.as_ref(),
        },
    )
    .await?;

    let run = run_detached(
        state.service.clone(),
        request.connection_id.clone(),
        request.query.clone(),
        request.params.clone(),
    )
    .await?;

    queries::record_query_result(state.pool(), saved.id, &run.sql, &run.result, run.duration)
        .await?;
    info!(
        "Query {} on '{}' returned {} rows",
        saved.id,
        request.connection_id,
        run.result.row_count()
    );

    queries::find_query(state.pool(), saved.id)
        .await?
        .map(Json)
        .ok_or_else(|| query_not_found(saved.id).into())
}

pub async fn list_queries(
    State(state): State<AppState>,
    ids: Result<Path<(i64, i64)>, PathRejection>,
    page: Result<Query<Page>, QueryRejection>,
) -> ApiResult<Json<Vec<SavedQuery>>> {
    let Path((issue_id, section_id)) = ids?;
    let Query(page) = page?;
    Ok(Json(
        queries::list_queries(state.pool(), issue_id, section_id, page).await?,
    ))
}

pub async fn get_query(
    State(state): State<AppState>,
    ids: Result<Path<(i64, i64, i64)>, PathRejection>,
) -> ApiResult<Json<SavedQuery>> {
    let Path((issue_id, section_id, query_id)) = ids?;
    queries::get_query(state.pool(), issue_id, section_id, query_id)
        .await?
        .map(Json)
        .ok_or_else(|| query_not_found(query_id).into())
}

pub async fn patch_query(
    State(state): State<AppState>,
    query_id: Result<Path<i64>, PathRejection>,
    body: Result<Json<PatchQueryRequest>, JsonRejection>,
) -> ApiResult<Json<SavedQuery>> {
    let Path(query_id) = query_id?;
    let Json(request) = body?;

    queries::patch_query(state.pool(), query_id, request.title.as_deref())
        .await?
        .map(Json)
        .ok_or_else(|| query_not_found(query_id).into())
}

pub async fn delete_query(
    State(state): State<AppState>,
    query_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(query_id) = query_id?;
    if queries::delete_query(state.pool(), query_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(query_not_found(query_id).into())
    }
}

fn query_not_found(id: i64) -> ExplorerError {
    ExplorerError::not_found(format!("query {id}"))
}
