//! Compile, resolve, execute.
//!
//! The single entry point callers use to run a templated query against a
//! configured connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::connection::ConnectionRegistry;
use crate::db::QueryResult;
use crate::error::Result;
use crate::template;

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct QueryRun {
    /// SQL as submitted, placeholders intact.
    pub query: String,
    /// Parameters supplied with the query.
    pub params: Option<HashMap<String, String>>,
    /// SQL after substitution, as sent to the database.
    pub sql: String,
    pub result: QueryResult,
    /// Wall time of resolve plus execute.
    pub duration: Duration,
}

/// Runs templated SQL against connections from a registry.
pub struct QueryService {
    registry: Arc<ConnectionRegistry>,
}

impl QueryService {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Substitutes `params` into `raw_sql`. Absent or empty params leave the
    /// text unchanged.
    pub fn compile_sql(raw_sql: &str, params: Option<&HashMap<String, String>>) -> String {
        match params {
            Some(params) if !params.is_empty() => template::compile(raw_sql, params),
            _ => raw_sql.to_string(),
        }
    }

    /// Compiles `raw_sql`, resolves `connection_id` and executes the result.
    ///
    /// Errors are returned as produced by the failing stage.
    pub async fn run(
        &self,
        connection_id: &str,
        raw_sql: &str,
        params: Option<&HashMap<String, String>>,
        cancel: &CancellationToken,
    ) -> Result<QueryRun> {
        let sql = Self::compile_sql(raw_sql, params);

        let unresolved = template::placeholders(&sql);
        if !unresolved.is_empty() {
            debug!("Unresolved placeholders for '{connection_id}': {unresolved:?}");
        }

        let start = Instant::now();

        let handle = self
            .registry
            .resolve(connection_id, cancel)
            .await
            .inspect_err(|e| error!(stage = "resolve", connection = connection_id, "{e}"))?;

        let result = handle
            .execute_query(&sql, cancel)
            .await
            .inspect_err(|e| error!(stage = "execute", connection = connection_id, "{e}"))?;

        let duration = start.elapsed();
        debug!(
            "Query on '{connection_id}' returned {} rows in {:?}",
            result.row_count(),
            duration
        );

        Ok(QueryRun {
            query: raw_sql.to_string(),
            params: params.cloned(),
            sql,
            result,
            duration,
        })
    }
}
