//! Driver-independent parts of query execution.
//!
//! Backends capture column metadata themselves, then hand their row stream to
//! [`collect_rows`], which buffers rows in order and watches the caller's
//! cancellation token between fetches.

use super::{QueryResult, Row};
use crate::error::{ExplorerError, Result};
use futures::{Stream, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Drains `rows` into `result.records`, converting each with `convert`.
///
/// `result` must already carry its column metadata. Every converted row must
/// have exactly one value per column. The whole result set is buffered in
/// memory; this loop is where pagination or streaming would go.
///
/// On cancellation or on any error the partially buffered rows are discarded
/// and `rows` is dropped, which releases the driver cursor.
pub async fn collect_rows<R, S, F>(
    mut result: QueryResult,
    mut rows: S,
    cancel: &CancellationToken,
    mut convert: F,
) -> Result<QueryResult>
where
    S: Stream<Item = Result<R>> + Unpin,
    F: FnMut(&R) -> Row,
{
    let width = result.column_count();

    loop {
        let next = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Cancelled after {} rows", result.records.len());
                return Err(ExplorerError::cancelled());
            }
            next = rows.next() => next,
        };

        match next {
            Some(Ok(raw)) => {
                let row = convert(&raw);
                if row.len() != width {
                    return Err(ExplorerError::internal(format!(
                        "row has {} values but the result has {} columns",
                        row.len(),
                        width
                    )));
                }
                result.records.push(row);
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    Ok(result)
}

/// Runs `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(ExplorerError::cancelled()),
        out = fut => out,
    }
}
