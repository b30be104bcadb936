//! PostgreSQL database client implementation.
//!
//! Provides the `PostgresClient` struct that implements the `DatabaseClient` trait
//! for PostgreSQL databases using sqlx.

use super::executor::{cancellable, collect_rows};
use super::{ColumnInfo, DatabaseBackend, DatabaseClient, QueryResult, Row, Value};
use crate::error::{ExplorerError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Serialize;
use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::types::{Decimal, JsonValue, Uuid};
use sqlx::{Column as _, Executor as _, Postgres, Row as _, Statement as _, TypeInfo as _};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum pooled connections per configured Postgres connection.
const MAX_CONNECTIONS: u32 = 5;

/// How long a query waits for a free pooled connection.
const ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// PostgreSQL database client.
#[derive(Debug)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Creates a new PostgresClient from an existing connection pool.
    ///
    /// This is primarily useful for testing.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool for `dsn` and establishes the first connection
    /// immediately, so unreachable servers and bad credentials fail here.
    ///
    /// `dsn` is the remainder after dispatch stripped `postgres://`, e.g.
    /// `user:pass@host:5432/db`. A remainder that still carries a scheme
    /// (`postgresql://...`) is used as-is.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let url = to_connection_url(dsn);
        let options = PgConnectOptions::from_str(&url)
            .map_err(|e| ExplorerError::dial(format!("Invalid Postgres DSN: {e}")))?;

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect_with(options)
            .await
            .map_err(map_connection_error)?;

        debug!("Connected to Postgres");
        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    async fn execute_query(&self, sql: &str, cancel: &CancellationToken) -> Result<QueryResult> {
        let start = Instant::now();

        let mut conn = cancellable(cancel, async {
            self.pool
                .acquire()
                .await
                .map_err(|e| ExplorerError::query(format!("Failed to acquire connection: {e}")))
        })
        .await?;

        let pid: i32 = cancellable(cancel, async {
            sqlx::query_scalar("select pg_backend_pid()")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| ExplorerError::query(format_query_error(e)))
        })
        .await?;

        let outcome = run_statement(&mut conn, sql, cancel).await;
        if outcome.is_err() && cancel.is_cancelled() {
            self.cancel_backend(pid).await;
        }
        let result = outcome?;

        debug!(
            "Postgres query returned {} rows in {:?}",
            result.row_count(),
            start.elapsed()
        );
        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

impl PostgresClient {
    /// Asks the server to stop whatever backend `pid` is running.
    ///
    /// Dropping the sqlx future only abandons the socket; the statement keeps
    /// running until this reaches the server.
    async fn cancel_backend(&self, pid: i32) {
        let cancelled = sqlx::query_scalar::<_, bool>("select pg_cancel_backend($1)")
            .bind(pid)
            .fetch_one(&self.pool)
            .await;

        match cancelled {
            Ok(true) => debug!("Cancelled Postgres backend {pid}"),
            Ok(false) => debug!("Postgres backend {pid} had nothing to cancel"),
            Err(e) => warn!("Failed to cancel Postgres backend {pid}: {e}"),
        }
    }
}

/// Prepares `sql` on `conn` and collects its rows.
async fn run_statement(
    conn: &mut PgConnection,
    sql: &str,
    cancel: &CancellationToken,
) -> Result<QueryResult> {
    // Preparing yields the result metadata even when no row comes back.
    let statement = cancellable(cancel, async {
        (&mut *conn)
            .prepare(sql)
            .await
            .map_err(|e| ExplorerError::query(format_query_error(e)))
    })
    .await?;

    let columns: Vec<ColumnInfo> = statement
        .columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect();

    let rows = statement
        .query()
        .fetch(&mut *conn)
        .map_err(|e| ExplorerError::query(format_query_error(e)));

    collect_rows(QueryResult::with_columns(sql, columns), rows, cancel, convert_row).await
}

/// Re-attaches the scheme sqlx needs to a stripped DSN.
fn to_connection_url(dsn: &str) -> String {
    if dsn.contains("://") {
        dsn.to_string()
    } else {
        format!("postgres://{dsn}")
    }
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Decodes column `index` as `T`.
///
/// SQL NULL is the only source of `Value::Null`. A value that does not decode
/// as `T` is returned in its raw form instead.
fn decode<'r, T>(row: &'r PgRow, index: usize, to_value: impl FnOnce(T) -> Value) -> Value
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    match row.try_get::<Option<T>, _>(index) {
        Ok(Some(value)) => to_value(value),
        Ok(None) => Value::Null,
        Err(e) => {
            debug!("Column {index} kept undecoded: {e}");
            undecoded(row, index)
        }
    }
}

/// The wire bytes of column `index`, as text when they read as text.
fn undecoded(row: &PgRow, index: usize) -> Value {
    match row.try_get_unchecked::<Option<Vec<u8>>, _>(index) {
        Ok(Some(bytes)) => Value::from_raw_bytes(bytes),
        Ok(None) => Value::Null,
        Err(e) => {
            warn!("Column {index} could not be read: {e}");
            Value::Null
        }
    }
}

/// Decodes a one-dimensional array into a JSON array.
fn array<'r, T>(row: &'r PgRow, index: usize) -> Value
where
    Vec<Option<T>>: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres> + Serialize,
{
    decode::<Vec<Option<T>>>(row, index, |items| {
        serde_json::to_value(items).map_or(Value::Null, Value::Json)
    })
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => decode::<bool>(row, index, Value::from),
        "INT2" | "SMALLINT" => decode::<i16>(row, index, Value::from),
        "INT4" | "INT" | "INTEGER" => decode::<i32>(row, index, Value::from),
        "INT8" | "BIGINT" => decode::<i64>(row, index, Value::from),
        "FLOAT4" | "REAL" => decode::<f32>(row, index, Value::from),
        "FLOAT8" | "DOUBLE PRECISION" => decode::<f64>(row, index, Value::from),
        "OID" => decode::<Oid>(row, index, |oid| Value::Int(i64::from(oid.0))),
        "\"CHAR\"" => decode::<i8>(row, index, |c| {
            Value::String(char::from(c as u8).to_string())
        }),

        "NUMERIC" => decode::<Decimal>(row, index, |d| Value::Decimal(d.to_string())),

        "BYTEA" => decode::<Vec<u8>>(row, index, Value::from),

        "TIMESTAMPTZ" => decode::<DateTime<Utc>>(row, index, |t| Value::Temporal(t.to_rfc3339())),

        "TIMESTAMP" => decode::<NaiveDateTime>(row, index, |t| {
            Value::Temporal(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),

        "DATE" => decode::<NaiveDate>(row, index, |d| Value::Temporal(d.to_string())),

        "TIME" => decode::<NaiveTime>(row, index, |t| Value::Temporal(t.to_string())),

        "INTERVAL" => decode::<PgInterval>(row, index, |i| Value::String(format_interval(&i))),

        "UUID" => decode::<Uuid>(row, index, |u| Value::String(u.to_string())),

        "INET" => decode::<IpNetwork>(row, index, |n| Value::String(format_inet(n, false))),
        "CIDR" => decode::<IpNetwork>(row, index, |n| Value::String(format_inet(n, true))),

        "JSON" | "JSONB" => decode::<JsonValue>(row, index, Value::from),

        "INT2[]" => array::<i16>(row, index),
        "INT4[]" => array::<i32>(row, index),
        "INT8[]" => array::<i64>(row, index),
        "FLOAT4[]" => array::<f32>(row, index),
        "FLOAT8[]" => array::<f64>(row, index),
        "BOOL[]" => array::<bool>(row, index),
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => array::<String>(row, index),

        // Text-like types (TEXT, VARCHAR, NAME, enums, ...) and anything else.
        _ => decode::<String>(row, index, Value::from),
    }
}

/// Renders an interval the way Postgres prints it by default, e.g.
/// `1 year 2 mons 3 days 04:05:06.5`.
fn format_interval(interval: &PgInterval) -> String {
    fn unit(parts: &mut Vec<String>, n: i32, name: &str) {
        match n {
            0 => {}
            1 => parts.push(format!("1 {name}")),
            _ => parts.push(format!("{n} {name}s")),
        }
    }

    let mut parts = Vec::new();
    unit(&mut parts, interval.months / 12, "year");
    unit(&mut parts, interval.months % 12, "mon");
    unit(&mut parts, interval.days, "day");

    if interval.microseconds != 0 || parts.is_empty() {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let micros = interval.microseconds.unsigned_abs();
        let secs = micros / 1_000_000;
        let mut time = format!(
            "{sign}{:02}:{:02}:{:02}",
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        let fraction = micros % 1_000_000;
        if fraction != 0 {
            time.push('.');
            time.push_str(format!("{fraction:06}").trim_end_matches('0'));
        }
        parts.push(time);
    }

    parts.join(" ")
}

/// Postgres prints an `inet` host address without its prefix length.
fn format_inet(network: IpNetwork, cidr: bool) -> String {
    let host_prefix = if network.is_ipv4() { 32 } else { 128 };
    if !cidr && network.prefix() == host_prefix {
        network.ip().to_string()
    } else {
        network.to_string()
    }
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error) -> ExplorerError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        ExplorerError::dial(format!(
            "Cannot connect to Postgres. Check that the server is running. ({error})"
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        ExplorerError::dial(format!("Postgres authentication failed: {error}"))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        ExplorerError::dial(format!("Postgres database does not exist: {error}"))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        ExplorerError::dial(format!(
            "Connection to Postgres timed out. The server may be overloaded or unreachable. ({error})"
        ))
    } else {
        ExplorerError::dial(error.to_string())
    }
}

/// Formats a query error with hints if available.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    // PostgreSQL errors often have format: "ERROR: message\nDETAIL: ...\nHINT: ..."
    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }

        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }

        if let Some(table) = pg_error.table() {
            result.push_str("\n  TABLE: ");
            result.push_str(table);
        }

        if let Some(column) = pg_error.column() {
            result.push_str("\n  COLUMN: ");
            result.push_str(column);
        }

        if let Some(constraint) = pg_error.constraint() {
            result.push_str("\n  CONSTRAINT: ");
            result.push_str(constraint);
        }
    }

    result
}
