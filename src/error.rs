//! Error types for data-explorer.
//!
//! Defines the main error enum used throughout the application. The query core
//! only ever produces `UnsupportedDsn`, `UnknownConnectionId`, `Dial` and
//! `Query`; the remaining variants belong to the surrounding layers.

use thiserror::Error;

/// Main error type for data-explorer operations.
#[derive(Error, Debug)]
pub enum ExplorerError {
    /// The DSN matched none of the supported drivers.
    #[error("Unsupported DSN: {0}")]
    UnsupportedDsn(String),

    /// No configured connection has the requested id.
    #[error("Unknown connection id: {0}")]
    UnknownConnectionId(String),

    /// Opening a connection failed (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Dial(String),

    /// Query execution errors, carrying the driver message verbatim.
    #[error("Query error: {0}")]
    Query(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// State database errors.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A stored issue, section or query does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was malformed.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExplorerError {
    /// Creates an unsupported DSN error. The DSN itself is not included since
    /// it may carry credentials.
    pub fn unsupported_dsn(msg: impl Into<String>) -> Self {
        Self::UnsupportedDsn(msg.into())
    }

    /// Creates an unknown connection id error.
    pub fn unknown_connection(id: impl Into<String>) -> Self {
        Self::UnknownConnectionId(id.into())
    }

    /// Creates a dial error with the given message.
    pub fn dial(msg: impl Into<String>) -> Self {
        Self::Dial(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates the query error reported when the caller cancels.
    pub fn cancelled() -> Self {
        Self::Query("query cancelled".to_string())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a persistence error with the given message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Creates a not-found error with the given message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates a bad request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnsupportedDsn(_) => "Unsupported DSN",
            Self::UnknownConnectionId(_) => "Unknown Connection",
            Self::Dial(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Config(_) => "Configuration Error",
            Self::Persistence(_) => "Persistence Error",
            Self::NotFound(_) => "Not Found",
            Self::BadRequest(_) => "Bad Request",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using ExplorerError.
pub type Result<T> = std::result::Result<T, ExplorerError>;
