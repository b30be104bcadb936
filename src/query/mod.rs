//! Query execution for data-explorer.
//!
//! Ties template compilation, connection resolution and execution together.

pub mod service;

pub use service::{QueryRun, QueryService};
