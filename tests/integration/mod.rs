//! Integration tests for data-explorer.

pub mod common;
pub mod live_query_test;
pub mod persistence_test;
pub mod router_test;
pub mod service_test;
