//! Connection management for data-explorer.
//!
//! Maps configured connection ids to shared, lazily opened database handles.

pub mod registry;

pub use registry::ConnectionRegistry;
