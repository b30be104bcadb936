//! data-explorer - run templated SQL against Postgres, MySQL and MaxCompute.
//!
//! This library exposes the core modules for the binary and for integration
//! tests.

pub mod cli;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod query;
pub mod server;
pub mod template;
