//! Command-line argument parsing for data-explorer.

use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;

/// Multi-backend SQL explorer with a persisted investigation notebook.
#[derive(Parser, Debug)]
#[command(name = "data-explorer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),

    /// Run one query against a configured connection and print the result as JSON.
    Query(QueryArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Config file path (TOML, or YAML with a .yaml/.yml extension)
    #[arg(short = 'c', long, value_name = "PATH", env = "DATA_EXPLORER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address, overriding the config file
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// State database path, overriding the config file
    #[arg(long, value_name = "PATH")]
    pub state_db: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Config file path (TOML, or YAML with a .yaml/.yml extension)
    #[arg(short = 'c', long, value_name = "PATH", env = "DATA_EXPLORER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Connection id from the config file
    #[arg(long, value_name = "ID")]
    pub connection: String,

    /// SQL text, may contain ${name} placeholders
    #[arg(long, value_name = "SQL")]
    pub sql: String,

    /// Placeholder value as name=value (repeatable)
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl QueryArgs {
    /// Returns the `--param` values as a map; later duplicates win.
    pub fn params_map(&self) -> HashMap<String, String> {
        self.params.iter().cloned().collect()
    }
}

/// Returns the config file path to use: the given one, or the default path.
pub fn config_path(config: Option<&PathBuf>) -> PathBuf {
    config
        .cloned()
        .unwrap_or_else(crate::config::Config::default_path)
}

/// Parses `name=value`. The value may itself contain `=`.
fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("Invalid parameter: '{s}'. Expected NAME=VALUE")),
    }
}
