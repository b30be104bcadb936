//! data-explorer - run templated SQL against Postgres, MySQL and MaxCompute.

use std::sync::Arc;

use data_explorer::cli::{self, Cli, Command, QueryArgs, ServeArgs};
use data_explorer::config::Config;
use data_explorer::connection::ConnectionRegistry;
use data_explorer::error::{ExplorerError, Result};
use data_explorer::logging;
use data_explorer::persistence::StateDb;
use data_explorer::query::QueryService;
use data_explorer::server::{self, AppState};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: could not load .env: {e}");
        }
    }
    logging::init_stderr_logging();

    if let Err(e) = run(Cli::parse_args()).await {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Query(args) => query(args).await,
    }
}

fn load_config(path: Option<&std::path::PathBuf>) -> Result<Config> {
    let path = cli::config_path(path);
    info!("Loading config from: {}", path.display());
    let config = Config::load_from_file(&path)?;
    if config.connections.is_empty() {
        warn!("No connections configured");
    }
    Ok(config)
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(state_db) = args.state_db {
        config.server.state_db = state_db;
    }

    let store = Arc::new(StateDb::open(&config.server.state_db).await?);
    let registry = Arc::new(ConnectionRegistry::new(config.connections));
    let service = Arc::new(QueryService::new(registry.clone()));

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .map_err(|e| {
            ExplorerError::config(format!("Cannot listen on {}: {e}", config.server.listen))
        })?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
        }
        trigger.cancel();
    });

    let served = server::serve(listener, AppState::new(store.clone(), service), shutdown).await;

    registry.close_all().await;
    store.close().await;
    served
}

async fn query(args: QueryArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let registry = Arc::new(ConnectionRegistry::new(config.connections));
    let service = QueryService::new(registry.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let params = args.params_map();
    let outcome = service
        .run(&args.connection, &args.sql, Some(&params), &cancel)
        .await;
    registry.close_all().await;

    let run = outcome?;
    let json = serde_json::to_string_pretty(&run.result)
        .map_err(|e| ExplorerError::internal(format!("Failed to encode result: {e}")))?;
    println!("{json}");
    info!(
        "{} rows in {} ms",
        run.result.row_count(),
        run.duration.as_millis()
    );
    Ok(())
}
