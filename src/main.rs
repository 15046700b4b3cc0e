//! Graph Store Server
//!
//! Loads the process configuration and the graph definition, connects the
//! configured storage backend and event queue, and serves the HTTP API.

use clap::{Arg, ArgAction, Command};
use graph_store::api::start_server;
use graph_store::core::config::{Config, StorageType};
use graph_store::graph::{create_queue, EventEmitter, GraphService};
use graph_store::storage::create_storage;
use graph_store::{GraphError, Result, SchemaRegistry};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("graph-store")
        .version(graph_store::VERSION)
        .about("Schema-driven graph object store.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("schema")
                .short('s')
                .long("schema")
                .value_name("FILE")
                .help("Graph definition (JSON) path"),
        )
        .arg(
            Arg::new("http-addr")
                .long("http-addr")
                .value_name("ADDR")
                .help("HTTP server bind address"),
        )
        .arg(
            Arg::new("storage-type")
                .long("storage-type")
                .value_name("TYPE")
                .help("Storage backend type (memory, sqlite)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("init")
                .long("init")
                .action(ArgAction::SetTrue)
                .help("Create storage tables and exit"),
        )
        .get_matches();

    // Load configuration
    let mut config = Config::load(matches.get_one::<String>("config").map(String::as_str))?;
    apply_cli_overrides(&mut config, &matches)?;
    config.validate()?;

    graph_store::init(&config.logging)?;
    info!("Starting Graph Store v{}", graph_store::VERSION);

    let registry = Arc::new(SchemaRegistry::from_file(&config.schema.path)?);
    info!("Graph definition loaded from {}", config.schema.path.display());

    let storage = create_storage(&config.storage)
        .map_err(|e| GraphError::config(format!("Storage initialization failed: {}", e)))?;
    info!("Storage initialized: {:?}", config.storage.storage_type);

    let emitter = match create_queue(&config.queue) {
        Some(queue) => {
            info!("Publishing events to topic '{}'", queue.topic());
            EventEmitter::with_queue(queue)
        }
        None => EventEmitter::new(),
    };

    let service = Arc::new(GraphService::new(registry, storage, emitter));

    if matches.get_flag("init") {
        service.init().await?;
        info!("Storage bootstrap complete");
        return Ok(());
    }

    // A memory store starts empty every run
    if config.storage.storage_type == StorageType::Memory {
        service.init().await?;
    }
    service.check().await?;

    start_server(
        config.server.http_addr,
        service,
        config.metrics.enable_prometheus,
        shutdown_signal(),
    )
    .await
    .map_err(|e| GraphError::config(format!("HTTP server failed: {}", e)))?;

    info!("Shutdown complete");
    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &clap::ArgMatches) -> Result<()> {
    if let Some(path) = matches.get_one::<String>("schema") {
        config.schema.path = path.into();
    }

    if let Some(addr) = matches.get_one::<String>("http-addr") {
        config.server.http_addr = addr
            .parse()
            .map_err(|e| GraphError::config(format!("Invalid HTTP address: {}", e)))?;
    }

    if let Some(storage_type) = matches.get_one::<String>("storage-type") {
        config.storage.storage_type = storage_type.parse()?;
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
    warn!("Received shutdown signal, initiating graceful shutdown...");
}
