//! Topic Indexer Main Entry Point
//!
//! Consumes messages from the configured Kafka topics and bulk-indexes them
//! into OpenSearch.

use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use topic_indexer::config::LogConfig;
use topic_indexer::{AppConfig, Dependencies, IndexingError};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "topic-indexer", version, about = "Forward bus topics into OpenSearch")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "TOPIC_INDEXER_CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Initialize tracing/logging.
fn init_tracing(log: &LogConfig) -> Result<(), IndexingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&log.level).map_err(|e| {
            IndexingError::config(format!("Invalid log level '{}': {}", log.level, e))
        })?,
    };

    if log.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .map_err(|e| IndexingError::config(e.to_string()))?;

        info!(
            service_name = "topic-indexer",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with JSON format"
        );
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .try_init()
            .map_err(|e| IndexingError::config(e.to_string()))?;

        info!(
            service_name = "topic-indexer",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with console output"
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), IndexingError> {
    // Load environment variables from .env file
    dotenv().ok();

    let args = Args::parse();

    let config = AppConfig::load(&args.config)?;

    init_tracing(&config.log)?;

    info!(config = %args.config.display(), "Configured, starting to connect and consume");

    let deps = match Dependencies::new(&config) {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    match deps.orchestrator.run().await {
        Ok(()) => {
            info!("Shutting down");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Topic indexer failed");
            Err(e.into())
        }
    }
}
