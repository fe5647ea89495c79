//! Kanban reference backend: in-memory tables with realtime change feeds.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin kanban-backend
//!
//! # Run on custom address
//! cargo run --bin kanban-backend -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! KANBAN_BACKEND_ADDR=127.0.0.1:8080 cargo run --bin kanban-backend
//! ```

use std::sync::Arc;

use clap::Parser;
use kanban_backend::config::{BackendCliArgs, BackendConfig};
use kanban_backend::server::{self, BackendState};
use kanban_backend::tables::Database;

#[tokio::main]
async fn main() {
    let cli = BackendCliArgs::parse();

    let config = match BackendConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(addr = %config.bind_addr, "starting kanban backend");

    let db = Database::with_change_buffer(config.change_buffer.get());
    let state = Arc::new(BackendState::with_config(config.max_frame_size.get(), db));

    match server::start_server_with_state(&config.bind_addr.to_string(), state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "backend listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "backend server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start backend server");
            std::process::exit(1);
        }
    }
}
