//! Service mode - background process owning the test engine
//!
//! The service is started with `natstest serve` (or spawned automatically by
//! client commands) and keeps the catalog loaded between invocations.

mod handler;
mod server;

use std::sync::Arc;

use crate::common::{config::Config, paths, Result};
use crate::testing::Engine;

pub use server::Daemon;

/// Run in service mode on the default socket
///
/// 1. Builds the engine from `config` and loads the catalog
/// 2. Creates the IPC socket/pipe for client connections
/// 3. Serves commands until `stop`, SIGINT or SIGTERM
pub async fn run(config: &Config) -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "Starting natstest service"
    );

    let engine = Arc::new(Engine::from_config(config)?);
    // An empty or broken catalog is not fatal: tests can still be put over IPC
    match engine.reload().await {
        Ok(count) => tracing::info!(tests = count, "catalog loaded"),
        Err(e) => tracing::warn!(error = %e, "starting with an empty catalog"),
    }

    paths::ensure_socket_dir()?;
    Daemon::new(engine, paths::socket_name()).run().await
}
