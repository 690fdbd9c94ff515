//! Service spawning logic
//!
//! Automatically spawns the service when a client command needs it, using
//! the same binary with `serve --detached`.

use std::path::Path;
use std::time::Duration;

use crate::common::{paths, Error, Result};
use crate::ipc::{transport, DaemonClient};

/// Timeout for the service to start up
const SPAWN_TIMEOUT_SECS: u64 = 5;

/// Options forwarded to a spawned service
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnOptions<'a> {
    pub config: Option<&'a Path>,
    pub test_dir: Option<&'a Path>,
}

/// Connect to the service, spawning it first if it is not running
pub async fn connect_or_spawn(options: SpawnOptions<'_>) -> Result<DaemonClient> {
    match DaemonClient::connect().await {
        Ok(client) => return Ok(client),
        Err(Error::DaemonNotRunning) => spawn_daemon(options).await?,
        Err(e) => return Err(e),
    }
    DaemonClient::connect().await
}

/// Spawn the service process and wait for its socket
async fn spawn_daemon(options: SpawnOptions<'_>) -> Result<()> {
    tracing::debug!("Spawning service process");

    let exe_path = std::env::current_exe().map_err(|e| {
        Error::Internal(format!("Failed to get current executable path: {}", e))
    })?;

    paths::ensure_socket_dir()?;
    paths::remove_socket()?;

    let mut command = std::process::Command::new(&exe_path);
    if let Some(config) = options.config {
        command.arg("--config").arg(config);
    }
    if let Some(dir) = options.test_dir {
        // The service runs from the same working directory, but be explicit
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        command.arg("--test-dir").arg(dir);
    }
    command
        .args(["serve", "--detached"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    // Detach from the terminal; the service logs to its own file
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x00000008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    command
        .spawn()
        .map_err(|e| Error::Internal(format!("Failed to spawn service: {}", e)))?;

    let deadline = std::time::Instant::now() + Duration::from_secs(SPAWN_TIMEOUT_SECS);
    let socket = paths::socket_name();

    loop {
        if std::time::Instant::now() >= deadline {
            return Err(Error::DaemonSpawnTimeout(SPAWN_TIMEOUT_SECS));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        #[cfg(unix)]
        if !paths::socket_path().exists() {
            continue;
        }

        if transport::connect(&socket).await.is_ok() {
            tracing::debug!("Service started successfully");
            return Ok(());
        }
    }
}
