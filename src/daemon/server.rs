//! Service server - IPC listener and main event loop

use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::traits::tokio::Listener as ListenerTrait;
use tokio::io::BufReader;
use tokio::sync::Notify;

use crate::common::{error::IpcError, Error, Result};
use crate::ipc::{
    protocol::{Command, Request, Response},
    transport::{self, Listener, Stream},
};
use crate::testing::Engine;

use super::handler;

/// Idle time after which a silent client connection is closed
const CLIENT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Main service server
pub struct Daemon {
    engine: Arc<Engine>,
    /// Socket path (Unix) or pipe name (Windows)
    socket: String,
    /// Signalled when a client asks the service to stop
    shutdown: Arc<Notify>,
}

impl Daemon {
    pub fn new(engine: Arc<Engine>, socket: impl Into<String>) -> Self {
        Self {
            engine,
            socket: socket.into(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run the accept loop until a shutdown command or signal arrives
    pub async fn run(&self) -> Result<()> {
        remove_stale_socket(&self.socket)?;
        let listener = transport::create_listener(&self.socket)?;
        tracing::info!(socket = %self.socket, "service listening");

        let result = self.accept_loop(&listener).await;

        tracing::info!("cleaning up service resources");
        drop(listener);
        remove_stale_socket(&self.socket)?;
        tracing::info!("service shutdown complete");

        result
    }

    #[cfg(unix)]
    async fn accept_loop(&self, listener: &Listener) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| Error::Internal(format!("Failed to create SIGTERM handler: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| Error::Internal(format!("Failed to create SIGINT handler: {}", e)))?;

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down gracefully");
                    return Ok(());
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully");
                    return Ok(());
                }
                _ = self.shutdown.notified() => {
                    tracing::info!("Shutdown requested, exiting");
                    return Ok(());
                }
                accepted = listener.accept() => self.spawn_client(accepted),
            }
        }
    }

    #[cfg(not(unix))]
    async fn accept_loop(&self, listener: &Listener) -> Result<()> {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down gracefully");
                    return Ok(());
                }
                _ = self.shutdown.notified() => {
                    tracing::info!("Shutdown requested, exiting");
                    return Ok(());
                }
                accepted = listener.accept() => self.spawn_client(accepted),
            }
        }
    }

    /// Serve each client on its own task so overlapping callers reach the busy lock
    fn spawn_client(&self, accepted: std::io::Result<Stream>) {
        match accepted {
            Ok(stream) => {
                let engine = self.engine.clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(&engine, &shutdown, stream).await {
                        tracing::error!("Error handling client: {}", e);
                    }
                });
            }
            Err(e) => tracing::error!("Accept error: {}", e),
        }
    }
}

/// Handle a single client connection
async fn handle_client(engine: &Engine, shutdown: &Notify, stream: Stream) -> Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    loop {
        let request_data = tokio::select! {
            result = transport::recv_message(&mut reader) => match result {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::debug!("Client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::error!("Error reading request: {}", e);
                    break;
                }
            },
            _ = tokio::time::sleep(CLIENT_IDLE_TIMEOUT) => {
                tracing::debug!("Client timeout");
                break;
            }
        };

        let request: Request = match serde_json::from_slice(&request_data) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!("Invalid request: {}", e);
                let response = Response::error(
                    0,
                    IpcError {
                        code: "INVALID_REQUEST".to_string(),
                        message: e.to_string(),
                    },
                );
                transport::send_json(&mut writer, &response).await?;
                continue;
            }
        };

        tracing::debug!(id = request.id, command = ?request.command, "received command");

        if request.command == Command::Shutdown {
            transport::send_json(&mut writer, &Response::ok(request.id)).await?;
            shutdown.notify_one();
            break;
        }

        let response = handler::handle_command(engine, request.id, request.command).await;
        transport::send_json(&mut writer, &response).await?;
    }

    Ok(())
}

/// Remove a socket file left behind by an earlier service
fn remove_stale_socket(socket: &str) -> Result<()> {
    #[cfg(unix)]
    {
        match std::fs::remove_file(socket) {
            Ok(()) => tracing::debug!(socket, "removed socket file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = socket;
    }
    Ok(())
}
