//! Client side of the IPC protocol

use serde::de::DeserializeOwned;
use tokio::io::{ReadHalf, WriteHalf};

use crate::common::error::IpcError;
use crate::common::{paths, Error, Result};

use super::protocol::{Command, Request, Response};
use super::transport::{self, Stream};

/// Connection to a running natstest service
pub struct DaemonClient {
    reader: ReadHalf<Stream>,
    writer: WriteHalf<Stream>,
    next_id: u64,
}

impl DaemonClient {
    /// Connect to the service on the default socket
    pub async fn connect() -> Result<Self> {
        Self::connect_to(&paths::socket_name()).await
    }

    /// Connect to the service listening on `name`
    pub async fn connect_to(name: &str) -> Result<Self> {
        let stream = transport::connect(name).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::ConnectionRefused
            {
                Error::DaemonNotRunning
            } else {
                Error::DaemonConnectionFailed(e)
            }
        })?;

        let (reader, writer) = tokio::io::split(stream);

        Ok(Self {
            reader,
            writer,
            next_id: 1,
        })
    }

    /// Send a command and wait for the response
    pub async fn send_command(&mut self, command: Command) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        let request = Request { id, command };
        transport::send_json(&mut self.writer, &request)
            .await
            .map_err(|e| Error::DaemonCommunication(e.to_string()))?;

        let response: Response = transport::recv_json(&mut self.reader)
            .await
            .map_err(|e| Error::DaemonCommunication(e.to_string()))?;

        if response.id != id {
            return Err(Error::DaemonCommunication(format!(
                "Response ID mismatch: expected {}, got {}",
                id, response.id
            )));
        }

        if response.success {
            Ok(response.result.unwrap_or(serde_json::json!({})))
        } else {
            let error = response.error.unwrap_or_else(|| IpcError {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
            });
            Err(error.into())
        }
    }

    /// Send a command and decode its result into `T`
    pub async fn request<T: DeserializeOwned>(&mut self, command: Command) -> Result<T> {
        let value = self.send_command(command).await?;
        Ok(serde_json::from_value(value)?)
    }
}
