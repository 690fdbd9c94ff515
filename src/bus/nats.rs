//! NATS request/reply client
//!
//! Wraps an `async_nats::Client` that is connected lazily on first use and
//! then shared by every request. The client reconnects on its own after a
//! dropped connection; per-request deadlines are enforced here.

use std::time::Duration;

use async_nats::connection::State;
use async_nats::{Client, ConnectOptions, RequestError, RequestErrorKind, ServerAddr};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::common::{Error, Result};

use super::BusGateway;

/// Bus gateway backed by the NATS client library
pub struct NatsGateway {
    server: ServerAddr,
    /// host:port of the server, without credentials
    address: String,
    /// Client name announced to the server
    name: String,
    /// Timeout for connecting and for `check`
    probe_timeout: Duration,
    client: Mutex<Option<Client>>,
}

impl NatsGateway {
    /// Create a gateway for `address` (`nats://[user:pass@]host[:port]`, `tls://...` or `host[:port]`)
    pub fn new(address: &str, name: &str, probe_timeout: Duration) -> Result<Self> {
        let server: ServerAddr = address
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid bus address '{}': {}", address, e)))?;

        Ok(Self {
            address: format!("{}:{}", server.host(), server.port()),
            server,
            name: name.to_string(),
            probe_timeout,
            client: Mutex::new(None),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// The shared client, connecting first if needed
    async fn client(&self) -> Result<Client> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        tracing::info!(address = %self.address, "opening NATS bus connection");
        let client = ConnectOptions::new()
            .name(&self.name)
            .connection_timeout(self.probe_timeout)
            .request_timeout(None)
            .connect(self.server.clone())
            .await
            .map_err(|e| {
                Error::BusTransport(format!(
                    "Can't connect to the NATS server {}: {}",
                    self.address, e
                ))
            })?;

        *slot = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl BusGateway for NatsGateway {
    async fn request(&self, topic: &str, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        tracing::debug!(topic, bytes = payload.len(), "sending bus request");

        let result = tokio::time::timeout(timeout, async {
            let client = self.client().await?;
            client
                .request(topic.to_string(), payload.to_vec().into())
                .await
                .map_err(|e| request_error(topic, timeout, e))
        })
        .await;

        let message = match result {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                tracing::warn!(topic, address = %self.address, error = %e, "bus request failed");
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(topic, timeout_ms = timeout.as_millis() as u64, "bus request timed out");
                return Err(Error::BusTimeout(timeout.as_millis() as u64));
            }
        };

        tracing::debug!(topic, bytes = message.payload.len(), "received bus reply");
        Ok(message.payload.to_vec())
    }

    async fn check(&self) -> Result<()> {
        let probe = tokio::time::timeout(self.probe_timeout, async {
            let client = self.client().await?;
            client
                .flush()
                .await
                .map_err(|e| Error::BusTransport(format!("Flush failed: {}", e)))?;
            match client.connection_state() {
                State::Connected => Ok(()),
                state => Err(Error::BusTransport(format!(
                    "Not connected to {} ({:?})",
                    self.address, state
                ))),
            }
        })
        .await;

        match probe {
            Ok(result) => result,
            Err(_) => Err(Error::BusTimeout(self.probe_timeout.as_millis() as u64)),
        }
    }
}

fn request_error(topic: &str, timeout: Duration, e: RequestError) -> Error {
    match e.kind() {
        RequestErrorKind::TimedOut => Error::BusTimeout(timeout.as_millis() as u64),
        RequestErrorKind::NoResponders => {
            Error::BusTransport(format!("no responders available for {}", topic))
        }
        RequestErrorKind::Other => Error::BusTransport(e.to_string()),
    }
}
