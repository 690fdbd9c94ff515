//! Message bus gateway
//!
//! The orchestration engine only needs "send a request to a topic and wait
//! for the reply bytes". `BusGateway` is that seam; `NatsGateway` is the
//! production implementation.

mod nats;

use std::time::Duration;

use async_trait::async_trait;

use crate::common::Result;

pub use nats::NatsGateway;

/// Topics starting with this sigil are echoed back without a network call
pub const ECHO_SIGIL: char = '@';

/// Request/reply transport
#[async_trait]
pub trait BusGateway: Send + Sync {
    /// Send `payload` to `topic` and wait up to `timeout` for the reply
    ///
    /// Fails with `Error::BusTimeout` when no reply arrives in time and with
    /// `Error::BusTransport` for any other transport failure.
    async fn request(&self, topic: &str, payload: &[u8], timeout: Duration) -> Result<Vec<u8>>;

    /// Verify the bus is reachable
    async fn check(&self) -> Result<()>;
}

/// Whether `topic` asks for a local echo
pub fn is_echo_topic(topic: &str) -> bool {
    topic.starts_with(ECHO_SIGIL)
}

/// Send a request, echoing it back locally for `@` topics
pub async fn dispatch(
    gateway: &dyn BusGateway,
    topic: &str,
    payload: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>> {
    if is_echo_topic(topic) {
        tracing::trace!(topic, "echoing request locally");
        return Ok(payload.to_vec());
    }
    gateway.request(topic, payload, timeout).await
}
