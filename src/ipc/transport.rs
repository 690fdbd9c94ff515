//! Local socket transport
//!
//! Unix domain sockets on Unix/macOS and named pipes on Windows via the
//! interprocess crate. Every message is a little-endian `u32` length
//! followed by that many bytes of JSON.

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum message size (10 MB)
const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

#[cfg(unix)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericFilePath, ListenerOptions};
}

#[cfg(windows)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
}

use platform::*;

pub use platform::{Listener, Stream};

/// Listen on `name` (a socket path on Unix, a pipe name on Windows)
///
/// A stale socket file left at `name` must be removed by the caller first.
pub fn create_listener(name: &str) -> io::Result<Listener> {
    #[cfg(unix)]
    let listener = {
        let fs_name = name.to_fs_name::<GenericFilePath>()?;
        let listener = ListenerOptions::new().name(fs_name).create_tokio()?;

        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(name, std::fs::Permissions::from_mode(0o600))?;
        listener
    };

    #[cfg(windows)]
    let listener = {
        let ns_name = name.to_ns_name::<GenericNamespaced>()?;
        ListenerOptions::new().name(ns_name).create_tokio()?
    };

    Ok(listener)
}

/// Connect to a listening service
pub async fn connect(name: &str) -> io::Result<Stream> {
    #[cfg(unix)]
    let stream = {
        let fs_name = name.to_fs_name::<GenericFilePath>()?;
        Stream::connect(fs_name).await?
    };

    #[cfg(windows)]
    let stream = {
        let ns_name = name.to_ns_name::<GenericNamespaced>()?;
        Stream::connect(ns_name).await?
    };

    Ok(stream)
}

/// Send a length-prefixed message
pub async fn send_message<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_MESSAGE_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Message too large: {} bytes", data.len()),
        ));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await
}

/// Receive a length-prefixed message
pub async fn recv_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

/// Serialize `message` and send it as one frame
pub async fn send_json<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let data = serde_json::to_vec(message)?;
    send_message(writer, &data).await
}

/// Receive one frame and deserialize it
pub async fn recv_json<R, T>(reader: &mut R) -> io::Result<T>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let data = recv_message(reader).await?;
    serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{Command, Request};

    #[tokio::test]
    async fn test_frames_survive_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let request = Request {
            id: 9,
            command: Command::DeleteTest { name: "smoke".into() },
        };
        let sender = tokio::spawn(async move {
            send_json(&mut client, &request).await.unwrap();
            send_message(&mut client, b"").await.unwrap();
        });

        let received: Request = recv_json(&mut server).await.unwrap();
        assert_eq!(received.id, 9);
        assert_eq!(received.command, Command::DeleteTest { name: "smoke".into() });
        assert!(recv_message(&mut server).await.unwrap().is_empty());
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut input: &[u8] = &(MAX_MESSAGE_SIZE + 1).to_le_bytes();
        let err = recv_message(&mut input).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_eof_is_unexpected_eof() {
        let mut input: &[u8] = &[];
        let err = recv_message(&mut input).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
