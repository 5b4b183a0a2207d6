use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Duration;

use thiserror::Error;

/// The server replies out of a small fixed buffer, so a single bounded
/// read is enough to capture a whole response.
pub const RESPONSE_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(#[from] std::io::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// One request/response unit against the target address.
///
/// The protocol is one message per connection: each `exchange` opens a
/// fresh `TcpStream`, writes the payload, reads one bounded response and
/// drops the connection on every exit path. Connections are never
/// reused, so a probe always observes the server's per-connection
/// behavior.
#[derive(Debug, Clone)]
pub struct Session {
    address: String,
    read_timeout: Duration,
}

impl Session {
    pub fn new(address: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            read_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Write `payload` fully, then read up to one buffer of response.
    ///
    /// The write side is shut down after the payload so the server sees
    /// the message boundary even if it reads to EOF. No retry is
    /// attempted; the caller decides whether a failed exchange matters.
    pub async fn exchange(&self, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut stream = TcpStream::connect(&self.address).await?;
        stream.write_all(payload).await?;
        stream.shutdown().await?;

        let mut buf = vec![0u8; RESPONSE_BUFFER_SIZE];
        let read = tokio::time::timeout(self.read_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| TransportError::Timeout(self.read_timeout))??;
        buf.truncate(read);
        Ok(buf)
    }
}
