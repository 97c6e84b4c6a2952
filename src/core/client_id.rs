//! Client identifier and the fixed connection header
//!
//! Every raw connection opens with an 8-byte big-endian client id. The id
//! selects the pool that owns the connection; every byte after it belongs
//! to that pool.

use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// Client identifier carried in the connection header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Size of the wire header in bytes
    pub const HEADER_LEN: usize = 8;

    /// Encode as the wire header
    #[inline(always)]
    pub const fn to_header(self) -> [u8; Self::HEADER_LEN] {
        self.0.to_be_bytes()
    }

    /// Decode from the wire header
    #[inline(always)]
    pub const fn from_header(bytes: [u8; Self::HEADER_LEN]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Raw numeric value
    #[inline(always)]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ClientId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Failure to read a client header. The connection is dropped.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("connection closed before the 8-byte client header was complete")]
    Truncated,
    #[error("no client header within {0:?}")]
    Timeout(Duration),
    #[error("failed to read client header: {0}")]
    Io(#[source] io::Error),
}

/// Read the client id from the start of a connection
///
/// The read is bounded by `limit` so a silent peer cannot hold the caller.
pub async fn read_client_id<R>(reader: &mut R, limit: Duration) -> Result<ClientId, HeaderError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; ClientId::HEADER_LEN];
    match timeout(limit, reader.read_exact(&mut header)).await {
        Err(_) => Err(HeaderError::Timeout(limit)),
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(HeaderError::Truncated),
        Ok(Err(e)) => Err(HeaderError::Io(e)),
        Ok(Ok(_)) => Ok(ClientId::from_header(header)),
    }
}
