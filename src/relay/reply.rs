//! Reply path for datagram sessions
//!
//! One `NoneReplyWriter` exists per physical UDP source. It frames a reply
//! with the application-level address it came from and sends it to that
//! source over the shared listening socket.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::DatagramSocket;
use crate::address::Address;
use crate::error::RelayResult;
use crate::io::PacketBuffer;
use crate::method::PacketWriter;

/// Reply writer bound to one physical source
pub struct NoneReplyWriter {
    socket: Arc<dyn DatagramSocket>,
    source: SocketAddr,
}

impl NoneReplyWriter {
    /// Bind a writer to `source`
    #[must_use]
    pub fn new(socket: Arc<dyn DatagramSocket>, source: SocketAddr) -> Self {
        Self { socket, source }
    }

    /// Physical peer every reply goes to
    #[must_use]
    pub const fn source(&self) -> SocketAddr {
        self.source
    }
}

#[async_trait]
impl PacketWriter for NoneReplyWriter {
    async fn write_packet(&self, mut buf: PacketBuffer, destination: &Address) -> RelayResult<()> {
        let header_len = destination.serialized_len();
        destination.write_to_slice(buf.extend_header(header_len))?;
        self.socket.send_to(buf.data(), self.source).await?;
        trace!(client = %self.source, from = %destination, len = buf.len(), "UDP reply sent");
        Ok(())
    }
}

impl fmt::Debug for NoneReplyWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoneReplyWriter")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
