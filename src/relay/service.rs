//! Ingress service for the `none` method
//!
//! The two entry points a listener drives:
//!
//! - [`NoneService::new_connection`]: read one address header off an inbound
//!   stream, then hand the stream to the handler.
//! - [`NoneService::new_packet`]: strip the header off an inbound datagram and
//!   route it through the session table keyed by its physical source.
//!
//! A malformed header never produces metadata. Stream failures come back as
//! [`ServerConnError`], datagram failures as [`ServerPacketError`], both
//! tagged with the peer address.

use std::sync::Arc;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use super::nat::{UdpNat, UdpNatStatsSnapshot};
use super::reply::NoneReplyWriter;
use super::{DatagramSocket, Handler, Metadata};
use crate::address::Address;
use crate::error::{RelayError, RelayResult, ServerConnError, ServerPacketError};
use crate::io::PacketBuffer;
use crate::method::{AsyncStream, PacketWriter};

/// Relay ingress service for the `none` method
pub struct NoneService<H> {
    handler: Arc<H>,
    nat: UdpNat<H>,
}

impl<H: Handler> NoneService<H> {
    /// Create a service whose UDP sessions expire after `udp_timeout` idle
    #[must_use]
    pub fn new(udp_timeout: Duration, handler: Arc<H>) -> Self {
        let nat = UdpNat::new(udp_timeout, Arc::clone(&handler));
        Self { handler, nat }
    }

    /// Serve an inbound stream
    ///
    /// Blocks until the full header has arrived. On success the rest of the
    /// stream goes to the handler and its result is returned.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ServerConn` if the header is malformed or the
    /// stream fails before it is complete; the stream is dropped. Otherwise
    /// returns whatever the handler returns.
    pub async fn new_connection<S>(&self, mut stream: S, metadata: Metadata) -> RelayResult<()>
    where
        S: AsyncStream + 'static,
    {
        let metadata = read_request(&mut stream, metadata).await?;
        self.handler.new_connection(Box::new(stream), metadata).await
    }

    /// Serve an inbound TCP connection
    ///
    /// Same as [`new_connection`](Self::new_connection), except a connection
    /// that sends a bad header is reset (zero linger) instead of closed
    /// gracefully.
    ///
    /// # Errors
    ///
    /// See [`new_connection`](Self::new_connection).
    pub async fn new_tcp_connection(
        &self,
        mut stream: TcpStream,
        metadata: Metadata,
    ) -> RelayResult<()> {
        match read_request(&mut stream, metadata).await {
            Ok(metadata) => self.handler.new_connection(Box::new(stream), metadata).await,
            Err(e) => {
                abort(&stream);
                Err(e.into())
            }
        }
    }

    /// Serve an inbound datagram received on `socket`
    ///
    /// Never blocks on the handler. The payload is queued to the session for
    /// `metadata.source`, creating it (and its reply writer) on first sight.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ServerPacket` if the header is malformed; the
    /// datagram is dropped.
    pub fn new_packet(
        &self,
        socket: Arc<dyn DatagramSocket>,
        mut buf: PacketBuffer,
        metadata: Metadata,
    ) -> RelayResult<()> {
        let source = metadata.source;
        let (destination, consumed) = Address::decode(buf.data())
            .map_err(|cause| ServerPacketError::new(source, cause))?;
        buf.advance(consumed);

        trace!(client = %source, destination = %destination, len = buf.len(), "UDP packet");
        let metadata = metadata.with_destination(destination);

        self.nat.new_packet(
            source,
            move || -> Arc<dyn PacketWriter> { Arc::new(NoneReplyWriter::new(socket, source)) },
            buf,
            metadata,
        );
        Ok(())
    }

    /// Forward an error to the handler's error sink
    pub fn handle_error(&self, error: RelayError) {
        self.handler.handle_error(error);
    }

    /// Handler this service dispatches to
    #[must_use]
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Number of live UDP sessions
    #[must_use]
    pub fn udp_session_count(&self) -> u64 {
        self.nat.session_count()
    }

    /// Session table statistics
    #[must_use]
    pub fn udp_stats(&self) -> UdpNatStatsSnapshot {
        self.nat.stats()
    }
}

impl<H> std::fmt::Debug for NoneService<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoneService")
            .field("nat", &self.nat)
            .finish_non_exhaustive()
    }
}

async fn read_request<S>(stream: &mut S, metadata: Metadata) -> Result<Metadata, ServerConnError>
where
    S: AsyncStream,
{
    match Address::read_from(stream).await {
        Ok(destination) => {
            debug!(client = %metadata.source, destination = %destination, "TCP request");
            Ok(metadata.with_destination(destination))
        }
        Err(cause) => {
            warn!(client = %metadata.source, error = %cause, "Bad request header");
            Err(ServerConnError::new(metadata.source, cause))
        }
    }
}

/// Reset a TCP connection instead of closing it gracefully
fn abort(stream: &TcpStream) {
    if let Err(e) = SockRef::from(stream).set_linger(Some(Duration::ZERO)) {
        debug!(error = %e, "Failed to set zero linger");
    }
}
