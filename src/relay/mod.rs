//! Relay side of the tunnel
//!
//! The relay strips the address header off inbound streams and datagrams and
//! hands the rest to a [`Handler`] together with routing [`Metadata`].
//!
//! # Architecture
//!
//! ```text
//! TCP accept ──▶ NoneService::new_connection ──▶ Handler::new_connection
//!
//! UDP recv ────▶ NoneService::new_packet ──▶ UdpNat ──(new source)──▶ Handler::new_packet_connection
//!                                               │
//!                                               └──(known source)──▶ session channel
//!
//! Handler reply ──▶ NoneReplyWriter ──▶ shared UDP socket ──▶ physical source
//! ```
//!
//! One listening UDP socket serves every peer. Replies are addressed to the
//! physical source that opened the session, with the application-level
//! address in the header.

pub mod direct;
pub mod listener;
pub mod nat;
pub mod reply;
pub mod service;

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::address::Address;
use crate::error::{RelayError, RelayResult};
use crate::method::{BoxStream, PacketConn};

pub use direct::DirectHandler;
pub use listener::{RelayListener, RelayStats, RelayStatsSnapshot};
pub use nat::{NatPacketConn, UdpNat, UdpNatStats, UdpNatStatsSnapshot};
pub use reply::NoneReplyWriter;
pub use service::NoneService;

/// Protocol tag attached to metadata by the ingress service
pub const PROTOCOL_SHADOWSOCKS: &str = "shadowsocks";

/// Routing metadata for an accepted connection or datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Protocol that produced the connection, set after a header is parsed
    pub protocol: Option<&'static str>,

    /// Physical peer address; the session key for datagrams
    pub source: SocketAddr,

    /// Destination parsed from the header
    pub destination: Option<Address>,
}

impl Metadata {
    /// Create metadata for a peer, before any header is parsed
    #[must_use]
    pub const fn new(source: SocketAddr) -> Self {
        Self {
            protocol: None,
            source,
            destination: None,
        }
    }

    /// Attach a parsed destination and the Shadowsocks protocol tag
    #[must_use]
    pub fn with_destination(mut self, destination: Address) -> Self {
        self.protocol = Some(PROTOCOL_SHADOWSOCKS);
        self.destination = Some(destination);
        self
    }
}

/// Dispatch handler receiving unwrapped connections
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Serve a stream whose header has been consumed
    async fn new_connection(&self, stream: BoxStream, metadata: Metadata) -> RelayResult<()>;

    /// Serve a datagram session for one physical source
    ///
    /// Runs on its own task. Reading from `conn` yields the payloads the
    /// source sends; writing replies goes back to that source.
    async fn new_packet_connection(
        &self,
        conn: Box<dyn PacketConn>,
        metadata: Metadata,
    ) -> RelayResult<()>;

    /// Error sink for failures that have no caller to return to
    fn handle_error(&self, error: RelayError);
}

/// Shared, unconnected datagram socket the relay listens on
#[async_trait]
pub trait DatagramSocket: Send + Sync {
    /// Send one datagram to `target`
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }
}
