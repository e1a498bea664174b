//! Direct dispatch handler
//!
//! Connects every unwrapped stream straight to its destination and relays
//! datagram sessions through a per-session outbound UDP socket. This is the
//! handler the `ss-relay` binary runs with.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::{Handler, Metadata};
use crate::address::Address;
use crate::error::{RelayError, RelayResult};
use crate::io::{PacketBuffer, MAX_PACKET_SIZE};
use crate::method::{BoxStream, PacketConn};

/// Handler that dials every destination directly
#[derive(Debug, Clone)]
pub struct DirectHandler {
    connect_timeout: Duration,
    udp_timeout: Duration,
}

impl DirectHandler {
    /// Create a handler
    ///
    /// `udp_timeout` ends a datagram session once neither side has sent
    /// anything for that long.
    #[must_use]
    pub const fn new(connect_timeout: Duration, udp_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            udp_timeout,
        }
    }

    /// Outbound connect timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[async_trait]
impl Handler for DirectHandler {
    async fn new_connection(&self, mut stream: BoxStream, metadata: Metadata) -> RelayResult<()> {
        let destination = require_destination(&metadata)?;

        let mut outbound = timeout(self.connect_timeout, connect_tcp(&destination))
            .await
            .map_err(|_| RelayError::timeout(format!("connect to {destination}")))??;
        if let Err(e) = outbound.set_nodelay(true) {
            trace!(error = %e, "Failed to set TCP_NODELAY");
        }

        debug!(client = %metadata.source, destination = %destination, "TCP relay started");

        let (up, down) = tokio::io::copy_bidirectional(&mut stream, &mut outbound).await?;

        debug!(
            client = %metadata.source,
            destination = %destination,
            up,
            down,
            "TCP relay finished"
        );
        Ok(())
    }

    async fn new_packet_connection(
        &self,
        conn: Box<dyn PacketConn>,
        metadata: Metadata,
    ) -> RelayResult<()> {
        let source = metadata.source;

        // The first datagram picks the outbound address family
        let mut first = PacketBuffer::max_packet();
        let first_dest = conn.read_packet(&mut first).await?;
        let first_target = resolve(&first_dest).await?;
        let outbound = bind_for(first_target).await?;
        outbound.send_to(first.data(), first_target).await?;

        debug!(
            client = %source,
            destination = %first_dest,
            local = ?outbound.local_addr().ok(),
            "UDP session started"
        );

        let activity = Activity::new();
        let result = tokio::select! {
            r = uplink(&*conn, &outbound, first_target.is_ipv4(), &activity, source) => r,
            r = downlink(&*conn, &outbound, self.udp_timeout, &activity) => r,
        };

        debug!(client = %source, "UDP session finished");
        result
    }

    fn handle_error(&self, error: RelayError) {
        if error.is_recoverable() {
            debug!(error = %error, "Relay error");
        } else {
            warn!(error = %error, "Relay error");
        }
    }
}

/// Time of the last client datagram, for the session idle check
struct Activity {
    started: Instant,
    last_uplink_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_uplink_ms: AtomicU64::new(0),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn touch(&self) {
        self.last_uplink_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }

    fn since_uplink(&self) -> Duration {
        Duration::from_millis(
            self.elapsed_ms()
                .saturating_sub(self.last_uplink_ms.load(Ordering::Relaxed)),
        )
    }
}

/// Client to destinations; ends when the session queue closes
async fn uplink(
    conn: &dyn PacketConn,
    outbound: &UdpSocket,
    ipv4: bool,
    activity: &Activity,
    source: SocketAddr,
) -> RelayResult<()> {
    let mut buf = PacketBuffer::max_packet();
    loop {
        let destination = match conn.read_packet(&mut buf).await {
            Ok(destination) => destination,
            Err(RelayError::SessionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        activity.touch();

        let target = match resolve(&destination).await {
            Ok(target) => target,
            Err(e) => {
                debug!(client = %source, destination = %destination, error = %e, "UDP resolve failed");
                continue;
            }
        };
        if target.is_ipv4() != ipv4 {
            debug!(client = %source, target = %target, "UDP target family mismatch, dropped");
            continue;
        }
        if let Err(e) = outbound.send_to(buf.data(), target).await {
            debug!(client = %source, target = %target, error = %e, "UDP send failed");
        }
    }
}

/// Destinations to client; ends once both directions have been idle
async fn downlink(
    conn: &dyn PacketConn,
    outbound: &UdpSocket,
    idle: Duration,
    activity: &Activity,
) -> RelayResult<()> {
    let mut recv_buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        if let Ok(result) = timeout(idle, outbound.recv_from(&mut recv_buf)).await {
            let (n, peer) = result?;
            conn.write_packet(PacketBuffer::from_payload(&recv_buf[..n]), &Address::from(peer))
                .await?;
        } else if activity.since_uplink() >= idle {
            return Ok(());
        }
    }
}

fn require_destination(metadata: &Metadata) -> RelayResult<Address> {
    metadata.destination.clone().ok_or_else(|| {
        RelayError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "metadata has no destination",
        ))
    })
}

async fn connect_tcp(destination: &Address) -> RelayResult<TcpStream> {
    let stream = match destination {
        Address::SocketAddr(addr) => TcpStream::connect(*addr).await?,
        Address::DomainName { domain, port } => {
            TcpStream::connect((domain.as_str(), *port)).await?
        }
    };
    Ok(stream)
}

async fn resolve(destination: &Address) -> RelayResult<SocketAddr> {
    match destination {
        Address::SocketAddr(addr) => Ok(*addr),
        Address::DomainName { domain, port } => lookup_host((domain.as_str(), *port))
            .await?
            .next()
            .ok_or_else(|| {
                RelayError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses for {domain}"),
                ))
            }),
    }
}

async fn bind_for(target: SocketAddr) -> io::Result<UdpSocket> {
    let bind: SocketAddr = if target.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    UdpSocket::bind(bind).await
}
