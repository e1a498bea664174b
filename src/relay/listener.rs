//! Relay listener
//!
//! Accepts TCP connections and UDP datagrams on the same port and feeds them
//! to a [`NoneService`].
//!
//! # Architecture
//!
//! ```text
//!   TCP accept ─────┐
//!                   │      +-------------+
//!   UDP recv_from ──┼────▶ | NoneService | ──▶ Handler
//!                   │      +-------------+
//!   shutdown ───────┘
//! ```
//!
//! Each TCP connection runs on its own task. Datagrams are dispatched inline;
//! the service never blocks on the handler for them.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ss_relay::config::ListenConfig;
//! use ss_relay::relay::{DirectHandler, NoneService, RelayListener};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ListenConfig::new("0.0.0.0:8388".parse()?);
//! let handler = Arc::new(DirectHandler::new(Duration::from_secs(10), config.udp_timeout()));
//! let service = Arc::new(NoneService::new(config.udp_timeout(), handler));
//!
//! let listener = RelayListener::bind(&config, service).await?;
//! listener.run().await?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use super::service::NoneService;
use super::{DatagramSocket, Handler, Metadata};
use crate::config::ListenConfig;
use crate::error::{RelayError, RelayResult};
use crate::io::{PacketBuffer, MAX_PACKET_SIZE};

/// RAII guard for tracking active connections
///
/// Dropping the guard decrements the active connection counter, so a
/// connection is accounted for however its task ends.
#[derive(Debug)]
pub struct ConnectionGuard {
    stats: Arc<RelayStats>,
}

impl ConnectionGuard {
    fn new(stats: Arc<RelayStats>) -> Self {
        stats.active_connections.fetch_add(1, Ordering::Relaxed);
        Self { stats }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// TCP and UDP listener for the relay
pub struct RelayListener<H> {
    tcp: TcpListener,
    udp: Option<Arc<UdpSocket>>,
    service: Arc<NoneService<H>>,
    shutdown_tx: broadcast::Sender<()>,
    active: AtomicBool,
    stats: Arc<RelayStats>,
}

impl<H: Handler> RelayListener<H> {
    /// Bind the listener
    ///
    /// The UDP socket, when enabled, binds to the port the TCP listener got,
    /// so an ephemeral port (`:0`) is shared by both.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Io` if either socket fails to bind.
    pub async fn bind(config: &ListenConfig, service: Arc<NoneService<H>>) -> RelayResult<Self> {
        let tcp = TcpListener::bind(config.address).await?;
        let local = tcp.local_addr()?;

        let udp = if config.udp_enabled {
            Some(Arc::new(UdpSocket::bind(local).await?))
        } else {
            None
        };

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            listen = %config.address,
            local = %local,
            udp = config.udp_enabled,
            "Relay listener ready"
        );

        Ok(Self {
            tcp,
            udp,
            service,
            shutdown_tx,
            active: AtomicBool::new(true),
            stats: Arc::new(RelayStats::default()),
        })
    }

    /// Run the accept and receive loop until [`shutdown`](Self::shutdown)
    ///
    /// # Errors
    ///
    /// Accept and receive failures are logged and the loop continues, so this
    /// only returns `Ok` today.
    pub async fn run(&self) -> RelayResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if !self.is_active() {
            return Ok(());
        }

        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        loop {
            tokio::select! {
                result = self.tcp.accept() => {
                    match result {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => warn!(error = %e, "TCP accept failed"),
                    }
                }
                result = recv_packet(self.udp.as_deref(), &mut buf) => {
                    match result {
                        Ok((n, peer)) => self.dispatch_packet(&buf[..n], peer),
                        Err(e) => warn!(error = %e, "UDP receive failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Relay listener shutdown signal received");
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        trace!(client = %peer, "Accepted TCP connection");
        self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);

        let guard = ConnectionGuard::new(Arc::clone(&self.stats));
        let service = Arc::clone(&self.service);
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = service.new_tcp_connection(stream, Metadata::new(peer)).await {
                if matches!(e, RelayError::ServerConn(_)) {
                    stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                }
                debug!(client = %peer, error = %e, "TCP connection ended with error");
                service.handle_error(e);
            }
        });
    }

    fn dispatch_packet(&self, data: &[u8], peer: SocketAddr) {
        let Some(udp) = &self.udp else {
            return;
        };
        self.stats.packets_received.fetch_add(1, Ordering::Relaxed);

        let socket: Arc<dyn DatagramSocket> = Arc::clone(udp) as Arc<dyn DatagramSocket>;
        if let Err(e) =
            self.service
                .new_packet(socket, PacketBuffer::from_payload(data), Metadata::new(peer))
        {
            self.stats.packet_errors.fetch_add(1, Ordering::Relaxed);
            self.service.handle_error(e);
        }
    }

    /// Stop accepting connections and datagrams
    ///
    /// Connections already handed to the handler keep running.
    pub fn shutdown(&self) {
        info!(local = ?self.tcp.local_addr().ok(), "Shutting down relay listener");
        self.active.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// TCP local address
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be queried.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// UDP local address, if UDP is enabled
    #[must_use]
    pub fn udp_local_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref().and_then(|udp| udp.local_addr().ok())
    }

    /// Check if the listener is active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Service this listener feeds
    #[must_use]
    pub fn service(&self) -> &Arc<NoneService<H>> {
        &self.service
    }

    /// Get a snapshot of listener statistics
    #[must_use]
    pub fn stats_snapshot(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }
}

impl<H> std::fmt::Debug for RelayListener<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayListener")
            .field("local", &self.tcp.local_addr().ok())
            .field("udp_enabled", &self.udp.is_some())
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

async fn recv_packet(udp: Option<&UdpSocket>, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    match udp {
        Some(udp) => udp.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

/// Statistics for the relay listener
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Total TCP connections accepted
    pub connections_accepted: AtomicU64,

    /// Currently active TCP connections
    pub active_connections: AtomicU64,

    /// TCP connections rejected for a bad header
    pub protocol_errors: AtomicU64,

    /// Total datagrams received
    pub packets_received: AtomicU64,

    /// Datagrams rejected for a bad header
    pub packet_errors: AtomicU64,
}

impl RelayStats {
    /// Get a snapshot of the statistics
    #[must_use]
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packet_errors: self.packet_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of relay listener statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatsSnapshot {
    /// Total TCP connections accepted
    pub connections_accepted: u64,

    /// Currently active TCP connections
    pub active_connections: u64,

    /// TCP connections rejected for a bad header
    pub protocol_errors: u64,

    /// Total datagrams received
    pub packets_received: u64,

    /// Datagrams rejected for a bad header
    pub packet_errors: u64,
}
