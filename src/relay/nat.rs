//! UDP NAT session table
//!
//! Maps a physical UDP source to a live datagram session. The first datagram
//! from a source creates the session: the reply-writer factory runs once, a
//! channel-backed [`NatPacketConn`] is built and the handler's
//! `new_packet_connection` is spawned with it. Later datagrams from the same
//! source are pushed into that session's channel.
//!
//! Entries expire after `udp_timeout` without inbound traffic (moka
//! `time_to_idle`). Expiry drops the channel sender, so the session's
//! `read_packet` reports [`RelayError::SessionClosed`] and the handler task
//! winds down.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use super::{Handler, Metadata};
use crate::address::Address;
use crate::error::{RelayError, RelayResult};
use crate::io::PacketBuffer;
use crate::method::{PacketConn, PacketWriter};

/// Datagrams queued per session before new ones are dropped
pub const SESSION_QUEUE_SIZE: usize = 128;

/// Default maximum number of concurrent sessions
pub const DEFAULT_MAX_SESSIONS: u64 = 65536;

type QueuedPacket = (PacketBuffer, Address);

#[derive(Clone)]
struct NatEntry {
    tx: mpsc::Sender<QueuedPacket>,
}

/// Session table keyed by physical source address
pub struct UdpNat<H> {
    sessions: Cache<SocketAddr, NatEntry>,
    handler: Arc<H>,
    timeout: Duration,
    stats: Arc<UdpNatStats>,
}

impl<H: Handler> UdpNat<H> {
    /// Create a table whose sessions expire after `timeout` of inactivity
    #[must_use]
    pub fn new(timeout: Duration, handler: Arc<H>) -> Self {
        let stats = Arc::new(UdpNatStats::default());
        let evicted = Arc::clone(&stats);

        let sessions = Cache::builder()
            .max_capacity(DEFAULT_MAX_SESSIONS)
            .time_to_idle(timeout)
            .eviction_listener(move |key: Arc<SocketAddr>, _value, cause| {
                evicted.sessions_evicted.fetch_add(1, Ordering::Relaxed);
                debug!(client = %key, ?cause, "UDP session evicted");
            })
            .build();

        Self {
            sessions,
            handler,
            timeout,
            stats,
        }
    }

    /// Deliver a datagram for `key`, creating the session on first sight
    ///
    /// `writer` builds the reply path and is only called when the session is
    /// created. Never blocks: a full session queue drops the datagram.
    pub fn new_packet<F>(
        &self,
        key: SocketAddr,
        writer: F,
        payload: PacketBuffer,
        metadata: Metadata,
    ) where
        F: FnOnce() -> Arc<dyn PacketWriter>,
    {
        let Some(destination) = metadata.destination.clone() else {
            return;
        };

        let mut created = None;
        let entry = self.sessions.get_with(key, || {
            let (tx, rx) = mpsc::channel(SESSION_QUEUE_SIZE);
            created = Some(rx);
            NatEntry { tx }
        });

        if let Some(rx) = created {
            self.stats.sessions_created.fetch_add(1, Ordering::Relaxed);
            debug!(client = %key, destination = %destination, "UDP session created");
            let conn = NatPacketConn::new(rx, writer(), key);
            self.spawn_session(conn, metadata);
        }

        match entry.tx.try_send((payload, destination)) {
            Ok(()) => {
                self.stats.packets_forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(client = %key, "UDP session queue full, dropping datagram");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Handler finished; the next datagram opens a fresh session
                self.stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                self.sessions.invalidate(&key);
                trace!(client = %key, "UDP session closed, dropping datagram");
            }
        }
    }

    fn spawn_session(&self, conn: NatPacketConn, metadata: Metadata) {
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            let source = metadata.source;
            if let Err(e) = handler.new_packet_connection(Box::new(conn), metadata).await {
                debug!(client = %source, error = %e, "UDP session handler failed");
                handler.handle_error(e);
            }
        });
    }

    /// Check whether a session exists for `key`
    #[must_use]
    pub fn contains(&self, key: &SocketAddr) -> bool {
        self.sessions.contains_key(key)
    }

    /// Drop the session for `key`
    pub fn remove(&self, key: &SocketAddr) {
        self.sessions.invalidate(key);
    }

    /// Current session count (estimate under concurrent access)
    #[must_use]
    pub fn session_count(&self) -> u64 {
        self.sessions.entry_count()
    }

    /// Idle timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run pending expiry and eviction work
    pub fn run_pending_tasks(&self) {
        self.sessions.run_pending_tasks();
    }

    /// Get a snapshot of table statistics
    #[must_use]
    pub fn stats(&self) -> UdpNatStatsSnapshot {
        self.stats.snapshot(self.sessions.entry_count())
    }
}

impl<H> fmt::Debug for UdpNat<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpNat")
            .field("session_count", &self.sessions.entry_count())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Counters for the session table
#[derive(Debug, Default)]
pub struct UdpNatStats {
    /// Sessions created
    pub sessions_created: AtomicU64,
    /// Sessions expired or removed
    pub sessions_evicted: AtomicU64,
    /// Datagrams queued to a session
    pub packets_forwarded: AtomicU64,
    /// Datagrams dropped because a session was full or closed
    pub packets_dropped: AtomicU64,
}

impl UdpNatStats {
    fn snapshot(&self, session_count: u64) -> UdpNatStatsSnapshot {
        UdpNatStatsSnapshot {
            session_count,
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of session table statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UdpNatStatsSnapshot {
    /// Live sessions
    pub session_count: u64,
    /// Sessions created
    pub sessions_created: u64,
    /// Sessions expired or removed
    pub sessions_evicted: u64,
    /// Datagrams queued to a session
    pub packets_forwarded: u64,
    /// Datagrams dropped
    pub packets_dropped: u64,
}

/// Datagram session handed to the handler
///
/// Reads come from the session table's queue, writes go out through the
/// reply writer built for this source.
pub struct NatPacketConn {
    rx: Mutex<mpsc::Receiver<QueuedPacket>>,
    writer: Arc<dyn PacketWriter>,
    source: SocketAddr,
}

impl NatPacketConn {
    fn new(
        rx: mpsc::Receiver<QueuedPacket>,
        writer: Arc<dyn PacketWriter>,
        source: SocketAddr,
    ) -> Self {
        Self {
            rx: Mutex::new(rx),
            writer,
            source,
        }
    }

    /// Physical peer this session belongs to
    #[must_use]
    pub const fn source(&self) -> SocketAddr {
        self.source
    }
}

#[async_trait]
impl PacketWriter for NatPacketConn {
    async fn write_packet(&self, buf: PacketBuffer, destination: &Address) -> RelayResult<()> {
        self.writer.write_packet(buf, destination).await
    }
}

#[async_trait]
impl PacketConn for NatPacketConn {
    async fn read_packet(&self, buf: &mut PacketBuffer) -> RelayResult<Address> {
        let (packet, destination) = self
            .rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(RelayError::SessionClosed)?;
        *buf = packet;
        Ok(destination)
    }
}

impl fmt::Debug for NatPacketConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatPacketConn")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
