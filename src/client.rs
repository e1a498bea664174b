//! Client dialer
//!
//! Opens tunnels to a relay server through a configured [`Method`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::address::Address;
use crate::error::{RelayError, RelayResult};
use crate::method::{DatagramConn, Method, PacketConn, TunnelStream};

/// Default connect timeout for the relay server
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dialer for one relay server
#[derive(Debug, Clone)]
pub struct ShadowsocksClient {
    server: SocketAddr,
    method: Arc<dyn Method>,
    connect_timeout: Duration,
}

impl ShadowsocksClient {
    /// Create a dialer for `server`
    #[must_use]
    pub fn new(server: SocketAddr, method: Arc<dyn Method>) -> Self {
        Self {
            server,
            method,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the connect timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Relay server address
    #[must_use]
    pub const fn server(&self) -> SocketAddr {
        self.server
    }

    /// Method used for every tunnel
    #[must_use]
    pub fn method(&self) -> &Arc<dyn Method> {
        &self.method
    }

    /// Open a stream tunnel; the header goes out with the first write
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Timeout` or `RelayError::Io` if the server cannot
    /// be reached.
    pub async fn connect(&self, destination: Address) -> RelayResult<Box<dyn TunnelStream>> {
        let stream = self.connect_server().await?;
        debug!(server = %self.server, destination = %destination, "Dialed early stream");
        Ok(self.method.dial_early_conn(Box::new(stream), destination))
    }

    /// Open a stream tunnel and send the header before returning
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached or the header write
    /// fails.
    pub async fn connect_handshaked(
        &self,
        destination: Address,
    ) -> RelayResult<Box<dyn TunnelStream>> {
        let stream = self.connect_server().await?;
        debug!(server = %self.server, destination = %destination, "Dialed stream");
        self.method.dial_conn(Box::new(stream), destination).await
    }

    /// Open a datagram session to the server
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Io` if the local socket cannot be bound or
    /// connected.
    pub async fn udp(&self) -> RelayResult<Box<dyn PacketConn>> {
        let bind: SocketAddr = if self.server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(self.server).await?;
        debug!(server = %self.server, local = ?socket.local_addr().ok(), "Opened datagram session");

        let conn: Arc<dyn DatagramConn> = Arc::new(socket);
        Ok(self.method.dial_packet_conn(conn))
    }

    async fn connect_server(&self) -> RelayResult<TcpStream> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(self.server))
            .await
            .map_err(|_| RelayError::timeout(format!("connect to {}", self.server)))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
