//! Encryption methods
//!
//! A [`Method`] turns a raw client transport into a destination-addressed
//! tunnel. It is built once from configuration and shared by every session
//! for the life of the process.
//!
//! Three factory operations make up the contract every method satisfies:
//!
//! | Operation | Handshake | Fails |
//! |-----------|-----------|-------|
//! | [`Method::dial_conn`] | written before returning | if the header write fails |
//! | [`Method::dial_early_conn`] | deferred to the first write | never |
//! | [`Method::dial_packet_conn`] | none, each datagram is self-describing | never |
//!
//! Only the `none` method ships here. The other Shadowsocks method names are
//! recognised by [`MethodKind`] so configuration naming them fails with
//! [`MethodError::Unsupported`] rather than an unknown-method error.

pub mod none;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UdpSocket;

use crate::address::Address;
use crate::error::{MethodError, RelayResult};
use crate::io::PacketBuffer;
use crate::kdf::derive_key;

pub use none::{NoneMethod, NonePacketConn, NoneStream};

// ============================================================================
// Transport Traits
// ============================================================================

/// Bidirectional byte stream usable as a tunnel transport
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

/// Type-erased stream
pub type BoxStream = Box<dyn AsyncStream>;

/// Client stream bound to a destination
///
/// Tunnel streams are not `Clone`. Writes need `&mut`, so tasks writing to
/// one session must share it behind a lock (for example
/// `Arc<tokio::sync::Mutex<Box<dyn TunnelStream>>>`); exclusive access is
/// what keeps the header to a single emission.
pub trait TunnelStream: AsyncStream {
    /// Destination the tunnel leads to
    ///
    /// This is the session's remote address: from the application's view the
    /// stream is a connection to the destination, not to the relay.
    fn destination(&self) -> &Address;
}

/// Connected datagram transport to a relay
#[async_trait]
pub trait DatagramConn: Send + Sync {
    /// Receive one datagram
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Send one datagram
    async fn send(&self, buf: &[u8]) -> std::io::Result<usize>;
}

#[async_trait]
impl DatagramConn for UdpSocket {
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        UdpSocket::recv(self, buf).await
    }

    async fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        UdpSocket::send(self, buf).await
    }
}

/// Sink for addressed datagrams
#[async_trait]
pub trait PacketWriter: Send + Sync {
    /// Send `buf` as one datagram addressed to `destination`
    async fn write_packet(&self, buf: PacketBuffer, destination: &Address) -> RelayResult<()>;
}

/// Bidirectional addressed datagram channel
#[async_trait]
pub trait PacketConn: PacketWriter {
    /// Receive one datagram into `buf`, leaving only the payload, and return
    /// the address it carried
    async fn read_packet(&self, buf: &mut PacketBuffer) -> RelayResult<Address>;

    /// Receive one datagram into a slice
    ///
    /// Payload beyond `buf.len()` is discarded, as with a plain UDP socket.
    async fn recv_from(&self, buf: &mut [u8]) -> RelayResult<(usize, Address)> {
        let mut packet = PacketBuffer::new(buf.len());
        let addr = self.read_packet(&mut packet).await?;
        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet.data()[..n]);
        Ok((n, addr))
    }

    /// Send a payload slice as one datagram addressed to `destination`
    async fn send_to(&self, payload: &[u8], destination: &Address) -> RelayResult<usize> {
        self.write_packet(PacketBuffer::from_payload(payload), destination)
            .await?;
        Ok(payload.len())
    }
}

// ============================================================================
// Method Contract
// ============================================================================

/// Shadowsocks encryption method
#[async_trait]
pub trait Method: Send + Sync + fmt::Debug {
    /// Stable identifier used in configuration and logs
    fn name(&self) -> &str;

    /// Key size this method requires; 0 means no key material
    fn key_len(&self) -> usize;

    /// Wrap `stream` and complete the handshake before returning
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake write fails. The stream is dropped
    /// (closed) in that case.
    async fn dial_conn(
        &self,
        stream: BoxStream,
        destination: Address,
    ) -> RelayResult<Box<dyn TunnelStream>>;

    /// Wrap `stream` without writing anything; the handshake goes out with
    /// the first payload
    fn dial_early_conn(&self, stream: BoxStream, destination: Address) -> Box<dyn TunnelStream>;

    /// Wrap a datagram transport
    fn dial_packet_conn(&self, conn: Arc<dyn DatagramConn>) -> Box<dyn PacketConn>;
}

// ============================================================================
// Method Registry
// ============================================================================

/// Method names understood in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodKind {
    /// No encryption
    #[default]
    #[serde(rename = "none")]
    None,
    /// AES-128-GCM AEAD
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,
    /// AES-256-GCM AEAD
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// ChaCha20-IETF-Poly1305 AEAD
    #[serde(rename = "chacha20-ietf-poly1305")]
    Chacha20IetfPoly1305,
    /// Shadowsocks 2022 with AES-128-GCM
    #[serde(rename = "2022-blake3-aes-128-gcm")]
    Blake3Aes128Gcm,
    /// Shadowsocks 2022 with AES-256-GCM
    #[serde(rename = "2022-blake3-aes-256-gcm")]
    Blake3Aes256Gcm,
    /// Shadowsocks 2022 with ChaCha20-Poly1305
    #[serde(rename = "2022-blake3-chacha20-poly1305")]
    Blake3Chacha20Poly1305,
}

impl MethodKind {
    /// All recognised methods
    pub const ALL: [Self; 7] = [
        Self::None,
        Self::Aes128Gcm,
        Self::Aes256Gcm,
        Self::Chacha20IetfPoly1305,
        Self::Blake3Aes128Gcm,
        Self::Blake3Aes256Gcm,
        Self::Blake3Chacha20Poly1305,
    ];

    /// Get the method name as used in configuration
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Aes128Gcm => "aes-128-gcm",
            Self::Aes256Gcm => "aes-256-gcm",
            Self::Chacha20IetfPoly1305 => "chacha20-ietf-poly1305",
            Self::Blake3Aes128Gcm => "2022-blake3-aes-128-gcm",
            Self::Blake3Aes256Gcm => "2022-blake3-aes-256-gcm",
            Self::Blake3Chacha20Poly1305 => "2022-blake3-chacha20-poly1305",
        }
    }

    /// Key size in bytes
    #[must_use]
    pub const fn key_len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Aes128Gcm | Self::Blake3Aes128Gcm => 16,
            Self::Aes256Gcm
            | Self::Chacha20IetfPoly1305
            | Self::Blake3Aes256Gcm
            | Self::Blake3Chacha20Poly1305 => 32,
        }
    }

    /// Check whether an implementation is built in
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl FromStr for MethodKind {
    type Err = MethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| MethodError::unknown(s))
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the key for a method from an explicit key or a password
///
/// An explicit key must have exactly `key_len` bytes. Otherwise the key is
/// derived from the password; methods with `key_len == 0` need neither.
///
/// # Errors
///
/// Returns `MethodError::BadKey` for a wrong-sized key and
/// `MethodError::MissingPassword` when key material is needed but absent.
pub fn resolve_key(
    key_len: usize,
    password: Option<&str>,
    key: Option<&[u8]>,
) -> Result<Vec<u8>, MethodError> {
    if let Some(key) = key {
        if key.len() != key_len {
            return Err(MethodError::BadKey {
                expected: key_len,
                actual: key.len(),
            });
        }
        return Ok(key.to_vec());
    }

    if key_len == 0 {
        return Ok(Vec::new());
    }

    match password {
        Some(password) if !password.is_empty() => Ok(derive_key(password.as_bytes(), key_len)),
        _ => Err(MethodError::MissingPassword),
    }
}

/// Build the method named by `kind`
///
/// # Errors
///
/// Returns `MethodError` if key material is invalid or the method is not
/// built in.
pub fn create_method(
    kind: MethodKind,
    password: Option<&str>,
    key: Option<&[u8]>,
) -> Result<Arc<dyn Method>, MethodError> {
    let _key = resolve_key(kind.key_len(), password, key)?;

    match kind {
        MethodKind::None => Ok(Arc::new(NoneMethod::new())),
        other => Err(MethodError::unsupported(other.as_str())),
    }
}
