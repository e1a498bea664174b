//! Shadowsocks address header
//!
//! Every stream handshake and every datagram starts with the same header:
//!
//! ```text
//! +------+----------+----------+
//! | ATYP |   ADDR   |   PORT   |
//! +------+----------+----------+
//! |  1B  | Variable |  2B (BE) |
//! +------+----------+----------+
//! ```
//!
//! - Type 1 (IPv4): 4 bytes
//! - Type 3 (Domain): 1 byte length + name
//! - Type 4 (IPv6): 16 bytes
//!
//! The encoding is the SOCKS5 address layout without the leading
//! version/command bytes, so `example.com:443` becomes
//! `03 0B 65 78 61 6D 70 6C 65 2E 63 6F 6D 01 BB`.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::AddressError;

// ============================================================================
// Address Type Constants
// ============================================================================

/// IPv4 address (4 bytes)
pub const ATYP_IPV4: u8 = 0x01;

/// Domain name (length + name)
pub const ATYP_DOMAIN: u8 = 0x03;

/// IPv6 address (16 bytes)
pub const ATYP_IPV6: u8 = 0x04;

/// Longest possible header: type + length + 255-byte name + port
pub const MAX_ADDRESS_LEN: usize = 1 + 1 + 255 + 2;

/// Shortest possible header (IPv4)
pub const MIN_ADDRESS_LEN: usize = 1 + 4 + 2;

/// Maximum domain name length that fits the one-byte length prefix
pub const MAX_DOMAIN_LEN: usize = 255;

/// Destination address carried in the header
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    /// IPv4 or IPv6 address and port
    ///
    /// The header has no room for an IPv6 scope id or flow label; build this
    /// through `From<SocketAddr>` so both are cleared.
    SocketAddr(SocketAddr),

    /// Domain name and port
    DomainName {
        /// Domain name
        domain: String,
        /// Port number
        port: u16,
    },
}

impl Address {
    /// Create a domain address
    ///
    /// # Errors
    ///
    /// Returns `AddressError::DomainTooLong` if the name does not fit in the
    /// one-byte length prefix.
    pub fn domain(domain: impl Into<String>, port: u16) -> Result<Self, AddressError> {
        let domain = domain.into();
        if domain.len() > MAX_DOMAIN_LEN {
            return Err(AddressError::DomainTooLong(domain.len()));
        }
        Ok(Self::DomainName { domain, port })
    }

    /// Get the port number
    #[must_use]
    pub fn port(&self) -> u16 {
        match self {
            Self::SocketAddr(addr) => addr.port(),
            Self::DomainName { port, .. } => *port,
        }
    }

    /// Get the host string (IP or domain)
    #[must_use]
    pub fn host(&self) -> String {
        match self {
            Self::SocketAddr(addr) => addr.ip().to_string(),
            Self::DomainName { domain, .. } => domain.clone(),
        }
    }

    /// Convert to a socket address if possible
    ///
    /// Returns `None` for domain names (requires DNS resolution).
    #[must_use]
    pub fn as_socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::SocketAddr(addr) => Some(*addr),
            Self::DomainName { .. } => None,
        }
    }

    /// Get the address type byte
    #[must_use]
    pub const fn address_type(&self) -> u8 {
        match self {
            Self::SocketAddr(SocketAddr::V4(_)) => ATYP_IPV4,
            Self::SocketAddr(SocketAddr::V6(_)) => ATYP_IPV6,
            Self::DomainName { .. } => ATYP_DOMAIN,
        }
    }

    /// Exact number of bytes the encoded header occupies
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        match self {
            Self::SocketAddr(SocketAddr::V4(_)) => 1 + 4 + 2,
            Self::SocketAddr(SocketAddr::V6(_)) => 1 + 16 + 2,
            Self::DomainName { domain, .. } => 1 + 1 + domain.len() + 2,
        }
    }

    /// Encode the header into a buffer
    ///
    /// # Errors
    ///
    /// Returns `AddressError::DomainTooLong` for names over 255 bytes. Nothing
    /// is written in that case.
    pub fn write_to_buf<B: BufMut>(&self, buf: &mut B) -> Result<(), AddressError> {
        match self {
            Self::SocketAddr(SocketAddr::V4(addr)) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Self::SocketAddr(SocketAddr::V6(addr)) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Self::DomainName { domain, port } => {
                if domain.len() > MAX_DOMAIN_LEN {
                    return Err(AddressError::DomainTooLong(domain.len()));
                }
                buf.put_u8(ATYP_DOMAIN);
                #[allow(clippy::cast_possible_truncation)]
                buf.put_u8(domain.len() as u8);
                buf.put_slice(domain.as_bytes());
                buf.put_u16(*port);
            }
        }
        Ok(())
    }

    /// Encode the header into the front of `out`, returning the bytes written
    ///
    /// # Errors
    ///
    /// Returns `AddressError::Truncated` if `out` is shorter than
    /// [`serialized_len`](Self::serialized_len), or `DomainTooLong`.
    pub fn write_to_slice(&self, out: &mut [u8]) -> Result<usize, AddressError> {
        let len = self.serialized_len();
        if out.len() < len {
            return Err(AddressError::truncated(len, out.len()));
        }
        let mut cursor = &mut out[..len];
        self.write_to_buf(&mut cursor)?;
        Ok(len)
    }

    /// Encode the header to a new vector
    ///
    /// # Errors
    ///
    /// Returns `AddressError::DomainTooLong` for names over 255 bytes.
    pub fn encode(&self) -> Result<Vec<u8>, AddressError> {
        let mut buf = Vec::with_capacity(self.serialized_len());
        self.write_to_buf(&mut buf)?;
        Ok(buf)
    }

    /// Decode a header from the front of a buffer, advancing past it
    ///
    /// # Errors
    ///
    /// Returns `AddressError::UnknownAddressType` for an unrecognised type
    /// byte, `AddressError::Truncated` if the buffer ends early and
    /// `AddressError::InvalidDomain` if the name is not UTF-8.
    pub fn read_from_buf<B: Buf>(buf: &mut B) -> Result<Self, AddressError> {
        ensure_remaining(buf, 1)?;
        let atyp = buf.get_u8();

        match atyp {
            ATYP_IPV4 => {
                ensure_remaining(buf, 4 + 2)?;
                let ip = Ipv4Addr::from(buf.get_u32());
                let port = buf.get_u16();
                Ok(Self::SocketAddr(SocketAddr::V4(SocketAddrV4::new(ip, port))))
            }
            ATYP_IPV6 => {
                ensure_remaining(buf, 16 + 2)?;
                let ip = Ipv6Addr::from(buf.get_u128());
                let port = buf.get_u16();
                Ok(Self::SocketAddr(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))))
            }
            ATYP_DOMAIN => {
                ensure_remaining(buf, 1)?;
                let len = usize::from(buf.get_u8());
                ensure_remaining(buf, len + 2)?;
                let mut name = vec![0u8; len];
                buf.copy_to_slice(&mut name);
                let port = buf.get_u16();
                let domain = String::from_utf8(name)
                    .map_err(|e| AddressError::InvalidDomain(e.to_string()))?;
                Ok(Self::DomainName { domain, port })
            }
            _ => Err(AddressError::UnknownAddressType(atyp)),
        }
    }

    /// Decode a header from a byte slice, returning the address and the
    /// number of bytes it occupied
    ///
    /// # Errors
    ///
    /// Same as [`read_from_buf`](Self::read_from_buf).
    pub fn decode(data: &[u8]) -> Result<(Self, usize), AddressError> {
        let mut cursor = data;
        let addr = Self::read_from_buf(&mut cursor)?;
        Ok((addr, data.len() - cursor.len()))
    }

    /// Read a header from an async stream
    ///
    /// Blocks until the whole header is available. A stream that closes
    /// early yields `AddressError::Io` with `UnexpectedEof`.
    ///
    /// # Errors
    ///
    /// Returns `AddressError` if the header is malformed or I/O fails.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, AddressError> {
        let atyp = reader.read_u8().await?;

        match atyp {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                reader.read_exact(&mut octets).await?;
                let port = reader.read_u16().await?;
                Ok(Self::SocketAddr(SocketAddr::new(IpAddr::V4(octets.into()), port)))
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; 16];
                reader.read_exact(&mut octets).await?;
                let port = reader.read_u16().await?;
                Ok(Self::SocketAddr(SocketAddr::new(IpAddr::V6(octets.into()), port)))
            }
            ATYP_DOMAIN => {
                let len = usize::from(reader.read_u8().await?);
                let mut name = vec![0u8; len];
                reader.read_exact(&mut name).await?;
                let port = reader.read_u16().await?;
                let domain = String::from_utf8(name)
                    .map_err(|e| AddressError::InvalidDomain(e.to_string()))?;
                Ok(Self::DomainName { domain, port })
            }
            _ => Err(AddressError::UnknownAddressType(atyp)),
        }
    }

    /// Write the header to an async stream in a single write
    ///
    /// # Errors
    ///
    /// Returns `AddressError` if encoding fails or I/O fails.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), AddressError> {
        let encoded = self.encode()?;
        writer.write_all(&encoded).await?;
        Ok(())
    }
}

fn ensure_remaining<B: Buf>(buf: &B, needed: usize) -> Result<(), AddressError> {
    if buf.remaining() < needed {
        return Err(AddressError::truncated(needed, buf.remaining()));
    }
    Ok(())
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SocketAddr(addr) => write!(f, "{addr}"),
            Self::DomainName { domain, port } => write!(f, "{domain}:{port}"),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Self::SocketAddr(addr),
            SocketAddr::V6(v6) => Self::SocketAddr(SocketAddr::V6(SocketAddrV6::new(
                *v6.ip(),
                v6.port(),
                0,
                0,
            ))),
        }
    }
}

impl From<(IpAddr, u16)> for Address {
    fn from((ip, port): (IpAddr, u16)) -> Self {
        Self::SocketAddr(SocketAddr::new(ip, port))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    /// Parse `host:port`, where host is an IPv4 address, a bracketed IPv6
    /// address or a domain name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self::from(addr));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressError::InvalidAddress(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| AddressError::InvalidAddress(s.to_string()))?;
        if host.is_empty() || host.contains(':') {
            return Err(AddressError::InvalidAddress(s.to_string()));
        }

        Self::domain(host, port)
    }
}
