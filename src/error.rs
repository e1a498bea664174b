//! Error types for ss-relay
//!
//! Errors are split by where they originate:
//!
//! - **Decode errors** ([`AddressError`]): malformed or truncated address
//!   headers. Fatal to the single stream or datagram that produced them,
//!   never to the service.
//! - **Method errors** ([`MethodError`]): unknown methods, bad keys and
//!   missing passwords. Raised while building a method, before any I/O.
//! - **Ingress errors** ([`ServerConnError`], [`ServerPacketError`]): a
//!   decode or transport error tagged with the peer that caused it, handed to
//!   the handler's error sink.
//! - **Configuration errors** ([`ConfigError`]): file and validation failures.
//!
//! [`RelayError`] is the top-level type that wraps all of the above.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum RelayError {
    /// Address header could not be encoded or decoded
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// Method construction failed
    #[error("Method error: {0}")]
    Method(#[from] MethodError),

    /// Inbound stream rejected
    #[error(transparent)]
    ServerConn(#[from] ServerConnError),

    /// Inbound datagram rejected
    #[error(transparent)]
    ServerPacket(#[from] ServerPacketError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Operation timed out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Packet session closed by the other side or by idle eviction
    #[error("Packet session closed")]
    SessionClosed,

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RelayError {
    /// Create a timeout error
    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout(what.into())
    }

    /// Check if this error is recoverable
    ///
    /// Decode and per-connection errors only affect one peer and the service
    /// keeps running. Method and configuration errors need user intervention.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Address(_) | Self::ServerConn(_) | Self::ServerPacket(_) => true,
            Self::Method(_) | Self::Config(_) => false,
            Self::Timeout(_) => true,
            Self::SessionClosed => false,
            Self::Io(e) => is_transient(e),
        }
    }
}

/// Convert `RelayError` to `std::io::Error` for use inside `AsyncRead`/`AsyncWrite`
impl From<RelayError> for io::Error {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::Io(io_err) => io_err,
            RelayError::Address(addr_err) => addr_err.into(),
            RelayError::ServerConn(_) | RelayError::ServerPacket(_) => {
                io::Error::new(io::ErrorKind::InvalidData, e.to_string())
            }
            RelayError::Method(_) | RelayError::Config(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            RelayError::Timeout(_) => io::Error::new(io::ErrorKind::TimedOut, e.to_string()),
            RelayError::SessionClosed => {
                io::Error::new(io::ErrorKind::NotConnected, e.to_string())
            }
        }
    }
}

/// Type alias for Result with `RelayError`
pub type RelayResult<T> = std::result::Result<T, RelayError>;

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
    )
}

/// Address header encode/decode errors
#[derive(Debug, Error)]
pub enum AddressError {
    /// Address type byte is not 1, 3 or 4
    #[error("Unknown address type: {0:#04x}")]
    UnknownAddressType(u8),

    /// Buffer ended before the declared length was consumed
    #[error("Address header truncated: need {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required by the header field being read
        needed: usize,
        /// Bytes that were left
        available: usize,
    },

    /// Domain name longer than 255 bytes
    #[error("Domain name too long: {0} bytes (max 255)")]
    DomainTooLong(usize),

    /// Domain name bytes are not valid UTF-8
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// Could not parse a `host:port` string
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Transport failure while reading or writing a header
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AddressError {
    /// Create a truncated-header error
    #[must_use]
    pub const fn truncated(needed: usize, available: usize) -> Self {
        Self::Truncated { needed, available }
    }

    /// Check whether the peer sent a malformed header, as opposed to the
    /// transport failing underneath
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        match self {
            Self::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => true,
        }
    }
}

impl From<AddressError> for io::Error {
    fn from(e: AddressError) -> Self {
        match e {
            AddressError::Io(io_err) => io_err,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

/// Method construction errors
#[derive(Debug, Error)]
pub enum MethodError {
    /// Method name is not recognised at all
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Method name is recognised but its cipher is not built in
    #[error("Unsupported method: {0}")]
    Unsupported(String),

    /// Method needs key material and neither key nor password was given
    #[error("Missing password")]
    MissingPassword,

    /// Explicit key has the wrong length
    #[error("Bad key: expected {expected} bytes, got {actual}")]
    BadKey {
        /// Key length the method requires
        expected: usize,
        /// Key length supplied
        actual: usize,
    },
}

impl MethodError {
    /// Create an unknown method error
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownMethod(name.into())
    }

    /// Create an unsupported method error
    pub fn unsupported(name: impl Into<String>) -> Self {
        Self::Unsupported(name.into())
    }
}

/// Failure serving an inbound stream connection
#[derive(Debug, Error)]
#[error("serve TCP from {client}: {cause}")]
pub struct ServerConnError {
    /// Physical peer of the rejected connection
    pub client: SocketAddr,
    /// What went wrong
    #[source]
    pub cause: AddressError,
}

impl ServerConnError {
    /// Wrap a header error with the originating peer
    #[must_use]
    pub const fn new(client: SocketAddr, cause: AddressError) -> Self {
        Self { client, cause }
    }
}

/// Failure serving an inbound datagram
#[derive(Debug, Error)]
#[error("serve UDP from {client}: {cause}")]
pub struct ServerPacketError {
    /// Physical peer that sent the datagram
    pub client: SocketAddr,
    /// What went wrong
    #[source]
    pub cause: AddressError,
}

impl ServerPacketError {
    /// Wrap a header error with the originating peer
    #[must_use]
    pub const fn new(client: SocketAddr, cause: AddressError) -> Self {
        Self { client, cause }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// Method could not be built from the configured name and key material
    #[error("Invalid method configuration: {0}")]
    Method(#[from] MethodError),

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    fn peer() -> SocketAddr {
        "203.0.113.7:50000".parse().unwrap()
    }

    #[test]
    fn test_server_conn_error_display() {
        let err = ServerConnError::new(peer(), AddressError::UnknownAddressType(0x05));
        assert_eq!(
            err.to_string(),
            "serve TCP from 203.0.113.7:50000: Unknown address type: 0x05"
        );
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn test_server_packet_error_display() {
        let err = ServerPacketError::new(peer(), AddressError::truncated(12, 3));
        let msg = err.to_string();
        assert!(msg.starts_with("serve UDP from 203.0.113.7:50000"));
        assert!(msg.contains("need 12 bytes, 3 available"));
    }

    #[test]
    fn test_recoverable_errors() {
        let recoverable = vec![
            RelayError::from(AddressError::UnknownAddressType(9)),
            RelayError::from(ServerConnError::new(peer(), AddressError::DomainTooLong(300))),
            RelayError::from(ServerPacketError::new(peer(), AddressError::truncated(4, 0))),
            RelayError::timeout("connect"),
            RelayError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];

        for err in recoverable {
            assert!(err.is_recoverable(), "Expected {err} to be recoverable");
        }
    }

    #[test]
    fn test_non_recoverable_errors() {
        let non_recoverable = vec![
            RelayError::from(MethodError::MissingPassword),
            RelayError::from(MethodError::BadKey {
                expected: 16,
                actual: 3,
            }),
            RelayError::from(ConfigError::ValidationError("bad".into())),
            RelayError::SessionClosed,
        ];

        for err in non_recoverable {
            assert!(!err.is_recoverable(), "Expected {err} to be non-recoverable");
        }
    }

    #[test]
    fn test_error_to_io_error() {
        let io_err: io::Error = RelayError::from(AddressError::UnknownAddressType(2)).into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);

        let io_err: io::Error = RelayError::from(MethodError::MissingPassword).into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);

        let io_err: io::Error = RelayError::timeout("dial").into();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_address_io_error_passthrough() {
        let err = AddressError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(!err.is_malformed());
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_eof_counts_as_malformed() {
        let err = AddressError::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(err.is_malformed());
        assert!(AddressError::InvalidDomain("x".into()).is_malformed());
    }

    #[test]
    fn test_method_error_messages() {
        assert!(MethodError::unknown("rot13").to_string().contains("rot13"));
        assert!(MethodError::unsupported("aes-128-gcm")
            .to_string()
            .contains("aes-128-gcm"));
        let bad = MethodError::BadKey {
            expected: 32,
            actual: 16,
        };
        assert_eq!(bad.to_string(), "Bad key: expected 32 bytes, got 16");
    }
}
