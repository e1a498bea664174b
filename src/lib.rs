//! ss-relay: Shadowsocks tunnel protocol layer
//!
//! This crate implements the protocol layer of a Shadowsocks-style proxy
//! transport. Every stream and every datagram starts with a compact address
//! header naming its destination; a relay strips that header and dispatches
//! the rest. The built-in method is `none`, which frames traffic without
//! encryption.
//!
//! # Features
//!
//! - **Address Codec**: SOCKS5-style address header encode/decode
//! - **Key Derivation**: `EVP_BytesToKey` (MD5) password-to-key derivation
//! - **Client Sessions**: Deferred-handshake streams and self-describing datagrams
//! - **Relay Service**: Header parsing, UDP session table and reply routing
//! - **Listener**: Combined TCP/UDP front-end with a direct dispatch handler
//!
//! # Architecture
//!
//! ```text
//! App → ShadowsocksClient → NoneStream / NonePacketConn → relay
//!                                                           ↓
//!                                       RelayListener → NoneService → Handler
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ss_relay::config::load_config;
//! use ss_relay::relay::{DirectHandler, NoneService, RelayListener};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/ss-relay/config.json")?;
//!
//! let handler = Arc::new(DirectHandler::new(
//!     config.outbound.connect_timeout(),
//!     config.listen.udp_timeout(),
//! ));
//! let service = Arc::new(NoneService::new(config.listen.udp_timeout(), handler));
//! let listener = RelayListener::bind(&config.listen, service).await?;
//! listener.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`address`]: Address header codec
//! - [`client`]: Client dialer
//! - [`config`]: Configuration types and loading
//! - [`error`]: Error types
//! - [`io`]: Packet buffers
//! - [`kdf`]: Password key derivation
//! - [`method`]: Method contract and the `none` method
//! - [`relay`]: Relay service, session table and listener

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod address;
pub mod client;
pub mod config;
pub mod error;
pub mod io;
pub mod kdf;
pub mod method;
pub mod relay;

// Re-export commonly used types at the crate root
pub use address::Address;
pub use client::ShadowsocksClient;
pub use config::{Config, ListenConfig, LogConfig, MethodConfig, OutboundConfig};
pub use error::{
    AddressError, ConfigError, MethodError, RelayError, RelayResult, ServerConnError,
    ServerPacketError,
};
pub use io::PacketBuffer;
pub use kdf::derive_key;
pub use method::{
    create_method, Method, MethodKind, NoneMethod, NonePacketConn, NoneStream, PacketConn,
    PacketWriter, TunnelStream,
};
pub use relay::{DirectHandler, Handler, Metadata, NoneService, RelayListener};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
