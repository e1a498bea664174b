//! Integration tests for ss-relay
//!
//! # Test Organization
//!
//! - `stream_session`: client stream framing and the deferred handshake
//! - `datagram`: self-describing datagrams and reply routing per source
//! - `relay`: listener, service and direct handler end to end
//!
//! # Test Requirements
//!
//! All tests run on loopback sockets and in-memory pipes; no external network
//! access is needed.

pub mod datagram;
pub mod relay;
pub mod stream_session;
