//! I/O utilities for ss-relay
//!
//! # Packet Buffer
//!
//! `PacketBuffer` keeps header room in front of datagram payloads so address
//! headers can be prepended without copying the payload.

mod buffer;

pub use buffer::{PacketBuffer, DEFAULT_BUFFER_SIZE, DEFAULT_HEADROOM, MAX_PACKET_SIZE};
