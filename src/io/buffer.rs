//! Packet buffer with reserved header room
//!
//! Datagram framing prepends an address header to every outgoing payload.
//! `PacketBuffer` keeps spare bytes in front of the data so the header can be
//! written in place by growing the data region backwards, instead of
//! allocating a new buffer and copying the payload behind the header.

use bytes::{Bytes, BytesMut};

use crate::address::MAX_ADDRESS_LEN;

/// Default header room: enough for any address header
pub const DEFAULT_HEADROOM: usize = MAX_ADDRESS_LEN;

/// Largest UDP payload
pub const MAX_PACKET_SIZE: usize = 65535;

/// Default buffer size for stream copies (16KB)
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Datagram buffer with header room in front of the data
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    /// Header room followed by data
    inner: BytesMut,
    /// Offset of the first data byte
    start: usize,
}

impl PacketBuffer {
    /// Create an empty buffer able to receive `capacity` bytes
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_headroom(DEFAULT_HEADROOM, capacity)
    }

    /// Create an empty buffer sized for the largest datagram
    #[must_use]
    pub fn max_packet() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }

    /// Create an empty buffer with explicit header room
    #[must_use]
    pub fn with_headroom(headroom: usize, capacity: usize) -> Self {
        let mut inner = BytesMut::with_capacity(headroom + capacity);
        inner.resize(headroom, 0);
        Self {
            inner,
            start: headroom,
        }
    }

    /// Create a buffer holding a copy of `payload`, with default header room
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Self {
        let mut buf = Self::new(payload.len());
        buf.inner.extend_from_slice(payload);
        buf
    }

    /// Bytes available in front of the data
    #[must_use]
    pub const fn headroom(&self) -> usize {
        self.start
    }

    /// Data length
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len() - self.start
    }

    /// Check if there is no data
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Data bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.inner[self.start..]
    }

    /// Mutable data bytes
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.inner[self.start..]
    }

    /// Grow the data region backwards by `n` bytes and return the new front
    ///
    /// Reallocates with fresh header room when fewer than `n` bytes are
    /// reserved.
    pub fn extend_header(&mut self, n: usize) -> &mut [u8] {
        if self.start < n {
            let mut grown = BytesMut::with_capacity(n + DEFAULT_HEADROOM + self.len());
            grown.resize(n + DEFAULT_HEADROOM, 0);
            grown.extend_from_slice(self.data());
            self.inner = grown;
            self.start = n + DEFAULT_HEADROOM;
        }
        self.start -= n;
        &mut self.inner[self.start..self.start + n]
    }

    /// Drop `n` bytes from the front of the data
    ///
    /// # Panics
    ///
    /// Panics if `n` is larger than the data length.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.len(), "advance past end of packet: {n} > {}", self.len());
        self.start += n;
    }

    /// Append bytes to the data
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Reset to default header room and expose `capacity` writable bytes for
    /// a receive call
    ///
    /// Bytes left over from an earlier receive are reused as they are; only
    /// growth past the current length is zeroed.
    pub fn prepare_recv(&mut self, capacity: usize) -> &mut [u8] {
        let len = DEFAULT_HEADROOM + capacity;
        if self.inner.len() < len {
            self.inner.resize(len, 0);
        } else {
            self.inner.truncate(len);
        }
        self.start = DEFAULT_HEADROOM;
        &mut self.inner[self.start..]
    }

    /// Keep only the first `n` data bytes, after a receive call filled them
    pub fn truncate(&mut self, n: usize) {
        self.inner.truncate(self.start + n);
    }

    /// Consume the buffer and return the data
    #[must_use]
    pub fn freeze(mut self) -> Bytes {
        self.inner.split_off(self.start).freeze()
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::max_packet()
    }
}

impl AsRef<[u8]> for PacketBuffer {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}
