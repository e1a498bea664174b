//! The `none` method
//!
//! No payload transform: a stream is `[address header][payload...]` and a
//! datagram is `[address header][payload]`. This is the reference method every
//! cipher-backed method builds on.
//!
//! # Deferred Handshake
//!
//! [`NoneStream`] created by [`Method::dial_early_conn`] starts out
//! `Pending`. The first write hands the transport one contiguous
//! `header || payload` frame, so the header does not travel in a packet of its
//! own and is never emitted twice.
//!
//! ```text
//!            first poll_write            header fully written
//! Pending ──────────────────▶ Writing ───────────────────────▶ Done
//! ```
//!
//! `Writing` holds only the header bytes the transport has not taken yet.
//! Every retry frames those bytes in front of the buffer it is given, so a
//! cancelled first write never leaks its payload into a later one. A write
//! reports only the bytes of its own buffer that reached the transport.
//!
//! `NoneStream` is not `Clone` and `poll_write` takes `Pin<&mut Self>`, so
//! the handshake is serialised by exclusive access alone. Tasks sharing one
//! session must hold it behind a lock such as `Arc<tokio::sync::Mutex<_>>`;
//! whichever writer gets the lock first carries the header.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::trace;

use super::{
    AsyncStream, BoxStream, DatagramConn, Method, PacketConn, PacketWriter, TunnelStream,
};
use crate::address::{Address, MAX_ADDRESS_LEN};
use crate::error::RelayResult;
use crate::io::{PacketBuffer, DEFAULT_BUFFER_SIZE, MAX_PACKET_SIZE};

/// Method name
pub const METHOD_NONE: &str = "none";

/// The `none` method
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneMethod;

impl NoneMethod {
    /// Create the method
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Method for NoneMethod {
    fn name(&self) -> &str {
        METHOD_NONE
    }

    fn key_len(&self) -> usize {
        0
    }

    async fn dial_conn(
        &self,
        stream: BoxStream,
        destination: Address,
    ) -> RelayResult<Box<dyn TunnelStream>> {
        let stream = NoneStream::connect(stream, destination).await?;
        Ok(Box::new(stream))
    }

    fn dial_early_conn(&self, stream: BoxStream, destination: Address) -> Box<dyn TunnelStream> {
        Box::new(NoneStream::new(stream, destination))
    }

    fn dial_packet_conn(&self, conn: Arc<dyn DatagramConn>) -> Box<dyn PacketConn> {
        Box::new(NonePacketConn::new(conn))
    }
}

// ============================================================================
// Stream Session
// ============================================================================

enum HandshakeState {
    /// Header not sent yet
    Pending,
    /// Header partly written; holds the bytes still owed
    Writing { header: Vec<u8>, written: usize },
    /// Header sent, writes pass through
    Done,
}

/// Client stream session for the `none` method
pub struct NoneStream<S> {
    inner: S,
    destination: Address,
    state: HandshakeState,
}

impl<S> NoneStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a stream, deferring the header to the first write
    pub fn new(inner: S, destination: Address) -> Self {
        Self {
            inner,
            destination,
            state: HandshakeState::Pending,
        }
    }

    /// Wrap a stream and write the header right away
    ///
    /// # Errors
    ///
    /// Returns `AddressError` if the header cannot be encoded or written.
    pub async fn connect(mut inner: S, destination: Address) -> RelayResult<Self> {
        destination.write_to(&mut inner).await?;
        inner.flush().await?;
        trace!(destination = %destination, "none handshake sent");
        Ok(Self {
            inner,
            destination,
            state: HandshakeState::Done,
        })
    }

    /// Destination carried in the header
    #[must_use]
    pub fn destination(&self) -> &Address {
        &self.destination
    }

    /// Check if the header has been fully written
    #[must_use]
    pub fn is_handshake_done(&self) -> bool {
        matches!(self.state, HandshakeState::Done)
    }

    /// Send the header now if it has not gone out yet
    ///
    /// Finishes an interrupted first write as well.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the write fails.
    pub async fn handshake(&mut self) -> io::Result<()> {
        if !self.is_handshake_done() {
            self.write(&[]).await?;
            self.flush().await?;
        }
        Ok(())
    }

    /// Copy everything from `reader` into the session
    ///
    /// The header goes out with the first chunk, or on its own when `reader`
    /// is empty. Returns the payload bytes copied.
    ///
    /// # Errors
    ///
    /// Returns the first read or write error.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
        let mut total = 0u64;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.write_all(&buf[..n]).await?;
            total += n as u64;
        }

        self.handshake().await?;
        self.flush().await?;
        Ok(total)
    }

    /// Copy everything the session reads into `writer`
    ///
    /// # Errors
    ///
    /// Returns the first read or write error.
    pub async fn write_to<W>(&mut self, writer: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        tokio::io::copy(&mut self.inner, writer).await
    }

    /// Get a reference to the underlying stream
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the underlying stream
    ///
    /// Writing through this bypasses the handshake.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consume the session and return the underlying stream
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> fmt::Debug for NoneStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoneStream")
            .field("destination", &self.destination)
            .field("handshake_done", &matches!(self.state, HandshakeState::Done))
            .finish_non_exhaustive()
    }
}

impl<S> AsyncRead for NoneStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S> AsyncWrite for NoneStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Until the header is out, the returned count covers only the part of
    /// `buf` the transport took behind the header, and may be short.
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                HandshakeState::Done => return Pin::new(&mut this.inner).poll_write(cx, buf),
                HandshakeState::Pending => {
                    let mut header = Vec::with_capacity(this.destination.serialized_len());
                    this.destination.write_to_buf(&mut header)?;
                    this.state = HandshakeState::Writing { header, written: 0 };
                }
                HandshakeState::Writing { header, written } => {
                    let owed = header.len() - *written;
                    let mut frame = Vec::with_capacity(owed + buf.len());
                    frame.extend_from_slice(&header[*written..]);
                    frame.extend_from_slice(buf);

                    let n = ready!(Pin::new(&mut this.inner).poll_write(cx, &frame))?;
                    if n == 0 {
                        return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                    }
                    if n < owed {
                        *written += n;
                        continue;
                    }

                    let payload_len = n - owed;
                    trace!(destination = %this.destination, payload_len, "none handshake sent");
                    this.state = HandshakeState::Done;
                    if payload_len > 0 || buf.is_empty() {
                        return Poll::Ready(Ok(payload_len));
                    }
                }
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S> TunnelStream for NoneStream<S>
where
    S: AsyncStream,
{
    fn destination(&self) -> &Address {
        &self.destination
    }
}

// ============================================================================
// Datagram Session
// ============================================================================

/// Client datagram session for the `none` method
///
/// Stateless: every datagram carries its own address header.
pub struct NonePacketConn {
    conn: Arc<dyn DatagramConn>,
}

impl NonePacketConn {
    /// Wrap a connected datagram transport
    #[must_use]
    pub fn new(conn: Arc<dyn DatagramConn>) -> Self {
        Self { conn }
    }
}

impl fmt::Debug for NonePacketConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonePacketConn").finish_non_exhaustive()
    }
}

#[async_trait]
impl PacketWriter for NonePacketConn {
    async fn write_packet(&self, mut buf: PacketBuffer, destination: &Address) -> RelayResult<()> {
        let header_len = destination.serialized_len();
        destination.write_to_slice(buf.extend_header(header_len))?;
        self.conn.send(buf.data()).await?;
        Ok(())
    }
}

#[async_trait]
impl PacketConn for NonePacketConn {
    async fn read_packet(&self, buf: &mut PacketBuffer) -> RelayResult<Address> {
        let n = self.conn.recv(buf.prepare_recv(MAX_PACKET_SIZE)).await?;
        buf.truncate(n);
        let (addr, consumed) = Address::decode(buf.data())?;
        buf.advance(consumed);
        Ok(addr)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> RelayResult<(usize, Address)> {
        // Anything past the caller's slice is discarded anyway
        let room = buf.len() + MAX_ADDRESS_LEN;
        let mut packet = PacketBuffer::new(room);
        let n = self.conn.recv(packet.prepare_recv(room)).await?;
        packet.truncate(n);
        let (addr, consumed) = Address::decode(packet.data())?;
        packet.advance(consumed);

        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet.data()[..n]);
        Ok((n, addr))
    }
}
