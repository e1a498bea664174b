//! Datagram session tests
//!
//! Every datagram carries its own header, and replies are routed back to the
//! physical source that opened the session even when several sources share
//! one destination.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use ss_relay::address::Address;
use ss_relay::error::{RelayError, RelayResult};
use ss_relay::io::PacketBuffer;
use ss_relay::method::{create_method, BoxStream, DatagramConn, MethodKind, PacketConn};
use ss_relay::relay::{DatagramSocket, Handler, Metadata, NoneService};

async fn connected_pair() -> (Arc<UdpSocket>, UdpSocket) {
    let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(relay.local_addr().unwrap()).await.unwrap();
    (Arc::new(client), relay)
}

fn none_packet_conn(socket: Arc<UdpSocket>) -> Box<dyn PacketConn> {
    let method = create_method(MethodKind::None, None, None).unwrap();
    let conn: Arc<dyn DatagramConn> = socket;
    method.dial_packet_conn(conn)
}

// ============================================================================
// Self-describing Datagrams
// ============================================================================

#[tokio::test]
async fn test_every_datagram_is_self_describing() {
    let (client, relay) = connected_pair().await;
    let conn = none_packet_conn(client);
    let dest = Address::domain("example.com", 443).unwrap();

    let mut recv_buf = vec![0u8; 70_000];
    for size in [0usize, 1, 7, 512, 1400, 8192, 65_000] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        conn.send_to(&payload, &dest).await.unwrap();

        let (n, _) = timeout(Duration::from_secs(5), relay.recv_from(&mut recv_buf))
            .await
            .unwrap()
            .unwrap();
        let (decoded, consumed) = Address::decode(&recv_buf[..n]).unwrap();
        assert_eq!(decoded, dest, "size {size}");
        assert_eq!(&recv_buf[consumed..n], payload.as_slice(), "size {size}");
    }
}

#[tokio::test]
async fn test_reads_strip_header() {
    let (client, relay) = connected_pair().await;
    let client_addr = client.local_addr().unwrap();
    let conn = none_packet_conn(client);

    let from = Address::from("198.51.100.4:5353".parse::<SocketAddr>().unwrap());
    let mut datagram = from.encode().unwrap();
    datagram.extend_from_slice(b"answer");
    relay.send_to(&datagram, client_addr).await.unwrap();

    let mut buf = [0u8; 64];
    let (n, addr) = timeout(Duration::from_secs(5), conn.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(addr, from);
    assert_eq!(&buf[..n], b"answer");
}

#[tokio::test]
async fn test_malformed_reply_is_an_error() {
    let (client, relay) = connected_pair().await;
    let client_addr = client.local_addr().unwrap();
    let conn = none_packet_conn(client);

    relay.send_to(&[0x05, 1, 2], client_addr).await.unwrap();

    let mut buf = PacketBuffer::default();
    let result = timeout(Duration::from_secs(5), conn.read_packet(&mut buf))
        .await
        .unwrap();
    assert!(matches!(result, Err(RelayError::Address(_))));
}

// ============================================================================
// Reply Routing
// ============================================================================

/// Answers each datagram with "reply:" + payload, from the same destination
struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn new_connection(&self, _stream: BoxStream, _metadata: Metadata) -> RelayResult<()> {
        Ok(())
    }

    async fn new_packet_connection(
        &self,
        conn: Box<dyn PacketConn>,
        _metadata: Metadata,
    ) -> RelayResult<()> {
        loop {
            let mut buf = PacketBuffer::default();
            let destination = match conn.read_packet(&mut buf).await {
                Ok(destination) => destination,
                Err(RelayError::SessionClosed) => return Ok(()),
                Err(e) => return Err(e),
            };
            let mut reply = b"reply:".to_vec();
            reply.extend_from_slice(buf.data());
            conn.send_to(&reply, &destination).await?;
        }
    }

    fn handle_error(&self, _error: RelayError) {}
}

#[tokio::test]
async fn test_replies_route_to_each_source() {
    let relay = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let relay_addr = relay.local_addr().unwrap();
    let service = Arc::new(NoneService::new(Duration::from_secs(30), Arc::new(EchoHandler)));

    // Relay receive loop
    let recv_socket = Arc::clone(&relay);
    let recv_service = Arc::clone(&service);
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        loop {
            let Ok((n, peer)) = recv_socket.recv_from(&mut buf).await else {
                break;
            };
            let socket: Arc<dyn DatagramSocket> = Arc::clone(&recv_socket) as Arc<dyn DatagramSocket>;
            let _ = recv_service.new_packet(
                socket,
                PacketBuffer::from_payload(&buf[..n]),
                Metadata::new(peer),
            );
        }
    });

    let dest = Address::from("203.0.113.9:9999".parse::<SocketAddr>().unwrap());

    let a_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    a_socket.connect(relay_addr).await.unwrap();
    let b_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    b_socket.connect(relay_addr).await.unwrap();
    let a = none_packet_conn(a_socket);
    let b = none_packet_conn(b_socket);

    a.send_to(b"from-a", &dest).await.unwrap();
    b.send_to(b"from-b", &dest).await.unwrap();

    let mut buf = [0u8; 64];
    let (n, from) = timeout(Duration::from_secs(5), a.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, dest);
    assert_eq!(&buf[..n], b"reply:from-a");

    let (n, from) = timeout(Duration::from_secs(5), b.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, dest);
    assert_eq!(&buf[..n], b"reply:from-b");

    // A second datagram from A reuses its session
    a.send_to(b"again", &dest).await.unwrap();
    let (n, _) = timeout(Duration::from_secs(5), a.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"reply:again");
    assert_eq!(service.udp_stats().sessions_created, 2);
}
