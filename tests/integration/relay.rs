//! End-to-end relay tests
//!
//! Client dialer → relay listener → direct handler → echo servers, all on
//! loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::{sleep, timeout};

use ss_relay::address::Address;
use ss_relay::client::ShadowsocksClient;
use ss_relay::config::{load_config_str, ListenConfig};
use ss_relay::method::{create_method, MethodKind, TunnelStream};
use ss_relay::relay::{DirectHandler, NoneService, RelayListener};

async fn tcp_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = sock.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

async fn udp_echo_server() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], peer).await;
        }
    });
    addr
}

async fn start_relay() -> Arc<RelayListener<DirectHandler>> {
    let config = ListenConfig::new("127.0.0.1:0".parse().unwrap()).with_udp_timeout_secs(30);
    let handler = Arc::new(DirectHandler::new(
        Duration::from_secs(5),
        config.udp_timeout(),
    ));
    let service = Arc::new(NoneService::new(config.udp_timeout(), handler));
    let listener = Arc::new(RelayListener::bind(&config, service).await.unwrap());

    let runner = Arc::clone(&listener);
    tokio::spawn(async move { runner.run().await });
    listener
}

fn client_for(listener: &RelayListener<DirectHandler>) -> ShadowsocksClient {
    let method = create_method(MethodKind::None, None, None).unwrap();
    ShadowsocksClient::new(listener.local_addr().unwrap(), method)
}

#[tokio::test]
async fn test_tcp_end_to_end() {
    let echo = tcp_echo_server().await;
    let relay = start_relay().await;
    let client = client_for(&relay);

    let mut tunnel = client.connect(Address::from(echo)).await.unwrap();
    tunnel.write_all(b"round trip").await.unwrap();

    let mut buf = [0u8; 10];
    timeout(Duration::from_secs(5), tunnel.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"round trip");
    assert_eq!(relay.stats_snapshot().connections_accepted, 1);
}

#[tokio::test]
async fn test_tcp_end_to_end_domain_destination() {
    let echo = tcp_echo_server().await;
    let relay = start_relay().await;
    let client = client_for(&relay);

    let dest = Address::domain("localhost", echo.port()).unwrap();
    let mut tunnel = client.connect_handshaked(dest.clone()).await.unwrap();
    assert_eq!(tunnel.destination(), &dest);

    tunnel.write_all(b"by name").await.unwrap();
    let mut buf = [0u8; 7];
    timeout(Duration::from_secs(5), tunnel.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"by name");
}

#[tokio::test]
async fn test_udp_end_to_end() {
    let echo = udp_echo_server().await;
    let relay = start_relay().await;
    let client = client_for(&relay);

    let conn = client.udp().await.unwrap();
    let dest = Address::from(echo);
    conn.send_to(b"datagram", &dest).await.unwrap();

    let mut buf = [0u8; 64];
    let (n, from) = timeout(Duration::from_secs(5), conn.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, dest);
    assert_eq!(&buf[..n], b"datagram");
}

#[tokio::test]
async fn test_malformed_header_rejected() {
    let relay = start_relay().await;

    let mut raw = TcpStream::connect(relay.local_addr().unwrap()).await.unwrap();
    raw.write_all(&[0x02, 0, 0, 0, 0, 0, 0]).await.unwrap();

    // The relay resets the connection: reads end with an error or EOF
    let mut buf = [0u8; 16];
    let result = timeout(Duration::from_secs(5), raw.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(result, Err(_) | Ok(0)));

    for _ in 0..100 {
        if relay.stats_snapshot().protocol_errors == 1 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(relay.stats_snapshot().protocol_errors, 1);
    assert!(relay.is_active());
}

#[tokio::test]
async fn test_malformed_datagram_does_not_stop_listener() {
    let echo = udp_echo_server().await;
    let relay = start_relay().await;
    let relay_udp = relay.udp_local_addr().unwrap();

    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    raw.send_to(&[0x03, 0x40, b'a'], relay_udp).await.unwrap();

    // A well-formed datagram afterwards is still served
    let client = client_for(&relay);
    let conn = client.udp().await.unwrap();
    conn.send_to(b"still alive", &Address::from(echo)).await.unwrap();

    let mut buf = [0u8; 64];
    let (n, _) = timeout(Duration::from_secs(5), conn.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"still alive");
    assert_eq!(relay.stats_snapshot().packet_errors, 1);
}

#[test]
fn test_config_drives_listener_settings() {
    let config = load_config_str(
        r#"{
            "listen": { "address": "127.0.0.1:0", "udp_enabled": false },
            "outbound": { "connect_timeout_secs": 3 }
        }"#,
    )
    .unwrap();
    assert!(!config.listen.udp_enabled);
    assert_eq!(config.outbound.connect_timeout(), Duration::from_secs(3));
    assert_eq!(config.method.build().unwrap().name(), "none");
}
