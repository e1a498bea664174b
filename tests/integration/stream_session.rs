//! Client stream session tests
//!
//! Verifies that the header always precedes payload on the wire and is sent
//! exactly once, however the session is driven.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use ss_relay::address::Address;
use ss_relay::method::{create_method, MethodKind, NoneStream, TunnelStream};

fn destination() -> Address {
    Address::domain("example.com", 443).unwrap()
}

// ============================================================================
// Header Placement
// ============================================================================

#[tokio::test]
async fn test_header_precedes_payload() {
    let (client, mut server) = duplex(4096);
    let mut stream = NoneStream::new(client, destination());

    stream.write_all(b"hello").await.unwrap();
    stream.write_all(b" world").await.unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    let mut wire = Vec::new();
    server.read_to_end(&mut wire).await.unwrap();

    let mut expected = vec![
        0x03, 0x0B, b'e', b'x', b'a', b'm', b'p', b'l', b'e', b'.', b'c', b'o', b'm', 0x01, 0xBB,
    ];
    expected.extend_from_slice(b"hello world");
    assert_eq!(wire, expected);
}

#[tokio::test]
async fn test_nothing_sent_before_first_write() {
    let (client, mut server) = duplex(4096);
    let stream = NoneStream::new(client, destination());
    assert!(!stream.is_handshake_done());

    let mut buf = [0u8; 1];
    let pending = tokio::time::timeout(Duration::from_millis(50), server.read(&mut buf)).await;
    assert!(pending.is_err(), "no bytes may reach the wire before a write");
}

#[tokio::test]
async fn test_read_from_empty_source_sends_header() {
    let (client, mut server) = duplex(4096);
    let mut stream = NoneStream::new(client, destination());

    let mut empty: &[u8] = &[];
    let copied = stream.read_from(&mut empty).await.unwrap();
    assert_eq!(copied, 0);
    assert!(stream.is_handshake_done());

    let header = destination().encode().unwrap();
    let mut wire = vec![0u8; header.len()];
    server.read_exact(&mut wire).await.unwrap();
    assert_eq!(wire, header);
}

#[tokio::test]
async fn test_reads_pass_through_untouched() {
    let (client, mut server) = duplex(4096);
    let mut stream = NoneStream::new(client, destination());

    server.write_all(b"response bytes").await.unwrap();
    let mut buf = [0u8; 14];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"response bytes");

    // Reading does not trigger the handshake
    assert!(!stream.is_handshake_done());
}

// ============================================================================
// Concurrent Writers
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_single_header() {
    const WRITERS: u8 = 8;

    let (client, mut server) = duplex(64 * 1024);
    let stream = Arc::new(Mutex::new(NoneStream::new(client, destination())));

    let mut tasks = Vec::new();
    for id in 0..WRITERS {
        let stream = Arc::clone(&stream);
        tasks.push(tokio::spawn(async move {
            let payload = [id; 16];
            stream.lock().await.write_all(&payload).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    stream.lock().await.shutdown().await.unwrap();
    drop(stream);

    let mut wire = Vec::new();
    server.read_to_end(&mut wire).await.unwrap();

    let header = destination().encode().unwrap();
    assert!(wire.starts_with(&header));

    let payload = &wire[header.len()..];
    assert_eq!(payload.len(), usize::from(WRITERS) * 16);

    // Every writer's chunk arrives whole, none is a second header
    let mut seen: Vec<u8> = payload.chunks(16).map(|chunk| chunk[0]).collect();
    for chunk in payload.chunks(16) {
        assert!(chunk.iter().all(|&b| b == chunk[0]));
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..WRITERS).collect::<Vec<_>>());
}

// ============================================================================
// Method Factories
// ============================================================================

#[tokio::test]
async fn test_dial_conn_writes_header_before_returning() {
    let method = create_method(MethodKind::None, None, None).unwrap();
    let (client, mut server) = duplex(4096);

    let tunnel = method.dial_conn(Box::new(client), destination()).await.unwrap();
    assert_eq!(tunnel.destination(), &destination());

    let header = destination().encode().unwrap();
    let mut wire = vec![0u8; header.len()];
    server.read_exact(&mut wire).await.unwrap();
    assert_eq!(wire, header);
}

#[tokio::test]
async fn test_dial_early_conn_defers_header() {
    let method = create_method(MethodKind::None, None, None).unwrap();
    let (client, mut server) = duplex(4096);

    let mut tunnel = method.dial_early_conn(Box::new(client), destination());
    tunnel.write_all(b"x").await.unwrap();
    tunnel.flush().await.unwrap();

    let mut expected = destination().encode().unwrap();
    expected.push(b'x');
    let mut wire = vec![0u8; expected.len()];
    server.read_exact(&mut wire).await.unwrap();
    assert_eq!(wire, expected);
}

#[tokio::test]
async fn test_dial_conn_failure_reports_error() {
    let method = create_method(MethodKind::None, None, None).unwrap();
    let (client, server) = duplex(16);
    drop(server);

    let result = method.dial_conn(Box::new(client), destination()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_early_conn_retry_after_cancelled_write() {
    let method = create_method(MethodKind::None, None, None).unwrap();
    let (client, mut server) = duplex(8);
    let mut tunnel = method.dial_early_conn(Box::new(client), destination());

    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), tunnel.write(b"first-payload")).await;
    assert!(cancelled.is_err());

    let reader = tokio::spawn(async move {
        let mut wire = Vec::new();
        server.read_to_end(&mut wire).await.unwrap();
        wire
    });

    tunnel.write_all(b"second").await.unwrap();
    tunnel.shutdown().await.unwrap();
    drop(tunnel);

    // The header arrives once, followed only by the bytes of the retry
    let mut expected = destination().encode().unwrap();
    expected.extend_from_slice(b"second");
    assert_eq!(reader.await.unwrap(), expected);
}
