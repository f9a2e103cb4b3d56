//! Integration tests for the HTTP gateway.
//!
//! These tests run the real server on an ephemeral port and talk to it
//! over plain TCP, checking the listing and streaming endpoints and that a
//! client hanging up releases its subscription.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sensorcast_core::Reading;
use sensorcastd::registry::{SensorSet, StreamRegistry};
use sensorcastd::server::{GatewayServer, ServerError};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Helpers
// ============================================================================

const IO_TIMEOUT: Duration = Duration::from_secs(3);

struct TestGateway {
    addr: SocketAddr,
    registry: Arc<StreamRegistry>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), ServerError>>,
}

async fn start_gateway() -> TestGateway {
    let sets = [
        SensorSet::new("touch+sound:/dev/ttyUSB0:readings-per-line".parse().unwrap()),
        SensorSet::new("imu:/dev/ttyUSB1:bytes".parse().unwrap()),
    ];
    let registry = Arc::new(StreamRegistry::build(&sets).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();

    let server = GatewayServer::new(addr, Arc::clone(&registry), cancel.clone());
    let task = tokio::spawn(server.serve(listener));

    TestGateway {
        addr,
        registry,
        cancel,
        task,
    }
}

/// Sends a GET and returns the connection positioned after the request.
async fn send_get(addr: SocketAddr, path: &str, close: bool) -> TcpStream {
    let mut conn = TcpStream::connect(addr).await.unwrap();
    let connection = if close { "close" } else { "keep-alive" };
    let request =
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: {connection}\r\n\r\n");
    conn.write_all(request.as_bytes()).await.unwrap();
    conn
}

/// Performs a complete request and returns the raw response text.
async fn fetch(addr: SocketAddr, path: &str) -> String {
    let mut conn = send_get(addr, path, true).await;
    let mut raw = Vec::new();
    timeout(IO_TIMEOUT, conn.read_to_end(&mut raw))
        .await
        .expect("response should complete")
        .unwrap();
    String::from_utf8(raw).unwrap()
}

/// Reads lines until one contains `needle`.
async fn read_until_contains(reader: &mut BufReader<TcpStream>, needle: &str) -> Vec<String> {
    let mut seen = Vec::new();
    timeout(IO_TIMEOUT, async {
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await.unwrap();
            assert!(n > 0, "connection closed before {needle:?}; saw {seen:?}");
            let found = line.contains(needle);
            seen.push(line);
            if found {
                break;
            }
        }
    })
    .await
    .expect("expected line should arrive");
    seen
}

async fn wait_for_subscribers(gateway: &TestGateway, sensor: &str, count: usize) {
    let stream = gateway.registry.lookup(sensor).unwrap().clone();
    timeout(IO_TIMEOUT, async {
        while stream.subscriber_count() != count {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count should settle");
}

// ============================================================================
// Listing Tests
// ============================================================================

#[tokio::test]
async fn test_list_sensors_over_tcp() {
    let gateway = start_gateway().await;

    let response = fetch(gateway.addr, "/").await;

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains(r#"["touch","sound","imu"]"#), "{response}");
    assert!(response
        .to_ascii_lowercase()
        .contains("access-control-allow-origin: *"));

    gateway.cancel.cancel();
}

#[tokio::test]
async fn test_unknown_sensor_is_404() {
    let gateway = start_gateway().await;

    let response = fetch(gateway.addr, "/pressure").await;

    assert!(response.starts_with("HTTP/1.1 404"), "{response}");
    gateway.cancel.cancel();
}

// ============================================================================
// Streaming Tests
// ============================================================================

#[tokio::test]
async fn test_stream_delivers_readings_as_ndjson() {
    let gateway = start_gateway().await;
    let conn = send_get(gateway.addr, "/touch", false).await;
    let mut reader = BufReader::new(conn);

    wait_for_subscribers(&gateway, "touch", 1).await;
    let touch = gateway.registry.lookup("touch").unwrap();

    touch.publish(Reading::Value(12));
    let head = read_until_contains(&mut reader, r#"{"reading":12}"#).await;
    let head = head.concat().to_ascii_lowercase();
    assert!(head.starts_with("http/1.1 200"), "{head}");
    assert!(head.contains("content-type: application/x-ndjson"), "{head}");

    touch.publish(Reading::Disconnected);
    read_until_contains(&mut reader, r#"{"disconnected":true}"#).await;

    touch.publish(Reading::Value(-3));
    read_until_contains(&mut reader, r#"{"reading":-3}"#).await;

    gateway.cancel.cancel();
}

#[tokio::test]
async fn test_client_disconnect_releases_subscription() {
    let gateway = start_gateway().await;
    let conn = send_get(gateway.addr, "/sound", false).await;
    let mut reader = BufReader::new(conn);

    wait_for_subscribers(&gateway, "sound", 1).await;
    let sound = gateway.registry.lookup("sound").unwrap().clone();
    sound.publish(Reading::Value(1));
    read_until_contains(&mut reader, r#"{"reading":1}"#).await;

    drop(reader);

    // The closed socket is noticed on the next write; keep publishing.
    timeout(IO_TIMEOUT, async {
        let mut i = 0;
        while sound.subscriber_count() != 0 {
            sound.publish(Reading::Value(i));
            i += 1;
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription should be released after the client leaves");

    gateway.cancel.cancel();
}

#[tokio::test]
async fn test_other_sensors_unaffected_by_subscription() {
    let gateway = start_gateway().await;
    let conn = send_get(gateway.addr, "/imu", false).await;
    let _reader = BufReader::new(conn);

    wait_for_subscribers(&gateway, "imu", 1).await;
    assert_eq!(
        gateway.registry.lookup("touch").unwrap().subscriber_count(),
        0
    );

    gateway.cancel.cancel();
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_cancel_stops_server_with_open_stream() {
    let gateway = start_gateway().await;
    let conn = send_get(gateway.addr, "/touch", false).await;
    let mut reader = BufReader::new(conn);
    wait_for_subscribers(&gateway, "touch", 1).await;

    gateway.cancel.cancel();

    let result = timeout(IO_TIMEOUT, gateway.task)
        .await
        .expect("server should stop promptly")
        .unwrap();
    assert!(result.is_ok());

    // The stream body ended, so the client sees the connection close.
    let mut rest = Vec::new();
    timeout(IO_TIMEOUT, reader.read_to_end(&mut rest))
        .await
        .expect("connection should close")
        .unwrap();
    assert_eq!(gateway.registry.lookup("touch").unwrap().subscriber_count(), 0);
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();

    let server = GatewayServer::new(
        addr,
        Arc::new(StreamRegistry::default()),
        CancellationToken::new(),
    );
    let err = server.run().await.unwrap_err();

    assert!(matches!(err, ServerError::Bind { .. }));
}
