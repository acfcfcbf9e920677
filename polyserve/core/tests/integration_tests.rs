//! End-to-end tests exercising the supervisor/HTTP listener pair over a
//! real TCP socket, and the pool-cap / graceful-shutdown scenarios from
//! the testable-properties section of the design: pool admission caps,
//! drain-gate responses, and terminal shutdown status.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use polyserve_core::config::{ListeningOptions, Protocol};
use polyserve_core::handler::{RequestHandler, RequestPayload, ResponsePayload};
use polyserve_core::supervisor::Supervisor;
use polyserve_core::trace::TraceContext;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct Echo;

#[async_trait::async_trait]
impl RequestHandler for Echo {
    async fn handle(
        &self,
        _ctx: &TraceContext,
        request: RequestPayload,
    ) -> Result<ResponsePayload, Box<dyn std::error::Error + Send + Sync>> {
        Ok(ResponsePayload { body: request.body })
    }
}

async fn read_http_response(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

#[tokio::test]
async fn http_request_round_trips_and_echoes_request_id() {
    let supervisor = Supervisor::new(Arc::new(Echo), Duration::from_secs(5));
    supervisor
        .add_listener(
            ListeningOptions::builder(Protocol::Http, "127.0.0.1", 0)
                .build()
                .unwrap(),
        )
        .await;
    supervisor.start().await.unwrap();

    // Give the accept loop a moment to bind before we read the address.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let server = supervisor
        .native_server(Some(Protocol::Http), None)
        .await
        .expect("http server registered");
    let addr = server.local_addr().expect("listener bound");

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET / HTTP/1.1\r\nHost: localhost\r\nX-Request-Id: test-req-1\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
    let response = read_http_response(&mut stream).await;

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("x-request-id: test-req-1") || response.contains("X-Request-Id: test-req-1"));

    let results = supervisor.stop().await;
    assert_eq!(results.len(), 1);
    for result in results.values() {
        assert_eq!(result.status, polyserve_core::shutdown::ShutdownStatus::Completed);
    }
}

#[tokio::test]
async fn pool_admission_cap_rejects_past_capacity() {
    use polyserve_core::pool::ConnectionPool;

    let pool = ConnectionPool::spawn(2, Duration::from_secs(60));
    pool.try_admit("a", "ws", None).await.unwrap();
    pool.try_admit("b", "ws", None).await.unwrap();
    let rejected = pool.try_admit("c", "ws", None).await;
    assert!(rejected.is_err());

    let snapshot = pool.metrics();
    assert_eq!(snapshot.current_connections, 2);
    assert_eq!(snapshot.total_rejected, 1);
}

#[tokio::test]
async fn supervisor_stop_is_idempotent_with_respect_to_pool_state() {
    let supervisor = Supervisor::new(Arc::new(Echo), Duration::from_secs(5));
    supervisor
        .add_listener(
            ListeningOptions::builder(Protocol::Ws, "127.0.0.1", 0)
                .build()
                .unwrap(),
        )
        .await;
    supervisor.start().await.unwrap();
    let results = supervisor.stop().await;
    assert_eq!(results.len(), 1);
    for result in results.values() {
        assert!(matches!(
            result.status,
            polyserve_core::shutdown::ShutdownStatus::Completed
        ));
    }
}
