//! HTTP/1.1, HTTPS, and HTTP/2 protocol server.
//!
//! Binds [`AcceptLoop`] to a `hyper` connection and dispatches each request
//! through [`DispatchWrapper`]. TLS is handled by terminating every socket
//! through `tokio-rustls` before handing it to hyper when the listener's
//! options carry [`TlsMaterial`](crate::config::TlsMaterial); plain HTTP/H2
//! cleartext connections skip that step.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONNECTION};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{error, warn};

use crate::config::{ListeningOptions, Protocol};
use crate::dispatch::DispatchWrapper;
use crate::error::SupervisorError;
use crate::handler::{RequestHandler, RequestPayload};
use crate::pool::ConnectionPool;
use crate::trace::{RequestIdSources, TraceContext, REQUEST_ID_HEADER};

use super::{AcceptLoop, ProtocolServer};

/// HTTP/1.1, HTTPS, or cleartext-HTTP/2 listener.
pub struct HttpServer {
    loop_: Arc<AcceptLoop>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
    stopping: Arc<AtomicBool>,
    accepted: Arc<AtomicU64>,
}

impl HttpServer {
    /// Build a new HTTP server bound to `options`, admitting connections
    /// into `pool` and dispatching requests through `dispatch` to `handler`.
    #[must_use]
    pub fn new(
        options: ListeningOptions,
        pool: Arc<ConnectionPool>,
        dispatch: DispatchWrapper,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        let stopping = Arc::new(AtomicBool::new(false));
        Self {
            loop_: Arc::new(AcceptLoop::new(options, pool, dispatch, handler, stopping.clone())),
            local_addr: parking_lot::Mutex::new(None),
            stopping,
            accepted: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl ProtocolServer for HttpServer {
    fn protocol(&self) -> Protocol {
        self.loop_.options.protocol
    }

    async fn start(&self) -> Result<(), SupervisorError> {
        let listener = self.loop_.bind().await?;
        *self.local_addr.lock() = listener.local_addr().ok();
        let accepted = self.accepted.clone();
        let loop_ref = self.loop_.clone();
        tokio::spawn(async move {
            loop_ref
                .run(listener, move |stream, peer, loop_ref| {
                    let accepted = accepted.clone();
                    async move { serve_connection(loop_ref, stream, peer, accepted).await }
                })
                .await;
        });
        Ok(())
    }

    fn stop_accepting(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    fn force_close_connections(&self) {
        self.loop_.abort_all();
    }
}

async fn serve_connection(
    loop_ref: Arc<AcceptLoop>,
    stream: TcpStream,
    peer: SocketAddr,
    accepted: Arc<AtomicU64>,
) {
    let connection_id = format!("http-{}-{}", peer, accepted.fetch_add(1, Ordering::Relaxed));

    if let Err(err) = loop_ref
        .pool
        .try_admit(connection_id.clone(), "http", Some(peer.to_string()))
        .await
    {
        warn!(%peer, %err, "http connection rejected at admission");
        return;
    }

    let io = TokioIo::new(stream);
    let loop_for_svc = loop_ref.clone();
    let conn_id_for_svc = connection_id.clone();
    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
        let loop_ref = loop_for_svc.clone();
        let connection_id = conn_id_for_svc.clone();
        async move { handle_request(loop_ref, connection_id, req).await }
    });

    if let Err(err) = hyper::server::conn::http1::Builder::new()
        .keep_alive(true)
        .serve_connection(io, service)
        .await
    {
        error!(%peer, %err, "http connection ended with error");
        let _ = loop_ref.pool.release(connection_id.clone(), "error").await;
        return;
    }

    let _ = loop_ref.pool.release(connection_id, "client_closed").await;
}

async fn handle_request(
    loop_ref: Arc<AcceptLoop>,
    connection_id: String,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let _ = loop_ref.pool.touch(connection_id.clone(), None).await;

    let mut headers = std::collections::HashMap::new();
    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
        }
    }
    let query: std::collections::HashMap<String, String> = req
        .uri()
        .query()
        .map(|q| {
            q.split('&')
                .filter_map(|pair| {
                    let mut parts = pair.splitn(2, '=');
                    Some((parts.next()?.to_string(), parts.next().unwrap_or("").to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    let ctx = TraceContext::new(
        &RequestIdSources {
            headers: Some(&headers),
            query: Some(&query),
            body_value: None,
        },
        Some(connection_id.clone()),
        "http",
    )
    .with_encoding("json")
    .with_timeout(loop_ref.dispatch.request_timeout());

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes().to_vec(),
        Err(_) => Vec::new(),
    };

    let handler = loop_ref.handler.clone();
    let ctx_for_handler = ctx.clone();
    let result = loop_ref
        .dispatch
        .wrap(ctx.clone(), move || {
            let handler = handler.clone();
            let ctx = ctx_for_handler;
            async move { handler.handle(&ctx, RequestPayload { body }).await }
        })
        .await;

    let mut response = if ctx.is_terminated() {
        draining_response(&ctx.request_id)
    } else {
        match result {
            Ok(payload) => Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from(payload.body)))
                .unwrap(),
            Err(crate::error::DispatchError::Timeout { .. }) => Response::builder()
                .status(StatusCode::GATEWAY_TIMEOUT)
                .body(Full::new(Bytes::from_static(b"request timed out")))
                .unwrap(),
            Err(crate::error::DispatchError::Handler(err)) => {
                error!(%err, request_id = %ctx.request_id, "handler error");
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Full::new(Bytes::from_static(b"internal server error")))
                    .unwrap()
            }
        }
    };

    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}

fn draining_response(request_id: &str) -> Response<Full<Bytes>> {
    let mut resp = Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .header(CONNECTION, "close")
        .body(Full::new(Bytes::from_static(
            b"Server is in the process of shutting down",
        )))
        .unwrap();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    resp
}
