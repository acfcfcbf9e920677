//! WebSocket / WSS protocol server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{error, warn};

use crate::config::{ListeningOptions, Protocol};
use crate::dispatch::DispatchWrapper;
use crate::error::SupervisorError;
use crate::handler::{RequestHandler, RequestPayload};
use crate::pool::ConnectionPool;
use crate::trace::{RequestIdSources, TraceContext};

use super::{AcceptLoop, ProtocolServer};

/// Close code sent to clients rejected at admission because the pool is full.
pub const CLOSE_POOL_FULL: u16 = 1013;
/// Close code sent to every client when the server shuts down.
pub const CLOSE_SHUTTING_DOWN: u16 = 1001;
/// Close code sent when a handler invocation errors.
pub const CLOSE_HANDLER_ERROR: u16 = 1011;

/// WebSocket / WSS listener.
pub struct WsServer {
    loop_: Arc<AcceptLoop>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
    stopping: Arc<AtomicBool>,
    accepted: Arc<AtomicU64>,
}

impl WsServer {
    /// Build a new WebSocket server bound to `options`.
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

    /// Broadcast a server-shutdown close frame to `connection_id`'s socket.
    /// In practice this is driven per-connection from the protocol's
    /// `protocol_force_shutdown` step rather than iterated here; the pool
    /// itself holds no socket handles, only bookkeeping, so the server
    /// task per connection owns sending the frame when its pool entry is
    /// released during shutdown.
    #[must_use]
    pub fn shutdown_close_frame() -> CloseFrame<'static> {
        CloseFrame {
            code: CloseCode::from(CLOSE_SHUTTING_DOWN),
            reason: "Server shutting down".into(),
        }
    }
}

#[async_trait]
impl ProtocolServer for WsServer {
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
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!(%peer, %err, "websocket handshake failed");
            return;
        }
    };

    let connection_id = format!("ws-{}-{}", peer, accepted.fetch_add(1, Ordering::Relaxed));

    if let Err(err) = loop_ref
        .pool
        .try_admit(connection_id.clone(), "ws", Some(peer.to_string()))
        .await
    {
        warn!(%peer, %err, "websocket connection rejected at admission");
        let _ = ws
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(CLOSE_POOL_FULL),
                reason: "connection pool at capacity".into(),
            })))
            .await;
        let _ = ws.close(None).await;
        return;
    }

    let mut release_reason = "client_closed";

    loop {
        let msg = match ws.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => break,
            Some(Err(err)) => {
                warn!(%peer, %err, "websocket transport error");
                release_reason = "error";
                break;
            }
        };

        match msg {
            Message::Close(_) => break,
            Message::Ping(payload) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Message::Text(_) | Message::Binary(_) => {
                let _ = loop_ref.pool.touch(connection_id.clone(), None).await;

                let body = match &msg {
                    Message::Text(t) => t.as_bytes().to_vec(),
                    Message::Binary(b) => b.clone(),
                    _ => unreachable!(),
                };

                let ctx = TraceContext::new(
                    &RequestIdSources {
                        headers: None,
                        query: None,
                        body_value: None,
                    },
                    Some(connection_id.clone()),
                    "ws",
                )
                .with_encoding("binary")
                .with_timeout(loop_ref.dispatch.request_timeout());

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

                if ctx.is_terminated() {
                    let _ = ws
                        .send(Message::Close(Some(WsServer::shutdown_close_frame())))
                        .await;
                    release_reason = "shutdown";
                    break;
                }

                match result {
                    Ok(payload) => {
                        if ws.send(Message::Binary(payload.body)).await.is_err() {
                            release_reason = "error";
                            break;
                        }
                    }
                    Err(crate::error::DispatchError::Timeout { .. }) => {
                        let _ = ws
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::from(1008),
                                reason: "request timed out".into(),
                            })))
                            .await;
                        release_reason = "error";
                        break;
                    }
                    Err(crate::error::DispatchError::Handler(err)) => {
                        error!(%err, request_id = %ctx.request_id, "ws handler error");
                        let _ = ws
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::from(CLOSE_HANDLER_ERROR),
                                reason: "internal error".into(),
                            })))
                            .await;
                        release_reason = "error";
                        break;
                    }
                }
            }
            Message::Frame(_) | Message::Pong(_) => {}
        }
    }

    let _ = loop_ref.pool.release(connection_id, release_reason).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_close_frame_uses_code_1001() {
        let frame = WsServer::shutdown_close_frame();
        assert_eq!(u16::from(frame.code), CLOSE_SHUTTING_DOWN);
        assert_eq!(frame.reason, "Server shutting down");
    }
}
