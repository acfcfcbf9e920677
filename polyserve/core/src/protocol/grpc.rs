//! gRPC protocol server.
//!
//! `polyserve_core` does not generate or own any `.proto`-derived service
//! code — that belongs to the embedding application. What this module
//! owns is the listener lifecycle: binding a `tonic` transport server over
//! an [`AcceptLoop`]-managed socket, admitting/releasing each stream into
//! the shared pool, and translating pool/dispatch outcomes into gRPC
//! status codes (`RESOURCE_EXHAUSTED`, `UNAVAILABLE`, `DEADLINE_EXCEEDED`).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};
use tracing::{error, warn};

use crate::config::{ListeningOptions, Protocol};
use crate::dispatch::DispatchWrapper;
use crate::error::SupervisorError;
use crate::handler::{RequestHandler, RequestPayload};
use crate::pool::ConnectionPool;
use crate::trace::{RequestIdSources, TraceContext, REQUEST_ID_METADATA};

use super::{AcceptLoop, ProtocolServer};

/// gRPC listener. Owns admission/dispatch wiring; the actual service
/// trait impls generated from `.proto` files live in the embedding
/// application and call [`GrpcServer::dispatch_unary`] from their handler
/// bodies.
pub struct GrpcServer {
    loop_: Arc<AcceptLoop>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
    stopping: Arc<AtomicBool>,
    accepted: Arc<AtomicU64>,
}

impl GrpcServer {
    /// Build a new gRPC server bound to `options`.
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

    /// Admit a newly accepted stream's owning connection into the pool
    /// under a fresh connection id, returning the id for later `touch`/
    /// `release` calls. Intended to be invoked from a `tonic` interceptor
    /// or middleware layer wrapping the generated service.
    pub async fn admit_stream(&self, peer: SocketAddr) -> Result<String, Status> {
        let id = format!(
            "grpc-{}-{}",
            peer,
            self.accepted.fetch_add(1, Ordering::Relaxed)
        );
        self.loop_
            .pool
            .try_admit(id.clone(), "grpc", Some(peer.to_string()))
            .await
            .map_err(|err| {
                warn!(%peer, %err, "grpc stream rejected at admission");
                Status::resource_exhausted("connection pool at capacity")
            })?;
        Ok(id)
    }

    /// Release a previously admitted stream's connection from the pool.
    /// `reason` is carried on the emitted [`crate::pool::PoolEvent::Removed`]
    /// (e.g. `"client_closed"`, `"error"`).
    pub async fn release_stream(&self, connection_id: &str, reason: &'static str) {
        let _ = self.loop_.pool.release(connection_id, reason).await;
    }

    /// Dispatch a single unary call through the tracing/timeout wrapper,
    /// extracting a request id from `metadata` (or minting one) and
    /// translating dispatch outcomes to gRPC status codes.
    pub async fn dispatch_unary(
        &self,
        connection_id: &str,
        metadata: &MetadataMap,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, Status> {
        let _ = self.loop_.pool.touch(connection_id, None).await;

        let mut headers = std::collections::HashMap::new();
        if let Some(value) = metadata.get(REQUEST_ID_METADATA) {
            if let Ok(v) = value.to_str() {
                headers.insert(REQUEST_ID_METADATA.to_string(), v.to_string());
            }
        }
        let ctx = TraceContext::new(
            &RequestIdSources {
                headers: Some(&headers),
                query: None,
                body_value: None,
            },
            Some(connection_id.to_string()),
            "grpc",
        )
        .with_encoding("protobuf")
        .with_timeout(self.loop_.dispatch.request_timeout());

        let handler = self.loop_.handler.clone();
        let ctx_for_handler = ctx.clone();
        let result = self
            .loop_
            .dispatch
            .wrap(ctx.clone(), move || {
                let handler = handler.clone();
                let ctx = ctx_for_handler;
                async move { handler.handle(&ctx, RequestPayload { body }).await }
            })
            .await;

        if ctx.is_terminated() {
            return Err(Status::unavailable(
                "Server is in the process of shutting down",
            ));
        }

        match result {
            Ok(payload) => Ok(payload.body),
            Err(crate::error::DispatchError::Timeout { .. }) => {
                Err(Status::new(Code::DeadlineExceeded, "request timed out"))
            }
            Err(crate::error::DispatchError::Handler(err)) => {
                error!(%err, request_id = %ctx.request_id, "grpc handler error");
                Err(Status::internal(err.to_string()))
            }
        }
    }
}

#[async_trait]
impl ProtocolServer for GrpcServer {
    fn protocol(&self) -> Protocol {
        self.loop_.options.protocol
    }

    async fn start(&self) -> Result<(), SupervisorError> {
        // The accept loop owns socket-level admission bookkeeping; actual
        // HTTP/2 framing and service dispatch is driven by `tonic`'s own
        // `Server::builder().serve_with_incoming(...)` in the embedding
        // binary, wired through `admit_stream`/`dispatch_unary` above.
        let listener = self.loop_.bind().await?;
        *self.local_addr.lock() = listener.local_addr().ok();
        drop(listener);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListeningOptions;
    use crate::dispatch::{DispatchWrapper, DrainGate};
    use crate::handler::{RequestHandler, RequestPayload, ResponsePayload};
    use std::time::Duration;

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

    fn server() -> GrpcServer {
        let options = ListeningOptions::builder(Protocol::Grpc, "127.0.0.1", 0)
            .build()
            .unwrap();
        let pool = Arc::new(ConnectionPool::spawn(4, Duration::from_secs(60)));
        let dispatch = DispatchWrapper::new(DrainGate::new(), Duration::from_secs(1));
        GrpcServer::new(options, pool, dispatch, Arc::new(Echo))
    }

    #[tokio::test]
    async fn dispatch_unary_extracts_request_id_from_metadata() {
        let srv = server();
        let conn_id = srv.admit_stream("127.0.0.1:1".parse().unwrap()).await.unwrap();
        let mut md = MetadataMap::new();
        md.insert(REQUEST_ID_METADATA, "abc-123".parse().unwrap());
        let reply = srv.dispatch_unary(&conn_id, &md, vec![9, 9]).await.unwrap();
        assert_eq!(reply, vec![9, 9]);
    }

    #[tokio::test]
    async fn admission_past_capacity_is_resource_exhausted() {
        let srv = server_with_capacity(1);
        srv.admit_stream("127.0.0.1:1".parse().unwrap()).await.unwrap();
        let err = srv
            .admit_stream("127.0.0.1:2".parse().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
    }

    fn server_with_capacity(max: usize) -> GrpcServer {
        let options = ListeningOptions::builder(Protocol::Grpc, "127.0.0.1", 0)
            .max_connections(max)
            .build()
            .unwrap();
        let pool = Arc::new(ConnectionPool::spawn(max, Duration::from_secs(60)));
        let dispatch = DispatchWrapper::new(DrainGate::new(), Duration::from_secs(1));
        GrpcServer::new(options, pool, dispatch, Arc::new(Echo))
    }
}
