//! `polyserve_core` — protocol-agnostic connection pooling, graceful
//! shutdown orchestration, and request tracing for a multi-protocol
//! network server.
//!
//! This crate is the hard, reusable core of a server that binds HTTP/1.1,
//! HTTPS, HTTP/2, gRPC, and WebSocket/WSS listeners to a single
//! application handler. It owns:
//!
//! - [`pool`]: a protocol-agnostic connection pool — admission, keep-alive
//!   expiry, metrics, and a typed event stream.
//! - [`shutdown`] / [`shutdown_steps`]: an ordered, retryable,
//!   deadline-bounded graceful shutdown orchestrator.
//! - [`dispatch`] / [`trace`]: request-id propagation, a drain gate, and
//!   per-request timeouts applied uniformly across protocols.
//! - [`protocol`]: concrete listener implementations (HTTP/HTTPS/H2, gRPC,
//!   WS/WSS) wired to the pool and dispatch wrapper.
//! - [`supervisor`]: the multi-protocol supervisor tying one pool + one
//!   listener + one shutdown orchestrator together per configured
//!   protocol, with a unified start/stop/reconfigure contract.
//!
//! What it deliberately does *not* own: the application handler pipeline,
//! wire-protocol parsing beyond what's needed to extract a request id and
//! hand off a body, configuration file loading, or a metrics exporter —
//! those are the embedding application's responsibility. See
//! [`handler::RequestHandler`] for the boundary.
//!
//! # Quick start
//!
//! ```ignore
//! use polyserve_core::{
//!     config::{ListeningOptions, Protocol, ServerConfig},
//!     supervisor::Supervisor,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     polyserve_core::logging::init_tracing("info");
//!     let cfg = ServerConfig::from_env();
//!
//!     let supervisor = Supervisor::new(Arc::new(MyHandler), cfg.shutdown_deadline);
//!     supervisor
//!         .add_listener(ListeningOptions::builder(Protocol::Http, &cfg.default_host, 8080).build()?)
//!         .await;
//!     supervisor.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     supervisor.stop().await;
//!     Ok(())
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod shutdown;
pub mod shutdown_steps;
pub mod supervisor;
pub mod trace;

pub use config::{ListeningOptions, Protocol, ServerConfig, TlsMaterial};
pub use dispatch::{DispatchWrapper, DrainGate};
pub use error::{DispatchError, PoolError, ShutdownError, SupervisorError};
pub use handler::{
    CollisionPolicy, ParamDescriptor, ParamSource, RequestHandler, RequestPayload, ResponsePayload,
};
pub use pool::{ConnectionEntry, ConnectionPool, ConnectionState, PoolEvent, PoolMetricsSnapshot};
pub use protocol::ProtocolServer;
pub use shutdown::{ShutdownOptions, ShutdownOrchestrator, ShutdownResult, ShutdownStatus, ShutdownStep};
pub use supervisor::Supervisor;
pub use trace::TraceContext;
