//! `polyserve-daemon` — a standalone multi-protocol server binary built on
//! [`polyserve_core`]. Wires a CLI-configured set of listeners to a
//! demo request handler and drives the supervisor's start/stop lifecycle,
//! including signal-triggered graceful shutdown.
//!
//! The handler here is a placeholder: real deployments embed
//! `polyserve-core` in an application that supplies its own
//! [`polyserve_core::handler::RequestHandler`] implementing the actual
//! business logic. This binary exists to exercise the supervisor
//! end-to-end and as a reference for how to wire one up.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use polyserve_core::config::{ListeningOptions, Protocol, ServerConfig};
use polyserve_core::handler::{RequestHandler, RequestPayload, ResponsePayload};
use polyserve_core::supervisor::Supervisor;
use polyserve_core::trace::TraceContext;

#[derive(Parser, Debug)]
#[command(name = "polyserve-daemon", about = "Multi-protocol server supervisor")]
struct Args {
    /// Host to bind every enabled listener to.
    #[arg(long, env = "POLYSERVE_HOST")]
    host: Option<String>,

    /// HTTP port. Set to 0 to disable the HTTP listener.
    #[arg(long, env = "POLYSERVE_HTTP_PORT", default_value_t = 8080)]
    http_port: u16,

    /// WebSocket port. Set to 0 to disable the WS listener.
    #[arg(long, env = "POLYSERVE_WS_PORT", default_value_t = 8081)]
    ws_port: u16,

    /// gRPC port. Set to 0 to disable the gRPC listener.
    #[arg(long, env = "POLYSERVE_GRPC_PORT", default_value_t = 0)]
    grpc_port: u16,

    /// Log filter passed to `RUST_LOG` when unset.
    #[arg(long, default_value = "info")]
    log_filter: String,
}

/// Handler that echoes the request body back verbatim. Stands in for the
/// application handler pipeline, which this crate treats as an external
/// collaborator (spec.md §1 Out of scope).
struct EchoHandler;

#[async_trait::async_trait]
impl RequestHandler for EchoHandler {
    async fn handle(
        &self,
        ctx: &TraceContext,
        request: RequestPayload,
    ) -> Result<ResponsePayload, Box<dyn std::error::Error + Send + Sync>> {
        info!(request_id = %ctx.request_id, protocol = ctx.protocol, "handled request");
        Ok(ResponsePayload { body: request.body })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    polyserve_core::logging::init_tracing(&args.log_filter);

    let server_config = ServerConfig::from_env();
    let host = args.host.unwrap_or(server_config.default_host.clone());

    let supervisor = Arc::new(Supervisor::new(
        Arc::new(EchoHandler),
        server_config.shutdown_deadline,
    ));

    if args.http_port != 0 {
        supervisor
            .add_listener(
                ListeningOptions::builder(Protocol::Http, &host, args.http_port)
                    .max_connections(server_config.default_max_connections)
                    .idle_timeout(server_config.default_idle_timeout)
                    .build()
                    .map_err(anyhow::Error::msg)?,
            )
            .await;
    }
    if args.ws_port != 0 {
        supervisor
            .add_listener(
                ListeningOptions::builder(Protocol::Ws, &host, args.ws_port)
                    .max_connections(server_config.default_max_connections)
                    .idle_timeout(server_config.default_idle_timeout)
                    .build()
                    .map_err(anyhow::Error::msg)?,
            )
            .await;
    }
    if args.grpc_port != 0 {
        supervisor
            .add_listener(
                ListeningOptions::builder(Protocol::Grpc, &host, args.grpc_port)
                    .max_connections(server_config.default_max_connections)
                    .idle_timeout(server_config.default_idle_timeout)
                    .build()
                    .map_err(anyhow::Error::msg)?,
            )
            .await;
    }

    supervisor.start().await?;
    info!(host = %host, "polyserve-daemon listening");

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");

    let results = supervisor.stop().await;
    for ((protocol, port), result) in results {
        if result.status != polyserve_core::shutdown::ShutdownStatus::Completed {
            warn!(?protocol, port, status = ?result.status, "listener did not shut down cleanly");
        } else {
            info!(?protocol, port, total_ms = ?result.total_elapsed.as_millis(), "listener shut down");
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
