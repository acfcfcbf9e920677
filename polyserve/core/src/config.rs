//! Typed configuration for listeners and the server as a whole.
//!
//! Mirrors the env-driven configuration style used throughout the crate:
//! every field has a sane default, `from_env` overrides defaults with
//! parsed environment variables and silently falls back to the default on
//! a parse failure rather than panicking.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Wire protocol a listener serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain HTTP/1.1.
    Http,
    /// HTTP/1.1 over TLS.
    Https,
    /// HTTP/2, cleartext or over TLS depending on `tls`.
    Http2,
    /// gRPC (HTTP/2 framing with protobuf payloads).
    Grpc,
    /// WebSocket, plain or over TLS depending on `tls`.
    Ws,
}

impl Protocol {
    /// Whether this protocol variant implies TLS must be configured.
    #[must_use]
    pub fn requires_tls(self) -> bool {
        matches!(self, Protocol::Https)
    }
}

/// TLS certificate/key material for a listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsMaterial {
    /// PEM-encoded certificate chain path.
    pub cert_path: String,
    /// PEM-encoded private key path.
    pub key_path: String,
}

/// Configuration for a single protocol listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListeningOptions {
    /// Protocol this listener serves.
    pub protocol: Protocol,
    /// Host to bind, e.g. `"0.0.0.0"`.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Optional TLS material; required when `protocol.requires_tls()`.
    pub tls: Option<TlsMaterial>,
    /// Maximum concurrently admitted connections for this listener's pool.
    pub max_connections: usize,
    /// Keep-alive idle timeout before a connection is eligible for sweep.
    pub idle_timeout: Duration,
    /// Per-request dispatch timeout.
    pub request_timeout: Duration,
}

impl ListeningOptions {
    /// Start building a [`ListeningOptions`] for the given protocol/address.
    #[must_use]
    pub fn builder(protocol: Protocol, host: impl Into<String>, port: u16) -> ListeningOptionsBuilder {
        ListeningOptionsBuilder {
            protocol,
            host: host.into(),
            port,
            tls: None,
            max_connections: 1024,
            idle_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Builder for [`ListeningOptions`].
#[derive(Debug, Clone)]
pub struct ListeningOptionsBuilder {
    protocol: Protocol,
    host: String,
    port: u16,
    tls: Option<TlsMaterial>,
    max_connections: usize,
    idle_timeout: Duration,
    request_timeout: Duration,
}

impl ListeningOptionsBuilder {
    /// Attach TLS material. Required before `build()` if the protocol needs TLS.
    #[must_use]
    pub fn tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Override the maximum concurrently admitted connections.
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Override the idle timeout before sweep eligibility.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Override the per-request dispatch timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Finalize the options. Returns an error if the protocol requires TLS
    /// and none was attached.
    pub fn build(self) -> Result<ListeningOptions, String> {
        if self.protocol.requires_tls() && self.tls.is_none() {
            return Err(format!("{:?} requires TLS material", self.protocol));
        }
        Ok(ListeningOptions {
            protocol: self.protocol,
            host: self.host,
            port: self.port,
            tls: self.tls,
            max_connections: self.max_connections,
            idle_timeout: self.idle_timeout,
            request_timeout: self.request_timeout,
        })
    }
}

/// Top-level server configuration: one set of pool/timeout defaults shared
/// by every listener unless a [`ListeningOptions`] overrides it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Default host used when a protocol's listener isn't explicitly configured.
    pub default_host: String,
    /// Default max connections applied to listeners created without override.
    pub default_max_connections: usize,
    /// Default idle timeout applied to listeners created without override.
    pub default_idle_timeout: Duration,
    /// Global shutdown deadline across all steps and protocols.
    pub shutdown_deadline: Duration,
    /// Whether TLS is mandatory for every listener, regardless of protocol.
    pub require_tls: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_host: "127.0.0.1".to_string(),
            default_max_connections: 1024,
            default_idle_timeout: Duration::from_secs(60),
            shutdown_deadline: Duration::from_secs(30),
            require_tls: false,
        }
    }
}

impl ServerConfig {
    /// Build configuration from `POLYSERVE_*` environment variables, falling
    /// back to [`ServerConfig::default`] field-by-field when a variable is
    /// absent or fails to parse.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_host: env::var("POLYSERVE_HOST").unwrap_or(defaults.default_host),
            default_max_connections: env::var("POLYSERVE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_max_connections),
            default_idle_timeout: env::var("POLYSERVE_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_idle_timeout),
            shutdown_deadline: env::var("POLYSERVE_SHUTDOWN_DEADLINE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_deadline),
            require_tls: env::var("POLYSERVE_REQUIRE_TLS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.require_tls),
        }
    }

    /// Relaxed preset for local development: generous timeouts, no TLS.
    #[must_use]
    pub fn development() -> Self {
        Self {
            default_host: "127.0.0.1".to_string(),
            default_max_connections: 256,
            default_idle_timeout: Duration::from_secs(300),
            shutdown_deadline: Duration::from_secs(10),
            require_tls: false,
        }
    }

    /// Strict preset for production: short timeouts, TLS mandatory.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            default_host: "0.0.0.0".to_string(),
            default_max_connections: 4096,
            default_idle_timeout: Duration::from_secs(30),
            shutdown_deadline: Duration::from_secs(60),
            require_tls: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_requires_tls_material() {
        let err = ListeningOptions::builder(Protocol::Https, "0.0.0.0", 443)
            .build()
            .unwrap_err();
        assert!(err.contains("requires TLS"));
    }

    #[test]
    fn http_builds_without_tls() {
        let opts = ListeningOptions::builder(Protocol::Http, "0.0.0.0", 8080)
            .max_connections(10)
            .build()
            .unwrap();
        assert_eq!(opts.max_connections, 10);
        assert!(opts.tls.is_none());
    }

    #[test]
    fn presets_differ() {
        let dev = ServerConfig::development();
        let strict = ServerConfig::strict();
        assert!(!dev.require_tls);
        assert!(strict.require_tls);
        assert!(dev.default_idle_timeout > strict.default_idle_timeout);
    }
}
