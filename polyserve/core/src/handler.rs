//! Application handler extension point.
//!
//! The pool, dispatch wrapper, and supervisor never inspect application
//! payloads; they only know how to invoke a [`RequestHandler`] and how to
//! describe, for diagnostics, where each of its parameters is sourced
//! from. There is no reflection-based binding here — every parameter a
//! handler wants is declared explicitly via [`ParamDescriptor`].

use async_trait::async_trait;

use crate::trace::TraceContext;

/// Where a bound parameter's value originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
    /// A request/connection header or gRPC metadata entry.
    Header,
    /// A query string parameter.
    Query,
    /// A value extracted from the request body.
    Body,
    /// A path template segment.
    Path,
    /// An uploaded file part of a multipart body.
    File,
    /// Resolved from more than one source (query and body), using the
    /// descriptor's [`CollisionPolicy`] to break ties.
    Combined,
}

/// Resolves a key collision when the same parameter name is present in
/// more than one source a descriptor could draw from (e.g. both the query
/// string and the body). Spec.md §9 Open Question: the source hard-codes
/// "post wins"; here it is a per-descriptor override with post-wins
/// (`BodyWins`) as the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// The later-evaluated source (body) overrides the query value.
    #[default]
    BodyWins,
    /// The query value overrides the body value.
    QueryWins,
}

/// Describes one parameter a handler declares it needs, for introspection
/// and error reporting (e.g. "missing required query parameter `id`").
#[derive(Debug, Clone)]
pub struct ParamDescriptor {
    /// Name of the parameter as it appears in its source.
    pub name: String,
    /// Where to read it from.
    pub source: ParamSource,
    /// Whether dispatch should fail if the parameter is absent.
    pub required: bool,
    /// How to resolve a query/body collision for this parameter. Only
    /// meaningful when `source` is [`ParamSource::Combined`].
    pub collision_policy: CollisionPolicy,
}

impl ParamDescriptor {
    /// Declare a required parameter.
    #[must_use]
    pub fn required(name: impl Into<String>, source: ParamSource) -> Self {
        Self {
            name: name.into(),
            source,
            required: true,
            collision_policy: CollisionPolicy::default(),
        }
    }

    /// Declare an optional parameter.
    #[must_use]
    pub fn optional(name: impl Into<String>, source: ParamSource) -> Self {
        Self {
            name: name.into(),
            source,
            required: false,
            collision_policy: CollisionPolicy::default(),
        }
    }

    /// Override the collision policy for a [`ParamSource::Combined`] parameter.
    #[must_use]
    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }
}

/// An opaque request payload handed to a [`RequestHandler`]. Protocol
/// servers populate this from their native request representation.
#[derive(Debug, Clone, Default)]
pub struct RequestPayload {
    /// Raw body bytes, if any.
    pub body: Vec<u8>,
}

/// An opaque response payload returned by a [`RequestHandler`].
#[derive(Debug, Clone, Default)]
pub struct ResponsePayload {
    /// Raw body bytes to write back.
    pub body: Vec<u8>,
}

/// The application-level request handler. Implemented by the embedding
/// application, not by `polyserve_core` itself — this crate only defines
/// the contract and drives it through [`crate::dispatch::DispatchWrapper`].
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Parameters this handler declares, for diagnostics/validation.
    fn params(&self) -> &[ParamDescriptor] {
        &[]
    }

    /// Handle one request.
    async fn handle(
        &self,
        ctx: &TraceContext,
        request: RequestPayload,
    ) -> Result<ResponsePayload, Box<dyn std::error::Error + Send + Sync>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        fn params(&self) -> &[ParamDescriptor] {
            &[]
        }

        async fn handle(
            &self,
            _ctx: &TraceContext,
            request: RequestPayload,
        ) -> Result<ResponsePayload, Box<dyn std::error::Error + Send + Sync>> {
            Ok(ResponsePayload { body: request.body })
        }
    }

    #[tokio::test]
    async fn echo_handler_returns_body() {
        let handler = Echo;
        let ctx = TraceContext {
            request_id: "r1".into(),
            connection_id: None,
            protocol: "http",
        };
        let resp = handler
            .handle(&ctx, RequestPayload { body: vec![1, 2, 3] })
            .await
            .unwrap();
        assert_eq!(resp.body, vec![1, 2, 3]);
    }

    #[test]
    fn descriptor_builders_set_required_flag() {
        let req = ParamDescriptor::required("id", ParamSource::Path);
        let opt = ParamDescriptor::optional("debug", ParamSource::Query);
        assert!(req.required);
        assert!(!opt.required);
    }

    #[test]
    fn collision_policy_defaults_to_body_wins() {
        let combined = ParamDescriptor::optional("q", ParamSource::Combined);
        assert_eq!(combined.collision_policy, CollisionPolicy::BodyWins);
    }

    #[test]
    fn collision_policy_can_be_overridden() {
        let combined = ParamDescriptor::optional("q", ParamSource::Combined)
            .with_collision_policy(CollisionPolicy::QueryWins);
        assert_eq!(combined.collision_policy, CollisionPolicy::QueryWins);
    }
}
