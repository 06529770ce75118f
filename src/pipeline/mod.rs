//! # Request Pipeline Module
//!
//! Per-route middleware chain: validation, authorization, the controller,
//! sanitization, response orchestration. The chain contract follows the
//! dispatcher discipline: every `before` runs in order and the first early
//! response wins, the handler runs only when no middleware short-circuited,
//! and every `after` runs regardless with the measured latency.
//!
//! `before` receives the request mutably so middlewares can attach what
//! they produced: validation stores the parsed sections, authorization
//! attaches the resolved principal.

pub mod authorization;
pub mod envelope;
pub mod sanitize;
pub mod validation;

use crate::ids::RequestId;
use http::Method;
use serde_json::Value;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Maximum inline params before heap allocation; typical routes stay under this.
pub const MAX_INLINE_PARAMS: usize = 8;
/// Maximum inline headers before heap allocation.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated key/value storage for path and query parameters.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;
/// Stack-allocated key/value storage for headers.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Request sections already parsed by the validation middleware.
#[derive(Debug, Clone, Default)]
pub struct ValidatedInput {
    pub body: Option<Value>,
    pub query: Option<Value>,
    pub params: Option<Value>,
    pub headers: Option<Value>,
}

/// Request as seen by the pipeline. Built by the server adapter from the
/// transport request; the transport types themselves never cross this
/// boundary.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub request_id: RequestId,
    pub method: Method,
    pub path: String,
    pub path_params: ParamVec,
    pub query_params: ParamVec,
    pub headers: HeaderVec,
    pub body: Option<Value>,
    /// Sections parsed by the validation middleware, when schemas were
    /// attached to the route.
    pub validated: ValidatedInput,
    /// Principal attached by the authorization middleware.
    pub principal: Option<crate::context::Principal>,
}

impl PipelineRequest {
    /// Build a request, deriving the request id from an `x-request-id`
    /// header when one carries a valid ULID.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            method,
            path: path.into(),
            path_params: ParamVec::new(),
            query_params: ParamVec::new(),
            headers: HeaderVec::new(),
            body: None,
            validated: ValidatedInput::default(),
            principal: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_path_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.path_params.push((Arc::from(name), value.into()));
        self
    }

    pub fn with_query_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query_params.push((Arc::from(name), value.into()));
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((Arc::from(name), value.into()));
        if name.eq_ignore_ascii_case("x-request-id") {
            // Adopt the client id only when it is a valid ULID; otherwise
            // the freshly minted id stands.
            if let Some(id) = self.get_header("x-request-id").and_then(|v| v.parse().ok()) {
                self.request_id = id;
            }
        }
        self
    }

    /// Get a path parameter by name; duplicates resolve last-write-wins.
    #[inline]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a query parameter by name; duplicates resolve last-write-wins.
    #[inline]
    pub fn get_query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a header by name (case-insensitive per RFC 7230).
    #[inline]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Path parameters as a JSON object (string-valued).
    pub fn path_params_value(&self) -> Value {
        kv_to_value(&self.path_params)
    }

    /// Query parameters as a JSON object (string-valued).
    pub fn query_params_value(&self) -> Value {
        kv_to_value(&self.query_params)
    }

    /// Headers as a JSON object with lowercased names.
    pub fn headers_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.headers {
            map.insert(k.to_lowercase(), Value::String(v.clone()));
        }
        Value::Object(map)
    }
}

fn kv_to_value(pairs: &[(Arc<str>, String)]) -> Value {
    let mut map = serde_json::Map::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), Value::String(v.clone()));
    }
    Value::Object(map)
}

/// Response produced by the pipeline: status, headers, JSON body.
#[derive(Debug, Clone)]
pub struct PipelineResponse {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: Value,
}

impl PipelineResponse {
    /// JSON response with a content-type header.
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Route handler invoked when no middleware short-circuits.
pub type RouteHandler = Arc<dyn Fn(&mut PipelineRequest) -> PipelineResponse + Send + Sync>;

/// Composable per-route middleware.
pub trait Middleware: Send + Sync {
    /// Runs before the handler. Returning `Some` short-circuits the chain
    /// with that response (the handler never runs).
    fn before(&self, _req: &mut PipelineRequest) -> Option<PipelineResponse> {
        None
    }

    /// Runs after the handler (or the short-circuiting middleware) with the
    /// measured latency. May rewrite the response.
    fn after(&self, _req: &PipelineRequest, _res: &mut PipelineResponse, _latency: Duration) {}
}

/// Run a middleware chain around a handler.
///
/// Every `before` executes in registration order; the first early response
/// is kept and the handler is skipped. Every `after` executes afterwards,
/// in the same order, and may rewrite the response in place.
pub fn run(
    middlewares: &[Arc<dyn Middleware>],
    handler: &RouteHandler,
    req: &mut PipelineRequest,
) -> PipelineResponse {
    let mut early: Option<PipelineResponse> = None;
    for (idx, mw) in middlewares.iter().enumerate() {
        if early.is_none() {
            early = mw.before(req);
            if early.is_some() {
                debug!(
                    request_id = %req.request_id,
                    middleware_idx = idx,
                    "Middleware returned early response"
                );
            }
        } else {
            mw.before(req);
        }
    }

    let (mut resp, latency) = if let Some(r) = early {
        (r, Duration::from_millis(0))
    } else {
        let start = Instant::now();
        let r = handler(req);
        (r, start.elapsed())
    };

    for mw in middlewares {
        mw.after(req, &mut resp, latency);
    }

    resp
}
