//! Server capability: the single seam between routeforge and the
//! underlying web engine.
//!
//! The engine owns sockets, HTTP parsing, and its route table; routeforge
//! only ever calls [`ServerCapability::register`] with a fully resolved
//! [`RouteRegistration`]. At request time the engine is expected to build a
//! [`PipelineRequest`](crate::pipeline::PipelineRequest) and run it through
//! [`pipeline::run`](crate::pipeline::run) with the registered middlewares
//! and handler.

use crate::pipeline::{Middleware, RouteHandler};
use http::Method;
use std::sync::Arc;

/// One fully resolved route submitted to the engine.
#[derive(Clone)]
pub struct RouteRegistration {
    pub method: Method,
    pub path: String,
    /// Middleware chain, in execution order.
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub handler: RouteHandler,
}

impl std::fmt::Debug for RouteRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteRegistration")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// Capability every registration path talks to.
///
/// Implementations must tolerate calls from multiple coroutines; the
/// manual registry and the registrar both fan registrations out.
pub trait ServerCapability: Send + Sync {
    fn register(&self, route: RouteRegistration) -> anyhow::Result<()>;
}
