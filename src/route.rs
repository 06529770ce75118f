//! Route descriptor types shared by the assembler and the registrar.

use crate::context::RequestContext;
use crate::pipeline::authorization::AuthorizationConfig;
use crate::pipeline::validation::ValidationKind;
use crate::schema::Schema;
use http::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Controller entry point: pure input in, result out.
///
/// The adapter in [`crate::invoke`] owns input extraction and envelope
/// wrapping; controllers only see the merged input value and the narrow
/// request context.
pub type ControllerFn = Arc<dyn Fn(Value, RequestContext) -> anyhow::Result<Value> + Send + Sync>;

/// Fully resolved route unit, built by the assembler or the registrar and
/// consumed exactly once at registration time.
///
/// The method is fixed before registration and never mutated afterwards.
#[derive(Clone)]
pub struct RouteDescriptor {
    pub path: String,
    pub method: Method,
    /// Logical name of the controller backing this route.
    pub handler_ref: String,
    /// Per-kind validation schemas; empty means no validation middleware.
    pub validation: BTreeMap<ValidationKind, Arc<dyn Schema>>,
    pub authorization: Option<AuthorizationConfig>,
    /// Named middlewares resolved at registration time.
    pub middleware_ids: Vec<String>,
    pub paginated: bool,
}

impl RouteDescriptor {
    pub fn info(&self) -> RouteInfo {
        RouteInfo {
            method: self.method.clone(),
            path: self.path.clone(),
            handler_ref: self.handler_ref.clone(),
            paginated: self.paginated,
            validated_kinds: self.validation.keys().copied().collect(),
        }
    }
}

impl std::fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("handler_ref", &self.handler_ref)
            .field("validated_kinds", &self.validation.keys().collect::<Vec<_>>())
            .field("middleware_ids", &self.middleware_ids)
            .field("paginated", &self.paginated)
            .finish()
    }
}

/// Introspection snapshot retained after a descriptor has been registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: Method,
    pub path: String,
    pub handler_ref: String,
    pub paginated: bool,
    pub validated_kinds: Vec<ValidationKind>,
}
