//! Narrow capability interfaces handed to controllers at request time.
//!
//! The pipeline never inspects the shape of the database beyond the health
//! probe, and never talks to a crash-reporting backend directly; both are
//! injected behind the traits here. A fresh [`RequestContext`] is built per
//! request and dropped when the response is written.

use crate::ids::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Opaque database handle forwarded verbatim into [`RequestContext::db`].
///
/// The only operation the core itself ever calls is [`Database::ping`],
/// used by the `/health/database` probe. Controllers downcast or wrap the
/// handle however their persistence layer requires.
pub trait Database: Send + Sync {
    /// Cheap round trip to the backing store. `Ok(())` means connected.
    fn ping(&self) -> anyhow::Result<()>;
}

/// Error-reporting capability: breadcrumbs plus exception capture.
///
/// Only 500-class failures and authorization/sanitization internal errors
/// reach this seam.
pub trait ErrorReporter: Send + Sync {
    /// Record a breadcrumb for later correlation.
    fn breadcrumb(&self, category: &str, message: &str);

    /// Capture a full exception, optionally with structured details.
    fn capture(&self, message: &str, details: Option<&Value>);
}

/// Reporter that drops everything. The default when no backend is wired.
pub struct NoopReporter;

impl ErrorReporter for NoopReporter {
    fn breadcrumb(&self, _category: &str, _message: &str) {}
    fn capture(&self, _message: &str, _details: Option<&Value>) {}
}

/// Authenticated principal attached to the request by the authorization
/// middleware.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Raw decoded claims when the resolver had them (e.g. JWT payload).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Value>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| (*r).to_string()).collect();
        self
    }

    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|p| (*p).to_string()).collect();
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Per-request context passed to every controller invocation.
///
/// Constructed fresh for each request; never persisted past it.
#[derive(Clone)]
pub struct RequestContext {
    /// Database handle, when the deployment wired one.
    pub db: Option<Arc<dyn Database>>,
    /// Principal resolved by the authorization middleware, if any.
    pub principal: Option<Principal>,
    /// Correlation id for this request.
    pub request_id: RequestId,
    /// Span covering the controller invocation; controllers log within it.
    pub span: tracing::Span,
}

impl RequestContext {
    pub fn new(db: Option<Arc<dyn Database>>, request_id: RequestId) -> Self {
        let span = tracing::info_span!("controller", request_id = %request_id);
        Self {
            db,
            principal: None,
            request_id,
            span,
        }
    }

    pub fn with_principal(mut self, principal: Option<Principal>) -> Self {
        self.principal = principal;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_role_and_permission_checks() {
        let p = Principal::new("u1")
            .with_roles(&["admin"])
            .with_permissions(&["users:read", "users:write"]);
        assert!(p.has_role("admin"));
        assert!(!p.has_role("viewer"));
        assert!(p.has_permission("users:read"));
        assert!(!p.has_permission("users:delete"));
    }
}
