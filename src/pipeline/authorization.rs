//! Authorization middleware.
//!
//! The current principal is resolved through an injected accessor. A
//! missing principal is a 401; a principal whose role is outside the
//! allowed set, whose permissions are incomplete, or whom a custom
//! validator rejects is a 403. Both failure branches support override
//! hooks that fully take over the response. A resolver failure never
//! escapes: it is reported and converted to a 500 `AUTHORIZATION_ERROR`.

use crate::context::{ErrorReporter, Principal};
use crate::pipeline::envelope::{ErrorBody, Responder};
use crate::pipeline::{Middleware, PipelineRequest, PipelineResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Resolves the authenticated principal for a request. `Ok(None)` means
/// unauthenticated; `Err` is an internal failure.
pub type PrincipalResolver =
    Arc<dyn Fn(&PipelineRequest) -> anyhow::Result<Option<Principal>> + Send + Sync>;

/// Outcome of a custom authorization validator.
pub struct AuthzDecision {
    pub authorized: bool,
    pub reason: Option<String>,
}

impl AuthzDecision {
    pub fn allow() -> Self {
        Self {
            authorized: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            authorized: false,
            reason: Some(reason.into()),
        }
    }
}

/// Custom validator consulted after role and permission checks pass.
pub type AuthzValidator =
    Arc<dyn Fn(&Principal, &PipelineRequest) -> AuthzDecision + Send + Sync>;

/// Hook that fully owns a failure response.
pub type AuthzHook = Arc<dyn Fn(&PipelineRequest) -> PipelineResponse + Send + Sync>;

/// Declarative authorization policy, loadable from route config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationConfig {
    /// Roles allowed through; empty means any authenticated principal.
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    /// Permissions that must all be present.
    #[serde(default)]
    pub required_permissions: Vec<String>,
}

impl AuthorizationConfig {
    fn role_allowed(&self, principal: &Principal) -> bool {
        self.allowed_roles.is_empty() || self.allowed_roles.iter().any(|r| principal.has_role(r))
    }

    fn permissions_satisfied(&self, principal: &Principal) -> bool {
        self.required_permissions
            .iter()
            .all(|p| principal.has_permission(p))
    }
}

/// Middleware enforcing an [`AuthorizationConfig`] with optional custom
/// validator and override hooks.
pub struct AuthorizationMiddleware {
    resolver: PrincipalResolver,
    config: AuthorizationConfig,
    validator: Option<AuthzValidator>,
    on_unauthenticated: Option<AuthzHook>,
    on_forbidden: Option<AuthzHook>,
    responder: Responder,
    reporter: Arc<dyn ErrorReporter>,
}

impl AuthorizationMiddleware {
    pub fn new(
        resolver: PrincipalResolver,
        config: AuthorizationConfig,
        responder: Responder,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            resolver,
            config,
            validator: None,
            on_unauthenticated: None,
            on_forbidden: None,
            responder,
            reporter,
        }
    }

    pub fn with_validator(mut self, validator: AuthzValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn on_unauthenticated(mut self, hook: AuthzHook) -> Self {
        self.on_unauthenticated = Some(hook);
        self
    }

    pub fn on_forbidden(mut self, hook: AuthzHook) -> Self {
        self.on_forbidden = Some(hook);
        self
    }

    fn unauthenticated(&self, req: &PipelineRequest) -> PipelineResponse {
        if let Some(hook) = &self.on_unauthenticated {
            return hook(req);
        }
        self.responder.error(
            req.request_id,
            ErrorBody::new("UNAUTHENTICATED", "authentication required", 401),
        )
    }

    fn forbidden(&self, req: &PipelineRequest, reason: &str) -> PipelineResponse {
        warn!(
            request_id = %req.request_id,
            path = %req.path,
            reason = reason,
            "Authorization denied"
        );
        if let Some(hook) = &self.on_forbidden {
            return hook(req);
        }
        self.responder.error(
            req.request_id,
            ErrorBody::new("FORBIDDEN", reason, 403),
        )
    }
}

impl Middleware for AuthorizationMiddleware {
    fn before(&self, req: &mut PipelineRequest) -> Option<PipelineResponse> {
        let principal = match (self.resolver)(req) {
            Ok(p) => p,
            Err(e) => {
                error!(
                    request_id = %req.request_id,
                    path = %req.path,
                    error = %e,
                    "Principal resolution failed"
                );
                self.reporter
                    .capture(&format!("principal resolution failed: {e}"), None);
                return Some(self.responder.error(
                    req.request_id,
                    ErrorBody::new("AUTHORIZATION_ERROR", "authorization check failed", 500),
                ));
            }
        };

        let Some(principal) = principal else {
            return Some(self.unauthenticated(req));
        };

        if !self.config.role_allowed(&principal) {
            return Some(self.forbidden(req, "role not permitted"));
        }
        if !self.config.permissions_satisfied(&principal) {
            return Some(self.forbidden(req, "missing required permissions"));
        }
        if let Some(validator) = &self.validator {
            let decision = validator(&principal, req);
            if !decision.authorized {
                let reason = decision.reason.unwrap_or_else(|| "denied by validator".into());
                return Some(self.forbidden(req, &reason));
            }
        }

        debug!(
            request_id = %req.request_id,
            principal = %principal.id,
            "Principal authorized"
        );
        req.principal = Some(principal);
        None
    }
}
