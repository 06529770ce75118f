//! Automatic route assembly.
//!
//! Pairs every discovered controller with its schemas, infers the HTTP
//! method from the controller name prefix, and registers the finished
//! route against the injected [`ServerCapability`]. One failing route
//! never aborts the pass; it is logged and counted.

use crate::context::{Database, ErrorReporter};
use crate::discovery::{ControllerCatalog, SchemaCatalog};
use crate::invoke::{route_handler, ControllerBinding};
use crate::pipeline::envelope::Responder;
use crate::pipeline::validation::ValidationMiddleware;
use crate::pipeline::Middleware;
use crate::route::{RouteDescriptor, RouteInfo};
use crate::server::{RouteRegistration, ServerCapability};
use http::Method;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Outcome counters for one assembly pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblySummary {
    pub registered: usize,
    pub total: usize,
}

/// Infer the HTTP method from a controller name prefix, or `None` when no
/// prefix matches. The match is case-insensitive and unanchored past the
/// prefix, so `createUser` and `create-user` both map to POST.
pub fn infer_method(name: &str) -> Option<Method> {
    let lower = name.to_lowercase();
    if lower.starts_with("create") || lower.starts_with("add") {
        Some(Method::POST)
    } else if lower.starts_with("update") || lower.starts_with("edit") {
        Some(Method::PUT)
    } else if lower.starts_with("delete") || lower.starts_with("remove") {
        Some(Method::DELETE)
    } else if lower.starts_with("get") || lower.starts_with("list") || lower.starts_with("find") {
        Some(Method::GET)
    } else {
        None
    }
}

/// Assembles routes from discovery catalogs and registers them.
pub struct RouteAssembler {
    server: Arc<dyn ServerCapability>,
    db: Option<Arc<dyn Database>>,
    reporter: Arc<dyn ErrorReporter>,
    /// Method used when the controller name has no recognized prefix.
    default_method: Method,
    routes: RwLock<Vec<RouteInfo>>,
}

impl RouteAssembler {
    pub fn new(
        server: Arc<dyn ServerCapability>,
        db: Option<Arc<dyn Database>>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            server,
            db,
            reporter,
            default_method: Method::GET,
            routes: RwLock::new(Vec::new()),
        }
    }

    pub fn with_default_method(mut self, method: Method) -> Self {
        self.default_method = method;
        self
    }

    /// Register every cataloged controller, attaching any schemas that
    /// share its `{module}/{name}` stem.
    pub fn assemble(
        &self,
        controllers: &ControllerCatalog,
        schemas: &SchemaCatalog,
    ) -> AssemblySummary {
        let mut summary = AssemblySummary::default();
        let mut infos = Vec::new();

        for record in controllers.iter() {
            summary.total += 1;

            let method = infer_method(&record.name)
                .unwrap_or_else(|| self.default_method.clone());
            let descriptor = RouteDescriptor {
                path: record.route_path.clone(),
                method,
                handler_ref: record.name.clone(),
                validation: self.probe_schemas(&record.module_name, &record.name, schemas),
                authorization: None,
                middleware_ids: Vec::new(),
                paginated: false,
            };

            let mut middlewares: Vec<Arc<dyn Middleware>> = Vec::new();
            if !descriptor.validation.is_empty() {
                middlewares.push(Arc::new(ValidationMiddleware::new(
                    descriptor.validation.clone(),
                    Responder::new(Arc::clone(&self.reporter)),
                )));
            }

            let handler = route_handler(
                ControllerBinding {
                    handler: Arc::clone(&record.handler),
                    paginated: descriptor.paginated,
                },
                self.db.clone(),
                Arc::clone(&self.reporter),
            );

            let registration = RouteRegistration {
                method: descriptor.method.clone(),
                path: descriptor.path.clone(),
                middlewares,
                handler,
            };
            match self.server.register(registration) {
                Ok(()) => {
                    debug!(
                        method = %descriptor.method,
                        path = %descriptor.path,
                        schemas = descriptor.validation.len(),
                        "Route assembled"
                    );
                    infos.push(descriptor.info());
                    summary.registered += 1;
                }
                Err(e) => {
                    warn!(
                        method = %descriptor.method,
                        path = %descriptor.path,
                        error = %e,
                        "Route registration failed"
                    );
                }
            }
        }

        info!(
            registered = summary.registered,
            total = summary.total,
            "Route assembly complete"
        );
        *self.routes.write().expect("route cache poisoned") = infos;
        summary
    }

    /// Look up schemas sharing the controller's stem: the bare
    /// `{module}/{name}` plus each section-suffixed variant. The first
    /// schema found for a section wins.
    fn probe_schemas(
        &self,
        module: &str,
        name: &str,
        schemas: &SchemaCatalog,
    ) -> BTreeMap<crate::pipeline::validation::ValidationKind, Arc<dyn crate::schema::Schema>> {
        let mut attached = BTreeMap::new();
        let candidates = [
            format!("{module}/{name}"),
            format!("{module}/{name}-body"),
            format!("{module}/{name}-params"),
            format!("{module}/{name}-query"),
            format!("{module}/{name}-headers"),
        ];
        for key in &candidates {
            if let Some(record) = schemas.get(key) {
                attached
                    .entry(record.kind)
                    .or_insert_with(|| Arc::clone(&record.schema));
            }
        }
        attached
    }

    /// Snapshot of the routes registered by the most recent pass.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.routes.read().expect("route cache poisoned").clone()
    }
}
