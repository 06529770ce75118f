//! # Declarative Module Registrar
//!
//! Walks a routes root where each sub-directory is a module carrying a
//! `config.{yaml,yml,json}` file, and registers every configured route:
//! controller resolution through the [`ModuleLoader`], inline JSON Schema
//! compilation through the shared [`SchemaCache`], declarative
//! authorization, and named middlewares from an injected registry.
//!
//! Modules are processed in parallel coroutines, chunked by the runtime
//! config, and each module fans its routes out the same way. A broken
//! module or route never aborts the pass; only an unreadable routes root
//! is fatal.
//!
//! Route paths are `/{module}/{route_name}`. The controllers root defaults
//! to the sibling of a routes root whose final segment is `routes`
//! (`app/routes` resolves controllers under `app/controllers`); any other
//! root resolves controllers under itself unless an override is supplied.

pub mod config;

use crate::context::{Database, ErrorReporter};
use crate::invoke::{route_handler, ControllerBinding};
use crate::loader::ModuleLoader;
use crate::pipeline::authorization::{AuthorizationMiddleware, PrincipalResolver};
use crate::pipeline::envelope::Responder;
use crate::pipeline::validation::{ValidationKind, ValidationMiddleware};
use crate::pipeline::Middleware;
use crate::route::{RouteDescriptor, RouteInfo};
use crate::runtime_config::RuntimeConfig;
use crate::schema::{Schema, SchemaCache};
use crate::server::{RouteRegistration, ServerCapability};
use config::{load_module_config, parse_method, RouteConfig};
use may::coroutine;
use may::sync::mpsc;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Registrar failures. Only `RootUnreadable` aborts a pass; every other
/// variant is scoped to one route and lands in the summary.
#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("failed to read routes root {root}: {source}")]
    RootUnreadable {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("route {route}: unsupported method {method:?}")]
    InvalidMethod { route: String, method: String },
    #[error("route {route}: controller not found, attempted {attempted:?}")]
    ControllerNotFound {
        route: String,
        attempted: Vec<String>,
    },
    #[error("route {route}: {kind} schema does not compile")]
    SchemaCompile { route: String, kind: ValidationKind },
    #[error("route {route}: requires authorization but no principal resolver is configured")]
    MissingResolver { route: String },
    #[error("route {route}: unknown middleware id {id:?}")]
    UnknownMiddleware { route: String, id: String },
    #[error("route {route}: registration failed: {message}")]
    Registration { route: String, message: String },
}

/// One route that failed during a registrar pass.
#[derive(Debug)]
pub struct RouteFailure {
    pub module: String,
    pub route: String,
    pub error: RegistrarError,
}

/// Outcome counters for one registrar pass.
#[derive(Debug, Default)]
pub struct RegistrarSummary {
    /// Modules whose config was loaded and processed.
    pub modules: usize,
    /// Modules skipped for a missing or unreadable config.
    pub skipped_modules: usize,
    pub registered: usize,
    /// Routes attempted across all processed modules.
    pub total: usize,
    pub failures: Vec<RouteFailure>,
}

/// Everything a route worker needs, shared across coroutines.
struct Shared {
    server: Arc<dyn ServerCapability>,
    loader: Arc<dyn ModuleLoader>,
    db: Option<Arc<dyn Database>>,
    reporter: Arc<dyn ErrorReporter>,
    schema_cache: Arc<SchemaCache>,
    resolver: Option<PrincipalResolver>,
    middlewares: HashMap<String, Arc<dyn Middleware>>,
    controllers_root: PathBuf,
    runtime: RuntimeConfig,
}

/// Registers declaratively configured module routes.
pub struct ModuleRegistrar {
    server: Arc<dyn ServerCapability>,
    loader: Arc<dyn ModuleLoader>,
    db: Option<Arc<dyn Database>>,
    reporter: Arc<dyn ErrorReporter>,
    schema_cache: Arc<SchemaCache>,
    resolver: Option<PrincipalResolver>,
    middlewares: HashMap<String, Arc<dyn Middleware>>,
    controllers_root: Option<PathBuf>,
    runtime: RuntimeConfig,
    routes: RwLock<Vec<RouteInfo>>,
}

impl ModuleRegistrar {
    pub fn new(
        server: Arc<dyn ServerCapability>,
        loader: Arc<dyn ModuleLoader>,
        runtime: RuntimeConfig,
    ) -> Self {
        Self {
            server,
            loader,
            db: None,
            reporter: Arc::new(crate::context::NoopReporter),
            schema_cache: Arc::new(SchemaCache::new()),
            resolver: None,
            middlewares: HashMap::new(),
            controllers_root: None,
            runtime,
            routes: RwLock::new(Vec::new()),
        }
    }

    pub fn with_database(mut self, db: Arc<dyn Database>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_schema_cache(mut self, cache: Arc<SchemaCache>) -> Self {
        self.schema_cache = cache;
        self
    }

    /// Principal resolver, required by any route that configures
    /// authorization.
    pub fn with_resolver(mut self, resolver: PrincipalResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Register a named middleware routes can reference by id.
    pub fn with_middleware(mut self, id: impl Into<String>, mw: Arc<dyn Middleware>) -> Self {
        self.middlewares.insert(id.into(), mw);
        self
    }

    /// Override the derived controllers root.
    pub fn with_controllers_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.controllers_root = Some(root.into());
        self
    }

    fn resolve_controllers_root(&self, routes_root: &Path) -> PathBuf {
        if let Some(root) = &self.controllers_root {
            return root.clone();
        }
        if routes_root.file_name().is_some_and(|n| n == "routes") {
            let mut derived = routes_root.to_path_buf();
            derived.set_file_name("controllers");
            return derived;
        }
        routes_root.to_path_buf()
    }

    /// Walk `routes_root` and register every configured route.
    pub fn register_modules(&self, routes_root: &Path) -> Result<RegistrarSummary, RegistrarError> {
        let entries =
            std::fs::read_dir(routes_root).map_err(|source| RegistrarError::RootUnreadable {
                root: routes_root.to_path_buf(),
                source,
            })?;

        let mut modules: Vec<(String, PathBuf)> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                Some((name, e.path()))
            })
            .collect();
        modules.sort();

        let shared = Arc::new(Shared {
            server: Arc::clone(&self.server),
            loader: Arc::clone(&self.loader),
            db: self.db.clone(),
            reporter: Arc::clone(&self.reporter),
            schema_cache: Arc::clone(&self.schema_cache),
            resolver: self.resolver.clone(),
            middlewares: self.middlewares.clone(),
            controllers_root: self.resolve_controllers_root(routes_root),
            runtime: self.runtime,
        });

        let mut summary = RegistrarSummary::default();
        let mut infos = Vec::new();

        let (tx, rx) = mpsc::channel::<(usize, ModuleOutcome)>();
        for (idx, (module, dir)) in modules.iter().enumerate() {
            let co_tx = tx.clone();
            let shared = Arc::clone(&shared);
            let module = module.clone();
            let dir = dir.clone();

            // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by
            // the may runtime. The closure is Send + 'static and reports
            // exactly once through the channel.
            #[allow(unsafe_code)]
            let spawned = unsafe {
                coroutine::Builder::new()
                    .stack_size(shared.runtime.stack_size)
                    .spawn(move || {
                        let outcome = process_module(&shared, &module, &dir);
                        let _ = co_tx.send((idx, outcome));
                    })
            };
            if let Err(e) = spawned {
                warn!(module = %modules[idx].0, error = %e, "Failed to spawn module coroutine");
                let _ = tx.send((idx, ModuleOutcome::skipped()));
            }
        }
        drop(tx);

        let mut outcomes: Vec<(usize, ModuleOutcome)> = rx.into_iter().collect();
        outcomes.sort_by_key(|(idx, _)| *idx);

        for (_, outcome) in outcomes {
            match outcome {
                ModuleOutcome::Skipped => summary.skipped_modules += 1,
                ModuleOutcome::Processed { module, routes } => {
                    summary.modules += 1;
                    for (route, result) in routes {
                        summary.total += 1;
                        match result {
                            Ok(route_info) => {
                                summary.registered += 1;
                                infos.push(route_info);
                            }
                            Err(error) => {
                                warn!(
                                    module = %module,
                                    route = %route,
                                    error = %error,
                                    "Route registration failed"
                                );
                                summary.failures.push(RouteFailure {
                                    module: module.clone(),
                                    route,
                                    error,
                                });
                            }
                        }
                    }
                }
            }
        }

        info!(
            modules = summary.modules,
            skipped = summary.skipped_modules,
            registered = summary.registered,
            total = summary.total,
            "Module registration complete"
        );
        *self.routes.write().expect("route cache poisoned") = infos;
        Ok(summary)
    }

    /// Snapshot of the routes registered by the most recent pass.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.routes.read().expect("route cache poisoned").clone()
    }
}

enum ModuleOutcome {
    Skipped,
    Processed {
        module: String,
        routes: Vec<(String, Result<RouteInfo, RegistrarError>)>,
    },
}

impl ModuleOutcome {
    fn skipped() -> Self {
        ModuleOutcome::Skipped
    }
}

fn process_module(shared: &Arc<Shared>, module: &str, dir: &Path) -> ModuleOutcome {
    let config = match load_module_config(dir) {
        Ok(Some(config)) => config,
        Ok(None) => {
            warn!(module = %module, "Module has no config file, skipping");
            return ModuleOutcome::Skipped;
        }
        Err(e) => {
            warn!(module = %module, error = %e, "Module config unreadable, skipping");
            return ModuleOutcome::Skipped;
        }
    };

    let entries: Vec<(String, RouteConfig)> = config.routes.into_iter().collect();
    let (tx, rx) = mpsc::channel::<(usize, Result<RouteInfo, RegistrarError>)>();
    for (idx, (route_name, route_cfg)) in entries.iter().enumerate() {
        let co_tx = tx.clone();
        let shared = Arc::clone(shared);
        let co_module = module.to_string();
        let route_name = route_name.clone();
        let route_cfg = route_cfg.clone();

        // SAFETY: same contract as the module fan-out above.
        #[allow(unsafe_code)]
        let spawned = unsafe {
            coroutine::Builder::new()
                .stack_size(shared.runtime.stack_size)
                .spawn(move || {
                    let result = register_route(&shared, &co_module, &route_name, &route_cfg);
                    let _ = co_tx.send((idx, result));
                })
        };
        if let Err(e) = spawned {
            let _ = tx.send((
                idx,
                Err(RegistrarError::Registration {
                    route: format!("/{module}/{}", entries[idx].0),
                    message: format!("coroutine spawn failed: {e}"),
                }),
            ));
        }
    }
    drop(tx);

    let mut results: Vec<(usize, Result<RouteInfo, RegistrarError>)> = rx.into_iter().collect();
    results.sort_by_key(|(idx, _)| *idx);

    ModuleOutcome::Processed {
        module: module.to_string(),
        routes: results
            .into_iter()
            .map(|(idx, result)| (entries[idx].0.clone(), result))
            .collect(),
    }
}

fn register_route(
    shared: &Shared,
    module: &str,
    route_name: &str,
    cfg: &RouteConfig,
) -> Result<RouteInfo, RegistrarError> {
    let path = format!("/{module}/{route_name}");

    let method = parse_method(&cfg.method).ok_or_else(|| RegistrarError::InvalidMethod {
        route: path.clone(),
        method: cfg.method.clone(),
    })?;

    // Probe compiled module first, source module second.
    let module_dir = shared.controllers_root.join(module);
    let candidates = [
        module_dir.join(format!("{}.so", cfg.controller)),
        module_dir.join(format!("{}.rs", cfg.controller)),
    ];
    let mut handler = None;
    for candidate in &candidates {
        if let Ok(loaded) = shared.loader.load_controller(candidate) {
            handler = Some(loaded.handler);
            break;
        }
    }
    let handler = handler.ok_or_else(|| RegistrarError::ControllerNotFound {
        route: path.clone(),
        attempted: candidates
            .iter()
            .map(|c| c.display().to_string())
            .collect(),
    })?;

    let mut validation: BTreeMap<ValidationKind, Arc<dyn Schema>> = BTreeMap::new();
    if let Some(schemas) = &cfg.validation {
        for (kind, raw) in schemas.sections() {
            let cache_key = format!("{module}/{route_name}:{kind}");
            let compiled = shared
                .schema_cache
                .get_or_compile(&cache_key, raw)
                .ok_or(RegistrarError::SchemaCompile {
                    route: path.clone(),
                    kind,
                })?;
            validation.insert(kind, compiled);
        }
    }

    let mut chain: Vec<Arc<dyn Middleware>> = Vec::new();
    if !validation.is_empty() {
        chain.push(Arc::new(ValidationMiddleware::new(
            validation.clone(),
            Responder::new(Arc::clone(&shared.reporter)),
        )));
    }
    if let Some(authz) = &cfg.authorization {
        let resolver = shared
            .resolver
            .clone()
            .ok_or_else(|| RegistrarError::MissingResolver {
                route: path.clone(),
            })?;
        chain.push(Arc::new(AuthorizationMiddleware::new(
            resolver,
            authz.clone(),
            Responder::new(Arc::clone(&shared.reporter)),
            Arc::clone(&shared.reporter),
        )));
    }
    for id in &cfg.middleware {
        let mw = shared
            .middlewares
            .get(id)
            .ok_or_else(|| RegistrarError::UnknownMiddleware {
                route: path.clone(),
                id: id.clone(),
            })?;
        chain.push(Arc::clone(mw));
    }

    let descriptor = RouteDescriptor {
        path: path.clone(),
        method: method.clone(),
        handler_ref: cfg.controller.clone(),
        validation,
        authorization: cfg.authorization.clone(),
        middleware_ids: cfg.middleware.clone(),
        paginated: cfg.paginated,
    };

    let pipeline_handler = route_handler(
        ControllerBinding {
            handler,
            paginated: cfg.paginated,
        },
        shared.db.clone(),
        Arc::clone(&shared.reporter),
    );

    shared
        .server
        .register(RouteRegistration {
            method,
            path: path.clone(),
            middlewares: chain,
            handler: pipeline_handler,
        })
        .map_err(|e| RegistrarError::Registration {
            route: path.clone(),
            message: e.to_string(),
        })?;

    debug!(route = %path, controller = %cfg.controller, "Route registered");
    Ok(descriptor.info())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::StaticModuleLoader;

    struct NullServer;
    impl ServerCapability for NullServer {
        fn register(&self, _route: RouteRegistration) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registrar() -> ModuleRegistrar {
        ModuleRegistrar::new(
            Arc::new(NullServer),
            Arc::new(StaticModuleLoader::new()),
            RuntimeConfig::default(),
        )
    }

    #[test]
    fn test_controllers_root_derived_from_routes_segment() {
        let reg = registrar();
        assert_eq!(
            reg.resolve_controllers_root(Path::new("/srv/app/routes")),
            PathBuf::from("/srv/app/controllers")
        );
        assert_eq!(
            reg.resolve_controllers_root(Path::new("/srv/app/modules")),
            PathBuf::from("/srv/app/modules")
        );
    }

    #[test]
    fn test_controllers_root_override_wins() {
        let reg = registrar().with_controllers_root("/opt/handlers");
        assert_eq!(
            reg.resolve_controllers_root(Path::new("/srv/app/routes")),
            PathBuf::from("/opt/handlers")
        );
    }
}
