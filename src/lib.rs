//! # routeforge
//!
//! **routeforge** is a convention-driven route assembly and request pipeline
//! layer for Rust services on the `may` coroutine runtime.
//!
//! ## Overview
//!
//! routeforge scans a module tree for controllers and schemas named by
//! convention, pairs them into routes, and registers everything against an
//! injected server capability. Requests then flow through a fixed pipeline:
//! validation, authorization, the controller, response sanitization, and a
//! uniform response envelope. The HTTP engine itself stays outside the
//! crate behind [`server::ServerCapability`].
//!
//! ## Architecture
//!
//! - **[`discovery`]** - File-tree scanning for `{name}-controller.*` and
//!   `{name}-schema.*` files, loaded in parallel coroutines
//! - **[`assemble`]** - Automatic route assembly with method inference from
//!   controller name prefixes
//! - **[`registrar`]** - Declarative per-module `config.{yaml,yml,json}`
//!   route registration
//! - **[`registry`]** - Manual priority-ordered registration escape hatch
//! - **[`pipeline`]** - Middleware chain, validation, authorization,
//!   sanitization, and the response envelope
//! - **[`invoke`]** - Controller invocation with panic isolation
//! - **[`loader`]** - Module-loading capability that turns file paths into
//!   callable controllers and schemas
//! - **[`schema`]** - JSON Schema parsing with a compiled-validator cache
//! - **[`health`]** - Database connectivity probe route
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use routeforge::assemble::RouteAssembler;
//! use routeforge::context::NoopReporter;
//! use routeforge::discovery::{ControllerDiscovery, SchemaDiscovery};
//! use routeforge::loader::StaticModuleLoader;
//! use routeforge::runtime_config::RuntimeConfig;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn demo(server: Arc<dyn routeforge::server::ServerCapability>) -> anyhow::Result<()> {
//! let config = RuntimeConfig::from_env();
//! let loader = Arc::new(StaticModuleLoader::new());
//!
//! let controllers = ControllerDiscovery::new(loader.clone(), config)
//!     .discover(Path::new("app/modules"))?;
//! let schemas = SchemaDiscovery::new(loader, config)
//!     .discover(Path::new("app/modules"))?;
//!
//! let assembler = RouteAssembler::new(server, None, Arc::new(NoopReporter));
//! let summary = assembler.assemble(&controllers, &schemas);
//! println!("registered {}/{} routes", summary.registered, summary.total);
//! # Ok(())
//! # }
//! ```

pub mod assemble;
pub mod context;
pub mod discovery;
pub mod health;
pub mod ids;
pub mod invoke;
pub mod loader;
pub mod pipeline;
pub mod registrar;
pub mod registry;
pub mod route;
pub mod runtime_config;
pub mod schema;
pub mod server;

pub use assemble::{AssemblySummary, RouteAssembler};
pub use context::{Database, ErrorReporter, NoopReporter, Principal, RequestContext};
pub use ids::RequestId;
pub use loader::{LoadError, ModuleLoader, StaticModuleLoader};
pub use pipeline::{Middleware, PipelineRequest, PipelineResponse, RouteHandler};
pub use registrar::{ModuleRegistrar, RegistrarError, RegistrarSummary};
pub use registry::{ManualRouteEntry, ManualRouteRegistry, RegistryError, RegistryState};
pub use route::{ControllerFn, RouteDescriptor, RouteInfo};
pub use runtime_config::RuntimeConfig;
pub use schema::{JsonSchema, Schema, SchemaCache, SchemaError};
pub use server::{RouteRegistration, ServerCapability};
