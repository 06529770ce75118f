//! # Module Loader Capability
//!
//! Discovery finds files; something still has to turn a file path into a
//! callable controller or a schema. That step is the [`ModuleLoader`]
//! capability, injected so discovery stays testable without dynamic code
//! loading.
//!
//! [`StaticModuleLoader`] is the in-memory implementation: deployments (and
//! tests) register controllers and schemas against path keys up front, the
//! way a generated registry maps handler names to functions. Lookup matches
//! the full normalized path first, then falls back to a trailing-suffix
//! match anchored at a path-component boundary, so loaders registered with
//! repo-relative keys resolve absolute discovery paths.

use crate::route::ControllerFn;
use crate::schema::Schema;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// A loaded controller module: its callable entry point.
#[derive(Clone)]
pub struct ControllerModule {
    pub handler: ControllerFn,
}

/// Typed failure returned by a loader. Each failure is isolated to the one
/// file being loaded; discovery aggregates them.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no module registered for {path}")]
    NotFound { path: String },
    #[error("module at {path} has no callable entry point")]
    NotCallable { path: String },
    #[error("module at {path} has no schema export")]
    NotASchema { path: String },
    #[error("loading {path} failed: {message}")]
    Failed { path: String, message: String },
    #[error("loader panicked: {message}")]
    Panicked { message: String },
}

/// Capability that resolves discovered file paths to typed modules.
pub trait ModuleLoader: Send + Sync {
    fn load_controller(&self, path: &Path) -> Result<ControllerModule, LoadError>;
    fn load_schema(&self, path: &Path) -> Result<Arc<dyn Schema>, LoadError>;
}

fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

enum ControllerEntry {
    Callable(ControllerFn),
    /// Registered but not callable; loading it is a per-file error.
    NotCallable,
}

/// In-memory [`ModuleLoader`] keyed by normalized path suffix.
#[derive(Default)]
pub struct StaticModuleLoader {
    controllers: RwLock<HashMap<String, ControllerEntry>>,
    schemas: RwLock<HashMap<String, Arc<dyn Schema>>>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller under a path key such as
    /// `users/controllers/create-user-controller.rs`.
    pub fn insert_controller(&self, key: impl Into<String>, handler: ControllerFn) {
        self.controllers
            .write()
            .expect("loader lock poisoned")
            .insert(key.into().replace('\\', "/"), ControllerEntry::Callable(handler));
    }

    /// Register a path that exists but does not expose a callable entry
    /// point. Loading it yields [`LoadError::NotCallable`].
    pub fn insert_non_callable(&self, key: impl Into<String>) {
        self.controllers
            .write()
            .expect("loader lock poisoned")
            .insert(key.into().replace('\\', "/"), ControllerEntry::NotCallable);
    }

    pub fn insert_schema(&self, key: impl Into<String>, schema: Arc<dyn Schema>) {
        self.schemas
            .write()
            .expect("loader lock poisoned")
            .insert(key.into().replace('\\', "/"), schema);
    }

    /// Builder-style variant of [`StaticModuleLoader::insert_controller`].
    pub fn with_controller(self, key: impl Into<String>, handler: ControllerFn) -> Self {
        self.insert_controller(key, handler);
        self
    }

    /// Builder-style variant of [`StaticModuleLoader::insert_schema`].
    pub fn with_schema(self, key: impl Into<String>, schema: Arc<dyn Schema>) -> Self {
        self.insert_schema(key, schema);
        self
    }

    fn lookup_key<'a, V>(map: &'a HashMap<String, V>, path: &str) -> Option<&'a V> {
        if let Some(v) = map.get(path) {
            return Some(v);
        }
        // The suffix must start at a path-component boundary, otherwise
        // `beta-users/...` would resolve a key registered under `users/...`.
        map.iter()
            .find(|(key, _)| {
                path.len() > key.len()
                    && path.ends_with(key.as_str())
                    && path.as_bytes()[path.len() - key.len() - 1] == b'/'
            })
            .map(|(_, v)| v)
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load_controller(&self, path: &Path) -> Result<ControllerModule, LoadError> {
        let key = normalize(path);
        let controllers = self.controllers.read().expect("loader lock poisoned");
        match Self::lookup_key(&controllers, &key) {
            Some(ControllerEntry::Callable(handler)) => Ok(ControllerModule {
                handler: Arc::clone(handler),
            }),
            Some(ControllerEntry::NotCallable) => Err(LoadError::NotCallable { path: key }),
            None => Err(LoadError::NotFound { path: key }),
        }
    }

    fn load_schema(&self, path: &Path) -> Result<Arc<dyn Schema>, LoadError> {
        let key = normalize(path);
        let schemas = self.schemas.read().expect("loader lock poisoned");
        Self::lookup_key(&schemas, &key)
            .map(Arc::clone)
            .ok_or(LoadError::NotFound { path: key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_controller() -> ControllerFn {
        Arc::new(|_input, _ctx| Ok(json!({ "ok": true })))
    }

    #[test]
    fn test_suffix_lookup_resolves_absolute_paths() {
        let loader = StaticModuleLoader::new()
            .with_controller("users/controllers/get-user-controller.rs", noop_controller());
        let module = loader
            .load_controller(Path::new("/srv/app/modules/users/controllers/get-user-controller.rs"))
            .unwrap();
        let out = module.handler.as_ref()(
            json!({}),
            crate::context::RequestContext::new(None, crate::ids::RequestId::new()),
        )
        .unwrap();
        assert_eq!(out, json!({ "ok": true }));
    }

    #[test]
    fn test_suffix_lookup_respects_component_boundaries() {
        let loader = StaticModuleLoader::new()
            .with_controller("users/controllers/get-user-controller.rs", noop_controller());
        let result = loader.load_controller(Path::new(
            "/srv/app/modules/beta-users/controllers/get-user-controller.rs",
        ));
        let Err(err) = result else {
            panic!("beta-users path must not resolve the users controller");
        };
        assert!(matches!(err, LoadError::NotFound { .. }));
    }

    #[test]
    fn test_non_callable_entry_is_a_load_error() {
        let loader = StaticModuleLoader::new();
        loader.insert_non_callable("users/controllers/broken-controller.rs");
        let result = loader.load_controller(Path::new("users/controllers/broken-controller.rs"));
        let Err(err) = result else {
            panic!("expected a load error for the non-callable entry");
        };
        assert!(matches!(err, LoadError::NotCallable { .. }));
    }

    #[test]
    fn test_missing_module_is_not_found() {
        let loader = StaticModuleLoader::new();
        let result = loader.load_schema(Path::new("users/schemas/missing-schema.yaml"));
        let Err(err) = result else {
            panic!("expected a not-found error for the missing schema");
        };
        assert!(matches!(err, LoadError::NotFound { .. }));
    }
}
