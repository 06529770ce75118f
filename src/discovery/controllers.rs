//! Controller discovery: builds a catalog of callable controllers from
//! `{module}/controllers/{name}-controller.*` files.

use super::{build_catalog, enumerate, load_files, ConventionKind, DiscoveryError, DiscoverySummary};
use crate::loader::ModuleLoader;
use crate::route::ControllerFn;
use crate::runtime_config::RuntimeConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// One discovered controller, addressed by its derived route path.
#[derive(Clone)]
pub struct ControllerRecord {
    pub name: String,
    pub module_name: String,
    pub file_path: PathBuf,
    /// `/{module}/{name}`, the path the assembler registers it under.
    pub route_path: String,
    pub handler: ControllerFn,
}

impl std::fmt::Debug for ControllerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRecord")
            .field("name", &self.name)
            .field("module_name", &self.module_name)
            .field("file_path", &self.file_path)
            .field("route_path", &self.route_path)
            .finish()
    }
}

/// Immutable result of one controller discovery pass.
#[derive(Debug, Default)]
pub struct ControllerCatalog {
    records: HashMap<String, ControllerRecord>,
    /// Insertion order, preserved for deterministic assembly.
    order: Vec<String>,
    pub summary: DiscoverySummary,
}

impl ControllerCatalog {
    pub fn get(&self, route_path: &str) -> Option<&ControllerRecord> {
        self.records.get(route_path)
    }

    /// Records in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &ControllerRecord> {
        self.order.iter().filter_map(|k| self.records.get(k))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Scans a root directory for controllers and loads them through the
/// injected [`ModuleLoader`]. The last catalog is cached; rescans replace
/// it wholesale.
pub struct ControllerDiscovery {
    loader: Arc<dyn ModuleLoader>,
    config: RuntimeConfig,
    cache: RwLock<Option<Arc<ControllerCatalog>>>,
}

impl ControllerDiscovery {
    pub fn new(loader: Arc<dyn ModuleLoader>, config: RuntimeConfig) -> Self {
        Self {
            loader,
            config,
            cache: RwLock::new(None),
        }
    }

    /// Run a full discovery pass under `root` and cache the catalog.
    pub fn discover(&self, root: &Path) -> Result<Arc<ControllerCatalog>, DiscoveryError> {
        let files = enumerate(root, ConventionKind::Controller)?;
        let loader = Arc::clone(&self.loader);
        let loaded = load_files(&files, &self.config, Arc::new(move |parsed: &super::ConventionPath| {
            loader.load_controller(&parsed.file).map(|m| m.handler)
        }));

        let (kept, summary) = build_catalog(
            loaded,
            |parsed| format!("/{}/{}", parsed.module, parsed.name),
            "controller",
        );

        let mut catalog = ControllerCatalog {
            summary,
            ..ControllerCatalog::default()
        };
        for (route_path, parsed, handler) in kept {
            catalog.order.push(route_path.clone());
            catalog.records.insert(
                route_path.clone(),
                ControllerRecord {
                    name: parsed.name,
                    module_name: parsed.module,
                    file_path: parsed.file,
                    route_path,
                    handler,
                },
            );
        }

        let catalog = Arc::new(catalog);
        *self.cache.write().expect("discovery cache poisoned") = Some(Arc::clone(&catalog));
        Ok(catalog)
    }

    /// Catalog from the most recent pass, if any.
    pub fn cached(&self) -> Option<Arc<ControllerCatalog>> {
        self.cache.read().expect("discovery cache poisoned").clone()
    }
}
