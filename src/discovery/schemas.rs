//! Schema discovery: builds a catalog of validation schemas from
//! `{module}/schemas/{name}-schema.*` files.
//!
//! The record key is `{module}/{name}` and the validation kind is inferred
//! from the name, so `create-user-params` attaches to route params and a
//! bare `create-user` to the body.

use super::{build_catalog, enumerate, load_files, ConventionKind, DiscoveryError, DiscoverySummary};
use crate::loader::ModuleLoader;
use crate::pipeline::validation::ValidationKind;
use crate::runtime_config::RuntimeConfig;
use crate::schema::Schema;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// One discovered schema.
#[derive(Clone)]
pub struct SchemaRecord {
    pub name: String,
    pub module_name: String,
    pub file_path: PathBuf,
    /// Which request section this schema validates.
    pub kind: ValidationKind,
    pub schema: Arc<dyn Schema>,
}

impl std::fmt::Debug for SchemaRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRecord")
            .field("name", &self.name)
            .field("module_name", &self.module_name)
            .field("file_path", &self.file_path)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Immutable result of one schema discovery pass, keyed by
/// `{module}/{name}`.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    records: HashMap<String, SchemaRecord>,
    pub summary: DiscoverySummary,
}

impl SchemaCatalog {
    pub fn get(&self, key: &str) -> Option<&SchemaRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Scans a root directory for schemas and loads them through the injected
/// [`ModuleLoader`].
pub struct SchemaDiscovery {
    loader: Arc<dyn ModuleLoader>,
    config: RuntimeConfig,
    cache: RwLock<Option<Arc<SchemaCatalog>>>,
}

impl SchemaDiscovery {
    pub fn new(loader: Arc<dyn ModuleLoader>, config: RuntimeConfig) -> Self {
        Self {
            loader,
            config,
            cache: RwLock::new(None),
        }
    }

    /// Run a full discovery pass under `root` and cache the catalog.
    pub fn discover(&self, root: &Path) -> Result<Arc<SchemaCatalog>, DiscoveryError> {
        let files = enumerate(root, ConventionKind::Schema)?;
        let loader = Arc::clone(&self.loader);
        let loaded = load_files(&files, &self.config, Arc::new(move |parsed: &super::ConventionPath| {
            loader.load_schema(&parsed.file)
        }));

        let (kept, summary) = build_catalog(
            loaded,
            |parsed| format!("{}/{}", parsed.module, parsed.name),
            "schema",
        );

        let mut catalog = SchemaCatalog {
            summary,
            ..SchemaCatalog::default()
        };
        for (key, parsed, schema) in kept {
            catalog.records.insert(
                key,
                SchemaRecord {
                    kind: ValidationKind::infer(&parsed.name),
                    name: parsed.name,
                    module_name: parsed.module,
                    file_path: parsed.file,
                    schema,
                },
            );
        }

        let catalog = Arc::new(catalog);
        *self.cache.write().expect("discovery cache poisoned") = Some(Arc::clone(&catalog));
        Ok(catalog)
    }

    /// Catalog from the most recent pass, if any.
    pub fn cached(&self) -> Option<Arc<SchemaCatalog>> {
        self.cache.read().expect("discovery cache poisoned").clone()
    }
}
