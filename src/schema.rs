//! # Schema Capability Module
//!
//! routeforge does not implement a validation language. Request sections are
//! parsed through the injected [`Schema`] capability, which either returns
//! the parsed value or a structured list of field errors.
//!
//! The default implementation, [`JsonSchema`], compiles a JSON Schema
//! document once and validates values against it. Compiled validators are
//! expensive to build, so the registrar routes compilation through
//! [`SchemaCache`], an `Arc<RwLock<HashMap>>` of precompiled validators
//! shared across routes. The cache can be disabled with
//! `ROUTEFORGE_SCHEMA_CACHE=off`.

use jsonschema::Validator;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, error, info};

/// Failure modes of a schema parse.
///
/// `Invalid` is the expected outcome for bad input and maps to a 400
/// response; `Internal` covers unexpected failures inside the capability
/// itself and maps to a 500.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The value failed validation; one human-readable message per problem,
    /// in schema-evaluation order.
    #[error("validation failed with {} issue(s)", .0.len())]
    Invalid(Vec<String>),
    /// The capability itself failed (bad schema document, panicking
    /// keyword, ...). Surfaced as `VALIDATION_INTERNAL_ERROR`.
    #[error("internal schema failure: {0}")]
    Internal(anyhow::Error),
}

/// Injected schema capability.
///
/// `parse` returns the (possibly coerced) value on success so the pipeline
/// can expose the parsed form to handlers.
pub trait Schema: Send + Sync {
    fn parse(&self, value: &Value) -> Result<Value, SchemaError>;
}

/// [`Schema`] backed by a compiled JSON Schema document.
pub struct JsonSchema {
    compiled: Arc<Validator>,
    raw: Value,
}

impl JsonSchema {
    /// Compile a JSON Schema document. Compilation errors are internal
    /// failures, not validation errors.
    pub fn new(schema: Value) -> Result<Self, SchemaError> {
        let compiled = jsonschema::validator_for(&schema)
            .map_err(|e| SchemaError::Internal(anyhow::anyhow!("schema compile failed: {e}")))?;
        Ok(Self {
            compiled: Arc::new(compiled),
            raw: schema,
        })
    }

    fn from_compiled(compiled: Arc<Validator>, raw: Value) -> Self {
        Self { compiled, raw }
    }

    /// The source document this validator was compiled from.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

impl Schema for JsonSchema {
    fn parse(&self, value: &Value) -> Result<Value, SchemaError> {
        let messages: Vec<String> = self
            .compiled
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect();
        if messages.is_empty() {
            Ok(value.clone())
        } else {
            Err(SchemaError::Invalid(messages))
        }
    }
}

/// Thread-safe cache of compiled JSON Schema validators.
///
/// Keys are caller-chosen (the registrar uses `{module}/{route}:{kind}`).
/// Reads take a shared lock; a miss compiles under the exclusive lock with
/// a double-check so concurrent compilers of the same key converge on one
/// validator.
pub struct SchemaCache {
    cache: Arc<RwLock<HashMap<String, Arc<Validator>>>>,
    enabled: bool,
}

impl SchemaCache {
    pub fn new() -> Self {
        let enabled = std::env::var("ROUTEFORGE_SCHEMA_CACHE")
            .map(|v| v.to_lowercase() != "off")
            .unwrap_or(true);
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            enabled,
        }
    }

    /// Fetch a compiled validator for `key`, compiling `schema` on a miss.
    ///
    /// Returns `None` when the schema document itself does not compile; the
    /// caller decides whether that is fatal for its route.
    pub fn get_or_compile(&self, key: &str, schema: &Value) -> Option<Arc<JsonSchema>> {
        if !self.enabled {
            return JsonSchema::new(schema.clone()).ok().map(Arc::new);
        }

        {
            let cache = self.cache.read().expect("schema cache lock poisoned");
            if let Some(compiled) = cache.get(key) {
                debug!(cache_key = %key, "Schema validator cache hit");
                return Some(Arc::new(JsonSchema::from_compiled(
                    Arc::clone(compiled),
                    schema.clone(),
                )));
            }
        }

        match jsonschema::validator_for(schema) {
            Ok(compiled) => {
                let compiled = Arc::new(compiled);
                let mut cache = self.cache.write().expect("schema cache lock poisoned");
                let entry = Arc::clone(
                    cache
                        .entry(key.to_string())
                        .or_insert_with(|| Arc::clone(&compiled)),
                );
                info!(
                    cache_key = %key,
                    cache_size = cache.len(),
                    "Schema validator compiled and cached"
                );
                Some(Arc::new(JsonSchema::from_compiled(entry, schema.clone())))
            }
            Err(e) => {
                error!(cache_key = %key, error = %e, "Failed to compile JSON Schema");
                None
            }
        }
    }

    /// Number of cached validators.
    pub fn len(&self) -> usize {
        self.cache.read().expect("schema cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached validator.
    pub fn clear(&self) {
        self.cache
            .write()
            .expect("schema cache lock poisoned")
            .clear();
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}
