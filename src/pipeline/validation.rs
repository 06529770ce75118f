//! Validation middleware: per-kind schema parsing with aggregated errors.
//!
//! Each present request section (body, query, params, headers) is parsed
//! independently against its schema. Every failing section contributes its
//! messages to the [`ValidationErrorSet`]; a non-empty set short-circuits
//! to a 400 envelope without invoking anything downstream, unless a custom
//! error hook is supplied, in which case the hook fully owns the response.
//! Internal schema failures are converted to a 500
//! `VALIDATION_INTERNAL_ERROR` instead of escaping the pipeline.

use crate::pipeline::envelope::{ErrorBody, Responder};
use crate::pipeline::{Middleware, PipelineRequest, PipelineResponse};
use crate::schema::{Schema, SchemaError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Which request section a schema validates, inferred from schema-name
/// substrings during discovery (`params`, `query`, `header`; default body).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationKind {
    Body,
    Params,
    Query,
    Headers,
}

impl ValidationKind {
    /// Classify a schema name by naming convention.
    pub fn infer(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("params") {
            ValidationKind::Params
        } else if lower.contains("query") {
            ValidationKind::Query
        } else if lower.contains("header") {
            ValidationKind::Headers
        } else {
            ValidationKind::Body
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::Body => "body",
            ValidationKind::Params => "params",
            ValidationKind::Query => "query",
            ValidationKind::Headers => "headers",
        }
    }
}

impl std::fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered map from failing section to its human-readable messages.
/// An empty set means validation passed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrorSet {
    sections: BTreeMap<ValidationKind, Vec<String>>,
}

impl ValidationErrorSet {
    pub fn insert(&mut self, kind: ValidationKind, messages: Vec<String>) {
        if !messages.is_empty() {
            self.sections.entry(kind).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section(&self, kind: ValidationKind) -> Option<&[String]> {
        self.sections.get(&kind).map(|v| v.as_slice())
    }

    /// Flatten into `{ "body": [...], "query": [...] }` for envelope details.
    pub fn to_details(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (kind, messages) in &self.sections {
            map.insert(
                kind.as_str().to_string(),
                Value::Array(messages.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(map)
    }
}

/// Hook that fully owns the error response when validation fails.
pub type ValidationErrorHook =
    Arc<dyn Fn(&PipelineRequest, &ValidationErrorSet) -> PipelineResponse + Send + Sync>;

/// Middleware validating request sections against per-kind schemas.
pub struct ValidationMiddleware {
    schemas: BTreeMap<ValidationKind, Arc<dyn Schema>>,
    responder: Responder,
    on_error: Option<ValidationErrorHook>,
}

impl ValidationMiddleware {
    pub fn new(schemas: BTreeMap<ValidationKind, Arc<dyn Schema>>, responder: Responder) -> Self {
        Self {
            schemas,
            responder,
            on_error: None,
        }
    }

    /// Supply a hook that takes over error responses entirely.
    pub fn with_error_hook(mut self, hook: ValidationErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub fn has_schemas(&self) -> bool {
        !self.schemas.is_empty()
    }

    fn section_value(req: &PipelineRequest, kind: ValidationKind) -> Value {
        match kind {
            // An absent body validates as an empty object so required-field
            // schemas report every missing field.
            ValidationKind::Body => req
                .body
                .clone()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            ValidationKind::Params => req.path_params_value(),
            ValidationKind::Query => req.query_params_value(),
            ValidationKind::Headers => req.headers_value(),
        }
    }

    fn store_validated(req: &mut PipelineRequest, kind: ValidationKind, value: Value) {
        match kind {
            ValidationKind::Body => req.validated.body = Some(value),
            ValidationKind::Params => req.validated.params = Some(value),
            ValidationKind::Query => req.validated.query = Some(value),
            ValidationKind::Headers => req.validated.headers = Some(value),
        }
    }
}

impl Middleware for ValidationMiddleware {
    fn before(&self, req: &mut PipelineRequest) -> Option<PipelineResponse> {
        let mut errors = ValidationErrorSet::default();

        for (kind, schema) in &self.schemas {
            let section = Self::section_value(req, *kind);
            match schema.parse(&section) {
                Ok(parsed) => Self::store_validated(req, *kind, parsed),
                Err(SchemaError::Invalid(messages)) => {
                    debug!(
                        request_id = %req.request_id,
                        section = %kind,
                        count = messages.len(),
                        "Request section failed validation"
                    );
                    errors.insert(*kind, messages);
                }
                Err(SchemaError::Internal(e)) => {
                    error!(
                        request_id = %req.request_id,
                        section = %kind,
                        error = %e,
                        "Schema capability failed"
                    );
                    return Some(self.responder.error(
                        req.request_id,
                        ErrorBody::new(
                            "VALIDATION_INTERNAL_ERROR",
                            "validation could not be performed",
                            500,
                        ),
                    ));
                }
            }
        }

        if errors.is_empty() {
            return None;
        }

        if let Some(hook) = &self.on_error {
            return Some(hook(req, &errors));
        }

        Some(self.responder.error(
            req.request_id,
            ErrorBody::new("VALIDATION_ERROR", "request validation failed", 400)
                .with_user_message("The request contains invalid fields.")
                .with_details(errors.to_details()),
        ))
    }
}
