//! Module configuration files for the declarative registrar.
//!
//! Each module directory may carry one `config.yaml`, `config.yml`, or
//! `config.json` (probed in that order) describing its routes. A module
//! without a config file is skipped, not failed.

use crate::pipeline::authorization::AuthorizationConfig;
use crate::pipeline::validation::ValidationKind;
use anyhow::Context;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

const CONFIG_FILE_NAMES: [&str; 3] = ["config.yaml", "config.yml", "config.json"];

/// Inline JSON Schema documents, one per request section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSchemas {
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub headers: Option<Value>,
}

impl ValidationSchemas {
    /// Present sections in pipeline order.
    pub fn sections(&self) -> Vec<(ValidationKind, &Value)> {
        let mut out = Vec::new();
        if let Some(v) = &self.body {
            out.push((ValidationKind::Body, v));
        }
        if let Some(v) = &self.params {
            out.push((ValidationKind::Params, v));
        }
        if let Some(v) = &self.query {
            out.push((ValidationKind::Query, v));
        }
        if let Some(v) = &self.headers {
            out.push((ValidationKind::Headers, v));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.sections().is_empty()
    }
}

/// One declarative route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    pub method: String,
    /// Controller file stem, resolved under the controllers root.
    pub controller: String,
    #[serde(default)]
    pub validation: Option<ValidationSchemas>,
    #[serde(default)]
    pub authorization: Option<AuthorizationConfig>,
    /// Named middlewares appended after validation and authorization.
    #[serde(default)]
    pub middleware: Vec<String>,
    #[serde(default)]
    pub paginated: bool,
}

/// The full `config.*` document: route name to route definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub routes: BTreeMap<String, RouteConfig>,
}

/// Load the module config, probing the known file names in order.
/// `Ok(None)` means the module carries no config file.
pub fn load_module_config(module_dir: &Path) -> anyhow::Result<Option<ModuleConfig>> {
    for name in CONFIG_FILE_NAMES {
        let path = module_dir.join(name);
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = if name.ends_with(".json") {
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        } else {
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        };
        return Ok(Some(config));
    }
    Ok(None)
}

/// Parse the config method string. Only the five mutating-safe verbs the
/// pipeline understands are accepted.
pub fn parse_method(raw: &str) -> Option<Method> {
    match raw.to_uppercase().as_str() {
        "GET" => Some(Method::GET),
        "POST" => Some(Method::POST),
        "PUT" => Some(Method::PUT),
        "PATCH" => Some(Method::PATCH),
        "DELETE" => Some(Method::DELETE),
        _ => None,
    }
}
