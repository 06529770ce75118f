//! Rule-driven response sanitization.
//!
//! A rule set maps field names to actions: `Exclude` drops the field,
//! `Mask` rewrites string values through a pattern/replacement pair, and
//! `Transform` applies an arbitrary value function. The first matching rule
//! per field wins; unmatched fields pass through, and nested objects and
//! arrays are recursed into only when the options say so.
//!
//! Named masks live in one static table keyed by [`MaskKind`]: one
//! pattern/replacement pair per document format, so adding a new format is
//! a table entry, not a new branch.
//!
//! A transformer error propagates out of [`sanitize`]; the owning
//! [`SanitizationMiddleware`] catches it, reports it, and leaves the
//! original response data in place rather than failing the request.

use crate::context::ErrorReporter;
use crate::pipeline::{Middleware, PipelineRequest, PipelineResponse};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Known document formats with a canonical masking pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskKind {
    /// Brazilian CPF: keeps the trailing verifier digits, `***.***.***-NN`.
    Cpf,
    /// Brazilian CNPJ: keeps the trailing verifier digits, `**.***.***/****-NN`.
    Cnpj,
    /// Keeps the first character and the domain, `j***@example.com`.
    Email,
    /// Keeps the last four digits, `****4321`.
    Phone,
    /// Keeps the last four digits, `**** **** **** 4321`.
    CreditCard,
}

impl FromStr for MaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpf" => Ok(MaskKind::Cpf),
            "cnpj" => Ok(MaskKind::Cnpj),
            "email" => Ok(MaskKind::Email),
            "phone" => Ok(MaskKind::Phone),
            "credit_card" | "creditcard" | "card" => Ok(MaskKind::CreditCard),
            other => Err(format!("unknown mask kind: {other}")),
        }
    }
}

struct MaskEntry {
    kind: MaskKind,
    pattern: Regex,
    replacement: &'static str,
}

#[allow(clippy::expect_used)] // patterns are compile-time constants exercised by tests
static MASK_TABLE: Lazy<Vec<MaskEntry>> = Lazy::new(|| {
    vec![
        MaskEntry {
            kind: MaskKind::Cpf,
            pattern: Regex::new(r"^\d{3}\.?\d{3}\.?\d{3}-?(\d{2})$").expect("cpf mask pattern"),
            replacement: "***.***.***-$1",
        },
        MaskEntry {
            kind: MaskKind::Cnpj,
            pattern: Regex::new(r"^\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?(\d{2})$")
                .expect("cnpj mask pattern"),
            replacement: "**.***.***/****-$1",
        },
        MaskEntry {
            kind: MaskKind::Email,
            pattern: Regex::new(r"^(.).*(@.+)$").expect("email mask pattern"),
            replacement: "$1***$2",
        },
        MaskEntry {
            kind: MaskKind::Phone,
            pattern: Regex::new(r"^.*?(\d{4})$").expect("phone mask pattern"),
            replacement: "****$1",
        },
        MaskEntry {
            kind: MaskKind::CreditCard,
            pattern: Regex::new(r"^[\d\s-]*?(\d{4})$").expect("card mask pattern"),
            replacement: "**** **** **** $1",
        },
    ]
});

/// Which mask to apply: a named table entry or a custom pattern.
#[derive(Clone)]
pub enum MaskSpec {
    Kind(MaskKind),
    Custom {
        pattern: Arc<Regex>,
        replacement: String,
    },
}

impl MaskSpec {
    /// Build a custom mask from a pattern string.
    pub fn custom(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(MaskSpec::Custom {
            pattern: Arc::new(Regex::new(pattern)?),
            replacement: replacement.into(),
        })
    }

    fn apply(&self, value: &str) -> String {
        match self {
            MaskSpec::Kind(kind) => {
                match MASK_TABLE.iter().find(|entry| entry.kind == *kind) {
                    Some(entry) => entry
                        .pattern
                        .replace(value, entry.replacement)
                        .into_owned(),
                    // Unreachable as long as the table covers the enum;
                    // fall back to passing the value through.
                    None => value.to_string(),
                }
            }
            MaskSpec::Custom {
                pattern,
                replacement,
            } => pattern.replace(value, replacement.as_str()).into_owned(),
        }
    }
}

/// Value function applied by [`SanitizeAction::Transform`].
pub type Transformer = Arc<dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync>;

/// Per-field sanitization action.
#[derive(Clone)]
pub enum SanitizeAction {
    /// Drop the field entirely.
    Exclude,
    /// Regex-substitute string values; non-strings pass through unchanged.
    Mask(MaskSpec),
    /// Apply an arbitrary value function. Errors propagate to the caller
    /// of [`sanitize`].
    Transform(Transformer),
}

/// A field-name policy: the first rule whose `field` matches wins.
#[derive(Clone)]
pub struct SanitizationRule {
    pub field: String,
    pub action: SanitizeAction,
}

impl SanitizationRule {
    pub fn exclude(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            action: SanitizeAction::Exclude,
        }
    }

    pub fn mask(field: impl Into<String>, spec: MaskSpec) -> Self {
        Self {
            field: field.into(),
            action: SanitizeAction::Mask(spec),
        }
    }

    pub fn transform(field: impl Into<String>, transformer: Transformer) -> Self {
        Self {
            field: field.into(),
            action: SanitizeAction::Transform(transformer),
        }
    }
}

/// Recursion behavior while walking response data.
#[derive(Debug, Clone, Copy)]
pub struct SanitizeOptions {
    pub recurse_objects: bool,
    pub recurse_arrays: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            recurse_objects: true,
            recurse_arrays: false,
        }
    }
}

/// Apply a rule set to a value, returning the sanitized copy.
///
/// Transformer errors are returned to the caller, not swallowed.
pub fn sanitize(
    value: &Value,
    rules: &[SanitizationRule],
    opts: &SanitizeOptions,
) -> anyhow::Result<Value> {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, field_value) in map {
                match rules.iter().find(|r| r.field == *key) {
                    Some(rule) => match &rule.action {
                        SanitizeAction::Exclude => {}
                        SanitizeAction::Mask(spec) => {
                            let masked = match field_value {
                                Value::String(s) => Value::String(spec.apply(s)),
                                other => other.clone(),
                            };
                            out.insert(key.clone(), masked);
                        }
                        SanitizeAction::Transform(transformer) => {
                            out.insert(key.clone(), transformer(field_value)?);
                        }
                    },
                    None => {
                        let descended = match field_value {
                            Value::Object(_) if opts.recurse_objects => {
                                sanitize(field_value, rules, opts)?
                            }
                            Value::Array(_) if opts.recurse_arrays => {
                                sanitize(field_value, rules, opts)?
                            }
                            other => other.clone(),
                        };
                        out.insert(key.clone(), descended);
                    }
                }
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) if opts.recurse_arrays => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(sanitize(item, rules, opts)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

/// Middleware applying a rule set to outbound response data.
///
/// A failure inside the rules (transformer error or panic) degrades
/// gracefully: the original, unsanitized data is kept and the failure is
/// reported.
pub struct SanitizationMiddleware {
    rules: Vec<SanitizationRule>,
    opts: SanitizeOptions,
    reporter: Arc<dyn ErrorReporter>,
}

impl SanitizationMiddleware {
    pub fn new(rules: Vec<SanitizationRule>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            rules,
            opts: SanitizeOptions::default(),
            reporter,
        }
    }

    pub fn with_options(mut self, opts: SanitizeOptions) -> Self {
        self.opts = opts;
        self
    }
}

impl Middleware for SanitizationMiddleware {
    fn after(&self, req: &PipelineRequest, res: &mut PipelineResponse, _latency: Duration) {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            sanitize(&res.body, &self.rules, &self.opts)
        }));
        match outcome {
            Ok(Ok(clean)) => res.body = clean,
            Ok(Err(e)) => {
                warn!(
                    request_id = %req.request_id,
                    error = %e,
                    "Sanitization failed, returning unsanitized data"
                );
                self.reporter.capture(&format!("sanitization failed: {e}"), None);
            }
            Err(panic) => {
                warn!(
                    request_id = %req.request_id,
                    panic = ?panic,
                    "Sanitization panicked, returning unsanitized data"
                );
                self.reporter.capture("sanitization panicked", None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cpf_mask_keeps_trailing_digits() {
        let rules = vec![SanitizationRule::mask("cpf", MaskSpec::Kind(MaskKind::Cpf))];
        let out = sanitize(
            &json!({ "cpf": "12345678901" }),
            &rules,
            &SanitizeOptions::default(),
        )
        .unwrap();
        assert_eq!(out, json!({ "cpf": "***.***.***-01" }));
    }

    #[test]
    fn test_cpf_mask_handles_punctuated_form() {
        let rules = vec![SanitizationRule::mask("cpf", MaskSpec::Kind(MaskKind::Cpf))];
        let out = sanitize(
            &json!({ "cpf": "123.456.789-01" }),
            &rules,
            &SanitizeOptions::default(),
        )
        .unwrap();
        assert_eq!(out, json!({ "cpf": "***.***.***-01" }));
    }

    #[test]
    fn test_mask_leaves_null_unchanged() {
        let rules = vec![SanitizationRule::mask("cpf", MaskSpec::Kind(MaskKind::Cpf))];
        let out = sanitize(&json!({ "cpf": null }), &rules, &SanitizeOptions::default()).unwrap();
        assert_eq!(out, json!({ "cpf": null }));
    }

    #[test]
    fn test_email_and_phone_masks() {
        let rules = vec![
            SanitizationRule::mask("email", MaskSpec::Kind(MaskKind::Email)),
            SanitizationRule::mask("phone", MaskSpec::Kind(MaskKind::Phone)),
        ];
        let out = sanitize(
            &json!({ "email": "john@example.com", "phone": "5511987654321" }),
            &rules,
            &SanitizeOptions::default(),
        )
        .unwrap();
        assert_eq!(out["email"], json!("j***@example.com"));
        assert_eq!(out["phone"], json!("****4321"));
    }

    #[test]
    fn test_exclude_drops_field_and_recurses_into_objects() {
        let rules = vec![SanitizationRule::exclude("password")];
        let out = sanitize(
            &json!({ "user": { "name": "ana", "password": "hunter2" } }),
            &rules,
            &SanitizeOptions::default(),
        )
        .unwrap();
        assert_eq!(out, json!({ "user": { "name": "ana" } }));
    }

    #[test]
    fn test_arrays_untouched_unless_enabled() {
        let rules = vec![SanitizationRule::exclude("secret")];
        let data = json!({ "items": [ { "secret": 1, "ok": 2 } ] });

        let untouched = sanitize(&data, &rules, &SanitizeOptions::default()).unwrap();
        assert_eq!(untouched, data);

        let opts = SanitizeOptions {
            recurse_objects: true,
            recurse_arrays: true,
        };
        let cleaned = sanitize(&data, &rules, &opts).unwrap();
        assert_eq!(cleaned, json!({ "items": [ { "ok": 2 } ] }));
    }

    #[test]
    fn test_transformer_error_propagates() {
        let rules = vec![SanitizationRule::transform(
            "amount",
            Arc::new(|_| Err(anyhow::anyhow!("boom"))),
        )];
        let result = sanitize(&json!({ "amount": 10 }), &rules, &SanitizeOptions::default());
        assert!(result.is_err());
    }
}
