//! Controller invocation adapter.
//!
//! Bridges a discovered or declaratively configured controller into a
//! pipeline [`RouteHandler`]: extracts the merged input for the request
//! method, builds a fresh [`RequestContext`], invokes the controller with
//! panic isolation, and wraps the outcome in the response envelope. The
//! original exception never crosses this boundary: every failure becomes
//! a 500 `CONTROLLER_ERROR` envelope.

use crate::context::{Database, ErrorReporter, RequestContext};
use crate::pipeline::envelope::{ErrorBody, Responder};
use crate::pipeline::{PipelineRequest, RouteHandler};
use crate::route::ControllerFn;
use http::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

/// A controller plus the flags that shape its envelope.
#[derive(Clone)]
pub struct ControllerBinding {
    pub handler: ControllerFn,
    /// When set, the controller returns `{ data, meta }` and the envelope
    /// carries both instead of the raw result.
    pub paginated: bool,
}

/// Merge request sections into the controller input.
///
/// GET and DELETE merge route params and query string; other methods also
/// fold in body fields. Later sections win on key collisions, and the
/// schema-parsed values are preferred over the raw sections when present.
pub fn extract_input(req: &PipelineRequest) -> Value {
    let mut merged = serde_json::Map::new();

    let params = req
        .validated
        .params
        .clone()
        .unwrap_or_else(|| req.path_params_value());
    if let Value::Object(map) = params {
        merged.extend(map);
    }

    let query = req
        .validated
        .query
        .clone()
        .unwrap_or_else(|| req.query_params_value());
    if let Value::Object(map) = query {
        merged.extend(map);
    }

    if req.method != Method::GET && req.method != Method::DELETE {
        let body = req
            .validated
            .body
            .clone()
            .or_else(|| req.body.clone())
            .unwrap_or(Value::Null);
        if let Value::Object(map) = body {
            merged.extend(map);
        }
    }

    Value::Object(merged)
}

/// Split a paginated controller result into `(data, meta)`.
///
/// A result without the `{ data, meta }` shape is passed through whole.
fn unwrap_paginated(result: Value) -> (Value, Option<Value>) {
    match result {
        Value::Object(mut map) if map.contains_key("data") => {
            let data = map.remove("data").unwrap_or(Value::Null);
            let meta = map.remove("meta");
            (data, meta)
        }
        other => (other, None),
    }
}

/// Wrap a controller into a pipeline handler.
pub fn route_handler(
    binding: ControllerBinding,
    db: Option<Arc<dyn Database>>,
    reporter: Arc<dyn ErrorReporter>,
) -> RouteHandler {
    let responder = Responder::new(reporter);
    Arc::new(move |req: &mut PipelineRequest| {
        let input = extract_input(req);
        let ctx = RequestContext::new(db.clone(), req.request_id)
            .with_principal(req.principal.clone());
        let handler = Arc::clone(&binding.handler);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = ctx.span.clone().entered();
            handler(input, ctx)
        }));

        match outcome {
            Ok(Ok(result)) => {
                info!(
                    request_id = %req.request_id,
                    path = %req.path,
                    "Controller completed"
                );
                if binding.paginated {
                    let (data, meta) = unwrap_paginated(result);
                    responder.success(req.request_id, data, meta)
                } else {
                    responder.success(req.request_id, result, None)
                }
            }
            Ok(Err(e)) => {
                error!(
                    request_id = %req.request_id,
                    path = %req.path,
                    error = %e,
                    "Controller failed"
                );
                responder.error(
                    req.request_id,
                    ErrorBody::new("CONTROLLER_ERROR", e.to_string(), 500)
                        .with_user_message("An unexpected error occurred."),
                )
            }
            Err(panic) => {
                let panic_message = format!("{panic:?}");
                error!(
                    request_id = %req.request_id,
                    path = %req.path,
                    panic_message = %panic_message,
                    "Controller panicked - CRITICAL"
                );
                responder.error(
                    req.request_id,
                    ErrorBody::new("CONTROLLER_ERROR", "controller panicked", 500)
                        .with_user_message("An unexpected error occurred."),
                )
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoopReporter;
    use serde_json::json;

    fn request(method: Method) -> PipelineRequest {
        PipelineRequest::new(method, "/users/get-user")
            .with_path_param("id", "42")
            .with_query_param("expand", "posts")
            .with_body(json!({ "name": "ana" }))
    }

    #[test]
    fn test_get_input_merges_params_and_query_only() {
        let input = extract_input(&request(Method::GET));
        assert_eq!(input, json!({ "id": "42", "expand": "posts" }));
    }

    #[test]
    fn test_post_input_includes_body_fields() {
        let input = extract_input(&request(Method::POST));
        assert_eq!(input, json!({ "id": "42", "expand": "posts", "name": "ana" }));
    }

    #[test]
    fn test_paginated_unwrap() {
        let (data, meta) = unwrap_paginated(json!({ "data": [1, 2], "meta": { "total": 2 } }));
        assert_eq!(data, json!([1, 2]));
        assert_eq!(meta, Some(json!({ "total": 2 })));

        let (data, meta) = unwrap_paginated(json!({ "plain": true }));
        assert_eq!(data, json!({ "plain": true }));
        assert!(meta.is_none());
    }

    #[test]
    fn test_controller_error_becomes_500_envelope() {
        let binding = ControllerBinding {
            handler: Arc::new(|_input, _ctx| Err(anyhow::anyhow!("db unavailable"))),
            paginated: false,
        };
        let handler = route_handler(binding, None, Arc::new(NoopReporter));
        let mut req = request(Method::GET);
        let resp = handler(&mut req);
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body["error"]["code"], json!("CONTROLLER_ERROR"));
        assert_eq!(resp.body["error"]["message"], json!("db unavailable"));
    }

    #[test]
    fn test_controller_panic_is_contained() {
        let binding = ControllerBinding {
            handler: Arc::new(|_input, _ctx| panic!("boom")),
            paginated: false,
        };
        let handler = route_handler(binding, None, Arc::new(NoopReporter));
        let mut req = request(Method::GET);
        let resp = handler(&mut req);
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body["error"]["code"], json!("CONTROLLER_ERROR"));
    }
}
