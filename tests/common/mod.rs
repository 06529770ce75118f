#![allow(dead_code)]

use routeforge::pipeline::{self, PipelineRequest, PipelineResponse};
use routeforge::server::{RouteRegistration, ServerCapability};
use std::sync::{Mutex, Once};

static TRACING: Once = Once::new();

/// Install a test subscriber once per process. Respects `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Server double that records every registration it receives.
#[derive(Default)]
pub struct RecordingServer {
    registrations: Mutex<Vec<RouteRegistration>>,
}

impl RecordingServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registrations(&self) -> Vec<RouteRegistration> {
        self.registrations
            .lock()
            .expect("recording lock poisoned")
            .clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.registrations()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }

    pub fn find(&self, path: &str) -> Option<RouteRegistration> {
        self.registrations()
            .into_iter()
            .find(|r| r.path == path)
    }

    /// Run a request through a recorded route's full middleware chain.
    pub fn invoke(&self, path: &str, req: &mut PipelineRequest) -> PipelineResponse {
        let route = self
            .find(path)
            .unwrap_or_else(|| panic!("no route registered at {path}"));
        pipeline::run(&route.middlewares, &route.handler, req)
    }
}

impl ServerCapability for RecordingServer {
    fn register(&self, route: RouteRegistration) -> anyhow::Result<()> {
        self.registrations
            .lock()
            .expect("recording lock poisoned")
            .push(route);
        Ok(())
    }
}

/// Server double that rejects registrations whose path contains the given
/// fragment.
pub struct FailingServer {
    pub reject_containing: String,
    pub inner: RecordingServer,
}

impl FailingServer {
    pub fn rejecting(fragment: impl Into<String>) -> Self {
        Self {
            reject_containing: fragment.into(),
            inner: RecordingServer::new(),
        }
    }
}

impl ServerCapability for FailingServer {
    fn register(&self, route: RouteRegistration) -> anyhow::Result<()> {
        if route.path.contains(&self.reject_containing) {
            anyhow::bail!("engine rejected {}", route.path);
        }
        self.inner.register(route)
    }
}

/// JSON Schema requiring an email-shaped `email` and non-empty `password`.
pub fn email_password_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["email", "password"],
        "properties": {
            "email": { "type": "string", "pattern": "^[^@]+@[^@]+$" },
            "password": { "type": "string", "minLength": 1 }
        }
    })
}
