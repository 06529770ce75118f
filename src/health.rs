//! Database health route.
//!
//! `GET /health/database` pings the injected [`Database`] capability and
//! reports connectivity plus observed latency. The body is plain JSON, not
//! the response envelope, so probes stay trivial to parse.

use crate::context::Database;
use crate::pipeline::{PipelineRequest, PipelineResponse};
use crate::registry::ManualRouteEntry;
use crate::server::RouteRegistration;
use http::Method;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

pub const DATABASE_HEALTH_PATH: &str = "/health/database";

/// Priority for the health entry; registers ahead of default-priority
/// application routes.
pub const DATABASE_HEALTH_PRIORITY: i32 = 100;

fn health_response(db: &Arc<dyn Database>, req: &PipelineRequest) -> PipelineResponse {
    let started = Instant::now();
    let ping = db.ping();
    let latency_ms = started.elapsed().as_millis() as u64;

    match ping {
        Ok(()) => PipelineResponse::json(
            200,
            json!({ "connected": true, "latencyMs": latency_ms }),
        ),
        Err(e) => {
            warn!(
                request_id = %req.request_id,
                error = %e,
                latency_ms,
                "Database health check failed"
            );
            PipelineResponse::json(
                503,
                json!({ "connected": false, "latencyMs": latency_ms }),
            )
        }
    }
}

/// Manual registry entry for the database health route.
pub fn database_route(db: Arc<dyn Database>) -> ManualRouteEntry {
    ManualRouteEntry::new("health-database", DATABASE_HEALTH_PRIORITY, move |server| {
        let db = Arc::clone(&db);
        server.register(RouteRegistration {
            method: Method::GET,
            path: DATABASE_HEALTH_PATH.to_string(),
            middlewares: Vec::new(),
            handler: Arc::new(move |req: &mut PipelineRequest| health_response(&db, req)),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDb(bool);
    impl Database for FixedDb {
        fn ping(&self) -> anyhow::Result<()> {
            if self.0 {
                Ok(())
            } else {
                Err(anyhow::anyhow!("connection refused"))
            }
        }
    }

    #[test]
    fn test_healthy_database_reports_connected() {
        let db: Arc<dyn Database> = Arc::new(FixedDb(true));
        let req = PipelineRequest::new(Method::GET, DATABASE_HEALTH_PATH);
        let resp = health_response(&db, &req);
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["connected"], json!(true));
        assert!(resp.body["latencyMs"].is_u64());
    }

    #[test]
    fn test_unreachable_database_is_503() {
        let db: Arc<dyn Database> = Arc::new(FixedDb(false));
        let req = PipelineRequest::new(Method::GET, DATABASE_HEALTH_PATH);
        let resp = health_response(&db, &req);
        assert_eq!(resp.status, 503);
        assert_eq!(resp.body["connected"], json!(false));
    }
}
