mod common;

use common::{init_tracing, RecordingServer};
use http::Method;
use routeforge::pipeline::{PipelineRequest, PipelineResponse};
use routeforge::registry::{
    ManualRouteEntry, ManualRouteRegistry, RegistryError, RegistryState,
};
use routeforge::runtime_config::RuntimeConfig;
use routeforge::server::{RouteRegistration, ServerCapability};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

fn recording_entry(
    id: &str,
    priority: i32,
    log: Arc<Mutex<Vec<(String, Instant)>>>,
) -> ManualRouteEntry {
    let entry_id = id.to_string();
    ManualRouteEntry::new(id, priority, move |_server| {
        log.lock()
            .expect("log lock poisoned")
            .push((entry_id.clone(), Instant::now()));
        Ok(())
    })
}

#[test]
fn test_higher_priority_tiers_register_strictly_first() {
    init_tracing();
    let registry = ManualRouteRegistry::new(RuntimeConfig::default());
    let log: Arc<Mutex<Vec<(String, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

    registry
        .add(recording_entry("metrics", 50, Arc::clone(&log)))
        .expect("add");
    registry
        .add(recording_entry("health", 100, Arc::clone(&log)))
        .expect("add");
    registry
        .add(recording_entry("fallback", 10, Arc::clone(&log)))
        .expect("add");
    registry
        .add(recording_entry("docs", 50, Arc::clone(&log)))
        .expect("add");

    let report = registry
        .register_all(Arc::new(RecordingServer::new()))
        .expect("register_all");
    assert_eq!(report.registered, 4);
    assert_eq!(report.tiers, 3);

    let log = log.lock().expect("log lock poisoned");
    let at = |id: &str| {
        log.iter()
            .find(|(entry, _)| entry == id)
            .map(|(_, t)| *t)
            .unwrap_or_else(|| panic!("{id} never registered"))
    };
    // Tier boundaries are strict; order within the 50 tier is not.
    assert!(at("health") <= at("metrics"));
    assert!(at("health") <= at("docs"));
    assert!(at("metrics") <= at("fallback"));
    assert!(at("docs") <= at("fallback"));
}

#[test]
fn test_same_tier_entries_run_in_one_concurrent_batch() {
    init_tracing();
    let registry = ManualRouteRegistry::new(RuntimeConfig {
        max_concurrency: 2,
        ..RuntimeConfig::default()
    });

    // Each callback announces itself and then waits for its peer. The pass
    // can only complete if both entries of the tier are started together;
    // serialized execution would leave the first one spinning alone.
    let started = Arc::new(AtomicUsize::new(0));
    let rendezvous_entry = |id: &str, started: Arc<AtomicUsize>| {
        ManualRouteEntry::new(id, 50, move |_server| {
            started.fetch_add(1, Ordering::SeqCst);
            for _ in 0..100_000 {
                if started.load(Ordering::SeqCst) >= 2 {
                    return Ok(());
                }
                may::coroutine::yield_now();
            }
            anyhow::bail!("peer entry never started")
        })
    };

    registry
        .add(rendezvous_entry("left", Arc::clone(&started)))
        .expect("add");
    registry
        .add(rendezvous_entry("right", Arc::clone(&started)))
        .expect("add");

    let report = registry
        .register_all(Arc::new(RecordingServer::new()))
        .expect("same-tier entries must register concurrently");
    assert_eq!(report.registered, 2);
    assert_eq!(report.tiers, 1);
    assert_eq!(registry.state(), RegistryState::Registered);
}

#[test]
fn test_failure_stops_lower_tiers_and_marks_failed() {
    init_tracing();
    let registry = ManualRouteRegistry::new(RuntimeConfig::default());
    let log: Arc<Mutex<Vec<(String, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

    registry
        .add(recording_entry("first", 100, Arc::clone(&log)))
        .expect("add");
    registry
        .add(ManualRouteEntry::new("broken", 50, |_server| {
            anyhow::bail!("engine refused")
        }))
        .expect("add");
    registry
        .add(recording_entry("never", 10, Arc::clone(&log)))
        .expect("add");

    let err = registry
        .register_all(Arc::new(RecordingServer::new()))
        .expect_err("pass must fail");
    match err {
        RegistryError::RegistrationFailed { id, message } => {
            assert_eq!(id, "broken");
            assert!(message.contains("engine refused"));
        }
        other => panic!("expected RegistrationFailed, got {other:?}"),
    }
    assert_eq!(registry.state(), RegistryState::Failed);

    let log = log.lock().expect("log lock poisoned");
    assert!(log.iter().any(|(id, _)| id == "first"));
    assert!(!log.iter().any(|(id, _)| id == "never"));
}

#[test]
fn test_panicking_entry_is_contained() {
    init_tracing();
    let registry = ManualRouteRegistry::new(RuntimeConfig::default());
    registry
        .add(ManualRouteEntry::new("panics", 0, |_server| {
            panic!("boom")
        }))
        .expect("add");

    let err = registry
        .register_all(Arc::new(RecordingServer::new()))
        .expect_err("panic must surface as failure");
    assert!(matches!(err, RegistryError::RegistrationFailed { id, .. } if id == "panics"));
    assert_eq!(registry.state(), RegistryState::Failed);
}

#[test]
fn test_entries_can_register_real_routes() {
    init_tracing();
    let registry = ManualRouteRegistry::new(RuntimeConfig::default());
    registry
        .add(ManualRouteEntry::new("ping", 0, |server| {
            server.register(RouteRegistration {
                method: Method::GET,
                path: "/ping".to_string(),
                middlewares: Vec::new(),
                handler: Arc::new(|_req: &mut PipelineRequest| {
                    PipelineResponse::json(200, serde_json::json!({ "pong": true }))
                }),
            })
        }))
        .expect("add");

    let server = Arc::new(RecordingServer::new());
    registry
        .register_all(Arc::clone(&server) as Arc<dyn ServerCapability>)
        .expect("register_all");

    let mut req = PipelineRequest::new(Method::GET, "/ping");
    let resp = server.invoke("/ping", &mut req);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["pong"], serde_json::json!(true));
}

#[test]
fn test_clear_resets_after_failure() {
    init_tracing();
    let registry = ManualRouteRegistry::new(RuntimeConfig::default());
    registry
        .add(ManualRouteEntry::new("broken", 0, |_server| {
            anyhow::bail!("nope")
        }))
        .expect("add");
    let _ = registry.register_all(Arc::new(RecordingServer::new()));
    assert_eq!(registry.state(), RegistryState::Failed);

    registry.clear();
    assert_eq!(registry.state(), RegistryState::Empty);
    assert!(registry.is_empty());

    registry
        .add(ManualRouteEntry::new("fresh", 0, |_server| Ok(())))
        .expect("add after clear");
    registry
        .register_all(Arc::new(RecordingServer::new()))
        .expect("clean pass");
    assert_eq!(registry.state(), RegistryState::Registered);
}

#[test]
fn test_database_health_route_via_registry() {
    init_tracing();
    struct HealthyDb;
    impl routeforge::context::Database for HealthyDb {
        fn ping(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let registry = ManualRouteRegistry::new(RuntimeConfig::default());
    registry
        .add(routeforge::health::database_route(Arc::new(HealthyDb)))
        .expect("add health route");

    let server = Arc::new(RecordingServer::new());
    registry
        .register_all(Arc::clone(&server) as Arc<dyn ServerCapability>)
        .expect("register_all");

    let mut req = PipelineRequest::new(Method::GET, routeforge::health::DATABASE_HEALTH_PATH);
    let resp = server.invoke(routeforge::health::DATABASE_HEALTH_PATH, &mut req);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["connected"], serde_json::json!(true));
}
