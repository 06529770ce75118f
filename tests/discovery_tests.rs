mod common;

use common::{email_password_schema, init_tracing};
use routeforge::discovery::{ControllerDiscovery, DiscoveryError, SchemaDiscovery};
use routeforge::loader::StaticModuleLoader;
use routeforge::pipeline::validation::ValidationKind;
use routeforge::runtime_config::RuntimeConfig;
use routeforge::schema::JsonSchema;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn touch(root: &Path, rel: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("has parent")).expect("mkdir");
    fs::write(&path, "// module body\n").expect("write");
}

fn ok_controller() -> routeforge::ControllerFn {
    Arc::new(|input, _ctx| Ok(json!({ "echo": input })))
}

fn loader_for_tree() -> Arc<StaticModuleLoader> {
    let loader = StaticModuleLoader::new()
        .with_controller("users/controllers/get-user-controller.rs", ok_controller())
        .with_controller("users/controllers/create-user-controller.rs", ok_controller())
        .with_controller("billing/controllers/list-invoices-controller.rs", ok_controller());
    Arc::new(loader)
}

#[test]
fn test_discovers_controllers_and_derives_route_paths() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "users/controllers/get-user-controller.rs");
    touch(dir.path(), "users/controllers/create-user-controller.rs");
    touch(dir.path(), "billing/controllers/list-invoices-controller.rs");

    let discovery = ControllerDiscovery::new(loader_for_tree(), RuntimeConfig::default());
    let catalog = discovery.discover(dir.path()).expect("discover");

    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog.summary.processed, 3);
    assert_eq!(catalog.summary.found, 3);
    assert!(catalog.summary.failures.is_empty());

    let record = catalog.get("/users/get-user").expect("route present");
    assert_eq!(record.module_name, "users");
    assert_eq!(record.name, "get-user");
    assert!(catalog.get("/billing/list-invoices").is_some());
    assert_eq!(discovery.cached().expect("cached").len(), 3);
}

#[test]
fn test_non_convention_files_are_ignored() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "users/controllers/get-user-controller.rs");
    touch(dir.path(), "users/controllers/README.md");
    touch(dir.path(), "users/helpers/get-user-controller.rs");
    touch(dir.path(), "notes.txt");

    let discovery = ControllerDiscovery::new(loader_for_tree(), RuntimeConfig::default());
    let catalog = discovery.discover(dir.path()).expect("discover");

    assert_eq!(catalog.summary.processed, 1);
    assert_eq!(catalog.len(), 1);
}

#[test]
fn test_broken_file_is_isolated_from_the_pass() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "users/controllers/get-user-controller.rs");
    touch(dir.path(), "users/controllers/broken-controller.rs");

    let loader = StaticModuleLoader::new()
        .with_controller("users/controllers/get-user-controller.rs", ok_controller());
    loader.insert_non_callable("users/controllers/broken-controller.rs");

    let discovery = ControllerDiscovery::new(Arc::new(loader), RuntimeConfig::default());
    let catalog = discovery.discover(dir.path()).expect("discover");

    assert_eq!(catalog.summary.processed, 2);
    assert_eq!(catalog.summary.found, 1);
    assert_eq!(catalog.summary.failures.len(), 1);
    assert!(catalog.summary.failures[0]
        .file
        .ends_with("users/controllers/broken-controller.rs"));
    assert!(catalog.get("/users/get-user").is_some());
    assert!(catalog.get("/users/broken").is_none());
}

#[test]
fn test_duplicate_route_path_keeps_first_record() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "users/controllers/get-user-controller.rs");
    touch(dir.path(), "users/controllers/get-user-controller.so");

    let loader = StaticModuleLoader::new()
        .with_controller("users/controllers/get-user-controller.rs", ok_controller())
        .with_controller("users/controllers/get-user-controller.so", ok_controller());

    let discovery = ControllerDiscovery::new(Arc::new(loader), RuntimeConfig::default());
    let catalog = discovery.discover(dir.path()).expect("discover");

    assert_eq!(catalog.summary.processed, 2);
    assert_eq!(catalog.summary.found, 1);
    assert!(catalog.summary.failures.is_empty());
    assert!(catalog.get("/users/get-user").is_some());
}

#[test]
fn test_unreadable_root_is_fatal() {
    init_tracing();
    let discovery = ControllerDiscovery::new(loader_for_tree(), RuntimeConfig::default());
    let err = discovery
        .discover(Path::new("/definitely/not/a/real/root"))
        .expect_err("missing root must fail");
    assert!(matches!(err, DiscoveryError::RootUnreadable { .. }));
}

#[test]
fn test_schema_discovery_infers_section_kinds() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "users/schemas/create-user-schema.json");
    touch(dir.path(), "users/schemas/create-user-params-schema.json");
    touch(dir.path(), "users/schemas/list-users-query-schema.json");

    let schema: Arc<dyn routeforge::Schema> =
        Arc::new(JsonSchema::new(email_password_schema()).expect("compile"));
    let loader = StaticModuleLoader::new()
        .with_schema("users/schemas/create-user-schema.json", Arc::clone(&schema))
        .with_schema("users/schemas/create-user-params-schema.json", Arc::clone(&schema))
        .with_schema("users/schemas/list-users-query-schema.json", schema);

    let discovery = SchemaDiscovery::new(Arc::new(loader), RuntimeConfig::default());
    let catalog = discovery.discover(dir.path()).expect("discover");

    assert_eq!(catalog.len(), 3);
    assert_eq!(
        catalog.get("users/create-user").expect("body schema").kind,
        ValidationKind::Body
    );
    assert_eq!(
        catalog.get("users/create-user-params").expect("params schema").kind,
        ValidationKind::Params
    );
    assert_eq!(
        catalog.get("users/list-users-query").expect("query schema").kind,
        ValidationKind::Query
    );
}

#[test]
fn test_chunked_load_preserves_listing_determinism() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let loader = StaticModuleLoader::new();
    for i in 0..40 {
        let rel = format!("bulk/controllers/item-{i:02}-controller.rs");
        touch(dir.path(), &rel);
        loader.insert_controller(rel, ok_controller());
    }

    let config = RuntimeConfig {
        chunk_size: 4,
        ..RuntimeConfig::default()
    };
    let discovery = ControllerDiscovery::new(Arc::new(loader), config);
    let catalog = discovery.discover(dir.path()).expect("discover");
    assert_eq!(catalog.len(), 40);
    assert_eq!(catalog.summary.failures.len(), 0);
}
