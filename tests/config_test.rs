//! Loading configuration files and applying them to a gateway.

use std::sync::Arc;
use std::time::Duration;

use cellgate::{
    CalcRequest, Cellgate, Config, InputDef, InputType, MemoryCatalog, MemoryEngine, OutputDef,
    ServiceDefinition,
};

fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

#[test]
fn explicit_path_is_loaded() {
    let (_dir, path) = write_config(
        r#"
[cache]
max_entries = 2
ttl_secs = 10

[workbook]
stateless = true

[limits]
request_timeout_secs = 0
"#,
    );

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.cache.max_entries, 2);
    assert_eq!(config.cache.ttl_secs, 10);
    assert!(config.workbook.stateless);
    assert_eq!(config.limits.request_timeout(), None);
    // Untouched sections keep their defaults.
    assert_eq!(config.rate_limit.max_requests, 100);
    assert_eq!(config.workbook.snapshot_ttl_secs, 3_600);
}

#[test]
fn missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
    assert_eq!(err.code(), "INTERNAL_ERROR");
    assert!(err.to_string().contains("not found"));
}

#[test]
fn malformed_file_is_an_error() {
    let (_dir, path) = write_config("[cache\nmax_entries = ");
    let err = Config::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("failed to parse"));
}

#[tokio::test]
async fn builder_applies_loaded_config() {
    let (_dir, path) = write_config(
        r#"
[cache]
max_entries = 2

[rate_limit]
max_requests = 3
window_secs = 60
"#,
    );
    let config = Config::from_file(&path).unwrap();

    let catalog = Arc::new(MemoryCatalog::new());
    catalog
        .publish(
            ServiceDefinition::new("echo", r#"{"sheets": [{"name": "Sheet1"}]}"#)
                .input(InputDef::new("x", "Sheet1!A1", InputType::Number))
                .output(OutputDef::new("x", "Sheet1!A1")),
        )
        .unwrap();
    let gateway = Cellgate::builder()
        .catalog(catalog)
        .engine(Arc::new(MemoryEngine::new()))
        .config(&config)
        .build()
        .unwrap();

    assert_eq!(gateway.result_cache().config().max_entries, 2);
    assert_eq!(
        gateway.workbook_cache().config().ttl,
        Duration::from_secs(600)
    );

    for x in 0..3 {
        gateway
            .calculate(CalcRequest::new("echo").input("x", x))
            .await
            .unwrap();
    }
    assert_eq!(gateway.result_cache().len(), 2);

    let err = gateway
        .calculate(CalcRequest::new("echo").input("x", 9))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
}
