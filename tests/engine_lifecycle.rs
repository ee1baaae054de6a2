//! Engine lifecycle against stub helper processes: single-flight startup,
//! failure recovery, and shutdown.

#![cfg(unix)]

mod support;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tempfile::TempDir;

use embedshot_lib::{Engine, EngineOptions};

fn engine_options(node_command: &str) -> EngineOptions {
    EngineOptions {
        node_command: node_command.to_string(),
        headless: true,
        startup_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn concurrent_callers_share_one_startup() {
    support::skip_engine_preflight();
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("launches.log");

    // Each launch appends a line; a correct single-flight leaves exactly one.
    let script = format!(
        "echo launch >> '{}'\necho '{{\"event\":\"engineReady\"}}'\ncat > /dev/null\n",
        log.display()
    );
    let stub = support::write_stub_engine(&dir, "engine.sh", &script);

    let engine = Engine::new(engine_options(stub.to_str().unwrap()));

    let handles = join_all((0..8).map(|_| engine.handle())).await;
    let first = handles[0].as_ref().unwrap();
    for handle in &handles {
        let handle = handle.as_ref().unwrap();
        assert!(
            Arc::ptr_eq(first, handle),
            "all callers should share the same engine instance"
        );
    }

    let launches = std::fs::read_to_string(&log).unwrap();
    assert_eq!(launches.lines().count(), 1, "expected exactly one launch");

    engine.shutdown().await;
}

#[tokio::test]
async fn startup_failure_clears_state_for_a_fresh_attempt() {
    support::skip_engine_preflight();
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("launches.log");

    // The stub emits a line that is not an engineReady event, failing startup.
    let script = format!("echo attempt >> '{}'\necho boom\nexit 1\n", log.display());
    let stub = support::write_stub_engine(&dir, "engine.sh", &script);

    let engine = Engine::new(engine_options(stub.to_str().unwrap()));

    let err = engine.handle().await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("boom"), "unexpected error: {msg}");
    assert!(
        !msg.contains("Engine unavailable: Engine"),
        "error was wrapped twice: {msg}"
    );
    assert!(engine.handle().await.is_err());

    // Two attempts means the first failure reset the state instead of
    // caching the dead startup.
    let attempts = std::fs::read_to_string(&log).unwrap();
    assert_eq!(attempts.lines().count(), 2);
}

#[tokio::test]
async fn failed_startup_retries_and_recovers() {
    support::skip_engine_preflight();
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("first-attempt-done");

    // First launch fails; every later launch succeeds.
    let script = format!(
        r#"if [ -e '{marker}' ]; then
  echo '{{"event":"engineReady"}}'
  cat > /dev/null
else
  touch '{marker}'
  echo boom
  exit 1
fi
"#,
        marker = marker.display()
    );
    let stub = support::write_stub_engine(&dir, "engine.sh", &script);

    let engine = Engine::new(engine_options(stub.to_str().unwrap()));

    assert!(engine.handle().await.is_err());
    let handle = engine.handle().await.unwrap();
    drop(handle);

    engine.shutdown().await;
}

#[tokio::test]
async fn engine_restarts_after_shutdown() {
    support::skip_engine_preflight();
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("launches.log");

    let script = format!(
        "echo launch >> '{}'\necho '{{\"event\":\"engineReady\"}}'\ncat > /dev/null\n",
        log.display()
    );
    let stub = support::write_stub_engine(&dir, "engine.sh", &script);

    let engine = Engine::new(engine_options(stub.to_str().unwrap()));

    let first = engine.handle().await.unwrap();
    engine.shutdown().await;

    let second = engine.handle().await.unwrap();
    assert!(
        !Arc::ptr_eq(&first, &second),
        "a restart must produce a fresh engine instance"
    );

    let launches = std::fs::read_to_string(&log).unwrap();
    assert_eq!(launches.lines().count(), 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn startup_times_out_when_the_helper_never_reports_ready() {
    support::skip_engine_preflight();
    let dir = TempDir::new().unwrap();

    let script = "sleep 30\n";
    let stub = support::write_stub_engine(&dir, "engine.sh", script);

    let engine = Engine::new(EngineOptions {
        startup_timeout: Duration::from_millis(200),
        ..engine_options(stub.to_str().unwrap())
    });

    let err = engine.handle().await.unwrap_err();
    assert!(
        err.to_string().contains("did not become ready"),
        "unexpected error: {err}"
    );
}
