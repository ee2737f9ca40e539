//! Chunk loading integration tests

mod common;

use chunkrt_loader::{
    ChunkPayload, ChunkState, FailureCategory, FsSource, MemorySource, ModuleId, Runtime, RuntimeConfig,
    RuntimeError, Value, factory,
};
use common::{Heap, TestHost, TestSource, binary_locator, todomvc_config, todomvc_wasm};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

struct Fixture {
    runtime: Runtime,
    host: Arc<TestHost>,
    source: Arc<TestSource>,
    heap: Heap,
}

fn fixture_with(config: RuntimeConfig, payloads: MemorySource) -> Fixture {
    let heap = Heap::default();
    let host = Arc::new(TestHost::with_chunk_1(&heap));
    payloads.insert(binary_locator(), todomvc_wasm());
    let source = Arc::new(TestSource::new(Arc::new(payloads)));

    let runtime = Runtime::builder()
        .config(config)
        .script_host(host.clone())
        .byte_source(source.clone())
        .build();

    Fixture {
        runtime,
        host,
        source,
        heap,
    }
}

fn fixture() -> Fixture {
    fixture_with(todomvc_config(), MemorySource::new())
}

fn load_error(err: &RuntimeError) -> (FailureCategory, String) {
    let load = err.as_chunk_load().expect("expected a chunk load error");
    (load.category, load.locator.clone())
}

#[tokio::test]
async fn test_run_entry_loads_chunk_and_binary() {
    let f = fixture();
    assert_eq!(f.runtime.chunk_state(0), ChunkState::Installed);
    assert_eq!(f.runtime.chunk_state(1), ChunkState::Unrequested);

    let result = f.runtime.run_entry(1, 1).await.unwrap();

    assert_eq!(result, Value::I32(0));
    assert_eq!(f.heap.strings(), vec!["hello, todo".to_string()]);
    assert_eq!(f.runtime.chunk_state(1), ChunkState::Installed);
    assert!(f.runtime.binary_exports(2).is_some());
    assert_eq!(f.host.inserts(), 1);
    assert_eq!(f.source.fetches(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let f = fixture();

    let first = f.runtime.ensure_chunk(1);
    let second = f.runtime.ensure_chunk(1);
    assert_eq!(f.runtime.chunk_state(1), ChunkState::Loading);

    let (a, b) = futures::join!(first, second);
    assert_eq!(a, Ok(()));
    assert_eq!(b, Ok(()));
    assert_eq!(f.host.inserts(), 1);
    assert_eq!(f.source.fetches(), 1);

    f.runtime.ensure_chunk(1).await.unwrap();
    assert_eq!(f.host.inserts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_one_failure() {
    let f = fixture();
    f.host.hang.store(true, Ordering::SeqCst);

    let (a, b) = futures::join!(f.runtime.ensure_chunk(3), f.runtime.ensure_chunk(3));

    assert_eq!(a, b);
    let err = a.unwrap_err();
    assert_eq!(load_error(&err), (FailureCategory::Timeout, "dist/3.bundle.js".to_string()));
    assert_eq!(f.host.inserts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_binary_is_fetched_while_the_script_loads() {
    let f = fixture();
    f.host.hang.store(true, Ordering::SeqCst);

    let pending = tokio::spawn(f.runtime.ensure_chunk(1));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(f.source.fetches(), 1);
    assert_eq!(f.runtime.chunk_state(1), ChunkState::Loading);
    assert!(f.runtime.binary_exports(2).is_none());

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(load_error(&err), (FailureCategory::Timeout, "dist/1.bundle.js".to_string()));
    assert!(f.runtime.binary_exports(2).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_script_that_registers_before_timing_out_succeeds() {
    let mut config = todomvc_config();
    config.max_retries = 2;
    let f = fixture_with(config, MemorySource::new());
    f.host.hang_after_insert.store(true, Ordering::SeqCst);
    f.host.scripts.serve("dist/3.bundle.js", ChunkPayload::new([3]));

    f.runtime.ensure_chunk(3).await.unwrap();
    assert_eq!(f.runtime.chunk_state(3), ChunkState::Installed);

    // Let the insert time out; the registered chunk counts as loaded
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(f.host.inserts(), 1);
    assert_eq!(f.runtime.chunk_state(3), ChunkState::Installed);
}

#[tokio::test]
async fn test_require_is_idempotent() {
    let f = fixture();
    f.runtime.ensure_chunk(1).await.unwrap();

    let first = f.runtime.require(1).unwrap();
    let second = f.runtime.require(1).unwrap();
    assert!(first.ptr_eq(&second));
    assert!(first.contains("run"));

    assert_eq!(
        f.runtime.require(42).unwrap_err(),
        RuntimeError::UnknownModule(ModuleId::from(42))
    );
}

#[tokio::test]
async fn test_dropping_the_signal_does_not_cancel_the_fetch() {
    let f = fixture();
    drop(f.runtime.ensure_chunk(1));

    f.runtime.ensure_chunk(1).await.unwrap();
    assert_eq!(f.host.inserts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_script_timeout_resets_state() {
    let f = fixture();
    f.host.hang.store(true, Ordering::SeqCst);

    let started = tokio::time::Instant::now();
    let err = f.runtime.ensure_chunk(3).await.unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(120_000));
    assert_eq!(load_error(&err), (FailureCategory::Timeout, "dist/3.bundle.js".to_string()));
    assert_eq!(err.to_string(), "Loading chunk 3 failed.\n(timeout: dist/3.bundle.js)");
    assert_eq!(f.runtime.chunk_state(3), ChunkState::Unrequested);

    f.host.hang.store(false, Ordering::SeqCst);
    f.host.scripts.serve("dist/3.bundle.js", ChunkPayload::new([3]));
    f.runtime.ensure_chunk(3).await.unwrap();
    assert_eq!(f.host.inserts(), 2);
    assert_eq!(f.runtime.chunk_state(3), ChunkState::Installed);
}

#[tokio::test(start_paused = true)]
async fn test_binary_timeout_resets_only_the_binary() {
    let f = fixture();
    f.source.hang.store(true, Ordering::SeqCst);

    let started = tokio::time::Instant::now();
    let err = f.runtime.ensure_chunk(1).await.unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(120_000));
    assert_eq!(load_error(&err), (FailureCategory::Timeout, binary_locator()));
    assert_eq!(f.runtime.chunk_state(1), ChunkState::Unrequested);
    assert!(f.runtime.binary_exports(2).is_none());

    f.source.hang.store(false, Ordering::SeqCst);
    f.runtime.ensure_chunk(1).await.unwrap();
    assert_eq!(f.host.inserts(), 1);
    assert_eq!(f.source.fetches(), 2);
    assert!(f.runtime.binary_exports(2).is_some());
}

#[tokio::test]
async fn test_failed_script_fails_its_binaries() {
    let f = fixture();
    f.host.failures_left.store(1, Ordering::SeqCst);

    let err = f.runtime.ensure_chunk(1).await.unwrap_err();
    assert_eq!(load_error(&err), (FailureCategory::Network, "dist/1.bundle.js".to_string()));
    assert!(f.runtime.binary_exports(2).is_none());

    f.runtime.run_entry(1, 1).await.unwrap();
    assert_eq!(f.host.inserts(), 2);
}

#[tokio::test]
async fn test_script_without_registration_is_missing() {
    let f = fixture();
    f.host.scripts.serve("dist/4.bundle.js", ChunkPayload::new([5]));

    let err = f.runtime.ensure_chunk(4).await.unwrap_err();
    assert_eq!(load_error(&err), (FailureCategory::Missing, "dist/4.bundle.js".to_string()));
    assert_eq!(f.runtime.chunk_state(4), ChunkState::Unrequested);
    assert_eq!(f.runtime.chunk_state(5), ChunkState::Installed);
}

#[tokio::test]
async fn test_unknown_script_is_a_network_failure() {
    let f = fixture();
    let err = f.runtime.ensure_chunk("lazy").await.unwrap_err();
    assert_eq!(load_error(&err), (FailureCategory::Network, "dist/lazy.bundle.js".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_when_enabled() {
    let mut config = todomvc_config();
    config.max_retries = 2;
    config.retry_backoff_ms = 250;
    let f = fixture_with(config, MemorySource::new());
    f.host.failures_left.store(2, Ordering::SeqCst);

    f.runtime.ensure_chunk(1).await.unwrap();
    assert_eq!(f.host.inserts(), 3);

    let f = fixture();
    f.host.failures_left.store(1, Ordering::SeqCst);
    assert!(f.runtime.ensure_chunk(1).await.is_err());
    assert_eq!(f.host.inserts(), 1);
}

#[tokio::test]
async fn test_streaming_and_buffered_paths_agree() {
    let mut buffered_config = todomvc_config();
    buffered_config.compile_streaming = false;

    for (config, payloads) in [
        (todomvc_config(), MemorySource::new()),
        (todomvc_config(), MemorySource::streaming(7)),
        (buffered_config, MemorySource::streaming(7)),
    ] {
        let f = fixture_with(config, payloads);
        assert_eq!(f.runtime.run_entry(1, 1).await.unwrap(), Value::I32(0));
        assert_eq!(f.heap.strings(), vec!["hello, todo".to_string()]);
    }
}

#[tokio::test]
async fn test_corrupt_binary_payload_fails_to_link() {
    let payloads = MemorySource::streaming(4);
    let f = fixture_with(todomvc_config(), payloads.clone());
    payloads.insert(binary_locator(), &b"<!doctype html>"[..]);

    let err = f.runtime.ensure_chunk(1).await.unwrap_err();
    assert!(matches!(err, RuntimeError::LinkFailure { .. }));
    assert_eq!(f.runtime.chunk_state(1), ChunkState::Unrequested);
}

#[tokio::test]
async fn test_unregistered_import_target() {
    let mut config = todomvc_config();
    for entry in config.manifest.binaries.values_mut() {
        for group in &mut entry.imports {
            group.module = ModuleId::from(9);
        }
    }
    let f = fixture_with(config, MemorySource::new());

    let err = f.runtime.ensure_chunk(1).await.unwrap_err();
    assert!(matches!(err, RuntimeError::UnresolvedImport { ref module, .. } if *module == ModuleId::from(9)));
    assert!(f.runtime.binary_exports(2).is_none());
    assert_eq!(f.runtime.chunk_state(1), ChunkState::Unrequested);
}

#[tokio::test]
async fn test_fs_source_missing_payload() {
    let dir = tempfile::tempdir().unwrap();
    let heap = Heap::default();
    let runtime = Runtime::builder()
        .config(todomvc_config())
        .script_host(Arc::new(TestHost::with_chunk_1(&heap)))
        .byte_source(Arc::new(FsSource::new(dir.path())))
        .build();

    let err = runtime.ensure_chunk(1).await.unwrap_err();
    assert_eq!(load_error(&err), (FailureCategory::Missing, binary_locator()));

    std::fs::create_dir(dir.path().join("dist")).unwrap();
    std::fs::write(dir.path().join(binary_locator()), todomvc_wasm()).unwrap();
    assert_eq!(runtime.run_entry(1, 1).await.unwrap(), Value::I32(0));
}

#[tokio::test]
async fn test_preloaded_payload_needs_no_fetch() {
    let f = fixture();
    f.runtime.registrar().push(ChunkPayload::new([6]).module(
        60,
        factory(|_, exports, _| {
            exports.define("run", |_, _| Ok(Value::from("preloaded")));
            Ok(())
        }),
    ));

    assert_eq!(f.runtime.chunk_state(6), ChunkState::Installed);
    assert_eq!(f.runtime.run_entry(6, 60).await.unwrap(), Value::from("preloaded"));
    assert_eq!(f.host.inserts(), 0);
}

#[tokio::test]
async fn test_run_entry_reports_missing_run_export() {
    let f = fixture();
    f.runtime.registrar().push(ChunkPayload::new([7]).module(70, factory(|_, _, _| Ok(()))));

    let err = f.runtime.run_entry(7, 70).await.unwrap_err();
    assert_eq!(err, RuntimeError::missing_export("70", "run"));
}
