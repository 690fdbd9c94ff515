//! Orchestration engine tests against in-process fake gateways

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use natstest::testing::{parse_entries, Catalog, Engine};
use natstest::{BusGateway, CommandAllowlist, Error, ErrorKind, Result};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;
use tokio::sync::Notify;

/// Replies with a fixed payload and records what was sent
#[derive(Default)]
struct Recording {
    reply: Vec<u8>,
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl Recording {
    fn replying(reply: serde_json::Value) -> Self {
        Self {
            reply: reply.to_string().into_bytes(),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BusGateway for Recording {
    async fn request(&self, topic: &str, payload: &[u8], _: Duration) -> Result<Vec<u8>> {
        self.sent.lock().unwrap().push((topic.to_string(), payload.to_vec()));
        Ok(self.reply.clone())
    }

    async fn check(&self) -> Result<()> {
        Ok(())
    }
}

/// Holds every request until released
struct Blocking {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl BusGateway for Blocking {
    async fn request(&self, _: &str, payload: &[u8], _: Duration) -> Result<Vec<u8>> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(payload.to_vec())
    }

    async fn check(&self) -> Result<()> {
        Ok(())
    }
}

fn engine_with(gateway: Arc<dyn BusGateway>, dirs: Vec<PathBuf>) -> Engine {
    Engine::new(
        gateway,
        Arc::new(CommandAllowlist::new(["/bin/echo", "/bin/cat"])),
        dirs,
        Duration::from_millis(200),
    )
}

fn catalog(tests: &[(&str, &str)]) -> Catalog {
    let mut catalog = Catalog::new();
    for (name, definition) in tests {
        catalog.insert(name.to_string(), parse_entries(name, definition.as_bytes()).unwrap());
    }
    catalog
}

const ECHO_T1: &str = r#"[{"Topic": "@echo", "Request": {"n": 1}, "Response": {"n": "~re:[0-9]+"}}]"#;

#[tokio::test]
async fn test_echo_topic_passes() {
    let gateway = Arc::new(Recording::default());
    let engine = engine_with(gateway.clone(), vec![]).with_catalog(catalog(&[("t1", ECHO_T1)]));

    let report = engine.run_test("t1").await.unwrap();
    assert_eq!(report.tests, 1);
    assert!(gateway.sent.lock().unwrap().is_empty());
    assert!(!engine.is_busy());
}

#[tokio::test]
async fn test_previous_response_feeds_next_request() {
    let definition = r#"[
        {"Topic": "@echo", "Request": {"v": "hello", "n": 123}, "Response": {"v": "hello"}},
        {"Topic": "@echo", "Request": {"prev": "~pv:0.Response.v", "num": "~pv:0.Response.n"}, "Response": {"prev": "hello", "num": 123}}
    ]"#;
    let engine = engine_with(Arc::new(Recording::default()), vec![])
        .with_catalog(catalog(&[("chain", definition)]));

    engine.run_test("chain").await.unwrap();

    let cache = engine.last_cache().unwrap();
    assert_eq!(cache.len(), 2);
    assert_eq!(cache[1].request, json!({"prev": "hello", "num": 123}));
}

#[tokio::test]
async fn test_expected_response_sees_current_actual_response() {
    let gateway = Arc::new(Recording::replying(json!({"id": 99, "token": "f00d"})));
    let definition = r#"[{"Topic": "svc.login", "Request": {"user": "a"}, "Response": {"token": "~pv:0.Response.token"}}]"#;
    let engine = engine_with(gateway.clone(), vec![]).with_catalog(catalog(&[("login", definition)]));

    engine.run_test("login").await.unwrap();

    let sent = gateway.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "svc.login");
    assert_eq!(sent[0].1, br#"{"user":"a"}"#.to_vec());
}

#[tokio::test]
async fn test_epoch_timestamp_is_numeric() {
    let definition = r#"[{"Topic": "@echo", "Request": {"at": "~ts:"}, "Response": {"at": "~re:^[0-9]+$"}}]"#;
    let engine = engine_with(Arc::new(Recording::default()), vec![])
        .with_catalog(catalog(&[("ts", definition)]));

    engine.run_test("ts").await.unwrap();

    let cache = engine.last_cache().unwrap();
    assert!(cache[0].request["at"].is_i64());
    assert!(cache[0].response["at"].is_i64());
}

#[tokio::test]
async fn test_run_all_skips_internal_and_stops_at_first_failure() {
    let gateway = Arc::new(Recording::replying(json!({"ok": true})));
    let engine = engine_with(gateway.clone(), vec![]).with_catalog(catalog(&[
        ("first", r#"[{"Topic": "svc.a", "Request": {}, "Response": {"ok": true}}]"#),
        ("@broken", r#"[{"Topic": "svc.x", "Request": {}, "Response": {"ok": false}}]"#),
        ("second", r#"[{"Topic": "svc.b", "Request": {}, "Response": {"ok": false}}]"#),
        ("third", r#"[{"Topic": "svc.c", "Request": {}, "Response": {"ok": true}}]"#),
    ]));

    let err = engine.run_test("all").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Match);
    match &err {
        Error::Entry { test, topic, index, .. } => {
            assert_eq!(test, "second");
            assert_eq!(topic, "svc.b");
            assert_eq!(*index, 0);
        }
        other => panic!("Expected entry error, got {:?}", other),
    }

    let topics: Vec<String> = gateway.sent.lock().unwrap().iter().map(|s| s.0.clone()).collect();
    assert_eq!(topics, ["svc.a", "svc.b"]);
    assert!(!engine.is_busy());
}

#[tokio::test]
async fn test_run_all_with_only_internal_tests_succeeds() {
    let engine = engine_with(Arc::new(Recording::default()), vec![])
        .with_catalog(catalog(&[("@example", ECHO_T1)]));

    let report = engine.run_all().await.unwrap();
    assert_eq!(report.tests, 0);
    assert!(engine.test_names().is_empty());
    assert_eq!(engine.all_test_names(), ["@example"]);
}

#[tokio::test]
async fn test_internal_test_runs_by_name() {
    let engine = engine_with(Arc::new(Recording::default()), vec![])
        .with_catalog(catalog(&[("@example", ECHO_T1)]));
    engine.run_test("@example").await.unwrap();
}

#[tokio::test]
async fn test_upsert_overwrites_and_lists_once() {
    let engine = engine_with(Arc::new(Recording::default()), vec![])
        .with_catalog(catalog(&[("t1", ECHO_T1), ("t2", ECHO_T1)]));
    assert_eq!(engine.all_test_names(), ["t1", "t2"]);

    let replacement = r#"[
        {"Topic": "@echo", "Request": {"a": 1}, "Response": {"a": 1}},
        {"Topic": "@echo", "Request": {"b": 2}, "Response": {"b": 2}}
    ]"#;
    let report = engine.run_definition("t1", replacement.as_bytes()).await.unwrap();
    assert_eq!(report.entries, 2);
    assert_eq!(engine.all_test_names(), ["t1", "t2"]);

    engine.run_definition("t3", ECHO_T1.as_bytes()).await.unwrap();
    assert_eq!(engine.all_test_names(), ["t1", "t2", "t3"]);
}

#[tokio::test]
async fn test_upsert_keeps_definition_when_run_fails() {
    let engine = engine_with(Arc::new(Recording::default()), vec![]);
    let failing = r#"[{"Topic": "@echo", "Request": {"a": 1}, "Response": {"a": 2}}]"#;

    let err = engine.run_definition("t", failing.as_bytes()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Match);
    assert_eq!(engine.all_test_names(), ["t"]);
}

#[tokio::test]
async fn test_delete() {
    let engine = engine_with(Arc::new(Recording::default()), vec![])
        .with_catalog(catalog(&[("t1", ECHO_T1), ("t2", ECHO_T1)]));

    let err = engine.delete_test("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(engine.all_test_names(), ["t1", "t2"]);

    engine.delete_test("t1").await.unwrap();
    assert_eq!(engine.all_test_names(), ["t2"]);
    assert!(matches!(engine.run_test("t1").await, Err(Error::TestNotFound(_))));
}

#[tokio::test]
async fn test_reload_without_files_fails_and_keeps_catalog() {
    let empty = tempdir().unwrap();
    let engine = engine_with(Arc::new(Recording::default()), vec![empty.path().to_path_buf()])
        .with_catalog(catalog(&[("t1", ECHO_T1)]));

    let err = engine.reload().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Filesystem);
    assert!(!engine.is_busy());
    assert_eq!(engine.all_test_names(), ["t1"]);
}

#[tokio::test]
async fn test_reload_reads_directories_in_priority_order() {
    let high = tempdir().unwrap();
    let low = tempdir().unwrap();
    std::fs::write(high.path().join("test_t1.json"), ECHO_T1).unwrap();
    std::fs::write(
        low.path().join("test_t1.json"),
        r#"[{"Topic": "@echo", "Request": {"n": 1}, "Response": {"n": 2}}]"#,
    )
    .unwrap();
    std::fs::write(low.path().join("test_@demo.json"), ECHO_T1).unwrap();

    let engine = engine_with(
        Arc::new(Recording::default()),
        vec![high.path().to_path_buf(), low.path().to_path_buf()],
    );
    assert_eq!(engine.reload().await.unwrap(), 2);
    assert_eq!(engine.test_names(), ["t1"]);

    // The higher priority definition passes, the shadowed one would not
    engine.run_test("t1").await.unwrap();
}

#[tokio::test]
async fn test_reload_parse_failure_keeps_catalog() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("test_bad.json"), "[{").unwrap();
    let engine = engine_with(Arc::new(Recording::default()), vec![dir.path().to_path_buf()])
        .with_catalog(catalog(&[("t1", ECHO_T1)]));

    let err = engine.reload().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert_eq!(engine.all_test_names(), ["t1"]);
}

#[tokio::test]
async fn test_concurrent_runs_exactly_one_busy() {
    let gateway = Arc::new(Blocking {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let engine = Arc::new(
        engine_with(gateway.clone(), vec![]).with_catalog(catalog(&[
            ("slow", r#"[{"Topic": "svc.slow", "Request": {"n": 1}, "Response": {"n": 1}}]"#),
            ("t1", ECHO_T1),
        ])),
    );

    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_test("slow").await })
    };
    gateway.entered.notified().await;

    assert!(engine.is_busy());
    assert!(matches!(engine.run_test("t1").await, Err(Error::Busy)));
    assert!(matches!(engine.run_test("missing").await, Err(Error::Busy)));
    assert!(matches!(engine.reload().await, Err(Error::Busy)));
    assert!(matches!(engine.delete_test("t1").await, Err(Error::Busy)));
    assert!(matches!(engine.health().await, Err(Error::Busy)));
    assert!(engine.status().busy);

    gateway.release.notify_one();
    running.await.unwrap().unwrap();

    assert!(!engine.is_busy());
    engine.run_test("t1").await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_polling_never_rejects_runs() {
    let engine = Arc::new(
        engine_with(Arc::new(Recording::default()), vec![]).with_catalog(catalog(&[("t1", ECHO_T1)])),
    );
    let stop = Arc::new(AtomicBool::new(false));

    let poller = {
        let engine = engine.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            let mut polls = 0u64;
            while polls == 0 || !stop.load(Ordering::Relaxed) {
                let _ = engine.status();
                let _ = engine.last_cache();
                polls += 1;
            }
            polls
        })
    };

    for _ in 0..2000 {
        engine.run_test("t1").await.unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    assert!(poller.join().unwrap() > 0);
    assert!(!engine.is_busy());
}

#[tokio::test]
async fn test_bus_timeout_is_tagged_with_entry() {
    struct Silent;

    #[async_trait]
    impl BusGateway for Silent {
        async fn request(&self, _: &str, _: &[u8], timeout: Duration) -> Result<Vec<u8>> {
            Err(Error::BusTimeout(timeout.as_millis() as u64))
        }

        async fn check(&self) -> Result<()> {
            Err(Error::BusTransport("no server".to_string()))
        }
    }

    let definition = r#"[
        {"Topic": "@echo", "Request": {}, "Response": {}},
        {"Topic": "svc.down", "Request": {}, "Response": {}}
    ]"#;
    let engine = engine_with(Arc::new(Silent), vec![]).with_catalog(catalog(&[("t", definition)]));

    let err = engine.run_test("t").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusTimeout);
    assert_eq!(err.to_string(), "t: svc.down [1]: Request timeout after 200 ms");
    assert_eq!(engine.health().await.unwrap_err().kind(), ErrorKind::BusTransport);
}

#[cfg(unix)]
#[tokio::test]
async fn test_disallowed_transform_never_reaches_bus() {
    let gateway = Arc::new(Recording::default());
    let definition = r#"[
        {"Topic": "@echo", "Request": {"v": "x"}, "Response": {"v": "x"}},
        {"Topic": "svc.next", "Request": {"v": "~pv:0.Response.v>/bin/rm -rf %v"}, "Response": {}}
    ]"#;
    let engine = engine_with(gateway.clone(), vec![]).with_catalog(catalog(&[("t", definition)]));

    let err = engine.run_test("t").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Template);
    assert!(gateway.sent.lock().unwrap().is_empty());
}
