//! End-to-end invocation tests.
//!
//! Guests are written in the WebAssembly text format, stored as plain files
//! and served through the file resolver.

use bytes::Bytes;
use http::{Request, StatusCode};
use orbit_core::providers::DnsSource;
use orbit_core::{FunctionSpec, InvocationContext, InvokeError, Invoker, InvokerConfig, ModuleLoader, TriggerKind};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Reads query value `n`, answers `PONG<n+1>`.
const PING_GUEST: &str = r#"
(module
  (import "orbit/sdk" "eventHttpQueryValueByNameSize"
    (func $query_size (param i32 i32 i32 i32) (result i32)))
  (import "orbit/sdk" "eventHttpQueryValueByName"
    (func $query (param i32 i32 i32 i32 i32) (result i32)))
  (import "orbit/sdk" "eventHttpWrite"
    (func $write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "n")
  (data (i32.const 64) "PONG")

  (func (export "ping") (param $ev i32) (result i32)
    (local $len i32) (local $i i32) (local $n i32) (local $out i32)

    (if (call $query_size (local.get $ev) (i32.const 0) (i32.const 1) (i32.const 16))
      (then (return (i32.const 1))))
    (local.set $len (i32.load (i32.const 16)))
    (if (i32.gt_u (local.get $len) (i32.const 16))
      (then (return (i32.const 2))))
    (if (call $query (local.get $ev) (i32.const 0) (i32.const 1) (i32.const 32) (local.get $len))
      (then (return (i32.const 3))))

    (block $parsed
      (loop $digit
        (br_if $parsed (i32.ge_u (local.get $i) (local.get $len)))
        (local.set $n
          (i32.add
            (i32.mul (local.get $n) (i32.const 10))
            (i32.sub (i32.load8_u (i32.add (i32.const 32) (local.get $i))) (i32.const 48))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $digit)))
    (local.set $n (i32.add (local.get $n) (i32.const 1)))

    (local.set $out (i32.const 100))
    (loop $emit
      (local.set $out (i32.sub (local.get $out) (i32.const 1)))
      (i32.store8 (local.get $out)
        (i32.add (i32.const 48) (i32.rem_u (local.get $n) (i32.const 10))))
      (local.set $n (i32.div_u (local.get $n) (i32.const 10)))
      (br_if $emit (local.get $n)))

    (if (call $write (local.get $ev) (i32.const 64) (i32.const 4) (i32.const 128))
      (then (return (i32.const 4))))
    (if (call $write (local.get $ev) (local.get $out) (i32.sub (i32.const 100) (local.get $out)) (i32.const 128))
      (then (return (i32.const 5))))
    (i32.const 0)))
"#;

/// Sets a status and a header, then echoes the function name from self.
const CREATED_GUEST: &str = r#"
(module
  (import "orbit/sdk" "eventHttpRetCode" (func $ret (param i32 i32) (result i32)))
  (import "orbit/sdk" "eventHttpHeaderAdd" (func $header (param i32 i32 i32 i32 i32) (result i32)))
  (import "orbit/sdk" "eventHttpWrite" (func $write (param i32 i32 i32 i32) (result i32)))
  (import "orbit/sdk" "selfFunctionSize" (func $fn_size (param i32) (result i32)))
  (import "orbit/sdk" "selfFunction" (func $fn (param i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "x-orbit")
  (data (i32.const 16) "yes")

  (func (export "create") (param $ev i32) (result i32)
    (local $len i32)
    (if (call $ret (local.get $ev) (i32.const 201)) (then (return (i32.const 1))))
    (if (call $header (local.get $ev) (i32.const 0) (i32.const 7) (i32.const 16) (i32.const 3))
      (then (return (i32.const 2))))
    (if (call $fn_size (i32.const 32)) (then (return (i32.const 3))))
    (local.set $len (i32.load (i32.const 32)))
    (if (call $fn (i32.const 64) (local.get $len)) (then (return (i32.const 4))))
    (if (call $write (local.get $ev) (i32.const 64) (local.get $len) (i32.const 48))
      (then (return (i32.const 5))))
    (i32.const 0)))
"#;

const FAILING_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "fail") (param i32) (result i32)
    (i32.const 7)))
"#;

const SPIN_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "spin") (param i32) (result i32)
    (loop $forever (br $forever))
    (i32.const 0)))
"#;

const LOOPING_START_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (func $spin (loop $forever (br $forever)))
  (start $spin)
  (func (export "spin") (param i32) (result i32)
    (i32.const 0)))
"#;

fn invoker_for(guest: &str) -> (TempDir, Invoker) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("guest.wat");
    std::fs::write(&path, guest).expect("write guest");

    let config = InvokerConfig {
        dns_source: DnsSource::BuiltIn,
        ..InvokerConfig::default()
    };
    let invoker = Invoker::new(ModuleLoader::from_file(&path)).with_config(config);
    (dir, invoker)
}

fn get(uri: &str) -> Request<Bytes> {
    Request::get(uri)
        .header("host", "fn.example.com")
        .body(Bytes::new())
        .expect("request")
}

#[tokio::test]
async fn test_ping_round_trip() {
    let (_dir, invoker) = invoker_for(PING_GUEST);
    let spec = FunctionSpec::http("ping", "ping");
    let ctx = InvocationContext::new("proj", "fn-ping");

    let invocation = invoker
        .invoke(&ctx, &spec, get("/ping?n=41"))
        .await
        .expect("invoke");

    assert!(invocation.teardown_error().is_none());
    let response = invocation.into_strict().expect("strict");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"PONG42");

    let stats = invoker.service().stats();
    assert_eq!(stats.booted(), 1);
    assert_eq!(stats.live(), 0);
}

#[tokio::test]
async fn test_zero_timeout_runs_under_default_deadline() {
    let (_dir, invoker) = invoker_for(PING_GUEST);
    let spec = FunctionSpec::http("ping", "ping");
    assert_eq!(spec.timeout, Duration::ZERO);
    assert_eq!(invoker.config().deadline_for(&spec), Duration::from_secs(30));

    let invocation = invoker
        .invoke(&InvocationContext::new("proj", "fn"), &spec, get("/?n=0"))
        .await
        .expect("invoke");
    assert_eq!(invocation.response().body().as_ref(), b"PONG1");
}

#[tokio::test]
async fn test_status_headers_and_self_identity() {
    let (_dir, invoker) = invoker_for(CREATED_GUEST);
    let spec = FunctionSpec::http("orders", "create");
    let ctx = InvocationContext::new("proj", "fn-orders").with_application("shop");

    let response = invoker
        .invoke(&ctx, &spec, get("/orders"))
        .await
        .expect("invoke")
        .into_response();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["x-orbit"], "yes");
    assert_eq!(response.body().as_ref(), b"orders");
}

#[tokio::test]
async fn test_non_zero_return_is_guest_fault() {
    let (_dir, invoker) = invoker_for(FAILING_GUEST);
    let spec = FunctionSpec::http("fail", "fail");

    let err = invoker
        .invoke(&InvocationContext::new("proj", "fn"), &spec, get("/"))
        .await
        .expect_err("guest fault");
    assert!(matches!(err, InvokeError::GuestTrap { code: Some(7), .. }), "got {err}");
    assert!(err.is_guest_fault());
    assert_eq!(invoker.service().live_instances(), 0);
}

#[tokio::test]
async fn test_runaway_guest_times_out() {
    let (_dir, invoker) = invoker_for(SPIN_GUEST);
    let deadline = Duration::from_millis(200);
    let spec = FunctionSpec::http("spin", "spin").with_timeout(deadline);

    let start = Instant::now();
    let err = invoker
        .invoke(&InvocationContext::new("proj", "fn"), &spec, get("/"))
        .await
        .expect_err("timeout");
    let elapsed = start.elapsed();

    assert!(err.is_timeout(), "got {err}");
    assert!(matches!(err, InvokeError::Timeout { deadline: d, .. } if d == deadline));
    assert!(elapsed >= deadline, "took {elapsed:?}");
    assert!(elapsed < deadline + Duration::from_secs(1), "took {elapsed:?}");
    assert_eq!(invoker.service().live_instances(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn test_runaway_guest_times_out_on_current_thread_runtime() {
    let (_dir, invoker) = invoker_for(SPIN_GUEST);
    let deadline = Duration::from_millis(200);
    let spec = FunctionSpec::http("spin", "spin").with_timeout(deadline);

    let start = Instant::now();
    let err = invoker
        .invoke(&InvocationContext::new("proj", "fn"), &spec, get("/"))
        .await
        .expect_err("timeout");
    let elapsed = start.elapsed();

    assert!(matches!(err, InvokeError::Timeout { deadline: d, .. } if d == deadline), "got {err}");
    assert!(elapsed >= deadline, "took {elapsed:?}");
    assert!(elapsed < deadline + Duration::from_secs(1), "took {elapsed:?}");
    assert_eq!(invoker.service().live_instances(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn test_looping_start_function_times_out() {
    let (_dir, invoker) = invoker_for(LOOPING_START_GUEST);
    let deadline = Duration::from_millis(200);
    let spec = FunctionSpec::http("spin", "spin").with_timeout(deadline);

    let start = Instant::now();
    let err = invoker
        .invoke(&InvocationContext::new("proj", "fn"), &spec, get("/"))
        .await
        .expect_err("start function never returns");
    let elapsed = start.elapsed();

    assert!(matches!(err, InvokeError::Timeout { deadline: d, .. } if d == deadline), "got {err}");
    assert!(elapsed >= deadline, "took {elapsed:?}");
    assert!(elapsed < deadline + Duration::from_secs(1), "took {elapsed:?}");
    assert_eq!(invoker.service().live_instances(), 0);
}

#[tokio::test]
async fn test_caller_cancellation_interrupts_start_function() {
    let (_dir, invoker) = invoker_for(LOOPING_START_GUEST);
    let spec = FunctionSpec::http("spin", "spin").with_timeout(Duration::from_secs(30));
    let parent = CancellationToken::new();
    let ctx = InvocationContext::new("proj", "fn").with_cancellation(&parent);

    let canceller = {
        let parent = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            parent.cancel();
        })
    };

    let start = Instant::now();
    let err = invoker.invoke(&ctx, &spec, get("/")).await.expect_err("cancelled");
    canceller.await.expect("canceller");

    assert!(matches!(err, InvokeError::Cancelled(_)), "got {err}");
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(invoker.service().live_instances(), 0);
}

#[tokio::test]
async fn test_caller_cancellation_stops_guest() {
    let (_dir, invoker) = invoker_for(SPIN_GUEST);
    let spec = FunctionSpec::http("spin", "spin").with_timeout(Duration::from_secs(30));
    let parent = CancellationToken::new();
    let ctx = InvocationContext::new("proj", "fn").with_cancellation(&parent);

    let canceller = {
        let parent = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            parent.cancel();
        })
    };

    let start = Instant::now();
    let err = invoker.invoke(&ctx, &spec, get("/")).await.expect_err("cancelled");
    canceller.await.expect("canceller");

    assert!(matches!(err, InvokeError::Cancelled(_)), "got {err}");
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(invoker.service().live_instances(), 0);
}

#[tokio::test]
async fn test_non_http_trigger_rejected_before_boot() {
    let (_dir, invoker) = invoker_for(PING_GUEST);
    for trigger in [TriggerKind::PubSub, TriggerKind::P2p] {
        let spec = FunctionSpec::http("ping", "ping").with_trigger(trigger);
        let err = invoker
            .invoke(&InvocationContext::new("proj", "fn"), &spec, get("/?n=1"))
            .await
            .expect_err("unsupported");
        assert!(matches!(err, InvokeError::UnsupportedTrigger(t) if t == trigger));
    }
    assert_eq!(invoker.service().stats().booted(), 0);
}

#[tokio::test]
async fn test_missing_export_is_link_error() {
    let (_dir, invoker) = invoker_for(PING_GUEST);
    let spec = FunctionSpec::http("ping", "pong");

    let err = invoker
        .invoke(&InvocationContext::new("proj", "fn"), &spec, get("/?n=1"))
        .await
        .expect_err("missing export");
    assert!(matches!(err, InvokeError::Link(_)), "got {err}");
    assert_eq!(invoker.service().live_instances(), 0);
}
