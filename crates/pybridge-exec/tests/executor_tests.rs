// SPDX-License-Identifier: MIT OR Apache-2.0
//! Executor conformance tests against a real Python worker.
//!
//! Every test spawns the embedded shim under the host's Python 3 and is
//! skipped when no interpreter is installed.

use pybridge_config::BridgeConfig;
use pybridge_error::{BridgeError, ErrorKind};
use pybridge_exec::Executor;
use pybridge_protocol::{SecurityMode, Severity};
use serde_json::{Map, Value, json};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn python_cmd() -> Option<String> {
    for cmd in &["python3", "python"] {
        if std::process::Command::new(cmd)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok()
        {
            return Some(cmd.to_string());
        }
    }
    None
}

macro_rules! require_python {
    () => {
        match python_cmd() {
            Some(cmd) => cmd,
            None => {
                eprintln!("SKIP: python not found");
                return;
            }
        }
    };
}

fn test_config(py: &str) -> BridgeConfig {
    BridgeConfig {
        python_path: py.into(),
        shutdown_grace: Duration::from_millis(500),
        ..Default::default()
    }
}

fn vars(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Spawn and basic commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn spawn_reports_version() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    let version = exec.version().await.expect("version");
    assert!(version.starts_with('3'), "unexpected version: {version}");

    exec.shutdown().await;
}

#[tokio::test]
async fn evaluate_returns_expression_value() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    let value = exec
        .evaluate("2 ** 10", Map::new(), SecurityMode::Admin)
        .await
        .expect("evaluate");
    assert_eq!(value, json!(1024));

    exec.shutdown().await;
}

#[tokio::test]
async fn execute_passes_variables_and_returns_result() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    let value = exec
        .execute(
            "result = x + y",
            vars(&[("x", json!(10)), ("y", json!(20))]),
            SecurityMode::Admin,
        )
        .await
        .expect("execute");
    assert_eq!(value, json!(30));

    exec.shutdown().await;
}

#[tokio::test]
async fn execute_without_result_binding_returns_null() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    let value = exec
        .execute("a = 1", Map::new(), SecurityMode::Admin)
        .await
        .expect("execute");
    assert_eq!(value, Value::Null);

    exec.shutdown().await;
}

#[tokio::test]
async fn scope_persists_across_calls_and_clears() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    exec.execute("a = 7", Map::new(), SecurityMode::Admin)
        .await
        .expect("execute");
    let value = exec
        .evaluate("a + 1", Map::new(), SecurityMode::Admin)
        .await
        .expect("evaluate");
    assert_eq!(value, json!(8));

    exec.clear_globals().await.expect("clear_globals");
    let err = exec
        .evaluate("a", Map::new(), SecurityMode::Admin)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChildError);

    exec.shutdown().await;
}

#[tokio::test]
async fn evaluate_rejects_statements() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    let err = exec
        .evaluate("a = 1", Map::new(), SecurityMode::Admin)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChildError);

    exec.shutdown().await;
}

// ---------------------------------------------------------------------------
// Error shape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn child_error_carries_class_and_traceback() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    let err = exec
        .evaluate("1 / 0", Map::new(), SecurityMode::Admin)
        .await
        .unwrap_err();
    match &err {
        BridgeError::ChildError { error, traceback } => {
            assert!(error.starts_with("ZeroDivisionError"), "error: {error}");
            assert!(
                traceback.as_deref().unwrap().contains("Traceback"),
                "traceback missing"
            );
        }
        other => panic!("expected ChildError, got {other:?}"),
    }

    exec.shutdown().await;
}

#[tokio::test]
async fn unserializable_value_renders_as_string() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    // A set is not JSON-representable; the worker renders it as a string.
    let value = exec
        .evaluate("{1}", Map::new(), SecurityMode::Admin)
        .await
        .expect("evaluate");
    assert!(value.is_string(), "expected lossy string, got {value:?}");

    exec.shutdown().await;
}

// ---------------------------------------------------------------------------
// Security modes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restricted_rejects_dynamic_compilation() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    for code in ["eval('1')", "exec('x = 1')", "compile('1', '<s>', 'eval')"] {
        let err = exec
            .execute(code, Map::new(), SecurityMode::Restricted)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security, "code: {code}");
    }

    exec.shutdown().await;
}

#[tokio::test]
async fn restricted_rejects_denied_imports_and_introspection() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    let err = exec
        .execute("import os", Map::new(), SecurityMode::Restricted)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);

    let err = exec
        .evaluate(
            "().__class__.__bases__",
            Map::new(),
            SecurityMode::Restricted,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);

    exec.shutdown().await;
}

#[tokio::test]
async fn admin_is_strictly_more_capable() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    let value = exec
        .execute(
            "import os\nresult = os.getpid()",
            Map::new(),
            SecurityMode::Admin,
        )
        .await
        .expect("admin import");
    assert!(value.is_number());

    exec.shutdown().await;
}

// ---------------------------------------------------------------------------
// call_module
// ---------------------------------------------------------------------------

#[tokio::test]
async fn call_module_invokes_function() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    let value = exec
        .call_module(
            "math",
            "pow",
            vec![json!(2), json!(3)],
            Map::new(),
            SecurityMode::Admin,
        )
        .await
        .expect("call_module");
    assert_eq!(value, json!(8.0));

    exec.shutdown().await;
}

#[tokio::test]
async fn call_module_unresolvable_is_not_found() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    let err = exec
        .call_module(
            "definitely_not_a_module",
            "f",
            vec![],
            Map::new(),
            SecurityMode::Admin,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = exec
        .call_module("math", "no_such_fn", vec![], Map::new(), SecurityMode::Admin)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    exec.shutdown().await;
}

// ---------------------------------------------------------------------------
// check_syntax / get_completions / list_modules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn check_syntax_reports_parse_errors() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    let findings = exec.check_syntax("def broken(:\n    pass").await.expect("check");
    assert!(!findings.is_empty());
    assert_eq!(findings[0].severity, Severity::Error);
    assert!(findings[0].line >= 1);

    let clean = exec.check_syntax("x = 1\n").await.expect("check");
    assert!(clean.iter().all(|f| f.severity != Severity::Error));

    exec.shutdown().await;
}

#[tokio::test]
async fn get_completions_never_fails() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    // With no completion engine installed this must be an empty list, not
    // an error.
    let _completions = exec.get_completions("import ma", 1, 9).await.expect("completions");

    exec.shutdown().await;
}

#[tokio::test]
async fn list_modules_contains_stdlib() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    let modules = exec.list_modules().await.expect("list_modules");
    assert!(modules.iter().any(|m| m == "json"));

    exec.shutdown().await;
}

// ---------------------------------------------------------------------------
// Protocol discipline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stray_print_goes_to_stderr_not_protocol() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    // print() in user code must not desynchronize the reply stream.
    let value = exec
        .execute(
            "print('noise')\nresult = 5",
            Map::new(),
            SecurityMode::Admin,
        )
        .await
        .expect("execute");
    assert_eq!(value, json!(5));
    assert!(exec.is_healthy());

    let value = exec
        .evaluate("1 + 1", Map::new(), SecurityMode::Admin)
        .await
        .expect("evaluate");
    assert_eq!(value, json!(2));

    exec.shutdown().await;
}

#[tokio::test]
async fn timeout_poisons_executor() {
    let py = require_python!();
    let mut config = test_config(&py);
    config.request_timeout = Duration::from_millis(300);
    let exec = Executor::spawn(&config).await.expect("spawn");

    let err = exec
        .execute("while True: pass", Map::new(), SecurityMode::Admin)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!exec.is_healthy());

    // A poisoned executor refuses further traffic.
    let err = exec
        .evaluate("1", Map::new(), SecurityMode::Admin)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);

    exec.shutdown().await;
}

#[tokio::test]
async fn ping_and_shutdown_are_idempotent() {
    let py = require_python!();
    let exec = Executor::spawn(&test_config(&py)).await.expect("spawn");

    assert!(exec.ping().await);

    exec.shutdown().await;
    exec.shutdown().await; // second call is a no-op

    assert!(!exec.ping().await);
}

#[tokio::test]
async fn spawn_fails_on_missing_interpreter() {
    let config = BridgeConfig {
        python_path: "definitely-not-python".into(),
        ..Default::default()
    };
    let err = Executor::spawn(&config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);
}
