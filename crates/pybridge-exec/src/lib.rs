// SPDX-License-Identifier: MIT OR Apache-2.0
//! pybridge-exec
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Host-side owner of one Python worker process.
//!
//! An [`Executor`] spawns the worker with the embedded shim, waits for its
//! ready line, and then brokers strictly alternating JSONL request/reply
//! pairs over the worker's stdio. One request is in flight at a time; any
//! timeout or pipe fault permanently poisons the executor, which must then
//! be replaced rather than reused.

mod shim;

pub use shim::{SHIM_SOURCE, default_shim_dir, materialize_shim};

use pybridge_config::BridgeConfig;
use pybridge_error::BridgeError;
use pybridge_protocol::{
    Completion, JsonlCodec, ReadyLine, Request, Response, SecurityMode, SyntaxFinding,
};
use serde_json::{Map, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// Deadline for liveness probes, independent of the request deadline.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    finished: bool,
}

/// Host-side owner of one Python worker and its pipe.
///
/// All request operations serialize through an internal session lock, so a
/// worker never sees a second request line before it has replied to the
/// first. The `healthy` flag is volatile and one-way: once cleared it never
/// comes back, and the pool replaces the executor.
pub struct Executor {
    id: Uuid,
    healthy: AtomicBool,
    request_timeout: Duration,
    shutdown_grace: Duration,
    session: tokio::sync::Mutex<Session>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("id", &self.id)
            .field("healthy", &self.healthy.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Spawn a worker and wait for its ready line.
    ///
    /// The worker is killed and an error returned if the ready line does not
    /// arrive within `config.ready_timeout`, or if anything other than the
    /// ready line appears first on stdout.
    pub async fn spawn(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let shim_path = materialize_shim(config.shim_dir.as_deref())
            .map_err(|e| BridgeError::NotReady(format!("failed to materialize shim: {e}")))?;

        let mut child = spawn_python(&config.python_path, &shim_path)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Transport("worker stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Transport("worker stdout unavailable".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match r.read_line(&mut line).await {
                        Ok(0) => break,
                        Ok(_) => {
                            let s = line.trim_end();
                            if !s.is_empty() {
                                warn!(target: "pybridge.shim.stderr", "{s}");
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
        }

        let mut stdout = BufReader::new(stdout);

        // The first stdout line must be the ready announcement.
        let mut line = String::new();
        let read = timeout(config.ready_timeout, stdout.read_line(&mut line)).await;
        let ok = match read {
            Ok(Ok(n)) if n > 0 => JsonlCodec::decode::<ReadyLine>(line.trim_end())
                .map(|r| r.is_ready())
                .unwrap_or(false),
            _ => false,
        };
        if !ok {
            let _ = child.kill().await;
            let _ = child.wait().await;
            return Err(BridgeError::NotReady(format!(
                "worker did not report ready within {} ms",
                config.ready_timeout.as_millis()
            )));
        }

        let id = Uuid::new_v4();
        debug!(target: "pybridge.exec", %id, "worker ready");

        Ok(Self {
            id,
            healthy: AtomicBool::new(true),
            request_timeout: config.request_timeout,
            shutdown_grace: config.shutdown_grace,
            session: tokio::sync::Mutex::new(Session {
                child,
                stdin,
                stdout,
                finished: false,
            }),
        })
    }

    /// Stable identifier of this executor.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether this executor's pipe is still trustworthy.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn poison(&self, reason: &str) {
        if self.healthy.swap(false, Ordering::AcqRel) {
            warn!(target: "pybridge.exec", id = %self.id, "worker poisoned: {reason}");
        }
    }

    /// Run a block of statements in the worker's persistent scope.
    pub async fn execute(
        &self,
        code: &str,
        variables: Map<String, Value>,
        mode: SecurityMode,
    ) -> Result<Value, BridgeError> {
        self.request(
            &Request::Execute {
                code: code.into(),
                variables,
                security_mode: mode,
            },
            self.request_timeout,
        )
        .await
    }

    /// Evaluate a single expression and return its value.
    pub async fn evaluate(
        &self,
        expression: &str,
        variables: Map<String, Value>,
        mode: SecurityMode,
    ) -> Result<Value, BridgeError> {
        self.request(
            &Request::Evaluate {
                expression: expression.into(),
                variables,
                security_mode: mode,
            },
            self.request_timeout,
        )
        .await
    }

    /// Import a module and call one of its functions.
    pub async fn call_module(
        &self,
        module: &str,
        function: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        mode: SecurityMode,
    ) -> Result<Value, BridgeError> {
        self.request(
            &Request::CallModule {
                module: module.into(),
                function: function.into(),
                args,
                kwargs,
                security_mode: mode,
            },
            self.request_timeout,
        )
        .await
    }

    /// Parse code and return findings without executing it.
    pub async fn check_syntax(&self, code: &str) -> Result<Vec<SyntaxFinding>, BridgeError> {
        let value = self
            .request(&Request::CheckSyntax { code: code.into() }, self.request_timeout)
            .await?;
        decode_payload(value)
    }

    /// Compute completions at a cursor position.
    pub async fn get_completions(
        &self,
        code: &str,
        line: u32,
        column: u32,
    ) -> Result<Vec<Completion>, BridgeError> {
        let value = self
            .request(
                &Request::GetCompletions {
                    code: code.into(),
                    line,
                    column,
                },
                self.request_timeout,
            )
            .await?;
        decode_payload(value)
    }

    /// The worker's Python version string.
    pub async fn version(&self) -> Result<String, BridgeError> {
        let value = self.request(&Request::Version, self.request_timeout).await?;
        decode_payload(value)
    }

    /// Best-effort list of installed module names.
    pub async fn list_modules(&self) -> Result<Vec<String>, BridgeError> {
        let value = self
            .request(&Request::ListModules, self.request_timeout)
            .await?;
        decode_payload(value)
    }

    /// Empty the worker's persistent scope.
    pub async fn clear_globals(&self) -> Result<(), BridgeError> {
        self.request(&Request::ClearGlobals, self.request_timeout)
            .await?;
        Ok(())
    }

    /// Liveness probe with a short deadline. Never errors; a failed probe
    /// poisons the executor and returns `false`.
    pub async fn ping(&self) -> bool {
        self.request(&Request::Ping, PING_TIMEOUT).await.is_ok()
    }

    /// Ask the worker to exit, then force-kill after the grace window.
    ///
    /// Idempotent; repeated calls return immediately.
    pub async fn shutdown(&self) {
        let mut session = self.session.lock().await;
        if session.finished {
            return;
        }
        session.finished = true;
        self.healthy.store(false, Ordering::Release);

        if let Ok(line) = JsonlCodec::encode(&Request::Shutdown) {
            let _ = session.stdin.write_all(line.as_bytes()).await;
            let _ = session.stdin.flush().await;
        }

        match timeout(self.shutdown_grace, session.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(target: "pybridge.exec", id = %self.id, "worker exited: {status}");
            }
            _ => {
                warn!(target: "pybridge.exec", id = %self.id, "worker did not exit; killing");
                let _ = session.child.kill().await;
                let _ = session.child.wait().await;
            }
        }
    }

    /// Send one request line and read exactly one reply line.
    async fn request(&self, req: &Request, deadline: Duration) -> Result<Value, BridgeError> {
        let mut session = self.session.lock().await;

        if session.finished || !self.is_healthy() {
            return Err(BridgeError::Transport("worker is poisoned".into()));
        }

        let line = JsonlCodec::encode(req)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;
        if let Err(e) = session.stdin.write_all(line.as_bytes()).await {
            self.poison("stdin write failed");
            return Err(BridgeError::Transport(format!("failed to write request: {e}")));
        }
        if let Err(e) = session.stdin.flush().await {
            self.poison("stdin flush failed");
            return Err(BridgeError::Transport(format!("failed to flush request: {e}")));
        }

        let mut reply = String::new();
        match timeout(deadline, session.stdout.read_line(&mut reply)).await {
            Err(_) => {
                // The pipe now holds an abandoned partial read; nothing on it
                // can be trusted again.
                self.poison("request deadline exceeded");
                return Err(BridgeError::Timeout {
                    millis: deadline.as_millis() as u64,
                });
            }
            Ok(Err(e)) => {
                self.poison("stdout read failed");
                return Err(BridgeError::Transport(format!("failed to read reply: {e}")));
            }
            Ok(Ok(0)) => {
                self.poison("worker closed stdout");
                return Err(BridgeError::Transport("worker closed stdout".into()));
            }
            Ok(Ok(_)) => {}
        }

        let response: Response = match JsonlCodec::decode(reply.trim_end()) {
            Ok(r) => r,
            Err(_) => {
                self.poison("non-protocol line on stdout");
                return Err(BridgeError::Transport(format!(
                    "unreadable reply line: {:?}",
                    truncate(reply.trim_end(), 120)
                )));
            }
        };

        // A conforming worker writes exactly one line per request. Anything
        // already buffered past the reply would desynchronize every later
        // call, so its presence poisons the executor.
        if let Ok(Ok(buffered)) = timeout(Duration::ZERO, session.stdout.fill_buf()).await
            && !buffered.is_empty()
        {
            self.poison("unsolicited bytes after reply");
        }

        if response.success {
            Ok(response.result_or_null())
        } else {
            Err(classify_failure(response))
        }
    }
}

/// Map a worker failure reply onto the error taxonomy. The worker's own
/// exception hierarchy does not leak past this point.
fn classify_failure(response: Response) -> BridgeError {
    let error = response
        .error
        .unwrap_or_else(|| "unknown worker error".into());
    if let Some(rest) = error.strip_prefix("SECURITY:") {
        BridgeError::Security(rest.trim().to_string())
    } else if error.starts_with("SERIALIZATION") {
        BridgeError::Serialization("worker result is not JSON-representable".into())
    } else if let Some(rest) = error.strip_prefix("NOT_FOUND:") {
        BridgeError::NotFound(rest.trim().to_string())
    } else {
        BridgeError::ChildError {
            error,
            traceback: response.traceback,
        }
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, BridgeError> {
    serde_json::from_value(value)
        .map_err(|e| BridgeError::Transport(format!("unexpected reply payload: {e}")))
}

fn spawn_python(python_path: &str, shim_path: &std::path::Path) -> Result<Child, BridgeError> {
    let attempt = |cmd: &str| {
        Command::new(cmd)
            .arg("-u")
            .arg(shim_path)
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    };

    match attempt(python_path) {
        Ok(child) => Ok(child),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && python_path == "python3" => {
            // Some hosts only install the unversioned binary.
            attempt("python")
                .map_err(|e| BridgeError::NotReady(format!("failed to spawn python: {e}")))
        }
        Err(e) => Err(BridgeError::NotReady(format!(
            "failed to spawn {python_path}: {e}"
        ))),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_security_prefix() {
        let resp = Response {
            success: false,
            result: None,
            error: Some("SECURITY: use of 'eval' is not allowed".into()),
            traceback: None,
        };
        match classify_failure(resp) {
            BridgeError::Security(msg) => assert!(msg.contains("eval")),
            other => panic!("expected Security, got {other:?}"),
        }
    }

    #[test]
    fn classify_not_found_prefix() {
        let resp = Response {
            success: false,
            result: None,
            error: Some("NOT_FOUND: module 'nope'".into()),
            traceback: None,
        };
        assert!(matches!(classify_failure(resp), BridgeError::NotFound(_)));
    }

    #[test]
    fn classify_plain_exception_keeps_traceback() {
        let resp = Response {
            success: false,
            result: None,
            error: Some("ZeroDivisionError: division by zero".into()),
            traceback: Some("Traceback ...".into()),
        };
        match classify_failure(resp) {
            BridgeError::ChildError { error, traceback } => {
                assert!(error.starts_with("ZeroDivisionError"));
                assert!(traceback.is_some());
            }
            other => panic!("expected ChildError, got {other:?}"),
        }
    }
}
