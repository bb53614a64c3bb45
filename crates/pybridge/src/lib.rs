// SPDX-License-Identifier: MIT OR Apache-2.0
//! pybridge
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Execute Python 3 from Rust over a warm pool of sandboxed worker
//! processes.
//!
//! [`PythonBridge`] is the stateless surface callers talk to: it routes
//! execution to a [`WorkerPool`] of warm Python workers and script CRUD to
//! an HMAC-signed [`ScriptStore`]. Neither interpreter links the other; the
//! workers are opaque request/response peers over line-delimited JSON.
//!
//! ```no_run
//! use pybridge::{BridgeConfig, PythonBridge};
//! use serde_json::Map;
//!
//! # async fn demo() -> Result<(), pybridge::BridgeError> {
//! let bridge = PythonBridge::new(BridgeConfig::default()).await?;
//! let value = bridge.evaluate("2 ** 10", Map::new()).await?;
//! assert_eq!(value, serde_json::json!(1024));
//! bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod shell;

pub use pybridge_config::{BridgeConfig, ConfigError, ConfigWarning};
pub use pybridge_error::{BridgeError, ErrorKind};
pub use pybridge_exec::Executor;
pub use pybridge_pool::{PoolStats, WorkerPool};
pub use pybridge_protocol::{
    Completion, CompletionKind, SecurityMode, Severity, ShellOutput, SyntaxFinding, VersionInfo,
};
pub use pybridge_store::{SavedScript, ScriptMetadata, ScriptStore, StoreError, sanitize};

use serde_json::{Map, Value};
use tracing::warn;

/// Stateless facade over the worker pool and the script repository.
pub struct PythonBridge {
    config: BridgeConfig,
    pool: WorkerPool,
    store: ScriptStore,
}

impl PythonBridge {
    /// Bring up a bridge: open the script store, then warm the pool.
    ///
    /// Configuration warnings (missing signing secret, oversized timeouts)
    /// are logged here; hard configuration errors fail the call.
    pub async fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config
            .validate()
            .map_err(|e| BridgeError::Config(e.to_string()))?;
        for warning in config.warnings() {
            warn!(target: "pybridge", "{warning}");
        }

        let store = ScriptStore::open(&config.scripts_dir, config.signing_secret.as_deref())
            .map_err(store_error)?;
        let pool = WorkerPool::new(config.clone()).await?;

        Ok(Self {
            config,
            pool,
            store,
        })
    }

    /// Run statements under the configured default security mode and return
    /// the `result` binding, if the code sets one.
    pub async fn execute(
        &self,
        code: &str,
        variables: Map<String, Value>,
    ) -> Result<Value, BridgeError> {
        self.pool
            .execute(code, variables, self.config.default_security_mode)
            .await
    }

    /// Run statements under an explicit security mode.
    pub async fn execute_with_mode(
        &self,
        code: &str,
        variables: Map<String, Value>,
        mode: SecurityMode,
    ) -> Result<Value, BridgeError> {
        self.pool.execute(code, variables, mode).await
    }

    /// Evaluate one expression under the configured default security mode.
    pub async fn evaluate(
        &self,
        expression: &str,
        variables: Map<String, Value>,
    ) -> Result<Value, BridgeError> {
        self.pool
            .evaluate(expression, variables, self.config.default_security_mode)
            .await
    }

    /// Evaluate one expression under an explicit security mode.
    pub async fn evaluate_with_mode(
        &self,
        expression: &str,
        variables: Map<String, Value>,
        mode: SecurityMode,
    ) -> Result<Value, BridgeError> {
        self.pool.evaluate(expression, variables, mode).await
    }

    /// Import a module and call a function with the given arguments.
    pub async fn call_module(
        &self,
        module: &str,
        function: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, BridgeError> {
        self.pool
            .call_module(
                module,
                function,
                args,
                kwargs,
                self.config.default_security_mode,
            )
            .await
    }

    /// Load a stored script by `folder/name` path and run it.
    ///
    /// The script runs under `ADMIN` with `args` and `kwargs` bound in its
    /// scope; its `result` binding is the return value. Fails `NOT_FOUND`
    /// when no script matches and surfaces `TAMPER` as-is.
    pub async fn call_script(
        &self,
        path: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, BridgeError> {
        let script = self
            .store
            .load_by_path(path)
            .map_err(store_error)?
            .ok_or_else(|| BridgeError::NotFound(format!("script '{path}'")))?;

        let mut variables = Map::new();
        variables.insert("args".into(), Value::Array(args));
        variables.insert("kwargs".into(), Value::Object(kwargs));
        self.pool
            .execute(&script.code, variables, SecurityMode::Admin)
            .await
    }

    /// Parse code and return findings without executing it.
    pub async fn check_syntax(&self, code: &str) -> Result<Vec<SyntaxFinding>, BridgeError> {
        self.pool.check_syntax(code).await
    }

    /// Compute completions at a cursor position (1-based line, 0-based
    /// column).
    pub async fn get_completions(
        &self,
        code: &str,
        line: u32,
        column: u32,
    ) -> Result<Vec<Completion>, BridgeError> {
        self.pool.get_completions(code, line, column).await
    }

    /// The worker runtime's version, degrading to `available: false` when
    /// no worker can answer.
    pub async fn version(&self) -> VersionInfo {
        match self.pool.version().await {
            Ok(version) => VersionInfo {
                version,
                available: true,
            },
            Err(e) => {
                warn!(target: "pybridge", "version probe failed: {e}");
                VersionInfo {
                    version: String::new(),
                    available: false,
                }
            }
        }
    }

    /// Snapshot of pool occupancy.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Change the pool capacity (1–20).
    pub async fn resize_pool(&self, size: usize) -> Result<(), BridgeError> {
        self.pool.resize(size).await
    }

    /// Save a script, signing its code.
    pub fn save_script(
        &self,
        name: &str,
        code: &str,
        description: &str,
        author: &str,
        folder_path: &str,
        version: &str,
    ) -> Result<SavedScript, BridgeError> {
        self.store
            .save(name, code, description, author, folder_path, version)
            .map_err(store_error)
    }

    /// Load a script by name, verifying its signature.
    pub fn load_script(&self, name: &str) -> Result<Option<SavedScript>, BridgeError> {
        self.store.load(name).map_err(store_error)
    }

    /// Load a script by `folder/name` path, verifying its signature.
    pub fn load_script_by_path(&self, path: &str) -> Result<Option<SavedScript>, BridgeError> {
        self.store.load_by_path(path).map_err(store_error)
    }

    /// Metadata for every stored script.
    pub fn list_scripts(&self) -> Vec<ScriptMetadata> {
        self.store.list()
    }

    /// Delete a script by name; reports whether a record was removed.
    pub fn delete_script(&self, name: &str) -> Result<bool, BridgeError> {
        self.store.delete(name).map_err(store_error)
    }

    /// Run a host-level shell command.
    ///
    /// This is a side channel: it does not borrow from the pool and never
    /// touches the Python sandbox.
    pub async fn exec_shell(&self, command: &str) -> Result<ShellOutput, BridgeError> {
        shell::exec_shell(command).await
    }

    /// Shut the pool down. Idempotent; the store stays readable.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    /// The configuration this bridge was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

/// Map repository errors onto the bridge taxonomy. Storage I/O failures
/// surface as configuration problems (the scripts directory is
/// deployment-provided).
fn store_error(err: StoreError) -> BridgeError {
    match err {
        StoreError::Tamper { name } => BridgeError::Tamper { name },
        StoreError::EmptyName => BridgeError::Config("script name must not be empty".into()),
        other => BridgeError::Config(format!("script store: {other}")),
    }
}
