// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request and response envelopes for the worker protocol.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::SecurityMode;

/// A request sent from the host to a worker, one JSON object per line.
///
/// The discriminator tag is `"command"`. Workers ignore unknown fields, so
/// new optional fields may be added without breaking older shims.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    /// Run a block of statements in the worker's persistent scope.
    Execute {
        /// Python source to execute.
        code: String,
        /// Variables overlaid onto the scope for this call.
        #[serde(default)]
        variables: Map<String, Value>,
        /// Security mode the code runs under.
        security_mode: SecurityMode,
    },
    /// Evaluate a single expression and return its value.
    Evaluate {
        /// Python expression source.
        expression: String,
        /// Variables overlaid onto the scope for this call.
        #[serde(default)]
        variables: Map<String, Value>,
        /// Security mode the expression runs under.
        security_mode: SecurityMode,
    },
    /// Import a module and invoke one of its functions.
    CallModule {
        /// Dotted module path to import.
        module: String,
        /// Attribute name of the callable.
        function: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
        /// Keyword arguments.
        #[serde(default)]
        kwargs: Map<String, Value>,
        /// Security mode the call runs under.
        security_mode: SecurityMode,
    },
    /// Parse code and report findings without executing it.
    CheckSyntax {
        /// Python source to check.
        code: String,
    },
    /// Compute completions at a cursor position.
    GetCompletions {
        /// Buffer contents.
        code: String,
        /// 1-based cursor line.
        line: u32,
        /// 0-based cursor column.
        column: u32,
    },
    /// Report the worker's Python version string.
    Version,
    /// List installed module names (best effort).
    ListModules,
    /// Empty the worker's persistent scope.
    ClearGlobals,
    /// Liveness probe; returns a null result.
    Ping,
    /// Ask the worker to reply once more and then exit its loop.
    Shutdown,
}

/// A reply from a worker, one JSON object per line.
///
/// On success `result` holds the JSON-representable value (absent fields
/// decode as null). On failure `error` is a concise `Class: message` string
/// and `traceback`, when present, carries the full Python diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Whether the command completed without raising.
    pub success: bool,
    /// Result value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Concise error description on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full Python traceback on failure, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl Response {
    /// The result value, with an absent field read as JSON null.
    pub fn result_or_null(&self) -> Value {
        self.result.clone().unwrap_or(Value::Null)
    }
}
