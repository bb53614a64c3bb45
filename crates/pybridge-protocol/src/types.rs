// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared value types carried over the wire and exposed by the facade.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Security mode a piece of code runs under inside the worker.
///
/// `Restricted` is strictly less capable than `Admin`: it refuses dynamic
/// compilation, low-level interpreter introspection, and a deny-listed set
/// of system modules. The exact deny table is a worker-side policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityMode {
    /// Sandboxed mode for untrusted code.
    Restricted,
    /// Unrestricted mode used for host-internal calls.
    #[default]
    Admin,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restricted => f.write_str("RESTRICTED"),
            Self::Admin => f.write_str("ADMIN"),
        }
    }
}

/// Severity of a [`SyntaxFinding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The code will not parse.
    Error,
    /// A style or quality finding; the code still parses.
    Warning,
}

/// One finding from a syntax check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntaxFinding {
    /// 1-based line of the finding.
    pub line: u32,
    /// 0-based column of the finding.
    pub column: u32,
    /// Whether this is a parse error or an advisory warning.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

/// Kind of a completion candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    /// A callable.
    Function,
    /// A class.
    Class,
    /// An importable module.
    Module,
    /// A language keyword.
    Keyword,
    /// A bound name.
    Variable,
    /// Anything the completion engine could not classify.
    Other,
}

/// One completion candidate at a cursor position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Text to insert.
    pub label: String,
    /// Short signature or type hint.
    #[serde(default)]
    pub detail: Option<String>,
    /// Docstring, when available.
    #[serde(default)]
    pub documentation: Option<String>,
    /// Candidate classification.
    pub kind: CompletionKind,
}

/// Worker runtime identification, as reported by the facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Python version string, e.g. `"3.11.6"`; empty when unavailable.
    pub version: String,
    /// Whether a worker answered the version probe.
    pub available: bool,
}

/// Captured output of a host-level shell command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Process exit code; `-1` when terminated by a signal.
    pub exit_code: i32,
}
