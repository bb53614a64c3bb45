// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable kind codes for pybridge.
//!
//! Every error surfaced by the bridge carries an [`ErrorKind`] — a
//! machine-readable, stable SCREAMING_SNAKE_CASE tag — next to its
//! human-readable message. Kinds never change across patch releases;
//! callers branch on [`BridgeError::kind`], not on message text.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable, stable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The worker returned `success: false` for an executed command.
    ChildError,
    /// The worker rejected the code under the active security mode.
    Security,
    /// A per-request deadline was exceeded.
    Timeout,
    /// A pool wait deadline was exceeded.
    TimeoutBorrow,
    /// Pipe I/O failure or an unreadable frame.
    Transport,
    /// No worker exists; the pool failed to initialize or is gone.
    NotReady,
    /// Operation on a closed pool.
    PoolShutdown,
    /// A stored script failed signature verification.
    Tamper,
    /// A script, module, or function could not be resolved.
    NotFound,
    /// An invalid configuration value.
    Config,
    /// A value could not be represented as JSON.
    Serialization,
}

impl ErrorKind {
    /// Stable wire string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChildError => "CHILD_ERROR",
            Self::Security => "SECURITY",
            Self::Timeout => "TIMEOUT",
            Self::TimeoutBorrow => "TIMEOUT_BORROW",
            Self::Transport => "TRANSPORT",
            Self::NotReady => "NOT_READY",
            Self::PoolShutdown => "POOL_SHUTDOWN",
            Self::Tamper => "TAMPER",
            Self::NotFound => "NOT_FOUND",
            Self::Config => "CONFIG",
            Self::Serialization => "SERIALIZATION",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the bridge facade, pool, executor, and script store.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The worker reported a Python-level failure.
    #[error("worker error: {error}")]
    ChildError {
        /// Concise `Class: message` description from the worker.
        error: String,
        /// Full Python traceback, when the worker provided one.
        traceback: Option<String>,
    },

    /// The worker's sandbox rejected the code.
    #[error("security violation: {0}")]
    Security(String),

    /// No reply arrived within the per-request deadline.
    #[error("request timed out after {millis} ms")]
    Timeout {
        /// The deadline that elapsed, in milliseconds.
        millis: u64,
    },

    /// No worker became available within the pool wait deadline.
    #[error("no worker available within {millis} ms")]
    TimeoutBorrow {
        /// The deadline that elapsed, in milliseconds.
        millis: u64,
    },

    /// The worker pipe failed or produced an unreadable frame.
    #[error("worker transport failure: {0}")]
    Transport(String),

    /// The pool has no workers to hand out.
    #[error("no worker available: {0}")]
    NotReady(String),

    /// The pool has been shut down.
    #[error("pool is shut down")]
    PoolShutdown,

    /// A stored script's signature did not verify.
    #[error("script '{name}' failed signature verification")]
    Tamper {
        /// Name of the script that failed verification.
        name: String,
    },

    /// The requested script, module, or function does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A configuration value is out of range or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A value could not be carried across the JSON boundary.
    #[error("value is not JSON-representable: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// The stable kind code for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChildError { .. } => ErrorKind::ChildError,
            Self::Security(_) => ErrorKind::Security,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::TimeoutBorrow { .. } => ErrorKind::TimeoutBorrow,
            Self::Transport(_) => ErrorKind::Transport,
            Self::NotReady(_) => ErrorKind::NotReady,
            Self::PoolShutdown => ErrorKind::PoolShutdown,
            Self::Tamper { .. } => ErrorKind::Tamper,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Config(_) => ErrorKind::Config,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// The worker traceback carried by this error, if any.
    pub fn traceback(&self) -> Option<&str> {
        match self {
            Self::ChildError { traceback, .. } => traceback.as_deref(),
            _ => None,
        }
    }
}
