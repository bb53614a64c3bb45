// SPDX-License-Identifier: MIT OR Apache-2.0
//! pybridge-protocol
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Wire contract between the pybridge host and its Python worker processes.
//!
//! The transport is newline-delimited JSON over stdio, UTF-8, one object per
//! line in each direction, with no framing beyond the newline. The worker
//! emits exactly one [`ReadyLine`] before accepting requests; after that the
//! pipe carries strictly alternating [`Request`]/[`Response`] pairs.

mod codec;
mod envelope;
mod types;

pub use codec::JsonlCodec;
pub use envelope::{Request, Response};
pub use types::{
    Completion, CompletionKind, SecurityMode, Severity, ShellOutput, SyntaxFinding, VersionInfo,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from encoding or decoding protocol lines.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A value failed to serialize to a JSON line.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// A line failed to parse as a protocol object.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// The worker wrote something that is not part of the protocol.
    #[error("protocol violation: {0}")]
    Violation(String),
}

/// The single startup line a worker must emit before accepting requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyLine {
    /// Must be the literal string `"ready"`.
    pub status: String,
}

impl ReadyLine {
    /// Returns `true` if this line signals worker readiness.
    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}
