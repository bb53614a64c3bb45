// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSONL codec for protocol envelopes.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::ProtocolError;

/// Stateless JSONL codec: one JSON object per newline-terminated line.
pub struct JsonlCodec;

impl JsonlCodec {
    /// Serialize a value to a newline-terminated JSON string.
    pub fn encode<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
        let mut s = serde_json::to_string(value).map_err(ProtocolError::Encode)?;
        s.push('\n');
        Ok(s)
    }

    /// Deserialize a single trimmed JSON line.
    pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
        serde_json::from_str(line).map_err(ProtocolError::Decode)
    }
}
