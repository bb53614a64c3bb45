// SPDX-License-Identifier: MIT OR Apache-2.0
//! pybridge-store
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! HMAC-signed persistent repository of named Python scripts.
//!
//! Scripts live in one `index.json` mapping sanitized ids to records; every
//! record's `code` is covered by a Base64 HMAC-SHA-256 signature under the
//! deployment's signing secret, verified on each load. All mutations
//! re-serialize the index through a write-new-then-rename step, so readers
//! never observe a partially written file.

mod signing;

pub use signing::ScriptSigner;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

const INDEX_FILE: &str = "index.json";

/// Errors from script repository operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Script names must be non-empty.
    #[error("script name must not be empty")]
    EmptyName,

    /// A stored script's signature did not match its code.
    #[error("script '{name}' failed signature verification")]
    Tamper {
        /// Name of the script whose signature failed.
        name: String,
    },

    /// Filesystem failure reading or writing the index.
    #[error("script index I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The index file is not valid JSON.
    #[error("script index is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),
}

/// A persisted script record.
///
/// Field names are camelCase at rest, matching the index file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedScript {
    /// Sanitized identifier: lowercased, `[a-z0-9_-]`, no consecutive
    /// underscores. Unique within the repository.
    pub id: String,
    /// Original (display) name.
    pub name: String,
    /// Script source.
    pub code: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Author attribution.
    #[serde(default)]
    pub author: String,
    /// When the script was first saved.
    pub created_date: DateTime<Utc>,
    /// When the script was last updated.
    pub last_modified: DateTime<Utc>,
    /// Forward-slash organizational path; empty for the root folder. Not a
    /// filesystem path.
    #[serde(default)]
    pub folder_path: String,
    /// Caller-supplied version label.
    #[serde(default)]
    pub version: String,
    /// Base64 HMAC-SHA-256 over `code`. Absent on legacy records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Listing view of a script: everything except `code` and `signature`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptMetadata {
    /// Sanitized identifier.
    pub id: String,
    /// Original (display) name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Author attribution.
    pub author: String,
    /// When the script was first saved.
    pub created_date: DateTime<Utc>,
    /// When the script was last updated.
    pub last_modified: DateTime<Utc>,
    /// Forward-slash organizational path.
    pub folder_path: String,
    /// Caller-supplied version label.
    pub version: String,
}

impl From<&SavedScript> for ScriptMetadata {
    fn from(script: &SavedScript) -> Self {
        Self {
            id: script.id.clone(),
            name: script.name.clone(),
            description: script.description.clone(),
            author: script.author.clone(),
            created_date: script.created_date,
            last_modified: script.last_modified,
            folder_path: script.folder_path.clone(),
            version: script.version.clone(),
        }
    }
}

/// Reduce a display name to a repository id: lowercased, only
/// `[a-z0-9_-]`, with runs of underscores collapsed.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for ch in name.trim().to_lowercase().chars() {
        let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' {
            ch
        } else {
            '_'
        };
        if mapped == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        out.push(mapped);
    }
    out
}

/// Named, foldered, HMAC-signed store of script source and metadata.
pub struct ScriptStore {
    dir: PathBuf,
    signer: ScriptSigner,
    scripts: Mutex<BTreeMap<String, SavedScript>>,
}

impl ScriptStore {
    /// Open (or create) a repository rooted at `dir`.
    ///
    /// The directory and index are created lazily on the first mutation; an
    /// existing index is loaded eagerly so corruption surfaces here rather
    /// than on a later lookup.
    pub fn open(dir: impl Into<PathBuf>, secret: Option<&str>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let index_path = dir.join(INDEX_FILE);
        let scripts = if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&raw).map_err(StoreError::Corrupt)?
        } else {
            BTreeMap::new()
        };
        debug!(target: "pybridge.store", dir = %dir.display(), count = scripts.len(), "store opened");
        Ok(Self {
            dir,
            signer: ScriptSigner::from_secret(secret),
            scripts: Mutex::new(scripts),
        })
    }

    /// Save a script, signing its code. Saving an existing id updates the
    /// record in place and preserves its creation date.
    pub fn save(
        &self,
        name: &str,
        code: &str,
        description: &str,
        author: &str,
        folder_path: &str,
        version: &str,
    ) -> Result<SavedScript, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::EmptyName);
        }
        let id = sanitize(name);
        let now = Utc::now();
        let folder_path = folder_path.trim_matches('/').to_string();

        let mut scripts = self.scripts.lock().expect("store lock poisoned");
        let created_date = scripts.get(&id).map_or(now, |prior| prior.created_date);
        let script = SavedScript {
            id: id.clone(),
            name: name.to_string(),
            code: code.to_string(),
            description: description.to_string(),
            author: author.to_string(),
            created_date,
            last_modified: now,
            folder_path,
            version: version.to_string(),
            signature: Some(self.signer.sign(code)),
        };
        scripts.insert(id, script.clone());
        self.persist(&scripts)?;
        Ok(script)
    }

    /// Look a script up by name, verifying its signature.
    ///
    /// Returns `Ok(None)` when the name is unknown. A signature mismatch is
    /// a hard [`StoreError::Tamper`]; a legacy record without a signature is
    /// returned with a logged warning but is not treated as verified.
    pub fn load(&self, name: &str) -> Result<Option<SavedScript>, StoreError> {
        let scripts = self.scripts.lock().expect("store lock poisoned");
        let Some(script) = scripts.get(&sanitize(name)) else {
            return Ok(None);
        };
        self.verified(script.clone())
    }

    /// Look a script up by `folder/name` path.
    ///
    /// Leading and trailing slashes are ignored. Matching tries the exact
    /// `(name, folder)` pair first and then falls back to a
    /// case-insensitive comparison.
    pub fn load_by_path(&self, path: &str) -> Result<Option<SavedScript>, StoreError> {
        let trimmed = path.trim_matches('/');
        let (folder, name) = match trimmed.rsplit_once('/') {
            Some((folder, name)) => (folder, name),
            None => ("", trimmed),
        };

        let scripts = self.scripts.lock().expect("store lock poisoned");
        let exact = scripts
            .values()
            .find(|s| s.name == name && s.folder_path == folder);
        let hit = exact.or_else(|| {
            scripts.values().find(|s| {
                s.name.eq_ignore_ascii_case(name) && s.folder_path.eq_ignore_ascii_case(folder)
            })
        });
        match hit {
            Some(script) => self.verified(script.clone()),
            None => Ok(None),
        }
    }

    /// Metadata for every stored script. Never exposes code or signatures.
    pub fn list(&self) -> Vec<ScriptMetadata> {
        let scripts = self.scripts.lock().expect("store lock poisoned");
        scripts.values().map(ScriptMetadata::from).collect()
    }

    /// Remove a script by name. Returns whether a record was removed.
    pub fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let mut scripts = self.scripts.lock().expect("store lock poisoned");
        let removed = scripts.remove(&sanitize(name)).is_some();
        if removed {
            self.persist(&scripts)?;
        }
        Ok(removed)
    }

    fn verified(&self, script: SavedScript) -> Result<Option<SavedScript>, StoreError> {
        match &script.signature {
            Some(signature) => {
                if self.signer.verify(&script.code, signature) {
                    Ok(Some(script))
                } else {
                    Err(StoreError::Tamper {
                        name: script.name.clone(),
                    })
                }
            }
            None => {
                warn!(
                    target: "pybridge.store",
                    name = %script.name,
                    "script has no signature (legacy record); loading unverified"
                );
                Ok(Some(script))
            }
        }
    }

    /// Re-serialize the whole index: write a fresh file, then rename it over
    /// the old one so a crash never leaves a truncated index.
    fn persist(&self, scripts: &BTreeMap<String, SavedScript>) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(scripts).map_err(StoreError::Corrupt)?;
        let tmp = self.dir.join(format!("{INDEX_FILE}.{}.tmp", std::process::id()));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.dir.join(INDEX_FILE))?;
        Ok(())
    }

    /// Path of the index file inside this repository.
    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// The directory this repository persists into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_collapses() {
        assert_eq!(sanitize("My Script!"), "my_script_");
        assert_eq!(sanitize("a  b"), "a_b");
        assert_eq!(sanitize("Tax-Calc_2"), "tax-calc_2");
        assert_eq!(sanitize("  Spaced  "), "spaced");
    }

    #[test]
    fn metadata_never_carries_code() {
        let json = serde_json::to_value(ScriptMetadata {
            id: "s".into(),
            name: "s".into(),
            description: String::new(),
            author: String::new(),
            created_date: Utc::now(),
            last_modified: Utc::now(),
            folder_path: String::new(),
            version: String::new(),
        })
        .unwrap();
        assert!(json.get("code").is_none());
        assert!(json.get("signature").is_none());
    }
}
