// SPDX-License-Identifier: MIT OR Apache-2.0
//! Embedded worker shim and its on-disk materialization.

use std::io;
use std::path::{Path, PathBuf};

/// Worker-side bridge source, baked into the binary at compile time.
pub const SHIM_SOURCE: &str = include_str!("../shim/pybridge_shim.py");

const SHIM_FILE: &str = "pybridge_shim.py";

/// Default materialization directory, versioned so stale shims from older
/// builds are never reused.
pub fn default_shim_dir() -> PathBuf {
    std::env::temp_dir().join(format!("pybridge-shim-{}", env!("CARGO_PKG_VERSION")))
}

/// Write the embedded shim to disk and return its path.
///
/// The write is skipped when the on-disk copy already matches. Replacement
/// goes through a uniquely named temp file and a rename so concurrent
/// spawners never observe a partial shim.
pub fn materialize_shim(dir_override: Option<&Path>) -> io::Result<PathBuf> {
    let dir = dir_override.map_or_else(default_shim_dir, Path::to_path_buf);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(SHIM_FILE);

    if let Ok(existing) = std::fs::read_to_string(&path)
        && existing == SHIM_SOURCE
    {
        return Ok(path);
    }

    let tmp = dir.join(format!("{SHIM_FILE}.{}.tmp", std::process::id()));
    std::fs::write(&tmp, SHIM_SOURCE)?;
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}
