//! Reference artifact discovery
//!
//! Lists the canonical keys of every reference-side file in a directory.
//! Directory iteration order is filesystem dependent, so keys are sorted.

use anyhow::{Context, Result};
use std::path::Path;

use super::address::CanonicalKey;

/// Canonical keys of all `REF*` files in `dir`, sorted lexicographically
///
/// Target-side and unrelated files are ignored, as are entries whose names
/// are not valid UTF-8.
pub fn list_reference_artifacts<P: AsRef<Path>>(dir: P) -> Result<Vec<CanonicalKey>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to scan directory: {:?}", dir))?;

    let mut keys = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read entry in {:?}", dir))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name();
        match name.to_str() {
            Some(name) => {
                if let Some(key) = CanonicalKey::parse(name) {
                    if key.artifact().is_none() {
                        tracing::debug!("Non-standard reference file {:?}, compared verbatim", name);
                    }
                    keys.push(key);
                }
            }
            None => tracing::debug!("Skipping non UTF-8 file name {:?}", name),
        }
    }

    keys.sort();
    Ok(keys)
}
