//! Layer type labels for reporting
//!
//! Built from the info file written during capture, a whitespace separated
//! stream of `<stem> <label>` pairs such as `Fwrd0003 Linear`. Labels are
//! cosmetic: a missing entry yields an empty label.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

use super::address::EXTENSION;

/// Canonical key to layer type label
#[derive(Debug, Default, Clone)]
pub struct LayerDictionary {
    entries: HashMap<String, String>,
}

impl LayerDictionary {
    /// Empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an info file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read layer info file: {:?}", path))?;
        Ok(Self::parse(&content))
    }

    /// Load the first readable info file among `candidates`
    ///
    /// Falls back to an empty dictionary; labels never block a comparison.
    pub fn load_first<P: AsRef<Path>>(candidates: &[P]) -> Self {
        for path in candidates {
            let path: &Path = path.as_ref();
            match Self::load(path) {
                Ok(dict) => {
                    tracing::debug!("Loaded {} layer labels from {:?}", dict.len(), path);
                    return dict;
                }
                Err(e) => tracing::debug!("{:#}", e),
            }
        }
        tracing::warn!("No layer info file found, report labels will be empty");
        Self::new()
    }

    /// Parse info file text; later duplicates overwrite earlier ones
    ///
    /// A trailing `:` on a key is accepted. An unpaired final token is ignored.
    pub fn parse(content: &str) -> Self {
        let mut entries = HashMap::new();
        let mut tokens = content.split_whitespace();
        while let (Some(key), Some(label)) = (tokens.next(), tokens.next()) {
            let key = key.strip_suffix(':').unwrap_or(key);
            entries.insert(format!("{}{}", key, EXTENSION), label.to_string());
        }
        Self { entries }
    }

    /// Label for a canonical key such as `Fwrd0003.bin`, or `""`
    pub fn lookup(&self, key: &str) -> &str {
        self.entries.get(key).map(String::as_str).unwrap_or("")
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries were loaded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
