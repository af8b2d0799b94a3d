//! Snapshot file naming
//!
//! Every captured artifact is addressed as `<SIDE><Role><index:04>.bin`,
//! e.g. `REFFwrd0003.bin`. The part after the side prefix is the canonical
//! key shared by the reference file, the target file and the diff output.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File extension of snapshot artifacts
pub const EXTENSION: &str = ".bin";

/// Category of a captured artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// First output of a layer after its forward step
    Forward,
    /// First input gradient of a layer after its backward step
    Backward,
    /// Accumulated parameter gradient
    Gradient,
    /// Parameter value
    Weight,
}

impl Role {
    /// All roles in capture order
    pub const ALL: [Role; 4] = [Role::Forward, Role::Backward, Role::Gradient, Role::Weight];

    /// Four-letter tag used in file names
    pub fn tag(self) -> &'static str {
        match self {
            Role::Forward => "Fwrd",
            Role::Backward => "Bwrd",
            Role::Gradient => "Grad",
            Role::Weight => "Wght",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Role::ALL
            .into_iter()
            .find(|r| r.tag() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown role tag: {}", s))
    }
}

/// Which run an artifact belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Trusted reference capture
    Reference,
    /// Candidate capture under test
    Target,
    /// Comparison diff records
    Diff,
}

impl Side {
    /// Three-letter file name prefix
    pub fn prefix(self) -> &'static str {
        match self {
            Side::Reference => "REF",
            Side::Target => "TAR",
            Side::Diff => "OUT",
        }
    }
}

/// Role and sequence index of one captured artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    /// Artifact category
    pub role: Role,
    /// Position of the layer or parameter in graph order
    pub index: usize,
}

impl ArtifactKey {
    /// Create a key
    pub fn new(role: Role, index: usize) -> Self {
        Self { role, index }
    }

    /// Name without side prefix or extension, e.g. `Fwrd0003`
    pub fn stem(&self) -> String {
        format!("{}{:04}", self.role.tag(), self.index)
    }

    /// Canonical key including extension
    pub fn canonical(&self) -> CanonicalKey {
        CanonicalKey(format!("{}{}", self.stem(), EXTENSION))
    }

    /// Full file name for one side
    pub fn file_name(&self, side: Side) -> String {
        self.canonical().file_name(side)
    }
}

/// Build the file name of an artifact
pub fn file_name(role: Role, is_target: bool, index: usize) -> String {
    let side = if is_target { Side::Target } else { Side::Reference };
    ArtifactKey::new(role, index).file_name(side)
}

/// Side-independent artifact name, e.g. `Fwrd0003.bin`
///
/// Keys parsed from disk are kept verbatim even when they do not follow the
/// `<Role><index>` pattern, so unusual files are still paired by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// Strip the reference prefix from a discovered file name
    pub fn parse(file_name: &str) -> Option<Self> {
        file_name
            .strip_prefix(Side::Reference.prefix())
            .filter(|rest| !rest.is_empty())
            .map(|rest| CanonicalKey(rest.to_string()))
    }

    /// Key text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name with the given side prefix
    pub fn file_name(&self, side: Side) -> String {
        format!("{}{}", side.prefix(), self.0)
    }

    /// Path of this key's file for `side` inside `dir`
    pub fn path_in<P: AsRef<Path>>(&self, dir: P, side: Side) -> PathBuf {
        dir.as_ref().join(self.file_name(side))
    }

    /// Decode role and index when the key follows the standard pattern
    pub fn artifact(&self) -> Option<ArtifactKey> {
        let stem = self.0.strip_suffix(EXTENSION)?;
        if stem.len() < 8 || !stem.is_char_boundary(4) {
            return None;
        }
        let (tag, digits) = stem.split_at(4);
        let role = tag.parse().ok()?;
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index = digits.parse().ok()?;
        Some(ArtifactKey::new(role, index))
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ArtifactKey> for CanonicalKey {
    fn from(key: ArtifactKey) -> Self {
        key.canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        assert_eq!(file_name(Role::Forward, false, 0), "REFFwrd0000.bin");
        assert_eq!(file_name(Role::Backward, true, 12), "TARBwrd0012.bin");
        assert_eq!(file_name(Role::Gradient, false, 3), "REFGrad0003.bin");
        assert_eq!(file_name(Role::Weight, true, 9999), "TARWght9999.bin");
        assert_eq!(ArtifactKey::new(Role::Forward, 7).file_name(Side::Diff), "OUTFwrd0007.bin");
    }

    #[test]
    fn test_index_wider_than_four_digits() {
        assert_eq!(file_name(Role::Forward, false, 12345), "REFFwrd12345.bin");
    }

    #[test]
    fn test_parse_canonical_key() {
        let key = CanonicalKey::parse("REFFwrd0001.bin").unwrap();
        assert_eq!(key.as_str(), "Fwrd0001.bin");
        assert_eq!(key.file_name(Side::Target), "TARFwrd0001.bin");
        assert_eq!(key.file_name(Side::Diff), "OUTFwrd0001.bin");
        assert_eq!(key.artifact(), Some(ArtifactKey::new(Role::Forward, 1)));
    }

    #[test]
    fn test_parse_rejects_other_prefixes() {
        assert!(CanonicalKey::parse("TARFwrd0001.bin").is_none());
        assert!(CanonicalKey::parse("CPUInfo.txt").is_none());
        assert!(CanonicalKey::parse("REF").is_none());
    }

    #[test]
    fn test_nonstandard_key_is_kept_verbatim() {
        let key = CanonicalKey::parse("REFcustom.dat").unwrap();
        assert_eq!(key.as_str(), "custom.dat");
        assert_eq!(key.artifact(), None);
        assert_eq!(key.file_name(Side::Target), "TARcustom.dat");
    }

    #[test]
    fn test_artifact_key_roundtrip_through_canonical() {
        for role in Role::ALL {
            let key = ArtifactKey::new(role, 42);
            assert_eq!(key.canonical().artifact(), Some(key));
        }
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("Wght".parse::<Role>().unwrap(), Role::Weight);
        assert!("wght".parse::<Role>().is_err());
    }
}
