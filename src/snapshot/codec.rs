//! Raw sample files
//!
//! A snapshot is a flat run of native-endian IEEE-754 `f32` values with no
//! header. The element count is implied by the file length.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bytes per stored sample
pub const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// Snapshot I/O failures
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The file does not exist
    #[error("snapshot not found: {0:?}")]
    NotFound(PathBuf),

    /// Fewer bytes than expected could be read
    #[error("short read from {path:?}: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// File being read
        path: PathBuf,
        /// Bytes requested
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// The file could not be written in full
    #[error("short write to {path:?}: {source}")]
    ShortWrite {
        /// File being written
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// File length is not a whole number of samples
    #[error("snapshot {path:?} has {len} bytes, not a whole number of f32 samples")]
    Misaligned {
        /// File being read
        path: PathBuf,
        /// File length in bytes
        len: usize,
    },

    /// Any other I/O failure
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: io::Error,
    },
}

impl SnapshotError {
    fn open(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            SnapshotError::NotFound(path.to_path_buf())
        } else {
            SnapshotError::Io { path: path.to_path_buf(), source }
        }
    }

    /// Whether the failure is a missing file rather than a damaged one
    pub fn is_not_found(&self) -> bool {
        matches!(self, SnapshotError::NotFound(_))
    }
}

/// Encode samples in native byte order
pub fn samples_to_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
}

/// Decode native byte order samples; trailing partial samples are dropped
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(SAMPLE_SIZE)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Create or truncate `path` and write every sample
///
/// On error the file may be partially written and must be treated as absent.
pub fn write_samples<P: AsRef<Path>>(path: P, samples: &[f32]) -> Result<(), SnapshotError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|source| SnapshotError::Io { path: path.to_path_buf(), source })?;
    let mut writer = BufWriter::new(file);
    let short = |source| SnapshotError::ShortWrite { path: path.to_path_buf(), source };

    writer.write_all(&samples_to_bytes(samples)).map_err(short)?;
    writer.flush().map_err(short)?;
    Ok(())
}

/// Read exactly `count` samples from the start of `path`
pub fn read_samples<P: AsRef<Path>>(path: P, count: usize) -> Result<Vec<f32>, SnapshotError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| SnapshotError::open(path, e))?;
    let expected = count * SAMPLE_SIZE;

    let mut bytes = Vec::with_capacity(expected);
    BufReader::new(file)
        .take(expected as u64)
        .read_to_end(&mut bytes)
        .map_err(|source| SnapshotError::Io { path: path.to_path_buf(), source })?;

    if bytes.len() != expected {
        return Err(SnapshotError::ShortRead {
            path: path.to_path_buf(),
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes_to_samples(&bytes))
}

/// Read a whole snapshot, inferring the element count from the file length
pub fn read_all<P: AsRef<Path>>(path: P) -> Result<Vec<f32>, SnapshotError> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| SnapshotError::open(path, e))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|source| SnapshotError::Io { path: path.to_path_buf(), source })?;

    if bytes.len() % SAMPLE_SIZE != 0 {
        return Err(SnapshotError::Misaligned { path: path.to_path_buf(), len: bytes.len() });
    }
    Ok(bytes_to_samples(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("REFWght0000.bin");
        let samples = vec![0.0f32, -0.0, 1.5, f32::MIN_POSITIVE, f32::NAN, f32::INFINITY, -3.25e-7];

        write_samples(&path, &samples).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 28);

        let loaded = read_samples(&path, samples.len()).unwrap();
        let bits = |v: &[f32]| v.iter().map(|f| f.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&loaded), bits(&samples));
        assert_eq!(bits(&read_all(&path).unwrap()), bits(&samples));
    }

    #[test]
    fn test_write_truncates_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");
        write_samples(&path, &[1.0; 8]).unwrap();
        write_samples(&path, &[2.0; 2]).unwrap();
        assert_eq!(read_all(&path).unwrap(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_samples(dir.path().join("absent.bin"), 4).unwrap_err();
        assert!(err.is_not_found());
        assert!(read_all(dir.path().join("absent.bin")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_short_read_is_not_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        write_samples(&path, &[1.0, 2.0, 3.0]).unwrap();

        match read_samples(&path, 4) {
            Err(SnapshotError::ShortRead { expected, actual, .. }) => {
                assert_eq!(expected, 16);
                assert_eq!(actual, 12);
            }
            other => panic!("expected short read, got {:?}", other),
        }
        assert_eq!(read_samples(&path, 2).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_misaligned_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.bin");
        std::fs::write(&path, [0u8; 7]).unwrap();
        assert!(matches!(read_all(&path), Err(SnapshotError::Misaligned { len: 7, .. })));
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("x.bin");
        let err = write_samples(&path, &[1.0]).unwrap_err();
        assert!(matches!(err, SnapshotError::Io { .. }));
        assert!(!err.is_not_found());
        assert!(err.to_string().starts_with("I/O error on"));
    }

    #[test]
    fn test_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        write_samples(&path, &[]).unwrap();
        assert!(read_all(&path).unwrap().is_empty());
        assert!(read_samples(&path, 0).unwrap().is_empty());
    }
}
