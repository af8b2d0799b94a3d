//! Snapshot artifact store
//!
//! Captured tensors live as raw files in a directory, addressed by side,
//! role and index:
//! - Raw `f32` file codec
//! - File naming and canonical keys
//! - Discovery of reference artifacts
//! - Layer type labels for reporting

mod address;
mod codec;
mod dictionary;
mod discovery;

pub use address::{file_name, ArtifactKey, CanonicalKey, Role, Side, EXTENSION};
pub use codec::{
    bytes_to_samples, read_all, read_samples, samples_to_bytes, write_samples, SnapshotError,
    SAMPLE_SIZE,
};
pub use dictionary::LayerDictionary;
pub use discovery::list_reference_artifacts;
