//! # layercheck
//!
//! Layer-by-layer numerical equivalence checking between two backends of a
//! neural network.
//!
//! ## Workflow
//!
//! 1. Capture a reference run: every layer output, input gradient,
//!    parameter gradient and parameter value is written as a raw `f32` file
//!    (`REFFwrd0000.bin`, `REFBwrd0003.bin`, `REFGrad0001.bin`, ...)
//! 2. Capture the backend under test the same way with the `TAR` prefix,
//!    optionally replaying reference tensors after every layer
//! 3. Pair the files by canonical key and report the relative difference
//!
//! ```rust,ignore
//! use layercheck::{capture, CaptureOptions, ComparisonEngine, ReportLogger};
//!
//! let logger = ReportLogger::create("compareout/log.txt")?;
//! capture(&mut reference_net, &CaptureOptions::reference("collect", "CPUInfo.txt"), &logger)?;
//! capture(&mut target_net, &CaptureOptions::target("compareout", "GPUInfo.txt"), &logger)?;
//!
//! let keys = layercheck::snapshot::list_reference_artifacts("collect")?;
//! let engine = ComparisonEngine::new("collect", "compareout", 1e-3);
//! let summary = engine.run(&keys, &Default::default(), &logger);
//! ```

#![warn(missing_docs)]

pub mod capture;
pub mod compare;
pub mod config;
pub mod graph;
pub mod net;
pub mod report;
pub mod snapshot;

// Re-exports for convenience
pub use capture::{capture, CaptureOptions, CaptureSummary};
pub use compare::{
    compare_sequences, relative_difference, scan_sequences, ComparisonEngine, ComparisonOutcome, ComparisonSummary,
    DiffRecord, DiffStats,
};
pub use config::{CheckConfig, LayerConfig, ModelConfig};
pub use graph::{Blob, ComputeGraph};
pub use net::{Backend, SequentialNet};
pub use report::ReportLogger;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
