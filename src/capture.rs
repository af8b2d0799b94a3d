//! Layer-by-layer snapshot capture
//!
//! Runs one forward pass and one backward pass over a [`ComputeGraph`] and
//! persists, in order:
//! 1. `Fwrd<i>`: first output of layer `i` after its forward step
//! 2. `Bwrd<i>`: first input gradient of layer `i` after its backward step,
//!    for layers whose first input takes a gradient
//! 3. `Grad<p>` and `Wght<p>`: gradient and value of parameter `p`
//!
//! Only the first input and output of a layer are covered; secondary tensors
//! of multi-input or multi-output layers are not captured.
//!
//! In replay mode each captured layer tensor is then overwritten with the
//! matching reference snapshot, so every layer of the target run consumes
//! reference inputs and differences stay local to the layer that made them.

use anyhow::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::graph::ComputeGraph;
use crate::report::ReportLogger;
use crate::snapshot::{read_samples, write_samples, ArtifactKey, Role, Side};

/// Where and how to capture
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Directory receiving the snapshot files
    pub output_dir: PathBuf,
    /// File prefix side, reference or target
    pub side: Side,
    /// Name of the layer info file inside `output_dir`
    pub info_file_name: String,
    /// Reference capture to inject after each layer step
    pub replay_from: Option<PathBuf>,
}

impl CaptureOptions {
    /// Reference-side capture without replay
    pub fn reference<P: AsRef<Path>>(output_dir: P, info_file_name: &str) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            side: Side::Reference,
            info_file_name: info_file_name.to_string(),
            replay_from: None,
        }
    }

    /// Target-side capture without replay
    pub fn target<P: AsRef<Path>>(output_dir: P, info_file_name: &str) -> Self {
        Self { side: Side::Target, ..Self::reference(output_dir, info_file_name) }
    }

    /// Inject reference snapshots from `reference_dir` after each layer step
    pub fn with_replay<P: AsRef<Path>>(mut self, reference_dir: P) -> Self {
        self.replay_from = Some(reference_dir.as_ref().to_path_buf());
        self
    }

    /// Path of the layer info file
    pub fn info_path(&self) -> PathBuf {
        self.output_dir.join(&self.info_file_name)
    }
}

/// Counts from one capture pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureSummary {
    /// Snapshot files written
    pub written: usize,
    /// Snapshot files that failed to write
    pub failed: usize,
    /// Reference snapshots injected in replay mode
    pub injected: usize,
    /// Reference snapshots that could not be injected
    pub injection_failures: usize,
}

struct Capture<'a> {
    options: &'a CaptureOptions,
    logger: &'a ReportLogger,
    info: Option<BufWriter<File>>,
    summary: CaptureSummary,
}

impl Capture<'_> {
    fn save(&mut self, key: ArtifactKey, samples: &[f32]) {
        let path = self.options.output_dir.join(key.file_name(self.options.side));
        match write_samples(&path, samples) {
            Ok(()) => self.summary.written += 1,
            Err(e) => {
                self.summary.failed += 1;
                tracing::error!("{}", e);
                self.logger.log(&format!("Failed to write data to {:?}: {}", path, e));
            }
        }
    }

    /// Reference samples for `key`, sized like the tensor they replace
    fn reference(&mut self, key: ArtifactKey, count: usize) -> Option<Vec<f32>> {
        let dir = self.options.replay_from.as_ref()?;
        let path = dir.join(key.file_name(Side::Reference));
        match read_samples(&path, count) {
            Ok(samples) => {
                self.summary.injected += 1;
                Some(samples)
            }
            Err(e) => {
                self.summary.injection_failures += 1;
                tracing::warn!("Keeping target values for {}: {}", key.stem(), e);
                self.logger.log(&format!("Failed to load reference {:?} for replay: {}", path, e));
                None
            }
        }
    }

    fn record_layer(&mut self, key: ArtifactKey, layer_type: &str) {
        if let Some(info) = self.info.as_mut() {
            if let Err(e) = writeln!(info, "{} {}", key.stem(), layer_type) {
                tracing::warn!("Failed to write layer info: {}", e);
                self.info = None;
            }
        }
    }
}

/// Capture every layer and parameter of `graph` into `options.output_dir`
///
/// I/O failures affect only the artifact involved and are logged. Errors
/// from the graph itself abort the capture.
pub fn capture<G: ComputeGraph + ?Sized>(
    graph: &mut G,
    options: &CaptureOptions,
    logger: &ReportLogger,
) -> Result<CaptureSummary> {
    let dir = &options.output_dir;
    if !dir.exists() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::error!("Could not create capture directory {:?}: {}", dir, e);
            logger.log(&format!("Could not create directory for capture output files {:?}", dir));
        }
    }

    let info = match File::create(options.info_path()) {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            tracing::error!("Could not create layer info file {:?}: {}", options.info_path(), e);
            None
        }
    };

    let mut run = Capture { options, logger, info, summary: CaptureSummary::default() };
    let replay = options.replay_from.is_some();
    logger.log(&format!(
        "*** Capture procedure begins ({} side{}) ***",
        options.side.prefix(),
        if replay { ", replaying reference" } else { "" }
    ));

    graph.zero_param_grads();

    for i in 0..graph.num_layers() {
        let layer_type = graph.layer_type(i).to_string();
        tracing::info!("Capturing forward layer [{}]: {}", i, layer_type);
        let key = ArtifactKey::new(Role::Forward, i);
        run.record_layer(key, &layer_type);

        graph.forward_layer(i)?;
        run.save(key, graph.output(i).data());

        if replay {
            if let Some(samples) = run.reference(key, graph.output(i).count()) {
                graph.output_mut(i).set_data(&samples)?;
            }
        }
    }

    for i in (0..graph.num_layers()).rev() {
        let layer_type = graph.layer_type(i).to_string();
        tracing::info!("Capturing backward layer [{}]: {}", i, layer_type);
        let key = ArtifactKey::new(Role::Backward, i);
        run.record_layer(key, &layer_type);

        graph.backward_layer(i)?;
        if !graph.input_needs_grad(i) {
            continue;
        }
        run.save(key, graph.input(i).grad());

        if replay {
            if let Some(samples) = run.reference(key, graph.input(i).count()) {
                graph.input_mut(i).set_grad(&samples)?;
            }
        }
    }

    tracing::info!("Capturing parameter gradients and weights");
    for p in 0..graph.params().len() {
        run.save(ArtifactKey::new(Role::Gradient, p), graph.params()[p].grad());
        run.save(ArtifactKey::new(Role::Weight, p), graph.params()[p].data());
    }

    if let Some(mut info) = run.info.take() {
        if let Err(e) = info.flush() {
            tracing::warn!("Failed to flush layer info file: {}", e);
        }
    }

    let summary = run.summary;
    logger.log(&format!(
        "*** Capture procedure ends: {} files written, {} failed ***",
        summary.written, summary.failed
    ));
    Ok(summary)
}
