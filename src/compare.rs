//! Reference vs target snapshot comparison
//!
//! For every reference key the engine loads `REF<key>` from the collect
//! directory and `TAR<key>` from the target directory, scores each element
//! pair with [`relative_difference`], and reports one line per key:
//!
//! ```text
//! Fwrd0001.bin     ReLU                 : success
//! Fwrd0002.bin     Linear               : 0.0250001 1
//! Bwrd0003.bin     TanH                 : failed
//! ```
//!
//! Elements at or above epsilon are optionally written to `OUT<key>` as
//! `index;AAAAAAAA;BBBBBBBB;diff;a;b`, where the hex fields are the raw
//! IEEE-754 bit patterns.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::CheckConfig;
use crate::report::ReportLogger;
use crate::snapshot::{read_all, CanonicalKey, LayerDictionary, Side};

/// Symmetric relative magnitude error of two samples
///
/// Opposite signs and zero against non-zero score a full-scale 1. Equal
/// magnitudes (including two zeros) score 0. Otherwise the ratio of the
/// larger to the smaller magnitude, minus one.
pub fn relative_difference(a: f32, b: f32) -> f32 {
    let a_abs = a.abs();
    let b_abs = b.abs();

    if a != 0.0 && b != 0.0 && a.is_sign_negative() != b.is_sign_negative() {
        1.0
    } else if a_abs > 0.0 && a_abs < b_abs {
        b_abs / a_abs - 1.0
    } else if b_abs > 0.0 && b_abs < a_abs {
        a_abs / b_abs - 1.0
    } else if a_abs == b_abs {
        0.0
    } else {
        1.0
    }
}

/// One element at or above epsilon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffRecord {
    /// Element position
    pub index: usize,
    /// Reference sample
    pub reference: f32,
    /// Target sample
    pub target: f32,
    /// Relative difference
    pub diff: f32,
}

impl fmt::Display for DiffRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{:08X};{:08X};{};{};{}",
            self.index,
            self.reference.to_bits(),
            self.target.to_bits(),
            self.diff,
            self.reference,
            self.target
        )
    }
}

/// Aggregate of one element-wise comparison
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DiffStats {
    /// Elements with `diff >= epsilon`
    pub mismatches: usize,
    /// Largest difference seen (0 for empty input)
    pub max_diff: f32,
    /// Elements compared
    pub elements: usize,
}

/// Compare two equal-length sample sequences
pub fn compare_sequences(reference: &[f32], target: &[f32], epsilon: f32) -> DiffStats {
    scan_sequences(reference, target, epsilon, |_| {})
}

/// Compare two equal-length sample sequences, handing every mismatching
/// element to `on_mismatch` as soon as it is scored
pub fn scan_sequences<F>(reference: &[f32], target: &[f32], epsilon: f32, mut on_mismatch: F) -> DiffStats
where
    F: FnMut(DiffRecord),
{
    debug_assert_eq!(reference.len(), target.len());
    let mut stats = DiffStats { elements: reference.len().min(target.len()), ..DiffStats::default() };

    for (index, (&a, &b)) in reference.iter().zip(target).enumerate() {
        let diff = relative_difference(a, b);
        if diff >= epsilon {
            stats.mismatches += 1;
            on_mismatch(DiffRecord { index, reference: a, target: b, diff });
        }
        if diff > stats.max_diff {
            stats.max_diff = diff;
        }
    }
    stats
}

/// Result for one canonical key
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonOutcome {
    /// A file was missing, unreadable, or the lengths differ
    FailedToLoad(String),
    /// Every element within epsilon
    Success,
    /// Some elements at or above epsilon
    Mismatch {
        /// Mismatching elements
        count: usize,
        /// Largest relative difference
        max_diff: f32,
    },
}

impl ComparisonOutcome {
    /// Report line for this outcome
    pub fn report_line(&self, key: &CanonicalKey, label: &str) -> String {
        let status = match self {
            ComparisonOutcome::FailedToLoad(_) => "failed".to_string(),
            ComparisonOutcome::Success => "success".to_string(),
            ComparisonOutcome::Mismatch { count, max_diff } => format!("{} {}", max_diff, count),
        };
        format!("{:<16} {:<20} : {}", key.as_str(), label, status)
    }
}

/// Counts over a whole comparison run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComparisonSummary {
    /// Keys compared
    pub total: usize,
    /// Keys with no mismatching element
    pub passed: usize,
    /// Keys with at least one mismatching element
    pub mismatched: usize,
    /// Keys that could not be loaded
    pub failed: usize,
}

impl ComparisonSummary {
    fn record(&mut self, outcome: &ComparisonOutcome) {
        self.total += 1;
        match outcome {
            ComparisonOutcome::FailedToLoad(_) => self.failed += 1,
            ComparisonOutcome::Success => self.passed += 1,
            ComparisonOutcome::Mismatch { .. } => self.mismatched += 1,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.total += other.total;
        self.passed += other.passed;
        self.mismatched += other.mismatched;
        self.failed += other.failed;
        self
    }

    /// Whether every key passed
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

impl fmt::Display for ComparisonSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Compared {} artifacts: {} success, {} mismatch, {} failed",
            self.total, self.passed, self.mismatched, self.failed
        )
    }
}

/// Pairs REF and TAR snapshots and scores them
#[derive(Debug, Clone)]
pub struct ComparisonEngine {
    reference_dir: PathBuf,
    target_dir: PathBuf,
    output_dir: Option<PathBuf>,
    epsilon: f32,
}

impl ComparisonEngine {
    /// Engine comparing `reference_dir` against `target_dir`
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(reference_dir: P, target_dir: Q, epsilon: f32) -> Self {
        Self {
            reference_dir: reference_dir.as_ref().to_path_buf(),
            target_dir: target_dir.as_ref().to_path_buf(),
            output_dir: None,
            epsilon,
        }
    }

    /// Engine configured from run settings; diff files go next to the target capture
    pub fn from_config(config: &CheckConfig) -> Self {
        let engine = Self::new(&config.collect_dir, &config.compare_output_dir, config.epsilon as f32);
        if config.write_diffs {
            let output_dir = config.compare_output_dir.clone();
            engine.with_diff_output(output_dir)
        } else {
            engine
        }
    }

    /// Write `OUT<key>` diff records into `dir`
    pub fn with_diff_output<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Compare one key; load failures are logged, the outcome is returned
    ///
    /// With diff output enabled, `OUT<key>` from an earlier run is removed
    /// first and recreated only when this run finds a mismatch.
    pub fn compare_pair(&self, key: &CanonicalKey, logger: &ReportLogger) -> ComparisonOutcome {
        let diff_path = self.output_dir.as_ref().map(|dir| key.path_in(dir, Side::Diff));
        if let Some(path) = &diff_path {
            remove_stale_diff(path);
        }

        let ref_path = key.path_in(&self.reference_dir, Side::Reference);
        let tar_path = key.path_in(&self.target_dir, Side::Target);

        let reference = match read_all(&ref_path) {
            Ok(samples) => samples,
            Err(e) => {
                logger.log(&format!("Failed to load reference data file {:?}: {}", ref_path, e));
                return ComparisonOutcome::FailedToLoad(e.to_string());
            }
        };
        let target = match read_all(&tar_path) {
            Ok(samples) => samples,
            Err(e) => {
                logger.log(&format!("Failed to load target data file {:?}: {}", tar_path, e));
                return ComparisonOutcome::FailedToLoad(e.to_string());
            }
        };
        if reference.len() != target.len() {
            let reason = format!(
                "Data length is not equal: {} reference vs {} target elements",
                reference.len(),
                target.len()
            );
            logger.log(&format!("{}: {}", key, reason));
            return ComparisonOutcome::FailedToLoad(reason);
        }

        let mut diffs = diff_path.as_deref().map(DiffWriter::new);
        let stats = scan_sequences(&reference, &target, self.epsilon, |record| {
            if let Some(out) = diffs.as_mut() {
                out.push(&record);
            }
        });
        if let Some(out) = diffs {
            out.finish();
        }

        if stats.mismatches == 0 {
            ComparisonOutcome::Success
        } else {
            ComparisonOutcome::Mismatch { count: stats.mismatches, max_diff: stats.max_diff }
        }
    }

    /// Compare every key in parallel, logging one line per key and a summary
    pub fn run(&self, keys: &[CanonicalKey], dictionary: &LayerDictionary, logger: &ReportLogger) -> ComparisonSummary {
        self.run_with_progress(keys, dictionary, logger, || {})
    }

    /// As [`run`](Self::run), calling `on_done` after each key
    pub fn run_with_progress<F>(
        &self,
        keys: &[CanonicalKey],
        dictionary: &LayerDictionary,
        logger: &ReportLogger,
        on_done: F,
    ) -> ComparisonSummary
    where
        F: Fn() + Sync,
    {
        tracing::info!(
            "Comparing {} artifacts ({:?} vs {:?}, epsilon {})",
            keys.len(),
            self.reference_dir,
            self.target_dir,
            self.epsilon
        );

        let summary = keys
            .par_iter()
            .map(|key| {
                let outcome = self.compare_pair(key, logger);
                logger.log(&outcome.report_line(key, dictionary.lookup(key.as_str())));
                on_done();

                let mut summary = ComparisonSummary::default();
                summary.record(&outcome);
                summary
            })
            .reduce(ComparisonSummary::default, ComparisonSummary::merge);

        logger.log(&summary.to_string());
        summary
    }
}

fn remove_stale_diff(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed diff file from an earlier run: {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove stale diff file {:?}: {}", path, e),
    }
}

/// Streams records into `OUT<key>`, creating the file on the first record
struct DiffWriter<'a> {
    path: &'a Path,
    writer: Option<BufWriter<File>>,
    failed: bool,
}

impl<'a> DiffWriter<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, writer: None, failed: false }
    }

    fn push(&mut self, record: &DiffRecord) {
        if self.failed {
            return;
        }
        if let Err(e) = self.write(record) {
            tracing::warn!("{:#}", e);
            self.failed = true;
        }
    }

    fn write(&mut self, record: &DiffRecord) -> Result<()> {
        if self.writer.is_none() {
            let file = File::create(self.path)
                .with_context(|| format!("Failed to create diff file {:?}", self.path))?;
            self.writer = Some(BufWriter::new(file));
        }
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", record).with_context(|| format!("Failed to write diff file {:?}", self.path))?;
        }
        Ok(())
    }

    fn finish(self) {
        if let Some(mut writer) = self.writer {
            if let Err(e) = writer.flush() {
                tracing::warn!("Failed to write diff file {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{write_samples, ArtifactKey, Role};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn quiet_logger(dir: &Path) -> ReportLogger {
        ReportLogger::create(dir.join("log.txt")).unwrap().with_echo(false)
    }

    #[test]
    fn test_metric_examples() {
        assert_eq!(relative_difference(2.0, 1.0), 1.0);
        assert_eq!(relative_difference(1.0, 1.0), 0.0);
        assert_eq!(relative_difference(0.0, 1.0), 1.0);
        assert_eq!(relative_difference(1.0, 0.0), 1.0);
        assert_eq!(relative_difference(0.0, 0.0), 0.0);
        assert_eq!(relative_difference(0.0, -0.0), 0.0);
        assert_eq!(relative_difference(-3.0, 1e-9), 1.0);
        assert_relative_eq!(relative_difference(4.0, 4.1), 0.025, max_relative = 1e-4);
        assert_relative_eq!(relative_difference(-4.0, -4.1), 0.025, max_relative = 1e-4);
    }

    #[test]
    fn test_metric_non_finite() {
        // NaN matches no branch and lands on full scale
        assert_eq!(relative_difference(f32::NAN, 1.0), 1.0);
        assert_eq!(relative_difference(f32::INFINITY, f32::INFINITY), 0.0);
    }

    #[test]
    fn test_compare_sequences_counts() {
        let stats = compare_sequences(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 4.1], 1e-3);
        assert_eq!(stats.mismatches, 1);
        assert_eq!(stats.elements, 4);
        assert_relative_eq!(stats.max_diff, 0.025, max_relative = 1e-4);

        let stats = compare_sequences(&[1.0, -1.0], &[1.0, 1.0], 1e-3);
        assert_eq!(stats.mismatches, 1);
        assert_eq!(stats.max_diff, 1.0);
    }

    #[test]
    fn test_scan_sequences_reports_each_mismatch() {
        let mut records = Vec::new();
        let stats = scan_sequences(&[1.0, -1.0, 3.0, 4.0], &[1.0, 1.0, 3.0, 4.1], 1e-3, |r| records.push(r));
        assert_eq!(stats.mismatches, 2);
        assert_eq!(records.iter().map(|r| r.index).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(records[0].diff, 1.0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let stats = compare_sequences(&[1.0], &[2.0], 1.0);
        assert_eq!(stats.mismatches, 1);
        let stats = compare_sequences(&[1.0], &[2.0], 1.5);
        assert_eq!(stats.mismatches, 0);
        assert_eq!(stats.max_diff, 1.0);
    }

    #[test]
    fn test_diff_record_format() {
        let record = DiffRecord { index: 3, reference: 4.0, target: -1.0, diff: 1.0 };
        assert_eq!(record.to_string(), "3;40800000;BF800000;1;4;-1");
        let record = DiffRecord { index: 0, reference: 1.0, target: 1.5, diff: 0.5 };
        assert_eq!(record.to_string(), "0;3F800000;3FC00000;0.5;1;1.5");
    }

    #[test]
    fn test_report_lines() {
        let key = ArtifactKey::new(Role::Forward, 2).canonical();
        assert_eq!(
            ComparisonOutcome::Success.report_line(&key, "ReLU"),
            "Fwrd0002.bin     ReLU                 : success"
        );
        assert!(ComparisonOutcome::FailedToLoad("x".into()).report_line(&key, "").ends_with(": failed"));
        assert!(ComparisonOutcome::Mismatch { count: 7, max_diff: 0.5 }
            .report_line(&key, "Linear")
            .ends_with(": 0.5 7"));
    }

    #[test]
    fn test_compare_pair_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        write_samples(dir.path().join("REFGrad0000.bin"), &[1.0, 2.0]).unwrap();
        let logger = quiet_logger(dir.path());
        let engine = ComparisonEngine::new(dir.path(), dir.path(), 1e-3);

        let key = CanonicalKey::parse("REFGrad0000.bin").unwrap();
        assert!(matches!(engine.compare_pair(&key, &logger), ComparisonOutcome::FailedToLoad(_)));
    }

    #[test]
    fn test_compare_pair_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_samples(dir.path().join("REFFwrd0000.bin"), &[1.0, 2.0]).unwrap();
        write_samples(dir.path().join("TARFwrd0000.bin"), &[1.0, 2.0, 3.0]).unwrap();
        let logger = quiet_logger(dir.path());
        let engine = ComparisonEngine::new(dir.path(), dir.path(), 1e-3);

        let key = CanonicalKey::parse("REFFwrd0000.bin").unwrap();
        assert!(matches!(engine.compare_pair(&key, &logger), ComparisonOutcome::FailedToLoad(_)));
    }

    #[test]
    fn test_diff_file_only_for_mismatches() {
        let ref_dir = tempfile::tempdir().unwrap();
        let tar_dir = tempfile::tempdir().unwrap();
        write_samples(ref_dir.path().join("REFFwrd0000.bin"), &[1.0, 2.0]).unwrap();
        write_samples(tar_dir.path().join("TARFwrd0000.bin"), &[1.0, 2.0]).unwrap();
        write_samples(ref_dir.path().join("REFFwrd0001.bin"), &[1.0, 2.0]).unwrap();
        write_samples(tar_dir.path().join("TARFwrd0001.bin"), &[1.0, -2.0]).unwrap();

        let logger = quiet_logger(tar_dir.path());
        let engine = ComparisonEngine::new(ref_dir.path(), tar_dir.path(), 1e-3).with_diff_output(tar_dir.path());

        let ok = CanonicalKey::parse("REFFwrd0000.bin").unwrap();
        let bad = CanonicalKey::parse("REFFwrd0001.bin").unwrap();
        assert_eq!(engine.compare_pair(&ok, &logger), ComparisonOutcome::Success);
        assert_eq!(
            engine.compare_pair(&bad, &logger),
            ComparisonOutcome::Mismatch { count: 1, max_diff: 1.0 }
        );

        assert!(!tar_dir.path().join("OUTFwrd0000.bin").exists());
        let diff = std::fs::read_to_string(tar_dir.path().join("OUTFwrd0001.bin")).unwrap();
        assert_eq!(diff, "1;40000000;C0000000;1;2;-2\n");
    }

    #[test]
    fn test_stale_diff_file_removed_after_fix() {
        let dir = tempfile::tempdir().unwrap();
        write_samples(dir.path().join("REFFwrd0000.bin"), &[1.0, 2.0]).unwrap();
        write_samples(dir.path().join("TARFwrd0000.bin"), &[1.0, -2.0]).unwrap();
        let keys = crate::snapshot::list_reference_artifacts(dir.path()).unwrap();
        let logger = quiet_logger(dir.path());
        let engine = ComparisonEngine::new(dir.path(), dir.path(), 1e-3).with_diff_output(dir.path());
        let diff_path = dir.path().join("OUTFwrd0000.bin");

        let first = engine.run(&keys, &LayerDictionary::new(), &logger);
        assert_eq!(first.mismatched, 1);
        assert_eq!(std::fs::read_to_string(&diff_path).unwrap(), "1;40000000;C0000000;1;2;-2\n");

        write_samples(dir.path().join("TARFwrd0000.bin"), &[1.0, 2.0]).unwrap();
        let second = engine.run(&keys, &LayerDictionary::new(), &logger);
        assert_eq!(second.passed, 1);
        assert!(!diff_path.exists());
    }

    #[test]
    fn test_stale_diff_file_removed_when_target_missing() {
        let dir = tempfile::tempdir().unwrap();
        write_samples(dir.path().join("REFBwrd0001.bin"), &[1.0]).unwrap();
        std::fs::write(dir.path().join("OUTBwrd0001.bin"), "0;3F800000;BF800000;1;1;-1\n").unwrap();
        let logger = quiet_logger(dir.path());
        let engine = ComparisonEngine::new(dir.path(), dir.path(), 1e-3).with_diff_output(dir.path());

        let key = CanonicalKey::parse("REFBwrd0001.bin").unwrap();
        assert!(matches!(engine.compare_pair(&key, &logger), ComparisonOutcome::FailedToLoad(_)));
        assert!(!dir.path().join("OUTBwrd0001.bin").exists());
    }

    #[test]
    fn test_diff_file_streams_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let reference: Vec<f32> = (1..=1000).map(|i| i as f32).collect();
        let target: Vec<f32> = reference.iter().map(|v| -v).collect();
        write_samples(dir.path().join("REFWght0000.bin"), &reference).unwrap();
        write_samples(dir.path().join("TARWght0000.bin"), &target).unwrap();
        let logger = quiet_logger(dir.path());
        let engine = ComparisonEngine::new(dir.path(), dir.path(), 1e-3).with_diff_output(dir.path());

        let key = CanonicalKey::parse("REFWght0000.bin").unwrap();
        assert_eq!(engine.compare_pair(&key, &logger), ComparisonOutcome::Mismatch { count: 1000, max_diff: 1.0 });
        let diff = std::fs::read_to_string(dir.path().join("OUTWght0000.bin")).unwrap();
        assert_eq!(diff.lines().count(), 1000);
        assert!(diff.lines().last().unwrap().starts_with("999;"));
    }

    #[test]
    fn test_run_summary() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6 {
            let key = ArtifactKey::new(Role::Weight, i);
            write_samples(dir.path().join(key.file_name(Side::Reference)), &[1.0, 2.0, 3.0]).unwrap();
            if i != 5 {
                let target = if i % 2 == 0 { [1.0, 2.0, 3.0] } else { [1.0, 2.0, 3.5] };
                write_samples(dir.path().join(key.file_name(Side::Target)), &target).unwrap();
            }
        }
        let keys = crate::snapshot::list_reference_artifacts(dir.path()).unwrap();
        let logger = quiet_logger(dir.path());
        let dictionary = LayerDictionary::parse("Wght0000 Linear");
        let engine = ComparisonEngine::new(dir.path(), dir.path(), 1e-3);

        let summary = engine.run(&keys, &dictionary, &logger);
        assert_eq!(summary, ComparisonSummary { total: 6, passed: 3, mismatched: 2, failed: 1 });
        assert!(!summary.all_passed());

        drop(logger);
        let log = std::fs::read_to_string(dir.path().join("log.txt")).unwrap();
        assert!(log.contains("Wght0000.bin     Linear               : success"));
        assert!(log.contains("Wght0005.bin                          : failed"));
        assert!(log.lines().last().unwrap().starts_with("Compared 6 artifacts"));
    }

    proptest! {
        #[test]
        fn prop_identical_sequences_match(samples in prop::collection::vec(-1e6f32..1e6, 0..64), eps in 1e-7f32..1.0) {
            let stats = compare_sequences(&samples, &samples, eps);
            prop_assert_eq!(stats.mismatches, 0);
            prop_assert_eq!(stats.max_diff, 0.0);
        }

        #[test]
        fn prop_metric_is_symmetric(a in -1e6f32..1e6, b in -1e6f32..1e6) {
            prop_assert_eq!(relative_difference(a, b).to_bits(), relative_difference(b, a).to_bits());
        }

        #[test]
        fn prop_opposite_signs_score_one(a in 1e-6f32..1e6, b in 1e-6f32..1e6) {
            prop_assert_eq!(relative_difference(a, -b), 1.0);
            prop_assert_eq!(relative_difference(-a, b), 1.0);
        }

        #[test]
        fn prop_metric_non_negative(a in -1e6f32..1e6, b in -1e6f32..1e6) {
            prop_assert!(relative_difference(a, b) >= 0.0);
        }
    }
}
