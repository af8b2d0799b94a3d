//! Run configuration
//!
//! Two YAML documents drive a run:
//! - [`ModelConfig`] describes the network whose layers are captured
//! - [`CheckConfig`] holds directories, tolerance and reporting options

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default relative-difference tolerance
pub const DEFAULT_EPSILON: f64 = 1e-3;

/// One layer of a sequential network definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerConfig {
    /// Fully connected layer, `y = x W^T + b`
    Linear {
        /// Output features per row
        out_features: usize,
        /// Whether the layer carries a bias parameter
        #[serde(default = "default_true")]
        bias: bool,
    },
    /// Rectified linear unit
    Relu,
    /// Logistic sigmoid
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// Half mean squared error against a seeded target
    EuclideanLoss,
}

impl LayerConfig {
    /// Whether this entry is a loss layer
    pub fn is_loss(&self) -> bool {
        matches!(self, LayerConfig::EuclideanLoss)
    }
}

fn default_true() -> bool {
    true
}

fn default_seed() -> u64 {
    1701
}

fn default_batch_size() -> usize {
    4
}

/// Network definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Human readable name
    #[serde(default)]
    pub name: String,
    /// Seed for parameter, input and target initialisation
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Rows in the input batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Features per input row
    pub input_dim: usize,
    /// Propagate gradients into the input of the first layer
    #[serde(default)]
    pub force_backward: bool,
    /// Layers in graph order
    pub layers: Vec<LayerConfig>,
}

impl ModelConfig {
    /// Load and validate a model definition from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model definition: {:?}", path))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Invalid model definition: {:?}", path))?;
        Ok(config)
    }

    /// Parse and validate a model definition from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ModelConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check structural preconditions
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            anyhow::bail!("Model definition has no layers");
        }
        if self.batch_size == 0 || self.input_dim == 0 {
            anyhow::bail!(
                "batch_size and input_dim must be positive (got {} and {})",
                self.batch_size,
                self.input_dim
            );
        }
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            match layer {
                LayerConfig::Linear { out_features: 0, .. } => {
                    anyhow::bail!("Layer {} has out_features = 0", i);
                }
                l if l.is_loss() && i != last => {
                    anyhow::bail!("Loss layer must be last, found at position {}", i);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Settings for capture and comparison runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Directory holding the reference capture
    pub collect_dir: PathBuf,
    /// Directory holding the target capture and comparison output
    pub compare_output_dir: PathBuf,
    /// Relative-difference threshold
    pub epsilon: f64,
    /// Write per-element diff records for mismatching keys
    pub write_diffs: bool,
    /// Worker threads for comparison (0 = rayon default)
    pub threads: usize,
    /// Report log file name, relative to the comparison output directory
    pub log_file: PathBuf,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            collect_dir: PathBuf::from("collect"),
            compare_output_dir: PathBuf::from("compareout"),
            epsilon: DEFAULT_EPSILON,
            write_diffs: true,
            threads: 0,
            log_file: PathBuf::from("log.txt"),
        }
    }
}

impl CheckConfig {
    /// Load settings from a YAML file; missing keys take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {:?}", path))?;
        let config: CheckConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid settings: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.epsilon > 0.0) || !self.epsilon.is_finite() {
            anyhow::bail!("epsilon must be a positive finite number, got {}", self.epsilon);
        }
        Ok(())
    }

    /// Full path of the report log
    pub fn log_path(&self) -> PathBuf {
        if self.log_file.is_absolute() {
            self.log_file.clone()
        } else {
            self.compare_output_dir.join(&self.log_file)
        }
    }
}
