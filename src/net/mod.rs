//! Sequential network with interchangeable numeric backends
//!
//! Builds a layer chain from a [`ModelConfig`] and exposes it through
//! [`ComputeGraph`]. Parameters, input batch and loss target are drawn from
//! one seeded generator, so two networks built from the same definition on
//! different backends start from bit-identical state.

mod accelerated;
mod layers;
mod reference;

pub use layers::{Activation, ActivationKind, EuclideanLoss, Layer, Linear};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use crate::config::{LayerConfig, ModelConfig};
use crate::graph::{Blob, ComputeGraph};

/// Numeric implementation used by every layer of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Scalar loops
    Reference,
    /// candle tensor ops
    Candle,
}

impl Backend {
    /// Name of the capture info file written for this backend
    pub fn info_file_name(self) -> &'static str {
        match self {
            Backend::Reference => "CPUInfo.txt",
            Backend::Candle => "GPUInfo.txt",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Reference => f.write_str("cpu"),
            Backend::Candle => f.write_str("candle"),
        }
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" | "reference" => Ok(Backend::Reference),
            "candle" | "gpu" | "accelerated" => Ok(Backend::Candle),
            other => anyhow::bail!("Unknown backend '{}', expected 'cpu' or 'candle'", other),
        }
    }
}

/// A chain of layers where layer `i` reads blob `i` and writes blob `i + 1`
pub struct SequentialNet {
    name: String,
    backend: Backend,
    force_backward: bool,
    layers: Vec<Box<dyn Layer>>,
    param_ranges: Vec<Range<usize>>,
    blobs: Vec<Blob>,
    params: Vec<Blob>,
}

fn uniform(rng: &mut StdRng, count: usize, bound: f32) -> Vec<f32> {
    (0..count).map(|_| rng.gen_range(-bound..=bound)).collect()
}

impl SequentialNet {
    /// Build a network from a validated definition
    pub fn build(config: &ModelConfig, backend: Backend) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let input_shape = vec![config.batch_size, config.input_dim];
        let input = uniform(&mut rng, config.batch_size * config.input_dim, 1.0);
        let mut blobs = vec![Blob::from_data(&input_shape, input)?];

        let mut layers: Vec<Box<dyn Layer>> = Vec::with_capacity(config.layers.len());
        let mut param_ranges = Vec::with_capacity(config.layers.len());
        let mut params = Vec::new();

        for layer_config in &config.layers {
            let shape = blobs[blobs.len() - 1].shape().to_vec();
            let features: usize = shape.iter().skip(1).product();
            let first_param = params.len();

            let layer: Box<dyn Layer> = match *layer_config {
                LayerConfig::Linear { out_features, bias } => {
                    let linear = Linear::new(features, out_features, bias, backend);
                    let bound = (6.0 / (features + out_features) as f32).sqrt();
                    for (i, param_shape) in linear.param_shapes().into_iter().enumerate() {
                        let count = param_shape.iter().product();
                        let bound = if i == 0 { bound } else { 0.1 };
                        params.push(Blob::from_data(&param_shape, uniform(&mut rng, count, bound))?);
                    }
                    Box::new(linear)
                }
                LayerConfig::Relu => Box::new(Activation::new(ActivationKind::Relu, backend)),
                LayerConfig::Sigmoid => Box::new(Activation::new(ActivationKind::Sigmoid, backend)),
                LayerConfig::Tanh => Box::new(Activation::new(ActivationKind::Tanh, backend)),
                LayerConfig::EuclideanLoss => {
                    let count = shape.iter().product();
                    Box::new(EuclideanLoss::new(uniform(&mut rng, count, 1.0), backend))
                }
            };

            blobs.push(Blob::zeros(&layer.output_shape(&shape)));
            param_ranges.push(first_param..params.len());
            layers.push(layer);
        }

        tracing::debug!(
            "Built '{}' on {}: {} layers, {} parameter blobs",
            config.name,
            backend,
            layers.len(),
            params.len()
        );

        Ok(Self {
            name: config.name.clone(),
            backend,
            force_backward: config.force_backward,
            layers,
            param_ranges,
            blobs,
            params,
        })
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend evaluating the layers
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Scalar value of the final output, i.e. the loss when the last layer is one
    pub fn final_output(&self) -> &Blob {
        &self.blobs[self.blobs.len() - 1]
    }
}

impl ComputeGraph for SequentialNet {
    fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn layer_type(&self, layer: usize) -> &str {
        self.layers[layer].layer_type()
    }

    fn forward_layer(&mut self, layer: usize) -> Result<()> {
        let (head, tail) = self.blobs.split_at_mut(layer + 1);
        let top = &mut tail[0];
        self.layers[layer].forward(&head[layer], top, &self.params[self.param_ranges[layer].clone()])?;

        // The last output is the objective; seed its gradient with unit weight
        if layer + 1 == self.layers.len() {
            top.grad_mut().fill(1.0);
        }
        Ok(())
    }

    fn backward_layer(&mut self, layer: usize) -> Result<()> {
        let propagate_down = self.input_needs_grad(layer);
        let range = self.param_ranges[layer].clone();
        let (head, tail) = self.blobs.split_at_mut(layer + 1);
        self.layers[layer].backward(&tail[0], propagate_down, &mut head[layer], &mut self.params[range])
    }

    fn output(&self, layer: usize) -> &Blob {
        &self.blobs[layer + 1]
    }

    fn output_mut(&mut self, layer: usize) -> &mut Blob {
        &mut self.blobs[layer + 1]
    }

    fn input(&self, layer: usize) -> &Blob {
        &self.blobs[layer]
    }

    fn input_mut(&mut self, layer: usize) -> &mut Blob {
        &mut self.blobs[layer]
    }

    fn input_needs_grad(&self, layer: usize) -> bool {
        layer > 0 || self.force_backward
    }

    fn params(&self) -> &[Blob] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [Blob] {
        &mut self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mlp() -> ModelConfig {
        ModelConfig::from_yaml(
            r#"
name: mlp
seed: 11
batch_size: 3
input_dim: 4
layers:
  - type: linear
    out_features: 5
  - type: tanh
  - type: linear
    out_features: 2
  - type: sigmoid
  - type: euclidean_loss
"#,
        )
        .unwrap()
    }

    fn run(net: &mut SequentialNet) {
        net.zero_param_grads();
        for i in 0..net.num_layers() {
            net.forward_layer(i).unwrap();
        }
        for i in (0..net.num_layers()).rev() {
            net.backward_layer(i).unwrap();
        }
    }

    #[test]
    fn test_build_shapes() {
        let net = SequentialNet::build(&mlp(), Backend::Reference).unwrap();
        assert_eq!(net.num_layers(), 5);
        assert_eq!(net.params().len(), 4);
        assert_eq!(net.params()[0].shape(), &[5, 4]);
        assert_eq!(net.params()[3].shape(), &[2]);
        assert_eq!(net.output(1).shape(), &[3, 5]);
        assert_eq!(net.output(4).shape(), &[1]);
        assert_eq!(net.layer_type(4), "EuclideanLoss");
    }

    #[test]
    fn test_same_seed_same_state_across_backends() {
        let a = SequentialNet::build(&mlp(), Backend::Reference).unwrap();
        let b = SequentialNet::build(&mlp(), Backend::Candle).unwrap();
        assert_eq!(a.params(), b.params());
        assert_eq!(a.input(0), b.input(0));
    }

    #[test]
    fn test_backends_agree_closely() {
        let mut a = SequentialNet::build(&mlp(), Backend::Reference).unwrap();
        let mut b = SequentialNet::build(&mlp(), Backend::Candle).unwrap();
        run(&mut a);
        run(&mut b);

        let loss_a = a.final_output().data()[0];
        let loss_b = b.final_output().data()[0];
        assert!((loss_a - loss_b).abs() <= 1e-5 * loss_a.abs().max(1.0));
        for (pa, pb) in a.params().iter().zip(b.params()) {
            for (x, y) in pa.grad().iter().zip(pb.grad()) {
                assert!((x - y).abs() < 1e-4, "{} vs {}", x, y);
            }
        }
    }

    #[test]
    fn test_first_layer_needs_grad_only_when_forced() {
        let mut config = mlp();
        let mut net = SequentialNet::build(&config, Backend::Reference).unwrap();
        assert!(!net.input_needs_grad(0));
        assert!(net.input_needs_grad(1));
        run(&mut net);
        assert!(net.input(0).grad().iter().all(|&g| g == 0.0));

        config.force_backward = true;
        let mut net = SequentialNet::build(&config, Backend::Reference).unwrap();
        run(&mut net);
        assert!(net.input(0).grad().iter().any(|&g| g != 0.0));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("cpu".parse::<Backend>().unwrap(), Backend::Reference);
        assert_eq!("Candle".parse::<Backend>().unwrap(), Backend::Candle);
        assert!("tpu".parse::<Backend>().is_err());
        assert_eq!(Backend::Candle.info_file_name(), "GPUInfo.txt");
    }
}
