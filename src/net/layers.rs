//! Layer implementations
//!
//! Each layer reads its first input, writes its first output and owns a
//! contiguous slice of the network's parameter list. The backend decides
//! which kernel set evaluates the math.

use anyhow::Result;

use super::{accelerated, reference, Backend};
use crate::graph::Blob;

/// One step of a sequential network
pub trait Layer: Send {
    /// Type label recorded in capture info files
    fn layer_type(&self) -> &'static str;

    /// Output shape for a given input shape
    fn output_shape(&self, input: &[usize]) -> Vec<usize>;

    /// Compute `top` from `bottom`
    fn forward(&self, bottom: &Blob, top: &mut Blob, params: &[Blob]) -> Result<()>;

    /// Accumulate parameter gradients and, if `propagate_down`, write the
    /// input gradient into `bottom`
    fn backward(&self, top: &Blob, propagate_down: bool, bottom: &mut Blob, params: &mut [Blob]) -> Result<()>;
}

fn rows_and_features(shape: &[usize]) -> (usize, usize) {
    let rows = shape.first().copied().unwrap_or(1);
    let features = shape.iter().skip(1).product();
    (rows, features)
}

/// Fully connected layer; params are `[weight (out, in), bias (out)?]`
pub struct Linear {
    in_features: usize,
    out_features: usize,
    bias: bool,
    backend: Backend,
}

impl Linear {
    /// Create a linear layer
    pub fn new(in_features: usize, out_features: usize, bias: bool, backend: Backend) -> Self {
        Self { in_features, out_features, bias, backend }
    }

    /// Parameter shapes in order
    pub fn param_shapes(&self) -> Vec<Vec<usize>> {
        let mut shapes = vec![vec![self.out_features, self.in_features]];
        if self.bias {
            shapes.push(vec![self.out_features]);
        }
        shapes
    }
}

impl Layer for Linear {
    fn layer_type(&self) -> &'static str {
        "Linear"
    }

    fn output_shape(&self, input: &[usize]) -> Vec<usize> {
        let (rows, _) = rows_and_features(input);
        vec![rows, self.out_features]
    }

    fn forward(&self, bottom: &Blob, top: &mut Blob, params: &[Blob]) -> Result<()> {
        let (rows, k) = rows_and_features(bottom.shape());
        if k != self.in_features {
            anyhow::bail!("Linear expects {} input features, got {}", self.in_features, k);
        }
        let w = params[0].data();
        let b = if self.bias { Some(params[1].data()) } else { None };

        let y = match self.backend {
            Backend::Reference => reference::linear_forward(bottom.data(), w, b, rows, k, self.out_features),
            Backend::Candle => accelerated::linear_forward(bottom.data(), w, b, rows, k, self.out_features)?,
        };
        top.set_data(&y)
    }

    fn backward(&self, top: &Blob, propagate_down: bool, bottom: &mut Blob, params: &mut [Blob]) -> Result<()> {
        let (rows, k) = rows_and_features(bottom.shape());
        let m = self.out_features;

        let (weight, rest) = params.split_at_mut(1);
        let weight = &mut weight[0];
        let w = weight.data().to_vec();
        let db = if self.bias { Some(rest[0].grad_mut()) } else { None };

        let dx = match self.backend {
            Backend::Reference => reference::linear_backward(
                bottom.data(), &w, top.grad(), weight.grad_mut(), db, rows, k, m, propagate_down,
            ),
            Backend::Candle => accelerated::linear_backward(
                bottom.data(), &w, top.grad(), weight.grad_mut(), db, rows, k, m, propagate_down,
            )?,
        };
        match dx {
            Some(dx) => bottom.set_grad(&dx),
            None => Ok(()),
        }
    }
}

/// Elementwise activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    /// `max(x, 0)`
    Relu,
    /// `1 / (1 + e^-x)`
    Sigmoid,
    /// `tanh(x)`
    Tanh,
}

/// Parameter-free elementwise layer
pub struct Activation {
    kind: ActivationKind,
    backend: Backend,
}

impl Activation {
    /// Create an activation layer
    pub fn new(kind: ActivationKind, backend: Backend) -> Self {
        Self { kind, backend }
    }
}

impl Layer for Activation {
    fn layer_type(&self) -> &'static str {
        match self.kind {
            ActivationKind::Relu => "ReLU",
            ActivationKind::Sigmoid => "Sigmoid",
            ActivationKind::Tanh => "TanH",
        }
    }

    fn output_shape(&self, input: &[usize]) -> Vec<usize> {
        input.to_vec()
    }

    fn forward(&self, bottom: &Blob, top: &mut Blob, _params: &[Blob]) -> Result<()> {
        let x = bottom.data();
        let y = match (self.backend, self.kind) {
            (Backend::Reference, ActivationKind::Relu) => reference::relu_forward(x),
            (Backend::Reference, ActivationKind::Sigmoid) => reference::sigmoid_forward(x),
            (Backend::Reference, ActivationKind::Tanh) => reference::tanh_forward(x),
            (Backend::Candle, ActivationKind::Relu) => accelerated::relu_forward(x)?,
            (Backend::Candle, ActivationKind::Sigmoid) => accelerated::sigmoid_forward(x)?,
            (Backend::Candle, ActivationKind::Tanh) => accelerated::tanh_forward(x)?,
        };
        top.set_data(&y)
    }

    fn backward(&self, top: &Blob, propagate_down: bool, bottom: &mut Blob, _params: &mut [Blob]) -> Result<()> {
        if !propagate_down {
            return Ok(());
        }
        let dy = top.grad();
        // relu differentiates through its input, the others through their output
        let dx = match (self.backend, self.kind) {
            (Backend::Reference, ActivationKind::Relu) => reference::relu_backward(bottom.data(), dy),
            (Backend::Reference, ActivationKind::Sigmoid) => reference::sigmoid_backward(top.data(), dy),
            (Backend::Reference, ActivationKind::Tanh) => reference::tanh_backward(top.data(), dy),
            (Backend::Candle, ActivationKind::Relu) => accelerated::relu_backward(bottom.data(), dy)?,
            (Backend::Candle, ActivationKind::Sigmoid) => accelerated::sigmoid_backward(top.data(), dy)?,
            (Backend::Candle, ActivationKind::Tanh) => accelerated::tanh_backward(top.data(), dy)?,
        };
        bottom.set_grad(&dx)
    }
}

/// Half mean squared error against a fixed target; output is one scalar
pub struct EuclideanLoss {
    target: Vec<f32>,
    backend: Backend,
}

impl EuclideanLoss {
    /// Create a loss layer with its target values
    pub fn new(target: Vec<f32>, backend: Backend) -> Self {
        Self { target, backend }
    }
}

impl Layer for EuclideanLoss {
    fn layer_type(&self) -> &'static str {
        "EuclideanLoss"
    }

    fn output_shape(&self, _input: &[usize]) -> Vec<usize> {
        vec![1]
    }

    fn forward(&self, bottom: &Blob, top: &mut Blob, _params: &[Blob]) -> Result<()> {
        if bottom.count() != self.target.len() {
            anyhow::bail!("Loss target has {} values, input has {}", self.target.len(), bottom.count());
        }
        let (rows, _) = rows_and_features(bottom.shape());
        let loss = match self.backend {
            Backend::Reference => reference::euclidean_loss_forward(bottom.data(), &self.target, rows),
            Backend::Candle => accelerated::euclidean_loss_forward(bottom.data(), &self.target, rows)?,
        };
        top.set_data(&[loss])
    }

    fn backward(&self, top: &Blob, propagate_down: bool, bottom: &mut Blob, _params: &mut [Blob]) -> Result<()> {
        if !propagate_down {
            return Ok(());
        }
        let (rows, _) = rows_and_features(bottom.shape());
        let loss_weight = top.grad().first().copied().unwrap_or(1.0);
        let dx = match self.backend {
            Backend::Reference => {
                reference::euclidean_loss_backward(bottom.data(), &self.target, rows, loss_weight)
            }
            Backend::Candle => {
                accelerated::euclidean_loss_backward(bottom.data(), &self.target, rows, loss_weight)?
            }
        };
        bottom.set_grad(&dx)
    }
}
