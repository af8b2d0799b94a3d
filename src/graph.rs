//! Computation graph interface consumed by the capture driver
//!
//! The driver never builds or owns layers. It only steps them in order and
//! reads or overwrites the tensors around each step.

use anyhow::Result;

/// A tensor with value and gradient storage of equal length
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    shape: Vec<usize>,
    data: Vec<f32>,
    grad: Vec<f32>,
}

impl Blob {
    /// Zero-filled blob of the given shape
    pub fn zeros(shape: &[usize]) -> Self {
        let count = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; count],
            grad: vec![0.0; count],
        }
    }

    /// Blob holding `data` with a zero gradient
    pub fn from_data(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        let count: usize = shape.iter().product();
        if data.len() != count {
            anyhow::bail!("Blob shape {:?} needs {} values, got {}", shape, count, data.len());
        }
        Ok(Self {
            shape: shape.to_vec(),
            grad: vec![0.0; count],
            data,
        })
    }

    /// Logical element count
    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// Dimensions
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Values
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Gradient
    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Mutable gradient
    pub fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.grad
    }

    /// Replace the values; the length must match
    pub fn set_data(&mut self, values: &[f32]) -> Result<()> {
        if values.len() != self.data.len() {
            anyhow::bail!("Expected {} values, got {}", self.data.len(), values.len());
        }
        self.data.copy_from_slice(values);
        Ok(())
    }

    /// Replace the gradient; the length must match
    pub fn set_grad(&mut self, values: &[f32]) -> Result<()> {
        if values.len() != self.grad.len() {
            anyhow::bail!("Expected {} gradient values, got {}", self.grad.len(), values.len());
        }
        self.grad.copy_from_slice(values);
        Ok(())
    }
}

/// Layer-wise view of a network
///
/// Layers are addressed by their position in graph order, parameters by
/// their position in the flattened parameter list. Only the first input and
/// first output of a layer are exposed.
pub trait ComputeGraph {
    /// Number of layers
    fn num_layers(&self) -> usize;

    /// Type label of a layer, e.g. `Linear`
    fn layer_type(&self, layer: usize) -> &str;

    /// Run one layer's forward step
    fn forward_layer(&mut self, layer: usize) -> Result<()>;

    /// Run one layer's backward step
    fn backward_layer(&mut self, layer: usize) -> Result<()>;

    /// First output of a layer
    fn output(&self, layer: usize) -> &Blob;

    /// Mutable first output of a layer
    fn output_mut(&mut self, layer: usize) -> &mut Blob;

    /// First input of a layer
    fn input(&self, layer: usize) -> &Blob;

    /// Mutable first input of a layer
    fn input_mut(&mut self, layer: usize) -> &mut Blob;

    /// Whether the backward step produces a gradient for the first input
    fn input_needs_grad(&self, layer: usize) -> bool;

    /// Trainable parameters in graph order
    fn params(&self) -> &[Blob];

    /// Mutable trainable parameters
    fn params_mut(&mut self) -> &mut [Blob];

    /// Zero every parameter gradient accumulator
    fn zero_param_grads(&mut self) {
        for param in self.params_mut() {
            param.grad_mut().fill(0.0);
        }
    }
}
