//! Tensor kernels on candle
//!
//! Same math as the scalar kernels, evaluated by candle's CPU backend
//! (gemm for the matrix products, vectorised unary ops).

use anyhow::Result;
use candle_core::{DType, Device, Tensor};

fn tensor(data: &[f32], shape: &[usize]) -> Result<Tensor> {
    Ok(Tensor::from_slice(data, shape, &Device::Cpu)?)
}

fn values(t: &Tensor) -> Result<Vec<f32>> {
    Ok(t.flatten_all()?.to_vec1::<f32>()?)
}

fn accumulate(acc: &mut [f32], delta: &[f32]) {
    for (a, d) in acc.iter_mut().zip(delta) {
        *a += d;
    }
}

/// `y = x w^T + b`
pub fn linear_forward(x: &[f32], w: &[f32], b: Option<&[f32]>, rows: usize, k: usize, m: usize) -> Result<Vec<f32>> {
    let x = tensor(x, &[rows, k])?;
    let w = tensor(w, &[m, k])?;
    let y = x.matmul(&w.t()?)?;
    let y = match b {
        Some(b) => y.broadcast_add(&tensor(b, &[m])?)?,
        None => y,
    };
    values(&y)
}

/// Accumulate weight and bias gradients; return the input gradient if requested
#[allow(clippy::too_many_arguments)]
pub fn linear_backward(
    x: &[f32],
    w: &[f32],
    dy: &[f32],
    dw: &mut [f32],
    db: Option<&mut [f32]>,
    rows: usize,
    k: usize,
    m: usize,
    propagate_down: bool,
) -> Result<Option<Vec<f32>>> {
    let x = tensor(x, &[rows, k])?;
    let dy = tensor(dy, &[rows, m])?;

    // (m, rows) x (rows, k)
    let grad_w = dy.t()?.matmul(&x)?;
    accumulate(dw, &values(&grad_w)?);
    if let Some(db) = db {
        accumulate(db, &values(&dy.sum(0)?)?);
    }
    if !propagate_down {
        return Ok(None);
    }

    let w = tensor(w, &[m, k])?;
    Ok(Some(values(&dy.matmul(&w)?)?))
}

/// Elementwise `max(x, 0)`
pub fn relu_forward(x: &[f32]) -> Result<Vec<f32>> {
    values(&tensor(x, &[x.len()])?.relu()?)
}

/// Gradient of relu given the layer input
pub fn relu_backward(x: &[f32], dy: &[f32]) -> Result<Vec<f32>> {
    let mask = tensor(x, &[x.len()])?.gt(0f32)?.to_dtype(DType::F32)?;
    values(&tensor(dy, &[dy.len()])?.mul(&mask)?)
}

/// Elementwise logistic function
pub fn sigmoid_forward(x: &[f32]) -> Result<Vec<f32>> {
    values(&candle_nn::ops::sigmoid(&tensor(x, &[x.len()])?)?)
}

/// Gradient of sigmoid given the layer output
pub fn sigmoid_backward(y: &[f32], dy: &[f32]) -> Result<Vec<f32>> {
    let y = tensor(y, &[y.len()])?;
    let one_minus = y.affine(-1.0, 1.0)?;
    values(&tensor(dy, &[dy.len()])?.mul(&y)?.mul(&one_minus)?)
}

/// Elementwise hyperbolic tangent
pub fn tanh_forward(x: &[f32]) -> Result<Vec<f32>> {
    values(&tensor(x, &[x.len()])?.tanh()?)
}

/// Gradient of tanh given the layer output
pub fn tanh_backward(y: &[f32], dy: &[f32]) -> Result<Vec<f32>> {
    let y = tensor(y, &[y.len()])?;
    let one_minus_sq = y.sqr()?.affine(-1.0, 1.0)?;
    values(&tensor(dy, &[dy.len()])?.mul(&one_minus_sq)?)
}

/// `sum((x - t)^2) / (2 * rows)`
pub fn euclidean_loss_forward(x: &[f32], target: &[f32], rows: usize) -> Result<f32> {
    let diff = tensor(x, &[x.len()])?.sub(&tensor(target, &[target.len()])?)?;
    let sum = diff.sqr()?.sum_all()?.to_scalar::<f32>()?;
    Ok(sum / (2 * rows) as f32)
}

/// `loss_weight * (x - t) / rows`
pub fn euclidean_loss_backward(x: &[f32], target: &[f32], rows: usize, loss_weight: f32) -> Result<Vec<f32>> {
    let diff = tensor(x, &[x.len()])?.sub(&tensor(target, &[target.len()])?)?;
    let scale = (loss_weight / rows as f32) as f64;
    values(&diff.affine(scale, 0.0)?)
}
