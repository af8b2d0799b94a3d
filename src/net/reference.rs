//! Scalar loop kernels
//!
//! Straightforward row-major loops; this is the trusted baseline the
//! tensor backend is checked against. Parameter gradients accumulate.

/// `y[n, m] = x[n, k] * w[m, k]^T + b[m]`
pub fn linear_forward(x: &[f32], w: &[f32], b: Option<&[f32]>, rows: usize, k: usize, m: usize) -> Vec<f32> {
    let mut y = vec![0.0f32; rows * m];
    for i in 0..rows {
        let xi = &x[i * k..(i + 1) * k];
        for j in 0..m {
            let wj = &w[j * k..(j + 1) * k];
            let mut acc = b.map(|b| b[j]).unwrap_or(0.0);
            for (xv, wv) in xi.iter().zip(wj) {
                acc += xv * wv;
            }
            y[i * m + j] = acc;
        }
    }
    y
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
) -> Option<Vec<f32>> {
    for j in 0..m {
        for i in 0..rows {
            let g = dy[i * m + j];
            let xi = &x[i * k..(i + 1) * k];
            for (d, xv) in dw[j * k..(j + 1) * k].iter_mut().zip(xi) {
                *d += g * xv;
            }
        }
    }
    if let Some(db) = db {
        for i in 0..rows {
            for j in 0..m {
                db[j] += dy[i * m + j];
            }
        }
    }
    if !propagate_down {
        return None;
    }

    let mut dx = vec![0.0f32; rows * k];
    for i in 0..rows {
        for j in 0..m {
            let g = dy[i * m + j];
            for (d, wv) in dx[i * k..(i + 1) * k].iter_mut().zip(&w[j * k..(j + 1) * k]) {
                *d += g * wv;
            }
        }
    }
    Some(dx)
}

/// Elementwise `max(x, 0)`
pub fn relu_forward(x: &[f32]) -> Vec<f32> {
    x.iter().map(|&v| v.max(0.0)).collect()
}

/// Gradient of relu given the layer input
pub fn relu_backward(x: &[f32], dy: &[f32]) -> Vec<f32> {
    x.iter()
        .zip(dy)
        .map(|(&v, &g)| if v > 0.0 { g } else { 0.0 })
        .collect()
}

/// Elementwise logistic function
pub fn sigmoid_forward(x: &[f32]) -> Vec<f32> {
    x.iter().map(|&v| 1.0 / (1.0 + (-v).exp())).collect()
}

/// Gradient of sigmoid given the layer output
pub fn sigmoid_backward(y: &[f32], dy: &[f32]) -> Vec<f32> {
    y.iter().zip(dy).map(|(&s, &g)| g * s * (1.0 - s)).collect()
}

/// Elementwise hyperbolic tangent
pub fn tanh_forward(x: &[f32]) -> Vec<f32> {
    x.iter().map(|&v| v.tanh()).collect()
}

/// Gradient of tanh given the layer output
pub fn tanh_backward(y: &[f32], dy: &[f32]) -> Vec<f32> {
    y.iter().zip(dy).map(|(&t, &g)| g * (1.0 - t * t)).collect()
}

/// `sum((x - t)^2) / (2 * rows)`
pub fn euclidean_loss_forward(x: &[f32], target: &[f32], rows: usize) -> f32 {
    let sum: f32 = x.iter().zip(target).map(|(a, b)| (a - b) * (a - b)).sum();
    sum / (2 * rows) as f32
}

/// `loss_weight * (x - t) / rows`
pub fn euclidean_loss_backward(x: &[f32], target: &[f32], rows: usize, loss_weight: f32) -> Vec<f32> {
    let scale = loss_weight / rows as f32;
    x.iter().zip(target).map(|(a, b)| scale * (a - b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_forward() {
        // x: 2x3, w: 2x3, b: 2
        let x = [1.0, 2.0, 3.0, -1.0, 0.0, 1.0];
        let w = [0.5, 0.0, -1.0, 1.0, 1.0, 1.0];
        let b = [0.1, -0.2];
        let y = linear_forward(&x, &w, Some(&b), 2, 3, 2);
        assert_relative_eq!(y[0], 0.5 - 3.0 + 0.1);
        assert_relative_eq!(y[1], 6.0 - 0.2);
        assert_relative_eq!(y[2], -0.5 - 1.0 + 0.1);
        assert_relative_eq!(y[3], 0.0 - 0.2);
    }

    #[test]
    fn test_linear_backward_accumulates() {
        let x = [1.0, 2.0];
        let w = [3.0, 4.0];
        let dy = [0.5];
        let mut dw = [1.0, 1.0];
        let mut db = [0.0];
        let dx = linear_backward(&x, &w, &dy, &mut dw, Some(&mut db), 1, 2, 1, true).unwrap();
        assert_eq!(dw, [1.5, 2.0]);
        assert_eq!(db, [0.5]);
        assert_eq!(dx, vec![1.5, 2.0]);

        let none = linear_backward(&x, &w, &dy, &mut dw, None, 1, 2, 1, false);
        assert!(none.is_none());
        assert_eq!(dw, [2.0, 3.0]);
    }

    #[test]
    fn test_activations() {
        assert_eq!(relu_forward(&[-1.0, 0.0, 2.0]), vec![0.0, 0.0, 2.0]);
        assert_eq!(relu_backward(&[-1.0, 0.0, 2.0], &[1.0, 1.0, 1.0]), vec![0.0, 0.0, 1.0]);
        assert_relative_eq!(sigmoid_forward(&[0.0])[0], 0.5);
        assert_relative_eq!(sigmoid_backward(&[0.5], &[1.0])[0], 0.25);
        assert_relative_eq!(tanh_forward(&[0.0])[0], 0.0);
        assert_relative_eq!(tanh_backward(&[0.0], &[2.0])[0], 2.0);
    }

    #[test]
    fn test_euclidean_loss() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let t = [0.0, 2.0, 3.0, 2.0];
        assert_relative_eq!(euclidean_loss_forward(&x, &t, 2), (1.0 + 4.0) / 4.0);
        assert_eq!(euclidean_loss_backward(&x, &t, 2, 1.0), vec![0.5, 0.0, 0.0, 1.0]);
    }
}
