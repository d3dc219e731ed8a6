//! Matrix kernels
//!
//! Matrices are `(rows, cols, 1)` tensors stored row-major; vectors are
//! `(n, 1, 1)` columns.

use crate::autograd::backward::BackwardStep;
use crate::autograd::{Graph, Shape, Tensor};
use crate::error::{Error, Result};
use ndarray::Array1;

fn expect_matrix(t: &Tensor) -> Result<(usize, usize)> {
    let shape = t.shape();
    if shape.depth != 1 {
        return Err(Error::ShapeMismatch {
            expected: vec![shape.height, shape.width, 1],
            got: shape.dims(),
        });
    }
    Ok((shape.height, shape.width))
}

impl Graph {
    /// Dot product of two equally sized tensors, as a one-element tensor
    pub fn scalar_product(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        if a.len() != b.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        let inference_only = self.output_mode(&[a, b])?;

        let dot = a.data().dot(&*b.data());
        let out = Tensor::output(Array1::from(vec![dot]), Shape::scalar(), inference_only);

        self.record(|| BackwardStep::ScalarProduct {
            a: a.clone(),
            b: b.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Matrix multiplication
    ///
    /// Computes C = A @ B where A is m×k, B is k×n and C is m×n.
    pub fn matmul(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let (m, k) = expect_matrix(a)?;
        let (k_b, n) = expect_matrix(b)?;
        if k != k_b {
            return Err(Error::ShapeMismatch {
                expected: vec![k, n, 1],
                got: b.shape().dims(),
            });
        }
        let inference_only = self.output_mode(&[a, b])?;

        let mut result = vec![0.0; m * n];
        {
            let a_data = a.data();
            let b_data = b.data();
            for i in 0..m {
                for j in 0..n {
                    let mut sum = 0.0;
                    for p in 0..k {
                        sum += a_data[i * k + p] * b_data[p * n + j];
                    }
                    result[i * n + j] = sum;
                }
            }
        }
        let out = Tensor::output(Array1::from(result), Shape::matrix(m, n), inference_only);

        self.record(|| BackwardStep::Matmul {
            a: a.clone(),
            b: b.clone(),
            out: out.clone(),
            m,
            k,
            n,
        });
        Ok(out)
    }

    /// Matrix × column vector
    pub fn mat_vec(&mut self, matrix: &Tensor, vector: &Tensor) -> Result<Tensor> {
        let (rows, cols) = expect_matrix(matrix)?;
        let v_shape = vector.shape();
        if !v_shape.is_column() || v_shape.height != cols {
            return Err(Error::ShapeMismatch {
                expected: Shape::column(cols).dims(),
                got: v_shape.dims(),
            });
        }
        let inference_only = self.output_mode(&[matrix, vector])?;

        let mut result = vec![0.0; rows];
        {
            let m_data = matrix.data();
            let v_data = vector.data();
            for (i, slot) in result.iter_mut().enumerate() {
                let mut sum = 0.0;
                for p in 0..cols {
                    sum += m_data[i * cols + p] * v_data[p];
                }
                *slot = sum;
            }
        }
        let out = Tensor::output(Array1::from(result), Shape::column(rows), inference_only);

        self.record(|| BackwardStep::MatVec {
            matrix: matrix.clone(),
            vector: vector.clone(),
            out: out.clone(),
        });
        Ok(out)
    }
}

pub(crate) fn scalar_product_backward(a: &Tensor, b: &Tensor, out: &Tensor) -> Result<()> {
    let g = out.grad()?[0];
    let grad_a = &*b.data() * g;
    let grad_b = &*a.data() * g;
    a.accumulate_grad(grad_a.view())?;
    b.accumulate_grad(grad_b.view())
}

pub(crate) fn matmul_backward(a: &Tensor, b: &Tensor, out: &Tensor, m: usize, k: usize, n: usize) -> Result<()> {
    let grad_output = out.grad()?;

    // ∂L/∂A = ∂L/∂C @ B^T
    // grad_A[i,p] = sum_j grad_C[i,j] * B[p,j]
    let mut grad_a = vec![0.0; m * k];
    {
        let b_data = b.data();
        for i in 0..m {
            for p in 0..k {
                let mut sum = 0.0;
                for j in 0..n {
                    sum += grad_output[i * n + j] * b_data[p * n + j];
                }
                grad_a[i * k + p] = sum;
            }
        }
    }

    // ∂L/∂B = A^T @ ∂L/∂C
    // grad_B[p,j] = sum_i A[i,p] * grad_C[i,j]
    let mut grad_b = vec![0.0; k * n];
    {
        let a_data = a.data();
        for p in 0..k {
            for j in 0..n {
                let mut sum = 0.0;
                for i in 0..m {
                    sum += a_data[i * k + p] * grad_output[i * n + j];
                }
                grad_b[p * n + j] = sum;
            }
        }
    }

    a.accumulate_grad(Array1::from(grad_a).view())?;
    b.accumulate_grad(Array1::from(grad_b).view())
}

pub(crate) fn mat_vec_backward(matrix: &Tensor, vector: &Tensor, out: &Tensor) -> Result<()> {
    let grad_output = out.grad()?;
    let cols = vector.len();
    let rows = grad_output.len();

    // ∂L/∂M = ∂L/∂out ⊗ v, ∂L/∂v = Mᵗ @ ∂L/∂out
    let mut grad_m = vec![0.0; rows * cols];
    let mut grad_v = vec![0.0; cols];
    {
        let m_data = matrix.data();
        let v_data = vector.data();
        for i in 0..rows {
            let g = grad_output[i];
            for p in 0..cols {
                grad_m[i * cols + p] = g * v_data[p];
                grad_v[p] += m_data[i * cols + p] * g;
            }
        }
    }

    matrix.accumulate_grad(Array1::from(grad_m).view())?;
    vector.accumulate_grad(Array1::from(grad_v).view())
}
