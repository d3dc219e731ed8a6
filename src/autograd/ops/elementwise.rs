//! Elementwise kernels

use crate::autograd::backward::BackwardStep;
use crate::autograd::{Activation, Graph, Shape, Tensor};
use crate::error::{Error, Result};
use ndarray::Array1;
use rand::Rng;
use std::rc::Rc;

impl Graph {
    /// Add two tensors
    pub fn add(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let shape = a.shape();
        shape.expect_eq(&b.shape())?;
        let inference_only = self.output_mode(&[a, b])?;

        let data = &*a.data() + &*b.data();
        let out = Tensor::output(data, shape, inference_only);

        self.record(|| BackwardStep::Add {
            a: a.clone(),
            b: b.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Add three tensors
    pub fn add3(&mut self, a: &Tensor, b: &Tensor, c: &Tensor) -> Result<Tensor> {
        let shape = a.shape();
        shape.expect_eq(&b.shape())?;
        shape.expect_eq(&c.shape())?;
        let inference_only = self.output_mode(&[a, b, c])?;

        let data = &*a.data() + &*b.data() + &*c.data();
        let out = Tensor::output(data, shape, inference_only);

        self.record(|| BackwardStep::Add3 {
            a: a.clone(),
            b: b.clone(),
            c: c.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Subtract `b` from `a`
    pub fn subtract(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let shape = a.shape();
        shape.expect_eq(&b.shape())?;
        let inference_only = self.output_mode(&[a, b])?;

        let data = &*a.data() - &*b.data();
        let out = Tensor::output(data, shape, inference_only);

        self.record(|| BackwardStep::Subtract {
            a: a.clone(),
            b: b.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Multiply two tensors element-wise
    pub fn hadamard(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let shape = a.shape();
        shape.expect_eq(&b.shape())?;
        let inference_only = self.output_mode(&[a, b])?;

        let data = &*a.data() * &*b.data();
        let out = Tensor::output(data, shape, inference_only);

        self.record(|| BackwardStep::Hadamard {
            a: a.clone(),
            b: b.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// `1 - a`
    pub fn one_minus(&mut self, a: &Tensor) -> Result<Tensor> {
        let inference_only = self.output_mode(&[a])?;
        let data = a.data().mapv(|x| 1.0 - x);
        let out = Tensor::output(data, a.shape(), inference_only);

        self.record(|| BackwardStep::OneMinus {
            a: a.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// `-a`
    pub fn negate(&mut self, a: &Tensor) -> Result<Tensor> {
        let inference_only = self.output_mode(&[a])?;
        let data = a.data().mapv(|x| -x);
        let out = Tensor::output(data, a.shape(), inference_only);

        self.record(|| BackwardStep::Negate {
            a: a.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Scale tensor by a scalar fixed at call time
    pub fn scale(&mut self, a: &Tensor, factor: f32) -> Result<Tensor> {
        let inference_only = self.output_mode(&[a])?;
        let data = &*a.data() * factor;
        let out = Tensor::output(data, a.shape(), inference_only);

        self.record(|| BackwardStep::Scale {
            a: a.clone(),
            factor,
            out: out.clone(),
        });
        Ok(out)
    }

    /// Scale tensor by a one-element tensor; both operands receive gradient
    pub fn scale_by(&mut self, a: &Tensor, s: &Tensor) -> Result<Tensor> {
        if s.len() != 1 {
            return Err(Error::ShapeMismatch {
                expected: Shape::scalar().dims(),
                got: s.shape().dims(),
            });
        }
        let inference_only = self.output_mode(&[a, s])?;
        let factor = s.data()[0];
        let data = &*a.data() * factor;
        let out = Tensor::output(data, a.shape(), inference_only);

        self.record(|| BackwardStep::ScaleBy {
            a: a.clone(),
            s: s.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Apply an activation function
    pub fn activate(&mut self, function: Rc<dyn Activation>, a: &Tensor) -> Result<Tensor> {
        let inference_only = self.output_mode(&[a])?;
        let data = function.forward(a.data().view());
        if data.len() != a.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![data.len()],
            });
        }
        let out = Tensor::output(data, a.shape(), inference_only);

        self.record(|| BackwardStep::Activate {
            function,
            a: a.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Sum all elements
    pub fn sum(&mut self, a: &Tensor) -> Result<Tensor> {
        let inference_only = self.output_mode(&[a])?;
        let data = Array1::from(vec![a.data().sum()]);
        let out = Tensor::output(data, Shape::scalar(), inference_only);

        self.record(|| BackwardStep::Sum {
            a: a.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Softmax over the flat buffer
    pub fn softmax(&mut self, a: &Tensor) -> Result<Tensor> {
        let inference_only = self.output_mode(&[a])?;
        let data = {
            let values = a.data();
            let max_val = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let exp_vals = values.mapv(|x| (x - max_val).exp());
            let sum_exp = exp_vals.sum();
            exp_vals / sum_exp
        };
        let out = Tensor::output(data, a.shape(), inference_only);

        self.record(|| BackwardStep::Softmax {
            a: a.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Bernoulli dropout
    ///
    /// Each element survives with probability `keep_prob` and is multiplied
    /// by `scale`; dropped elements become zero. The mask is drawn fresh on
    /// every call.
    pub fn dropout<R: Rng + ?Sized>(
        &mut self,
        a: &Tensor,
        keep_prob: f32,
        scale: f32,
        rng: &mut R,
    ) -> Result<Tensor> {
        if !(keep_prob > 0.0 && keep_prob <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "dropout keep probability must be in (0, 1], got {keep_prob}"
            )));
        }
        let inference_only = self.output_mode(&[a])?;

        let mask: Array1<f32> = (0..a.len())
            .map(|_| if rng.random::<f32>() < keep_prob { scale } else { 0.0 })
            .collect();
        let data = &*a.data() * &mask;
        let out = Tensor::output(data, a.shape(), inference_only);

        self.record(|| BackwardStep::Dropout {
            a: a.clone(),
            mask,
            out: out.clone(),
        });
        Ok(out)
    }
}

pub(crate) fn add_backward(a: &Tensor, b: &Tensor, out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    a.accumulate_grad(grad.view())?;
    b.accumulate_grad(grad.view())
}

pub(crate) fn add3_backward(a: &Tensor, b: &Tensor, c: &Tensor, out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    a.accumulate_grad(grad.view())?;
    b.accumulate_grad(grad.view())?;
    c.accumulate_grad(grad.view())
}

pub(crate) fn subtract_backward(a: &Tensor, b: &Tensor, out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    a.accumulate_grad(grad.view())?;
    b.accumulate_grad(grad.mapv(|g| -g).view())
}

pub(crate) fn hadamard_backward(a: &Tensor, b: &Tensor, out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    // ∂L/∂a = ∂L/∂out * b, ∂L/∂b = ∂L/∂out * a
    let grad_a = &*grad * &*b.data();
    let grad_b = &*grad * &*a.data();
    a.accumulate_grad(grad_a.view())?;
    b.accumulate_grad(grad_b.view())
}

/// Shared by `negate` and `one_minus`: both have derivative -1
pub(crate) fn negate_backward(a: &Tensor, out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    a.accumulate_grad(grad.mapv(|g| -g).view())
}

pub(crate) fn scale_backward(a: &Tensor, factor: f32, out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    a.accumulate_grad((&*grad * factor).view())
}

pub(crate) fn scale_by_backward(a: &Tensor, s: &Tensor, out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    let factor = s.data()[0];
    let grad_s = (&*grad * &*a.data()).sum();
    a.accumulate_grad((&*grad * factor).view())?;
    s.accumulate_grad(ndarray::aview1(&[grad_s]))
}

pub(crate) fn activate_backward(function: &dyn Activation, a: &Tensor, out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    let local = function.backward(a.data().view());
    a.accumulate_grad((local * &*grad).view())
}

pub(crate) fn sum_backward(a: &Tensor, out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    // ∂L/∂a = ∂L/∂sum * 1 (broadcast)
    let grad_a = Array1::from_elem(a.len(), grad[0]);
    a.accumulate_grad(grad_a.view())
}

pub(crate) fn softmax_backward(a: &Tensor, out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    // ∂L/∂x = y ⊙ (∂L/∂y - (y · ∂L/∂y))
    let grad_a = {
        let y = out.data();
        let dot = (&*y * &*grad).sum();
        &*y * &grad.mapv(|g| g - dot)
    };
    a.accumulate_grad(grad_a.view())
}

pub(crate) fn dropout_backward(a: &Tensor, mask: &Array1<f32>, out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    a.accumulate_grad((mask * &*grad).view())
}
