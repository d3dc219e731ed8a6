//! Recurrent building blocks composed from primitive kernels
//!
//! Nothing here records its own backward step: the gradient of a GRU cell
//! is the composition of the steps its primitives record.

use crate::autograd::activation::{Sigmoid, Tanh};
use crate::autograd::{Activation, Graph, Shape, Tensor};
use crate::error::Result;
use rand::Rng;
use std::rc::Rc;

/// Parameters of a GRU cell
///
/// `w_*` are `(hidden, input)` matrices, `u_*` are `(hidden, hidden)` and
/// `b_*` are `(hidden, 1, 1)` columns. `z` is the update gate, `r` the reset
/// gate and `h` the candidate state.
#[derive(Clone, Debug)]
pub struct GruWeights {
    pub w_z: Tensor,
    pub u_z: Tensor,
    pub b_z: Tensor,
    pub w_r: Tensor,
    pub u_r: Tensor,
    pub b_r: Tensor,
    pub w_h: Tensor,
    pub u_h: Tensor,
    pub b_h: Tensor,
}

impl GruWeights {
    /// All-zero parameters
    pub fn zeros(input_size: usize, hidden_size: usize) -> Self {
        let w = || Tensor::zeros(Shape::matrix(hidden_size, input_size));
        let u = || Tensor::zeros(Shape::matrix(hidden_size, hidden_size));
        let b = || Tensor::zeros(Shape::column(hidden_size));
        Self {
            w_z: w(),
            u_z: u(),
            b_z: b(),
            w_r: w(),
            u_r: u(),
            b_r: b(),
            w_h: w(),
            u_h: u(),
            b_h: b(),
        }
    }

    /// Parameters drawn uniformly from `[-scale, scale)`
    pub fn random<R: Rng + ?Sized>(input_size: usize, hidden_size: usize, scale: f32, rng: &mut R) -> Self {
        let weights = Self::zeros(input_size, hidden_size);
        if scale <= 0.0 {
            return weights;
        }
        for p in weights.parameters() {
            p.data_mut().mapv_inplace(|_| rng.random_range(-scale..scale));
        }
        weights
    }

    pub fn input_size(&self) -> usize {
        self.w_z.shape().width
    }

    pub fn hidden_size(&self) -> usize {
        self.w_z.shape().height
    }

    /// Check that every parameter agrees with `w_z` on input and hidden size
    pub fn validate(&self) -> Result<()> {
        let (input, hidden) = (self.input_size(), self.hidden_size());
        for w in [&self.w_z, &self.w_r, &self.w_h] {
            Shape::matrix(hidden, input).expect_eq(&w.shape())?;
        }
        for u in [&self.u_z, &self.u_r, &self.u_h] {
            Shape::matrix(hidden, hidden).expect_eq(&u.shape())?;
        }
        for b in [&self.b_z, &self.b_r, &self.b_h] {
            Shape::column(hidden).expect_eq(&b.shape())?;
        }
        Ok(())
    }

    /// Every trainable tensor, for optimizers and gradient resets
    pub fn parameters(&self) -> [&Tensor; 9] {
        [
            &self.w_z, &self.u_z, &self.b_z, &self.w_r, &self.u_r, &self.b_r, &self.w_h, &self.u_h, &self.b_h,
        ]
    }
}

impl Graph {
    /// One GRU step: blend the previous state `h` with a candidate state
    ///
    /// ```text
    /// z  = σ(W_z x + U_z h + b_z)
    /// r  = σ(W_r x + U_r h + b_r)
    /// h̃  = tanh(W_h x + U_h (r ⊙ h) + b_h)
    /// h' = (1 - z) ⊙ h + z ⊙ h̃
    /// ```
    ///
    /// Every operand shape is checked before the first gate runs, so a
    /// rejected call records nothing.
    pub fn gru_cell(&mut self, x: &Tensor, weights: &GruWeights, h: &Tensor) -> Result<Tensor> {
        weights.validate()?;
        Shape::column(weights.input_size()).expect_eq(&x.shape())?;
        Shape::column(weights.hidden_size()).expect_eq(&h.shape())?;
        let mut operands = vec![x, h];
        operands.extend(weights.parameters());
        self.output_mode(&operands)?;

        let sigmoid: Rc<dyn Activation> = Rc::new(Sigmoid);
        let tanh: Rc<dyn Activation> = Rc::new(Tanh);

        let z = self.gate(x, &weights.w_z, h, &weights.u_z, &weights.b_z, sigmoid.clone())?;
        let r = self.gate(x, &weights.w_r, h, &weights.u_r, &weights.b_r, sigmoid)?;

        let reset_h = self.hadamard(&r, h)?;
        let candidate = self.gate(x, &weights.w_h, &reset_h, &weights.u_h, &weights.b_h, tanh)?;

        let keep = self.one_minus(&z)?;
        let kept = self.hadamard(&keep, h)?;
        let blended = self.hadamard(&z, &candidate)?;
        self.add(&kept, &blended)
    }

    /// `f(W x + U h + b)`
    fn gate(
        &mut self,
        x: &Tensor,
        w: &Tensor,
        h: &Tensor,
        u: &Tensor,
        b: &Tensor,
        f: Rc<dyn Activation>,
    ) -> Result<Tensor> {
        let wx = self.mat_vec(w, x)?;
        let uh = self.mat_vec(u, h)?;
        let pre = self.add3(&wx, &uh, b)?;
        self.activate(f, &pre)
    }
}
