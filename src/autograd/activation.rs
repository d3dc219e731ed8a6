//! Activation functions consumed by the `activate` kernel
//!
//! The graph only relies on the [`Activation`] trait; the stock functions
//! below cover what the recurrent building blocks need.

use ndarray::{Array1, ArrayView1};

/// Elementwise activation with its local derivative
pub trait Activation {
    /// Apply the activation
    fn forward(&self, input: ArrayView1<'_, f32>) -> Array1<f32>;

    /// Local derivative evaluated at `input`, not yet multiplied by the
    /// upstream gradient
    fn backward(&self, input: ArrayView1<'_, f32>) -> Array1<f32>;

    fn name(&self) -> &'static str {
        "activation"
    }
}

/// f(x) = x
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Activation for Identity {
    fn forward(&self, input: ArrayView1<'_, f32>) -> Array1<f32> {
        input.to_owned()
    }

    fn backward(&self, input: ArrayView1<'_, f32>) -> Array1<f32> {
        Array1::ones(input.len())
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Logistic sigmoid
#[derive(Clone, Copy, Debug, Default)]
pub struct Sigmoid;

impl Activation for Sigmoid {
    fn forward(&self, input: ArrayView1<'_, f32>) -> Array1<f32> {
        input.mapv(sigmoid)
    }

    fn backward(&self, input: ArrayView1<'_, f32>) -> Array1<f32> {
        input.mapv(|x| {
            let s = sigmoid(x);
            s * (1.0 - s)
        })
    }

    fn name(&self) -> &'static str {
        "sigmoid"
    }
}

/// Hyperbolic tangent
#[derive(Clone, Copy, Debug, Default)]
pub struct Tanh;

impl Activation for Tanh {
    fn forward(&self, input: ArrayView1<'_, f32>) -> Array1<f32> {
        input.mapv(f32::tanh)
    }

    fn backward(&self, input: ArrayView1<'_, f32>) -> Array1<f32> {
        input.mapv(|x| {
            let t = x.tanh();
            1.0 - t * t
        })
    }

    fn name(&self) -> &'static str {
        "tanh"
    }
}

/// ReLU activation
#[derive(Clone, Copy, Debug, Default)]
pub struct Relu;

impl Activation for Relu {
    fn forward(&self, input: ArrayView1<'_, f32>) -> Array1<f32> {
        input.mapv(|x| x.max(0.0))
    }

    fn backward(&self, input: ArrayView1<'_, f32>) -> Array1<f32> {
        input.mapv(|x| if x > 0.0 { 1.0 } else { 0.0 })
    }

    fn name(&self) -> &'static str {
        "relu"
    }
}

const SQRT_2_OVER_PI: f32 = 0.797_884_6; // √(2/π)
const GELU_COEFF: f32 = 0.044_715;

/// GELU activation (Gaussian Error Linear Unit)
///
/// GELU(x) ≈ 0.5 * x * (1 + tanh(√(2/π) * (x + 0.044715 * x³)))
#[derive(Clone, Copy, Debug, Default)]
pub struct Gelu;

impl Activation for Gelu {
    fn forward(&self, input: ArrayView1<'_, f32>) -> Array1<f32> {
        input.mapv(|x| {
            let inner = SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x);
            0.5 * x * (1.0 + inner.tanh())
        })
    }

    // ∂GELU/∂x = 0.5 * (1 + tanh(z)) + 0.5 * x * sech²(z) * dz/dx
    // where z = √(2/π) * (x + 0.044715 * x³)
    fn backward(&self, input: ArrayView1<'_, f32>) -> Array1<f32> {
        input.mapv(|x| {
            let x2 = x * x;
            let z = SQRT_2_OVER_PI * (x + GELU_COEFF * x2 * x);
            let tanh_z = z.tanh();
            let sech2_z = 1.0 - tanh_z * tanh_z;
            let dz_dx = SQRT_2_OVER_PI * (1.0 + 3.0 * GELU_COEFF * x2);
            0.5 * (1.0 + tanh_z) + 0.5 * x * sech2_z * dz_dx
        })
    }

    fn name(&self) -> &'static str {
        "gelu"
    }
}

/// Swish activation (also known as SiLU - Sigmoid Linear Unit)
///
/// Swish(x) = x * sigmoid(x)
#[derive(Clone, Copy, Debug, Default)]
pub struct Swish;

impl Activation for Swish {
    fn forward(&self, input: ArrayView1<'_, f32>) -> Array1<f32> {
        input.mapv(|x| x * sigmoid(x))
    }

    // ∂Swish/∂x = Swish(x) + sigmoid(x) * (1 - Swish(x))
    fn backward(&self, input: ArrayView1<'_, f32>) -> Array1<f32> {
        input.mapv(|x| {
            let s = sigmoid(x);
            let swish = x * s;
            swish + s * (1.0 - swish)
        })
    }

    fn name(&self) -> &'static str {
        "swish"
    }
}
