//! Tape-based autograd engine
//!
//! Kernels run eagerly through a [`Graph`], which records one backward step
//! per invocation while tracking is on. Replaying the tape in reverse
//! accumulates `∂output/∂value` into every tensor the output depends on.

pub mod activation;
mod backward;
mod graph;
mod ops;
mod shape;
mod tensor;


pub use activation::Activation;
pub use backward::OpKind;
pub use graph::Graph;
pub use ops::{ConvParams, GruWeights};
pub use shape::Shape;
pub use tensor::Tensor;

use crate::error::Result;
use ndarray::Array1;

/// Perform backward pass on a tensor
///
/// Seeds `tensor` with `grad_output` (ones when `None`) and replays the
/// graph's tape.
pub fn backward(graph: &Graph, tensor: &Tensor, grad_output: Option<Array1<f32>>) -> Result<()> {
    graph.backward(tensor, grad_output)
}
