//! Backward steps recorded on the tape

use super::ops::{elementwise, linalg, spatial, structural, ConvParams};
use super::{Activation, Tensor};
use crate::error::Result;
use ndarray::Array1;
use std::rc::Rc;

/// Kernel that produced a backward step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Add,
    Add3,
    Subtract,
    Hadamard,
    ScalarProduct,
    Matmul,
    MatVec,
    OneMinus,
    Negate,
    Scale,
    ScaleBy,
    Activate,
    Sum,
    Softmax,
    Dropout,
    Concat,
    DeconcatOne,
    Reshape,
    DeepSplit,
    DeepJoin,
    Convolution,
    MaxPool,
    Unpool,
    BicubicUpsample,
}

/// One tape entry: the operands a kernel read, the tensors it produced,
/// and whatever forward state its derivative needs
pub(crate) enum BackwardStep {
    Add { a: Tensor, b: Tensor, out: Tensor },
    Add3 { a: Tensor, b: Tensor, c: Tensor, out: Tensor },
    Subtract { a: Tensor, b: Tensor, out: Tensor },
    Hadamard { a: Tensor, b: Tensor, out: Tensor },
    ScalarProduct { a: Tensor, b: Tensor, out: Tensor },
    Matmul { a: Tensor, b: Tensor, out: Tensor, m: usize, k: usize, n: usize },
    MatVec { matrix: Tensor, vector: Tensor, out: Tensor },
    OneMinus { a: Tensor, out: Tensor },
    Negate { a: Tensor, out: Tensor },
    Scale { a: Tensor, factor: f32, out: Tensor },
    ScaleBy { a: Tensor, s: Tensor, out: Tensor },
    Activate { function: Rc<dyn Activation>, a: Tensor, out: Tensor },
    Sum { a: Tensor, out: Tensor },
    Softmax { a: Tensor, out: Tensor },
    Dropout { a: Tensor, mask: Array1<f32>, out: Tensor },
    Concat { inputs: Vec<Tensor>, out: Tensor },
    DeconcatOne { input: Tensor, outputs: Vec<Tensor> },
    Reshape { input: Tensor, gain: f32, out: Tensor },
    DeepSplit { input: Tensor, outputs: Vec<Tensor> },
    DeepJoin { inputs: Vec<Tensor>, out: Tensor },
    Convolution {
        input: Tensor,
        filters: Vec<Tensor>,
        bias: Option<Tensor>,
        params: ConvParams,
        out: Tensor,
    },
    MaxPool { input: Tensor, winners: Vec<usize>, out: Tensor },
    Unpool { input: Tensor, h: usize, w: usize, out: Tensor },
    BicubicUpsample { input: Tensor, h: usize, w: usize, out: Tensor },
}

impl BackwardStep {
    pub(crate) fn kind(&self) -> OpKind {
        match self {
            Self::Add { .. } => OpKind::Add,
            Self::Add3 { .. } => OpKind::Add3,
            Self::Subtract { .. } => OpKind::Subtract,
            Self::Hadamard { .. } => OpKind::Hadamard,
            Self::ScalarProduct { .. } => OpKind::ScalarProduct,
            Self::Matmul { .. } => OpKind::Matmul,
            Self::MatVec { .. } => OpKind::MatVec,
            Self::OneMinus { .. } => OpKind::OneMinus,
            Self::Negate { .. } => OpKind::Negate,
            Self::Scale { .. } => OpKind::Scale,
            Self::ScaleBy { .. } => OpKind::ScaleBy,
            Self::Activate { .. } => OpKind::Activate,
            Self::Sum { .. } => OpKind::Sum,
            Self::Softmax { .. } => OpKind::Softmax,
            Self::Dropout { .. } => OpKind::Dropout,
            Self::Concat { .. } => OpKind::Concat,
            Self::DeconcatOne { .. } => OpKind::DeconcatOne,
            Self::Reshape { .. } => OpKind::Reshape,
            Self::DeepSplit { .. } => OpKind::DeepSplit,
            Self::DeepJoin { .. } => OpKind::DeepJoin,
            Self::Convolution { .. } => OpKind::Convolution,
            Self::MaxPool { .. } => OpKind::MaxPool,
            Self::Unpool { .. } => OpKind::Unpool,
            Self::BicubicUpsample { .. } => OpKind::BicubicUpsample,
        }
    }

    /// Kind of the step, with the activation name for `Activate` steps
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Activate { function, .. } => format!("{:?}({})", OpKind::Activate, function.name()),
            other => format!("{:?}", other.kind()),
        }
    }

    /// Accumulate this step's partial derivatives into its operands
    pub(crate) fn run(&self) -> Result<()> {
        match self {
            Self::Add { a, b, out } => elementwise::add_backward(a, b, out),
            Self::Add3 { a, b, c, out } => elementwise::add3_backward(a, b, c, out),
            Self::Subtract { a, b, out } => elementwise::subtract_backward(a, b, out),
            Self::Hadamard { a, b, out } => elementwise::hadamard_backward(a, b, out),
            Self::OneMinus { a, out } | Self::Negate { a, out } => elementwise::negate_backward(a, out),
            Self::Scale { a, factor, out } => elementwise::scale_backward(a, *factor, out),
            Self::ScaleBy { a, s, out } => elementwise::scale_by_backward(a, s, out),
            Self::Activate { function, a, out } => elementwise::activate_backward(function.as_ref(), a, out),
            Self::Sum { a, out } => elementwise::sum_backward(a, out),
            Self::Softmax { a, out } => elementwise::softmax_backward(a, out),
            Self::Dropout { a, mask, out } => elementwise::dropout_backward(a, mask, out),
            Self::ScalarProduct { a, b, out } => linalg::scalar_product_backward(a, b, out),
            Self::Matmul { a, b, out, m, k, n } => linalg::matmul_backward(a, b, out, *m, *k, *n),
            Self::MatVec { matrix, vector, out } => linalg::mat_vec_backward(matrix, vector, out),
            Self::Concat { inputs, out } => structural::concat_backward(inputs, out),
            Self::DeconcatOne { input, outputs } => structural::deconcat_one_backward(input, outputs),
            Self::Reshape { input, gain, out } => structural::reshape_backward(input, *gain, out),
            Self::DeepSplit { input, outputs } => structural::deep_split_backward(input, outputs),
            Self::DeepJoin { inputs, out } => structural::deep_join_backward(inputs, out),
            Self::Convolution {
                input,
                filters,
                bias,
                params,
                out,
            } => spatial::convolution_backward(input, filters, bias.as_ref(), *params, out),
            Self::MaxPool { input, winners, out } => spatial::max_pool_backward(input, winners, out),
            Self::Unpool { input, h, w, out } => spatial::unpool_backward(input, *h, *w, out),
            Self::BicubicUpsample { input, h, w, out } => {
                spatial::bicubic_upsample_backward(input, *h, *w, out)
            }
        }
    }
}
