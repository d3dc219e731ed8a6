//! Differentiable kernels
//!
//! Forward passes are `Graph` methods; each module also holds the backward
//! rules its kernels record on the tape.

pub(crate) mod elementwise;
pub(crate) mod linalg;
mod recurrent;
pub(crate) mod spatial;
pub(crate) mod structural;

pub use recurrent::GruWeights;
pub use spatial::ConvParams;

use ndarray::{Array1, ArrayBase, Data, Ix1};
use std::borrow::Cow;

/// Contiguous view of a buffer, copying only if the layout is strided
pub(crate) fn flat<S: Data<Elem = f32>>(array: &ArrayBase<S, Ix1>) -> Cow<'_, [f32]> {
    match array.as_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None => Cow::Owned(array.to_vec()),
    }
}

/// Optimizer caches of all `tensors` concatenated in order, or `None` when
/// any of them was reduced
pub(crate) fn concat_caches<'a>(
    tensors: impl IntoIterator<Item = &'a super::Tensor>,
) -> Option<(Array1<f32>, Array1<f32>)> {
    let mut c1 = Vec::new();
    let mut c2 = Vec::new();
    for tensor in tensors {
        let (a, b) = tensor.caches()?;
        c1.extend(a.iter());
        c2.extend(b.iter());
    }
    Some((Array1::from(c1), Array1::from(c2)))
}
