//! Structural kernels: concatenation, splitting and reshaping
//!
//! These move values without arithmetic, and carry the optimizer caches
//! along with the data.

use super::concat_caches;
use crate::autograd::backward::BackwardStep;
use crate::autograd::{Graph, Shape, Tensor};
use crate::error::{Error, Result};
use ndarray::{s, Array1, ArrayView1};

/// Copy `depth` channels starting at `start` out of every pixel of `src`
fn gather_channels(src: ArrayView1<'_, f32>, src_depth: usize, start: usize, depth: usize) -> Array1<f32> {
    if src_depth == 0 {
        return Array1::zeros(0);
    }
    let pixels = src.len() / src_depth;
    let mut out = Vec::with_capacity(pixels * depth);
    for p in 0..pixels {
        let base = p * src_depth + start;
        out.extend(src.slice(s![base..base + depth]).iter());
    }
    Array1::from(out)
}

/// Interleave per-pixel channel groups back into one buffer
fn join_channels(parts: &[(ArrayView1<'_, f32>, usize)], pixels: usize) -> Array1<f32> {
    let total_depth: usize = parts.iter().map(|(_, d)| d).sum();
    let mut out = Vec::with_capacity(pixels * total_depth);
    for p in 0..pixels {
        for (part, depth) in parts {
            out.extend(part.slice(s![p * depth..(p + 1) * depth]).iter());
        }
    }
    Array1::from(out)
}

impl Graph {
    /// Flatten column vectors end-to-end into one column vector
    pub fn concat(&mut self, inputs: &[Tensor]) -> Result<Tensor> {
        if inputs.is_empty() {
            return Err(Error::InvalidParameter("concat needs at least one tensor".into()));
        }
        for t in inputs {
            let shape = t.shape();
            if !shape.is_column() {
                return Err(Error::ShapeMismatch {
                    expected: Shape::column(shape.count()).dims(),
                    got: shape.dims(),
                });
            }
        }
        let refs: Vec<&Tensor> = inputs.iter().collect();
        let inference_only = self.output_mode(&refs)?;

        let mut data = Vec::with_capacity(inputs.iter().map(Tensor::len).sum());
        for t in inputs {
            data.extend(t.data().iter());
        }
        let shape = Shape::column(data.len());
        let caches = if inference_only { None } else { concat_caches(inputs) };
        let out = Tensor::output_with_caches(Array1::from(data), shape, caches);

        self.record(|| BackwardStep::Concat {
            inputs: inputs.to_vec(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Split a column vector into one-element tensors
    pub fn deconcat_one(&mut self, input: &Tensor) -> Result<Vec<Tensor>> {
        let shape = input.shape();
        if !shape.is_column() {
            return Err(Error::ShapeMismatch {
                expected: Shape::column(shape.count()).dims(),
                got: shape.dims(),
            });
        }
        let inference_only = self.output_mode(&[input])?;
        let caches = if inference_only { None } else { input.caches() };

        let outputs: Vec<Tensor> = {
            let data = input.data();
            (0..data.len())
                .map(|i| {
                    let cache = caches
                        .as_ref()
                        .map(|(c1, c2)| (Array1::from(vec![c1[i]]), Array1::from(vec![c2[i]])));
                    Tensor::output_with_caches(Array1::from(vec![data[i]]), Shape::scalar(), cache)
                })
                .collect()
        };

        self.record(|| BackwardStep::DeconcatOne {
            input: input.clone(),
            outputs: outputs.clone(),
        });
        Ok(outputs)
    }

    /// Reinterpret the shape without copying the data buffer
    ///
    /// Gradient flowing back through the reshape is multiplied by `gain`.
    pub fn reshape(&mut self, input: &Tensor, shape: Shape, gain: f32) -> Result<Tensor> {
        if shape.count() != input.len() {
            return Err(Error::ShapeMismatch {
                expected: input.shape().dims(),
                got: shape.dims(),
            });
        }
        self.output_mode(&[input])?;
        let out = input.relabel(shape);

        self.record(|| BackwardStep::Reshape {
            input: input.clone(),
            gain,
            out: out.clone(),
        });
        Ok(out)
    }

    /// Partition the channels of `input` into tensors of `slice_depth` channels
    pub fn deep_split(&mut self, input: &Tensor, slice_depth: usize) -> Result<Vec<Tensor>> {
        let shape = input.shape();
        if slice_depth == 0 || shape.depth % slice_depth != 0 {
            return Err(Error::InvalidParameter(format!(
                "slice depth {slice_depth} does not divide depth {}",
                shape.depth
            )));
        }
        let inference_only = self.output_mode(&[input])?;
        let caches = if inference_only { None } else { input.caches() };
        let out_shape = Shape::new(shape.height, shape.width, slice_depth);

        let outputs: Vec<Tensor> = {
            let data = input.data();
            (0..shape.depth / slice_depth)
                .map(|n| {
                    let start = n * slice_depth;
                    let values = gather_channels(data.view(), shape.depth, start, slice_depth);
                    let cache = caches.as_ref().map(|(c1, c2)| {
                        (
                            gather_channels(c1.view(), shape.depth, start, slice_depth),
                            gather_channels(c2.view(), shape.depth, start, slice_depth),
                        )
                    });
                    Tensor::output_with_caches(values, out_shape, cache)
                })
                .collect()
        };

        self.record(|| BackwardStep::DeepSplit {
            input: input.clone(),
            outputs: outputs.clone(),
        });
        Ok(outputs)
    }

    /// Stack tensors of equal height and width along the channel axis
    pub fn deep_join(&mut self, inputs: &[Tensor]) -> Result<Tensor> {
        let first = inputs
            .first()
            .ok_or_else(|| Error::InvalidParameter("deep_join needs at least one tensor".into()))?
            .shape();
        for t in inputs {
            let shape = t.shape();
            if shape.height != first.height || shape.width != first.width {
                return Err(Error::ShapeMismatch {
                    expected: vec![first.height, first.width, shape.depth],
                    got: shape.dims(),
                });
            }
        }
        let refs: Vec<&Tensor> = inputs.iter().collect();
        let inference_only = self.output_mode(&refs)?;
        let pixels = first.height * first.width;
        let depth: usize = inputs.iter().map(|t| t.shape().depth).sum();

        let data = {
            let borrowed: Vec<_> = inputs.iter().map(|t| (t.data(), t.shape().depth)).collect();
            let views: Vec<_> = borrowed.iter().map(|(d, depth)| (d.view(), *depth)).collect();
            join_channels(&views, pixels)
        };
        let caches = if inference_only {
            None
        } else {
            let mut c1 = Vec::with_capacity(inputs.len());
            let mut c2 = Vec::with_capacity(inputs.len());
            for t in inputs {
                let (a, b) = t.caches().ok_or(Error::InferenceOnly("deep_join operand was reduced"))?;
                c1.push((a, t.shape().depth));
                c2.push((b, t.shape().depth));
            }
            let v1: Vec<_> = c1.iter().map(|(a, d)| (a.view(), *d)).collect();
            let v2: Vec<_> = c2.iter().map(|(b, d)| (b.view(), *d)).collect();
            Some((join_channels(&v1, pixels), join_channels(&v2, pixels)))
        };
        let out = Tensor::output_with_caches(data, Shape::new(first.height, first.width, depth), caches);

        self.record(|| BackwardStep::DeepJoin {
            inputs: inputs.to_vec(),
            out: out.clone(),
        });
        Ok(out)
    }
}

pub(crate) fn concat_backward(inputs: &[Tensor], out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    let mut offset = 0;
    for t in inputs {
        let len = t.len();
        t.accumulate_grad(grad.slice(s![offset..offset + len]))?;
        offset += len;
    }
    Ok(())
}

pub(crate) fn deconcat_one_backward(input: &Tensor, outputs: &[Tensor]) -> Result<()> {
    let gathered = outputs
        .iter()
        .map(|t| t.grad_at(0))
        .collect::<Result<Array1<f32>>>()?;
    input.accumulate_grad(gathered.view())
}

pub(crate) fn reshape_backward(input: &Tensor, gain: f32, out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    input.accumulate_grad((&*grad * gain).view())
}

pub(crate) fn deep_split_backward(input: &Tensor, outputs: &[Tensor]) -> Result<()> {
    let shape = input.shape();
    let grads: Vec<_> = outputs
        .iter()
        .map(|t| Ok((t.grad()?, t.shape().depth)))
        .collect::<Result<_>>()?;
    let views: Vec<_> = grads.iter().map(|(g, d)| (g.view(), *d)).collect();
    let joined = join_channels(&views, shape.height * shape.width);
    input.accumulate_grad(joined.view())
}

pub(crate) fn deep_join_backward(inputs: &[Tensor], out: &Tensor) -> Result<()> {
    let grad = out.grad()?;
    let depth = out.shape().depth;
    let mut start = 0;
    for t in inputs {
        let d = t.shape().depth;
        let part = gather_channels(grad.view(), depth, start, d);
        t.accumulate_grad(part.view())?;
        start += d;
    }
    Ok(())
}
