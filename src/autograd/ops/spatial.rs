//! Spatial kernels: convolution, pooling and up-sampling
//!
//! All of these treat a tensor as `height × width` pixels of `depth`
//! channels, channel-innermost.

use super::flat;
use crate::autograd::backward::BackwardStep;
use crate::autograd::{Graph, Shape, Tensor};
use crate::error::{Error, Result};
use ndarray::Array1;
use rayon::prelude::*;

/// Padding and stride of a convolution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConvParams {
    pub pad_x: usize,
    pub pad_y: usize,
    pub stride_x: usize,
    pub stride_y: usize,
}

impl Default for ConvParams {
    fn default() -> Self {
        Self {
            pad_x: 0,
            pad_y: 0,
            stride_x: 1,
            stride_y: 1,
        }
    }
}

impl ConvParams {
    pub fn new(pad_x: usize, pad_y: usize, stride_x: usize, stride_y: usize) -> Self {
        Self {
            pad_x,
            pad_y,
            stride_x,
            stride_y,
        }
    }

    /// Same padding on both axes, unit stride
    pub fn padded(pad: usize) -> Self {
        Self::new(pad, pad, 1, 1)
    }
}

/// Resolved sizes of one convolution
#[derive(Clone, Copy, Debug)]
struct ConvGeometry {
    input: Shape,
    filter_h: usize,
    filter_w: usize,
    out_h: usize,
    out_w: usize,
    filters: usize,
    params: ConvParams,
}

impl ConvGeometry {
    fn new(input: Shape, filter: Shape, filters: usize, params: ConvParams) -> Result<Self> {
        if params.stride_x == 0 || params.stride_y == 0 {
            return Err(Error::InvalidParameter("convolution stride must be positive".into()));
        }
        if filter.depth != input.depth {
            return Err(Error::ShapeMismatch {
                expected: vec![filter.height, filter.width, input.depth],
                got: filter.dims(),
            });
        }
        let extent = |size: usize, pad: usize, window: usize, stride: usize| -> isize {
            (size as isize + 2 * pad as isize - window as isize).div_euclid(stride as isize) + 1
        };
        let out_h = extent(input.height, params.pad_y, filter.height, params.stride_y);
        let out_w = extent(input.width, params.pad_x, filter.width, params.stride_x);
        if out_h <= 0 || out_w <= 0 || filter.height == 0 || filter.width == 0 {
            return Err(Error::InvalidOutputExtent {
                height: out_h,
                width: out_w,
            });
        }
        Ok(Self {
            input,
            filter_h: filter.height,
            filter_w: filter.width,
            out_h: out_h as usize,
            out_w: out_w as usize,
            filters,
            params,
        })
    }

    fn output_shape(&self) -> Shape {
        Shape::new(self.out_h, self.out_w, self.filters)
    }

    fn filter_len(&self) -> usize {
        self.filter_h * self.filter_w * self.input.depth
    }

    /// Offset of the first channel of the input pixel under filter tap
    /// `(fy, fx)` for output `(oy, ox)`, or `None` inside the padding
    #[inline]
    fn input_base(&self, oy: usize, ox: usize, fy: usize, fx: usize) -> Option<usize> {
        let iy = (oy * self.params.stride_y + fy).checked_sub(self.params.pad_y)?;
        let ix = (ox * self.params.stride_x + fx).checked_sub(self.params.pad_x)?;
        if iy >= self.input.height || ix >= self.input.width {
            return None;
        }
        Some(self.input.offset_unchecked(iy, ix, 0))
    }

    #[inline]
    fn filter_base(&self, fy: usize, fx: usize) -> usize {
        (fy * self.filter_w + fx) * self.input.depth
    }
}

/// Catmull-Rom weights for the four taps around fractional offset `t`
fn cubic_weights(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        0.5 * (-t3 + 2.0 * t2 - t),
        0.5 * (3.0 * t3 - 5.0 * t2 + 2.0),
        0.5 * (-3.0 * t3 + 4.0 * t2 + t),
        0.5 * (t3 - t2),
    ]
}

/// The 16 `(pixel, weight)` taps feeding output sample `(oy, ox)`
///
/// Taps that fall outside the input are folded onto the center tap, so the
/// weights still sum to one at the borders.
fn bicubic_taps(input: Shape, oy: usize, ox: usize, h: usize, w: usize) -> [(usize, f32); 16] {
    let (cy, cx) = (oy / h, ox / w);
    let wy = cubic_weights((oy % h) as f32 / h as f32);
    let wx = cubic_weights((ox % w) as f32 / w as f32);
    let center = cy * input.width + cx;

    let mut taps = [(center, 0.0); 16];
    for ky in 0..4 {
        for kx in 0..4 {
            let ty = (cy + ky).checked_sub(1).filter(|&y| y < input.height);
            let tx = (cx + kx).checked_sub(1).filter(|&x| x < input.width);
            let pixel = match (ty, tx) {
                (Some(y), Some(x)) => y * input.width + x,
                _ => center,
            };
            taps[ky * 4 + kx] = (pixel, wy[ky] * wx[kx]);
        }
    }
    taps
}

impl Graph {
    /// Cross-correlate `input` with each filter, plus an optional per-filter bias
    ///
    /// Every filter is `(fh, fw, input.depth)`; output channel `d` comes from
    /// `filters[d]`.
    pub fn convolution(
        &mut self,
        input: &Tensor,
        filters: &[Tensor],
        bias: Option<&Tensor>,
        params: ConvParams,
    ) -> Result<Tensor> {
        let filter_shape = filters
            .first()
            .ok_or_else(|| Error::InvalidParameter("convolution needs at least one filter".into()))?
            .shape();
        for f in filters {
            filter_shape.expect_eq(&f.shape())?;
        }
        if let Some(b) = bias {
            if b.len() != filters.len() {
                return Err(Error::ShapeMismatch {
                    expected: vec![filters.len()],
                    got: b.shape().dims(),
                });
            }
        }
        let geo = ConvGeometry::new(input.shape(), filter_shape, filters.len(), params)?;

        let mut operands: Vec<&Tensor> = vec![input];
        operands.extend(filters.iter());
        operands.extend(bias);
        let inference_only = self.output_mode(&operands)?;

        let weights: Vec<f32> = filters.iter().flat_map(|f| f.to_vec()).collect();
        let bias_values = bias.map_or_else(|| vec![0.0; filters.len()], Tensor::to_vec);

        let out_shape = geo.output_shape();
        let mut result = vec![0.0; out_shape.count()];
        {
            let input_data = input.data();
            let x = flat(&*input_data);
            let depth = geo.input.depth;
            let filter_len = geo.filter_len();

            result
                .par_chunks_mut(geo.out_w * geo.filters)
                .enumerate()
                .for_each(|(oy, row)| {
                    for ox in 0..geo.out_w {
                        for (d, slot) in row[ox * geo.filters..(ox + 1) * geo.filters].iter_mut().enumerate() {
                            let mut acc = bias_values[d];
                            for fy in 0..geo.filter_h {
                                for fx in 0..geo.filter_w {
                                    let Some(base) = geo.input_base(oy, ox, fy, fx) else {
                                        continue;
                                    };
                                    let f_base = d * filter_len + geo.filter_base(fy, fx);
                                    for c in 0..depth {
                                        acc += x[base + c] * weights[f_base + c];
                                    }
                                }
                            }
                            *slot = acc;
                        }
                    }
                });
        }
        let out = Tensor::output(Array1::from(result), out_shape, inference_only);

        self.record(|| BackwardStep::Convolution {
            input: input.clone(),
            filters: filters.to_vec(),
            bias: bias.cloned(),
            params,
            out: out.clone(),
        });
        Ok(out)
    }

    /// Maximum over non-overlapping `h × w` windows, per channel
    ///
    /// Ties go to the first maximum in row-major order within the window.
    pub fn max_pool(&mut self, input: &Tensor, h: usize, w: usize) -> Result<Tensor> {
        if h == 0 || w == 0 {
            return Err(Error::InvalidParameter("pooling window must be non-empty".into()));
        }
        let in_shape = input.shape();
        if in_shape.depth == 0 {
            return Err(Error::InvalidParameter("max pooling needs at least one channel".into()));
        }
        let (out_h, out_w) = (in_shape.height / h, in_shape.width / w);
        if out_h == 0 || out_w == 0 {
            return Err(Error::InvalidOutputExtent {
                height: out_h as isize,
                width: out_w as isize,
            });
        }
        let inference_only = self.output_mode(&[input])?;

        let depth = in_shape.depth;
        let out_shape = Shape::new(out_h, out_w, depth);
        let row_len = out_w * depth;
        let mut result = vec![0.0; out_shape.count()];
        let mut winners = vec![0usize; out_shape.count()];
        {
            let input_data = input.data();
            let x = flat(&*input_data);
            result
                .par_chunks_mut(row_len)
                .zip(winners.par_chunks_mut(row_len))
                .enumerate()
                .for_each(|(oy, (row, row_winners))| {
                    for ox in 0..out_w {
                        for c in 0..depth {
                            let mut best = in_shape.offset_unchecked(oy * h, ox * w, c);
                            for wy in 0..h {
                                for wx in 0..w {
                                    let idx = in_shape.offset_unchecked(oy * h + wy, ox * w + wx, c);
                                    if x[idx] > x[best] {
                                        best = idx;
                                    }
                                }
                            }
                            row[ox * depth + c] = x[best];
                            row_winners[ox * depth + c] = best;
                        }
                    }
                });
        }
        let out = Tensor::output(Array1::from(result), out_shape, inference_only);

        self.record(|| BackwardStep::MaxPool {
            input: input.clone(),
            winners,
            out: out.clone(),
        });
        Ok(out)
    }

    /// Scatter each input pixel to `(row * h, col * w)` of a zero grid
    pub fn unpool(&mut self, input: &Tensor, h: usize, w: usize) -> Result<Tensor> {
        if h == 0 || w == 0 {
            return Err(Error::InvalidParameter("unpool factors must be positive".into()));
        }
        let inference_only = self.output_mode(&[input])?;
        let in_shape = input.shape();
        let out_shape = Shape::new(in_shape.height * h, in_shape.width * w, in_shape.depth);

        let mut result: Array1<f32> = Array1::zeros(out_shape.count());
        {
            let x = input.data();
            for y in 0..in_shape.height {
                for col in 0..in_shape.width {
                    for c in 0..in_shape.depth {
                        result[out_shape.offset_unchecked(y * h, col * w, c)] =
                            x[in_shape.offset_unchecked(y, col, c)];
                    }
                }
            }
        }
        let out = Tensor::output(result, out_shape, inference_only);

        self.record(|| BackwardStep::Unpool {
            input: input.clone(),
            h,
            w,
            out: out.clone(),
        });
        Ok(out)
    }

    /// Up-sample by `(h, w)` with 16-tap bicubic interpolation
    pub fn bicubic_upsample(&mut self, input: &Tensor, h: usize, w: usize) -> Result<Tensor> {
        if h == 0 || w == 0 {
            return Err(Error::InvalidParameter("up-sampling factors must be positive".into()));
        }
        let in_shape = input.shape();
        if in_shape.count() == 0 {
            return Err(Error::InvalidOutputExtent {
                height: in_shape.height as isize,
                width: in_shape.width as isize,
            });
        }
        let inference_only = self.output_mode(&[input])?;
        let depth = in_shape.depth;
        let out_shape = Shape::new(in_shape.height * h, in_shape.width * w, depth);

        let mut result: Array1<f32> = Array1::zeros(out_shape.count());
        {
            let x = input.data();
            for oy in 0..out_shape.height {
                for ox in 0..out_shape.width {
                    let taps = bicubic_taps(in_shape, oy, ox, h, w);
                    for c in 0..depth {
                        result[out_shape.offset_unchecked(oy, ox, c)] =
                            taps.iter().map(|&(p, wt)| wt * x[p * depth + c]).sum();
                    }
                }
            }
        }
        let out = Tensor::output(result, out_shape, inference_only);

        self.record(|| BackwardStep::BicubicUpsample {
            input: input.clone(),
            h,
            w,
            out: out.clone(),
        });
        Ok(out)
    }
}

pub(crate) fn convolution_backward(
    input: &Tensor,
    filters: &[Tensor],
    bias: Option<&Tensor>,
    params: ConvParams,
    out: &Tensor,
) -> Result<()> {
    let Some(first) = filters.first() else {
        return Ok(());
    };
    let geo = ConvGeometry::new(input.shape(), first.shape(), filters.len(), params)?;
    let grad_output = out.grad()?;
    let g = flat(&*grad_output);
    let depth = geo.input.depth;
    let filter_len = geo.filter_len();
    let weights: Vec<f32> = filters.iter().flat_map(|f| f.to_vec()).collect();
    let x = input.to_vec();

    // ∂L/∂filter[d] += input_patch · ∂L/∂out[.., d], one worker per filter
    let filter_grads: Vec<Vec<f32>> = (0..geo.filters)
        .into_par_iter()
        .map(|d| {
            let mut grad_f = vec![0.0; filter_len];
            for oy in 0..geo.out_h {
                for ox in 0..geo.out_w {
                    let go = g[(oy * geo.out_w + ox) * geo.filters + d];
                    if go == 0.0 {
                        continue;
                    }
                    for fy in 0..geo.filter_h {
                        for fx in 0..geo.filter_w {
                            let Some(base) = geo.input_base(oy, ox, fy, fx) else {
                                continue;
                            };
                            let f_base = geo.filter_base(fy, fx);
                            for c in 0..depth {
                                grad_f[f_base + c] += x[base + c] * go;
                            }
                        }
                    }
                }
            }
            grad_f
        })
        .collect();

    // ∂L/∂input += filter[d] · ∂L/∂out[.., d] over every receptive field
    let mut grad_x = vec![0.0; x.len()];
    let mut grad_b = vec![0.0; geo.filters];
    for oy in 0..geo.out_h {
        for ox in 0..geo.out_w {
            for (d, slot) in grad_b.iter_mut().enumerate() {
                let go = g[(oy * geo.out_w + ox) * geo.filters + d];
                *slot += go;
                if go == 0.0 {
                    continue;
                }
                for fy in 0..geo.filter_h {
                    for fx in 0..geo.filter_w {
                        let Some(base) = geo.input_base(oy, ox, fy, fx) else {
                            continue;
                        };
                        let f_base = d * filter_len + geo.filter_base(fy, fx);
                        for c in 0..depth {
                            grad_x[base + c] += weights[f_base + c] * go;
                        }
                    }
                }
            }
        }
    }

    for (filter, grad_f) in filters.iter().zip(filter_grads) {
        filter.accumulate_grad(Array1::from(grad_f).view())?;
    }
    input.accumulate_grad(Array1::from(grad_x).view())?;
    if let Some(b) = bias {
        b.accumulate_grad(Array1::from(grad_b).view())?;
    }
    Ok(())
}

pub(crate) fn max_pool_backward(input: &Tensor, winners: &[usize], out: &Tensor) -> Result<()> {
    let grad_output = out.grad()?;
    let mut grad_x: Array1<f32> = Array1::zeros(input.len());
    for (&winner, &g) in winners.iter().zip(grad_output.iter()) {
        grad_x[winner] += g;
    }
    input.accumulate_grad(grad_x.view())
}

pub(crate) fn unpool_backward(input: &Tensor, h: usize, w: usize, out: &Tensor) -> Result<()> {
    let grad_output = out.grad()?;
    let in_shape = input.shape();
    let out_shape = out.shape();
    let mut grad_x: Array1<f32> = Array1::zeros(in_shape.count());
    for y in 0..in_shape.height {
        for col in 0..in_shape.width {
            for c in 0..in_shape.depth {
                grad_x[in_shape.offset_unchecked(y, col, c)] =
                    grad_output[out_shape.offset_unchecked(y * h, col * w, c)];
            }
        }
    }
    input.accumulate_grad(grad_x.view())
}

pub(crate) fn bicubic_upsample_backward(input: &Tensor, h: usize, w: usize, out: &Tensor) -> Result<()> {
    let grad_output = out.grad()?;
    let in_shape = input.shape();
    let out_shape = out.shape();
    let depth = in_shape.depth;
    let mut grad_x: Array1<f32> = Array1::zeros(in_shape.count());
    for oy in 0..out_shape.height {
        for ox in 0..out_shape.width {
            let taps = bicubic_taps(in_shape, oy, ox, h, w);
            for c in 0..depth {
                let g = grad_output[out_shape.offset_unchecked(oy, ox, c)];
                for &(p, wt) in &taps {
                    grad_x[p * depth + c] += wt * g;
                }
            }
        }
    }
    input.accumulate_grad(grad_x.view())
}
