//! Tensor value with gradient and optimizer-state buffers

use super::Shape;
use crate::error::{Error, Result};
use ndarray::{Array1, ArcArray1, ArrayView1};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

const RELEASED: &str = "gradient and cache buffers were released by reduce_to_inference";

struct TensorInner {
    shape: Shape,
    data: ArcArray1<f32>,
    grad: Option<Array1<f32>>,
    cache1: Option<Array1<f32>>,
    cache2: Option<Array1<f32>>,
}

/// Tensor value: a forward buffer paired with a gradient accumulator
///
/// `Tensor` is a shared handle. Cloning it aliases the same buffers, so a
/// tensor captured by several backward steps accumulates every consumer's
/// contribution into one gradient buffer.
#[derive(Clone)]
pub struct Tensor {
    inner: Rc<RefCell<TensorInner>>,
}

impl Tensor {
    fn from_parts(shape: Shape, data: ArcArray1<f32>, caches: Option<(Array1<f32>, Array1<f32>)>) -> Self {
        let n = shape.count();
        let (cache1, cache2) = caches.unwrap_or_else(|| (Array1::zeros(n), Array1::zeros(n)));
        Self {
            inner: Rc::new(RefCell::new(TensorInner {
                shape,
                data,
                grad: Some(Array1::zeros(n)),
                cache1: Some(cache1),
                cache2: Some(cache2),
            })),
        }
    }

    /// Tensor with no gradient or cache buffers
    fn reduced(shape: Shape, data: ArcArray1<f32>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TensorInner {
                shape,
                data,
                grad: None,
                cache1: None,
                cache2: None,
            })),
        }
    }

    /// Create a tensor from a flat buffer, taking ownership of it
    pub fn from_array(data: Array1<f32>, shape: Shape) -> Result<Self> {
        if data.len() != shape.count() {
            return Err(Error::ShapeMismatch {
                expected: vec![shape.count()],
                got: vec![data.len()],
            });
        }
        Ok(Self::from_parts(shape, data.into_shared(), None))
    }

    /// Create a tensor from a vector
    pub fn from_vec(data: Vec<f32>, shape: Shape) -> Result<Self> {
        Self::from_array(Array1::from(data), shape)
    }

    /// Create an `(n, 1, 1)` column vector
    pub fn column(data: Vec<f32>) -> Self {
        let shape = Shape::column(data.len());
        Self::from_parts(shape, Array1::from(data).into_shared(), None)
    }

    /// Create a single-element tensor
    pub fn scalar(value: f32) -> Self {
        Self::column(vec![value])
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: Shape) -> Self {
        Self::filled(shape, 0.0)
    }

    /// Create a tensor with every element set to `value`
    pub fn filled(shape: Shape, value: f32) -> Self {
        Self::from_parts(shape, Array1::from_elem(shape.count(), value).into_shared(), None)
    }

    /// Kernel output. Inference-only outputs carry no gradient or caches.
    pub(crate) fn output(data: Array1<f32>, shape: Shape, inference_only: bool) -> Self {
        debug_assert_eq!(data.len(), shape.count());
        if inference_only {
            Self::reduced(shape, data.into_shared())
        } else {
            Self::from_parts(shape, data.into_shared(), None)
        }
    }

    /// Kernel output carrying explicit optimizer caches
    pub(crate) fn output_with_caches(
        data: Array1<f32>,
        shape: Shape,
        caches: Option<(Array1<f32>, Array1<f32>)>,
    ) -> Self {
        debug_assert_eq!(data.len(), shape.count());
        match caches {
            Some(caches) => Self::from_parts(shape, data.into_shared(), Some(caches)),
            None => Self::output(data, shape, true),
        }
    }

    /// Relabel the shape over the same data buffer. Gradient starts at zero.
    pub(crate) fn relabel(&self, shape: Shape) -> Self {
        let inner = self.inner.borrow();
        match (&inner.grad, &inner.cache1, &inner.cache2) {
            (Some(_), Some(c1), Some(c2)) => {
                Self::from_parts(shape, inner.data.clone(), Some((c1.clone(), c2.clone())))
            }
            _ => Self::reduced(shape, inner.data.clone()),
        }
    }

    pub fn shape(&self) -> Shape {
        self.inner.borrow().shape
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when both handles refer to the same tensor
    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// True when both tensors read from the same data buffer
    pub fn shares_data_with(&self, other: &Tensor) -> bool {
        self.inner.borrow().data.as_ptr() == other.inner.borrow().data.as_ptr()
    }

    /// Borrow the forward values
    pub fn data(&self) -> Ref<'_, ArcArray1<f32>> {
        Ref::map(self.inner.borrow(), |t| &t.data)
    }

    /// Mutably borrow the forward values
    pub fn data_mut(&self) -> RefMut<'_, ArcArray1<f32>> {
        RefMut::map(self.inner.borrow_mut(), |t| &mut t.data)
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data().to_vec()
    }

    /// Value at a linear offset
    pub fn get(&self, index: usize) -> Result<f32> {
        let data = self.data();
        data.get(index).copied().ok_or(Error::IndexOutOfRange {
            index,
            len: data.len(),
        })
    }

    /// Overwrite the value at a linear offset
    pub fn set(&self, index: usize, value: f32) -> Result<()> {
        let mut data = self.data_mut();
        let len = data.len();
        let slot = data
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, len })?;
        *slot = value;
        Ok(())
    }

    /// Linear offset of `(row, col, channel)`
    pub fn offset3(&self, row: usize, col: usize, channel: usize) -> Result<usize> {
        self.shape().offset(row, col, channel)
    }

    pub fn get3(&self, row: usize, col: usize, channel: usize) -> Result<f32> {
        self.get(self.offset3(row, col, channel)?)
    }

    pub fn set3(&self, row: usize, col: usize, channel: usize, value: f32) -> Result<()> {
        self.set(self.offset3(row, col, channel)?, value)
    }

    /// Borrow the accumulated gradient
    pub fn grad(&self) -> Result<Ref<'_, Array1<f32>>> {
        Ref::filter_map(self.inner.borrow(), |t| t.grad.as_ref()).map_err(|_| Error::InferenceOnly(RELEASED))
    }

    /// Mutably borrow the accumulated gradient
    pub fn grad_mut(&self) -> Result<RefMut<'_, Array1<f32>>> {
        RefMut::filter_map(self.inner.borrow_mut(), |t| t.grad.as_mut())
            .map_err(|_| Error::InferenceOnly(RELEASED))
    }

    /// Gradient at a linear offset
    pub fn grad_at(&self, index: usize) -> Result<f32> {
        let grad = self.grad()?;
        grad.get(index).copied().ok_or(Error::IndexOutOfRange {
            index,
            len: grad.len(),
        })
    }

    /// Overwrite the gradient, typically to seed a loss
    pub fn set_grad(&self, grad: Array1<f32>) -> Result<()> {
        let mut slot = self.grad_mut()?;
        if grad.len() != slot.len() {
            return Err(Error::InvalidGradient(format!(
                "seed has {} elements, tensor has {}",
                grad.len(),
                slot.len()
            )));
        }
        *slot = grad;
        Ok(())
    }

    /// Seed the gradient with ones
    pub fn seed_ones(&self) -> Result<()> {
        self.grad_mut()?.fill(1.0);
        Ok(())
    }

    /// Reset the gradient to zero before reusing the tensor in a new expression
    pub fn zero_grad(&self) -> Result<()> {
        self.grad_mut()?.fill(0.0);
        Ok(())
    }

    /// Accumulate gradient (for when tensor is used multiple times)
    pub fn accumulate_grad(&self, delta: ArrayView1<'_, f32>) -> Result<()> {
        let mut grad = self.grad_mut()?;
        if delta.len() != grad.len() {
            return Err(Error::InvalidGradient(format!(
                "contribution has {} elements, tensor has {}",
                delta.len(),
                grad.len()
            )));
        }
        *grad += &delta;
        Ok(())
    }

    /// Borrow the first optimizer cache
    pub fn cache1(&self) -> Result<Ref<'_, Array1<f32>>> {
        Ref::filter_map(self.inner.borrow(), |t| t.cache1.as_ref()).map_err(|_| Error::InferenceOnly(RELEASED))
    }

    pub fn cache1_mut(&self) -> Result<RefMut<'_, Array1<f32>>> {
        RefMut::filter_map(self.inner.borrow_mut(), |t| t.cache1.as_mut())
            .map_err(|_| Error::InferenceOnly(RELEASED))
    }

    /// Borrow the second optimizer cache
    pub fn cache2(&self) -> Result<Ref<'_, Array1<f32>>> {
        Ref::filter_map(self.inner.borrow(), |t| t.cache2.as_ref()).map_err(|_| Error::InferenceOnly(RELEASED))
    }

    pub fn cache2_mut(&self) -> Result<RefMut<'_, Array1<f32>>> {
        RefMut::filter_map(self.inner.borrow_mut(), |t| t.cache2.as_mut())
            .map_err(|_| Error::InferenceOnly(RELEASED))
    }

    /// Both caches, cloned, or `None` once reduced
    pub(crate) fn caches(&self) -> Option<(Array1<f32>, Array1<f32>)> {
        let inner = self.inner.borrow();
        match (&inner.cache1, &inner.cache2) {
            (Some(c1), Some(c2)) => Some((c1.clone(), c2.clone())),
            _ => None,
        }
    }

    /// Drop the gradient and cache buffers. Irreversible.
    pub fn reduce_to_inference(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.grad = None;
        inner.cache1 = None;
        inner.cache2 = None;
    }

    pub fn is_inference_only(&self) -> bool {
        self.inner.borrow().grad.is_none()
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Tensor")
            .field("shape", &inner.shape)
            .field("data", &inner.data)
            .field("grad", &inner.grad)
            .finish()
    }
}
