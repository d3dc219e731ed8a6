//! Three-dimensional tensor shape

use crate::error::{Error, Result};
use std::fmt;

/// Height × width × depth extent of a tensor
///
/// Elements are laid out channel-innermost: the linear offset of
/// `(row, col, channel)` is `(row * width + col) * depth + channel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Shape {
    pub height: usize,
    pub width: usize,
    pub depth: usize,
}

impl Shape {
    pub const fn new(height: usize, width: usize, depth: usize) -> Self {
        Self {
            height,
            width,
            depth,
        }
    }

    /// `(rows, cols, 1)` matrix shape
    pub const fn matrix(rows: usize, cols: usize) -> Self {
        Self::new(rows, cols, 1)
    }

    /// `(n, 1, 1)` column vector shape
    pub const fn column(n: usize) -> Self {
        Self::new(n, 1, 1)
    }

    /// Single-element shape
    pub const fn scalar() -> Self {
        Self::new(1, 1, 1)
    }

    /// Total number of elements
    pub const fn count(&self) -> usize {
        self.height * self.width * self.depth
    }

    pub const fn is_column(&self) -> bool {
        self.width == 1 && self.depth == 1
    }

    pub fn dims(&self) -> Vec<usize> {
        vec![self.height, self.width, self.depth]
    }

    /// Bounds-checked linear offset of `(row, col, channel)`
    pub fn offset(&self, row: usize, col: usize, channel: usize) -> Result<usize> {
        if row >= self.height || col >= self.width || channel >= self.depth {
            return Err(Error::IndexOutOfRange {
                index: self.offset_unchecked(row, col, channel),
                len: self.count(),
            });
        }
        Ok(self.offset_unchecked(row, col, channel))
    }

    #[inline]
    pub(crate) const fn offset_unchecked(&self, row: usize, col: usize, channel: usize) -> usize {
        (row * self.width + col) * self.depth + channel
    }

    /// Fail with `ShapeMismatch` unless `other` equals `self`
    pub(crate) fn expect_eq(&self, other: &Shape) -> Result<()> {
        if self == other {
            Ok(())
        } else {
            Err(Error::ShapeMismatch {
                expected: self.dims(),
                got: other.dims(),
            })
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.depth)
    }
}
