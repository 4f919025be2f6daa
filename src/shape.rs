//! Immutable dimension vectors.

use std::fmt;

use smallvec::SmallVec;

use crate::order::Order;
use crate::{Result, StridedError};

pub(crate) type Dims = SmallVec<[usize; 8]>;

/// Ordered per-axis sizes of a tensor.
///
/// Every dimension is strictly positive and a regular shape has rank >= 1.
/// Rank 0 is the distinct [`Shape::scalar`] case.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Dims,
}

impl Shape {
    pub fn of(dims: &[usize]) -> Result<Self> {
        if dims.is_empty() || dims.iter().any(|&d| d == 0) {
            return Err(StridedError::InvalidShape(dims.to_vec()));
        }
        Ok(Self {
            dims: SmallVec::from_slice(dims),
        })
    }

    /// The rank-0 shape of a single value.
    pub fn scalar() -> Self {
        Self {
            dims: SmallVec::new(),
        }
    }

    pub(crate) fn from_dims(dims: Dims) -> Self {
        debug_assert!(dims.iter().all(|&d| d > 0));
        Self { dims }
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[inline]
    pub fn dim(&self, axis: usize) -> usize {
        self.dims[axis]
    }

    /// Number of elements; 1 for the scalar shape.
    #[inline]
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Dimensions with `axis` removed.
    pub fn narrow_dims(&self, axis: usize) -> Dims {
        self.dims
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != axis)
            .map(|(_, &d)| d)
            .collect()
    }

    /// Linear position of a multi-index under the given dense order.
    pub fn position(&self, order: Order, index: &[usize]) -> usize {
        let mut pos = 0usize;
        match order {
            Order::F => {
                for i in (0..self.rank()).rev() {
                    pos = pos * self.dims[i] + index[i];
                }
            }
            _ => {
                for i in 0..self.rank() {
                    pos = pos * self.dims[i] + index[i];
                }
            }
        }
        pos
    }

    /// Multi-index of a linear position under the given dense order.
    pub fn index(&self, order: Order, mut pos: usize) -> Vec<usize> {
        let mut index = vec![0usize; self.rank()];
        match order {
            Order::F => {
                for i in 0..self.rank() {
                    index[i] = pos % self.dims[i];
                    pos /= self.dims[i];
                }
            }
            _ => {
                for i in (0..self.rank()).rev() {
                    index[i] = pos % self.dims[i];
                    pos /= self.dims[i];
                }
            }
        }
        index
    }

    pub(crate) fn check_axis(&self, axis: usize) -> Result<()> {
        if axis >= self.rank() {
            return Err(StridedError::InvalidAxis {
                axis,
                rank: self.rank(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape{:?}", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims.as_slice())
    }
}

impl TryFrom<&[usize]> for Shape {
    type Error = StridedError;

    fn try_from(dims: &[usize]) -> Result<Self> {
        Shape::of(dims)
    }
}

impl<const N: usize> TryFrom<[usize; N]> for Shape {
    type Error = StridedError;

    fn try_from(dims: [usize; N]) -> Result<Self> {
        Shape::of(&dims)
    }
}
