//! Copies, reshapes, conversions and index-driven moves.

use crate::copy;
use crate::dtype::{self, Element};
use crate::iter::{IndexIterator, StrideLoopDescriptor};
use crate::order::Order;
use crate::shape::Shape;
use crate::storage::Storage;
use crate::tensor::Tensor;
use crate::{Result, StridedError};

impl<T: Element> Tensor<T> {
    /// Dense copy in `order`; `A` follows this tensor's layout.
    pub fn copy(&self, order: Order) -> Result<Tensor<T>> {
        let order = match self.layout.resolve_order(order) {
            Order::S => return Err(StridedError::InvalidOrder { op: "copy", order }),
            o => o,
        };
        let out = self.zeros_like::<T>(self.shape().clone(), order)?;
        self.write_into(&out)?;
        Ok(out)
    }

    /// Copy every element into `dest`, which must have the same shape.
    /// `dest` may share storage with this tensor.
    pub fn copy_to(&self, dest: &mut Tensor<T>) -> Result<()> {
        if self.dims() != dest.dims() {
            return Err(StridedError::ShapeMismatch(self.dims().to_vec(), dest.dims().to_vec()));
        }
        if self.shares_storage(dest) {
            if self.layout == dest.layout {
                return Ok(());
            }
            return self.copy(Order::C)?.write_into(dest);
        }
        self.write_into(dest)
    }

    fn write_into(&self, dest: &Tensor<T>) -> Result<()> {
        if self.is_scalar() {
            dest.storage.set(dest.layout.offset(), self.storage.get(self.layout.offset()));
            return Ok(());
        }
        copy::copy_into(&dest.raw(), &self.raw(), &self.config)
    }

    /// Traversal of this layout in `order`, grouped in storage lanes.
    fn lane_runs(&self, order: Order) -> StrideLoopDescriptor {
        let lanes = if self.storage.supports_simd() { T::DTYPE.lanes() } else { 1 };
        StrideLoopDescriptor::of(&self.layout, self.layout.resolve_order(order), lanes)
    }

    /// Elements in the traversal `order`.
    pub fn to_vec(&self, order: Order) -> Vec<T> {
        let desc = self.lane_runs(order);
        let mut out = vec![T::zero(); desc.size()];
        if desc.bound == 0 {
            return out;
        }
        for (run, chunk) in desc.runs().zip(out.chunks_exact_mut(desc.bound)) {
            let (head, tail) = chunk.split_at_mut(run.simd_bound);
            for (g, group) in head.chunks_exact_mut(run.lanes).enumerate() {
                let p = run.position(g * run.lanes);
                if desc.simd_idx.is_empty() {
                    self.storage.get_lanes(p, 1, group);
                } else {
                    self.storage.get_lanes_mapped(p, &desc.simd_idx, group);
                }
            }
            for (j, v) in tail.iter_mut().enumerate() {
                *v = self.storage.get(run.position(run.simd_bound + j));
            }
        }
        out
    }

    /// Store `values`, given in the traversal `order`, into this layout.
    /// Panics when `values` is shorter than the tensor.
    pub(crate) fn write_runs(&self, values: &[T], order: Order) {
        let desc = self.lane_runs(order);
        if desc.bound == 0 {
            return;
        }
        for (run, chunk) in desc.runs().zip(values.chunks_exact(desc.bound)) {
            let (head, tail) = chunk.split_at(run.simd_bound);
            for (g, group) in head.chunks_exact(run.lanes).enumerate() {
                let p = run.position(g * run.lanes);
                if desc.simd_idx.is_empty() {
                    self.storage.set_lanes(p, 1, group);
                } else {
                    self.storage.set_lanes_mapped(p, &desc.simd_idx, group);
                }
            }
            for (j, &v) in tail.iter().enumerate() {
                self.storage.set(run.position(run.simd_bound + j), v);
            }
        }
    }

    /// View with another shape when the strides allow it, otherwise a copy
    /// dense in `order` and reshaped.
    pub fn reshape(&self, shape: &Shape, order: Order) -> Result<Tensor<T>> {
        if let Some(layout) = self.layout.attempt_reshape(shape, order)? {
            return Ok(self.view(layout));
        }
        tracing::debug!(from = ?self.dims(), to = ?shape.dims(), "reshape needs a copy");
        let order = self.layout.resolve_order(order);
        let dense = self.copy(order)?;
        match dense.layout.attempt_reshape(shape, order)? {
            Some(layout) => Ok(dense.view(layout)),
            None => Err(StridedError::ReshapeSize {
                from: self.dims().to_vec(),
                to: shape.dims().to_vec(),
            }),
        }
    }

    /// Rank-1 copy of all elements in `order`.
    pub fn flatten(&self, order: Order) -> Result<Tensor<T>> {
        let order = self.layout.resolve_order(order);
        let dense = self.copy(order)?;
        dense.reshape(&Shape::of(&[self.size()])?, order)
    }

    /// Rank-1 view in `order` when possible, a copy otherwise.
    pub fn ravel(&self, order: Order) -> Result<Tensor<T>> {
        self.reshape(&Shape::of(&[self.size()])?, order)
    }

    /// Element-wise conversion into a new C-ordered tensor of `U`.
    pub fn cast<U: Element>(&self) -> Result<Tensor<U>> {
        let values: Vec<U> = self.to_vec(Order::C).into_iter().map(dtype::convert).collect();
        Tensor::dense_in(self.shape().clone(), Order::C, Storage::from_vec(values), self.config.clone())
    }

    /// Same shape and every pair of elements within `tolerance`. NaN equals NaN.
    pub fn deep_equals(&self, other: &Tensor<T>, tolerance: f64) -> bool {
        if self.dims() != other.dims() {
            return false;
        }
        self.to_vec(Order::C)
            .into_iter()
            .zip(other.to_vec(Order::C))
            .all(|(a, b)| match (a.is_nan(), b.is_nan()) {
                (true, true) => true,
                (false, false) => (a.to_f64() - b.to_f64()).abs() <= tolerance,
                _ => false,
            })
    }

    // ========================================================================
    // Index-driven moves
    // ========================================================================

    /// Position in this tensor of `idx` with the `axis` coordinate replaced
    /// by `at`.
    fn indexed_pointer(&self, idx: &[usize], axis: usize, at: i32) -> Result<usize> {
        let mut target = idx.to_vec();
        target[axis] = usize::try_from(at).map_err(|_| StridedError::IndexOutOfBounds {
            index: idx.to_vec(),
            dims: self.dims().to_vec(),
        })?;
        self.layout.pointer(&target)
    }

    fn check_index_tensor(&self, axis: usize, index: &Tensor<i32>) -> Result<()> {
        self.shape().check_axis(axis)?;
        if index.rank() != self.rank() {
            return Err(StridedError::RankMismatch(index.rank(), self.rank()));
        }
        Ok(())
    }

    /// `out[idx] = self[idx with idx[axis] = index[idx]]`; the result has
    /// the shape of `index`.
    pub fn gather(&self, axis: usize, index: &Tensor<i32>) -> Result<Tensor<T>> {
        self.check_index_tensor(axis, index)?;
        let mut values = Vec::with_capacity(index.size());
        for idx in IndexIterator::of(index.shape(), Order::C) {
            let p = self.indexed_pointer(&idx, axis, index.get(&idx)?)?;
            values.push(self.storage.get(p));
        }
        Tensor::dense_in(index.shape().clone(), Order::C, Storage::from_vec(values), self.config.clone())
    }

    /// `self[idx with idx[axis] = index[idx]] = src[idx]` for every index of
    /// `index`, which must have the shape of `src`.
    pub fn scatter_(&mut self, axis: usize, index: &Tensor<i32>, src: &Tensor<T>) -> Result<&mut Self> {
        self.check_index_tensor(axis, index)?;
        if index.dims() != src.dims() {
            return Err(StridedError::ShapeMismatch(index.dims().to_vec(), src.dims().to_vec()));
        }
        let src = src.copy(Order::C)?;
        for idx in IndexIterator::of(index.shape(), Order::C) {
            let p = self.indexed_pointer(&idx, axis, index.get(&idx)?)?;
            self.storage.set(p, src.get(&idx)?);
        }
        Ok(self)
    }
}
