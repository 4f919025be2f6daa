//! The [`Tensor`] facade.
//!
//! A tensor pairs a [`StrideLayout`] with a shared [`Storage`] and the
//! [`EngineConfig`] of the manager that created it. Structural operations in
//! this module return views over the same storage; computation lives in
//! [`compute`], axis reductions in [`axis`], products in [`linear`],
//! copies, reshapes and conversions in [`materialize`], and concatenation,
//! selection, sorting and padding in [`arrange`].

pub mod arrange;
pub mod axis;
pub mod compute;
pub mod linear;
pub mod materialize;

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::broadcast;
use crate::config::EngineConfig;
use crate::dtype::{DType, Element};
use crate::kernel::RawView;
use crate::layout::StrideLayout;
use crate::order::Order;
use crate::shape::Shape;
use crate::storage::Storage;
use crate::{Result, StridedError};

/// N-dimensional strided tensor.
///
/// Cloning a tensor is cheap and yields another view of the same storage.
#[derive(Clone)]
pub struct Tensor<T: Element> {
    layout: StrideLayout,
    storage: Storage<T>,
    config: Arc<EngineConfig>,
}

impl<T: Element> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("dtype", &T::DTYPE)
            .field("layout", &self.layout)
            .field("values", &self.to_vec(Order::C))
            .finish()
    }
}

/// Dense order for a new buffer. `A` has no layout to resolve against and
/// means `C`; `S` is rejected.
pub(crate) fn dense_order(op: &'static str, order: Order) -> Result<Order> {
    match order {
        Order::S => Err(StridedError::InvalidOrder { op, order }),
        Order::F => Ok(Order::F),
        _ => Ok(Order::C),
    }
}

impl<T: Element> Tensor<T> {
    // ========================================================================
    // Construction
    // ========================================================================

    pub(crate) fn from_parts(layout: StrideLayout, storage: Storage<T>, config: Arc<EngineConfig>) -> Self {
        Self {
            layout,
            storage,
            config,
        }
    }

    /// Dense tensor over `storage`, whose length must equal the shape size.
    pub(crate) fn dense_in(shape: Shape, order: Order, storage: Storage<T>, config: Arc<EngineConfig>) -> Result<Self> {
        let order = dense_order("dense", order)?;
        if storage.len() != shape.size() {
            return Err(StridedError::ShapeMismatch(vec![storage.len()], shape.dims().to_vec()));
        }
        Ok(Self::from_parts(StrideLayout::of_dense(shape, 0, order), storage, config))
    }

    pub(crate) fn zeros_in(shape: Shape, order: Order, config: Arc<EngineConfig>) -> Result<Self> {
        let storage = Storage::zeros(shape.size());
        Self::dense_in(shape, order, storage, config)
    }

    /// New zero tensor sharing this tensor's configuration.
    pub(crate) fn zeros_like<U: Element>(&self, shape: Shape, order: Order) -> Result<Tensor<U>> {
        Tensor::zeros_in(shape, order, self.config.clone())
    }

    /// Same storage, another layout.
    pub(crate) fn view(&self, layout: StrideLayout) -> Self {
        Self::from_parts(layout, self.storage.clone(), self.config.clone())
    }

    pub(crate) fn raw(&self) -> RawView<T> {
        RawView::new(self.storage.as_ptr(), self.layout.clone())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    #[inline]
    pub fn dim(&self, axis: usize) -> usize {
        self.layout.dim(axis)
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.layout.shape().is_scalar()
    }

    #[inline]
    pub fn layout(&self) -> &StrideLayout {
        &self.layout
    }

    #[inline]
    pub fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    #[inline]
    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// Whether both tensors read and write the same buffer.
    pub fn shares_storage(&self, other: &Tensor<T>) -> bool {
        self.storage.ptr_eq(&other.storage)
    }

    // ========================================================================
    // Element access
    // ========================================================================

    pub fn get(&self, index: &[usize]) -> Result<T> {
        Ok(self.storage.get(self.layout.pointer(index)?))
    }

    pub fn get_f64(&self, index: &[usize]) -> Result<f64> {
        self.get(index).map(Element::to_f64)
    }

    pub fn set(&mut self, index: &[usize], value: T) -> Result<()> {
        let p = self.layout.pointer(index)?;
        self.storage.set(p, value);
        Ok(())
    }

    /// Add `value` to the element at `index`.
    pub fn inc(&mut self, index: &[usize], value: T) -> Result<()> {
        let p = self.layout.pointer(index)?;
        self.storage.inc(p, value);
        Ok(())
    }

    fn check_ptr(&self, ptr: usize) -> Result<()> {
        if ptr >= self.storage.len() {
            return Err(StridedError::IndexOutOfBounds {
                index: vec![ptr],
                dims: vec![self.storage.len()],
            });
        }
        Ok(())
    }

    /// Read a raw storage position.
    pub fn ptr_get(&self, ptr: usize) -> Result<T> {
        self.check_ptr(ptr)?;
        Ok(self.storage.get(ptr))
    }

    pub fn ptr_set(&mut self, ptr: usize, value: T) -> Result<()> {
        self.check_ptr(ptr)?;
        self.storage.set(ptr, value);
        Ok(())
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Restrict `axis` to `[start, end)`.
    pub fn narrow(&self, axis: usize, keep_dim: bool, start: usize, end: usize) -> Result<Self> {
        Ok(self.view(self.layout.narrow(axis, keep_dim, start, end)?))
    }

    pub fn narrow_all(&self, keep_dim: bool, starts: &[usize], ends: &[usize]) -> Result<Self> {
        Ok(self.view(self.layout.narrow_all(keep_dim, starts, ends)?))
    }

    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        Ok(self.view(self.layout.permute(perm)?))
    }

    /// Reverse the order of all axes.
    pub fn transpose(&self) -> Self {
        self.view(self.layout.transpose())
    }

    /// Matrix transpose. Rank 0 and 1 tensors are returned as they are.
    pub fn t(&self) -> Result<Self> {
        match self.rank() {
            0 | 1 => Ok(self.clone()),
            2 => Ok(self.transpose()),
            r => Err(StridedError::RankMismatch(r, 2)),
        }
    }

    pub fn swap_axis(&self, a: usize, b: usize) -> Result<Self> {
        Ok(self.view(self.layout.swap_axis(a, b)?))
    }

    pub fn move_axis(&self, src: usize, dst: usize) -> Result<Self> {
        Ok(self.view(self.layout.move_axis(src, dst)?))
    }

    pub fn squeeze(&self) -> Self {
        self.view(self.layout.squeeze())
    }

    pub fn squeeze_axes(&self, axes: &[usize]) -> Result<Self> {
        Ok(self.view(self.layout.squeeze_axes(axes)?))
    }

    /// Insert a unit axis at `axis`.
    pub fn unsqueeze(&self, axis: usize) -> Result<Self> {
        Ok(self.view(self.layout.unsqueeze(axis)?))
    }

    /// Repeat a unit axis `size` times without copying.
    pub fn expand(&self, axis: usize, size: usize) -> Result<Self> {
        Ok(self.view(self.layout.expand(axis, size)?))
    }

    /// Read-only broadcast view with shape `shape`.
    pub fn broadcast_to(&self, shape: &Shape) -> Result<Self> {
        Ok(self.view(broadcast::promote_shape(&self.layout, shape)?))
    }

    /// Select `index` along `axis` and drop the axis.
    pub fn sel(&self, axis: usize, index: usize) -> Result<Self> {
        let narrowed = self.layout.narrow(axis, true, index, index + 1)?;
        Ok(self.view(narrowed.squeeze_axes(&[axis])?))
    }

    /// Consecutive slices of `step` along `axis`; the last may be shorter.
    pub fn chunk(&self, axis: usize, keep_dim: bool, step: usize) -> Result<Vec<Self>> {
        self.shape().check_axis(axis)?;
        if step == 0 {
            return Err(StridedError::InvalidArgument("chunk step must be positive".into()));
        }
        let d = self.dim(axis);
        (0..d)
            .step_by(step)
            .map(|s| self.narrow(axis, keep_dim, s, (s + step).min(d)))
            .collect()
    }

    /// Slices of `axis` starting at each of the increasing `indexes`; each
    /// slice ends where the next begins, the last at the end of the axis.
    pub fn split(&self, axis: usize, keep_dim: bool, indexes: &[usize]) -> Result<Vec<Self>> {
        self.shape().check_axis(axis)?;
        let d = self.dim(axis);
        let mut out = Vec::with_capacity(indexes.len());
        for (i, &start) in indexes.iter().enumerate() {
            let end = indexes.get(i + 1).copied().unwrap_or(d);
            out.push(self.narrow(axis, keep_dim, start, end)?);
        }
        Ok(out)
    }

    /// One view per index along `axis`.
    pub fn unbind(&self, axis: usize, keep_dim: bool) -> Result<Vec<Self>> {
        self.shape().check_axis(axis)?;
        (0..self.dim(axis))
            .map(|i| {
                if keep_dim {
                    self.narrow(axis, true, i, i + 1)
                } else {
                    self.sel(axis, i)
                }
            })
            .collect()
    }

    /// Rank-1 view of the main diagonal of a square matrix.
    pub(crate) fn diagonal_view(&self) -> Result<Self> {
        let (rows, cols) = match self.dims() {
            &[r, c] => (r, c),
            d => return Err(StridedError::RankMismatch(d.len(), 2)),
        };
        if rows != cols {
            return Err(StridedError::NonSquare { rows, cols });
        }
        let stride = self.layout.stride(0) + self.layout.stride(1);
        let layout = StrideLayout::from_parts(
            Shape::from_dims(SmallVec::from_slice(&[rows])),
            self.layout.offset(),
            SmallVec::from_slice(&[stride]),
        );
        Ok(self.view(layout))
    }
}
