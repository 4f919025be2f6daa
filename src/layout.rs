//! Stride layouts: shape + offset + per-axis strides into a flat buffer.
//!
//! A layout never owns data. Structural transforms (narrow, permute,
//! transpose, squeeze, stretch, compatible reshape) produce a new layout over
//! the same buffer, which is how views share storage.

use std::fmt;

use smallvec::SmallVec;

use crate::order::Order;
use crate::shape::{Dims, Shape};
use crate::{Result, StridedError};

pub(crate) type Strides = SmallVec<[isize; 8]>;

const C_DENSE: u8 = 1;
const F_DENSE: u8 = 2;

/// Row-major dense strides (last index varies fastest).
pub fn row_major_strides(dims: &[usize]) -> Vec<isize> {
    let mut strides = vec![1isize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1] as isize;
    }
    strides
}

/// Column-major dense strides (first index varies fastest).
pub fn col_major_strides(dims: &[usize]) -> Vec<isize> {
    let mut strides = vec![1isize; dims.len()];
    for i in 1..dims.len() {
        strides[i] = strides[i - 1] * dims[i - 1] as isize;
    }
    strides
}

/// Dense strides for `order`; `S` and `A` fall back to row-major.
pub fn dense_strides(dims: &[usize], order: Order) -> Vec<isize> {
    match order {
        Order::F => col_major_strides(dims),
        _ => row_major_strides(dims),
    }
}

fn is_dense_in(dims: &[usize], strides: &[isize], axes: impl Iterator<Item = usize>) -> bool {
    let mut expected = 1isize;
    for i in axes {
        if dims[i] == 1 {
            continue;
        }
        if strides[i] != expected {
            return false;
        }
        expected *= dims[i] as isize;
    }
    true
}

fn compute_flags(dims: &[usize], strides: &[isize]) -> u8 {
    let mut flags = 0;
    if is_dense_in(dims, strides, (0..dims.len()).rev()) {
        flags |= C_DENSE;
    }
    if is_dense_in(dims, strides, 0..dims.len()) {
        flags |= F_DENSE;
    }
    flags
}

/// Shape, storage offset and per-axis strides of a tensor view.
#[derive(Clone, PartialEq, Eq)]
pub struct StrideLayout {
    shape: Shape,
    offset: usize,
    strides: Strides,
    flags: u8,
}

impl fmt::Debug for StrideLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrideLayout")
            .field("dims", &self.shape.dims())
            .field("offset", &self.offset)
            .field("strides", &self.strides.as_slice())
            .finish()
    }
}

impl StrideLayout {
    /// Build a layout from raw parts. The caller validates bounds against a
    /// buffer with [`StrideLayout::validate`].
    pub fn of(shape: Shape, offset: usize, strides: &[isize]) -> Result<Self> {
        if strides.len() != shape.rank() {
            return Err(StridedError::StrideLengthMismatch);
        }
        Ok(Self::from_parts(shape, offset, SmallVec::from_slice(strides)))
    }

    pub fn of_dense(shape: Shape, offset: usize, order: Order) -> Self {
        let strides = dense_strides(shape.dims(), order);
        Self::from_parts(shape, offset, SmallVec::from_vec(strides))
    }

    pub fn scalar(offset: usize) -> Self {
        Self::from_parts(Shape::scalar(), offset, SmallVec::new())
    }

    pub(crate) fn from_parts(shape: Shape, offset: usize, strides: Strides) -> Self {
        let flags = compute_flags(shape.dims(), &strides);
        Self {
            shape,
            offset,
            strides,
            flags,
        }
    }

    fn with(&self, dims: Dims, offset: usize, strides: Strides) -> Self {
        Self::from_parts(Shape::from_dims(dims), offset, strides)
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    #[inline]
    pub fn dim(&self, axis: usize) -> usize {
        self.shape.dim(axis)
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    #[inline]
    pub fn stride(&self, axis: usize) -> isize {
        self.strides[axis]
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.shape.size()
    }

    #[inline]
    pub fn is_c_ordered(&self) -> bool {
        self.flags & C_DENSE != 0
    }

    #[inline]
    pub fn is_f_ordered(&self) -> bool {
        self.flags & F_DENSE != 0
    }

    /// Dense in either C or F order.
    #[inline]
    pub fn is_dense(&self) -> bool {
        self.flags != 0
    }

    /// Whether distinct indices always reach distinct positions.
    ///
    /// Conservative: with the non-unit axes sorted by stride magnitude, each
    /// stride must step past the whole extent spanned by the axes below it.
    /// Layouts failing the test may still be injective; kernels only use it
    /// to decide whether writes can be split across threads.
    pub fn is_injective(&self) -> bool {
        if self.is_dense() {
            return true;
        }
        let mut axes: SmallVec<[(usize, usize); 8]> = self
            .dims()
            .iter()
            .zip(&self.strides)
            .filter(|(&d, _)| d > 1)
            .map(|(&d, &s)| (s.unsigned_abs(), d))
            .collect();
        axes.sort_unstable();
        let mut extent = 0usize;
        for (stride, dim) in axes {
            if stride <= extent {
                return false;
            }
            extent += stride * (dim - 1);
        }
        true
    }

    /// Cheapest traversal for this layout: `F` when F-dense, `C` when C-dense,
    /// `S` otherwise.
    pub fn storage_fast_order(&self) -> Order {
        if self.is_f_ordered() {
            Order::F
        } else if self.is_c_ordered() {
            Order::C
        } else {
            Order::S
        }
    }

    /// Resolve `A` against this layout; other orders pass through.
    pub fn resolve_order(&self, order: Order) -> Order {
        match order {
            Order::A => {
                if self.is_f_ordered() && !self.is_c_ordered() {
                    Order::F
                } else {
                    Order::C
                }
            }
            other => other,
        }
    }

    /// Dims without `axis`.
    pub(crate) fn narrow_dims(&self, axis: usize) -> Dims {
        self.shape.narrow_dims(axis)
    }

    /// Strides without `axis`.
    pub(crate) fn narrow_strides(&self, axis: usize) -> Strides {
        self.strides
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != axis)
            .map(|(_, &s)| s)
            .collect()
    }

    // ========================================================================
    // Pointer arithmetic
    // ========================================================================

    /// Storage position of a multi-index, bounds checked.
    pub fn pointer(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.rank() || index.iter().zip(self.dims()).any(|(&i, &d)| i >= d) {
            return Err(StridedError::IndexOutOfBounds {
                index: index.to_vec(),
                dims: self.dims().to_vec(),
            });
        }
        Ok(self.pointer_unchecked(index))
    }

    #[inline]
    pub(crate) fn pointer_unchecked(&self, index: &[usize]) -> usize {
        let mut p = self.offset as isize;
        for (&i, &s) in index.iter().zip(self.strides.iter()) {
            p += i as isize * s;
        }
        p as usize
    }

    /// Smallest and largest storage position reachable through this layout.
    pub fn pointer_span(&self) -> Result<(usize, usize)> {
        let mut lo = self.offset as isize;
        let mut hi = self.offset as isize;
        for (&d, &s) in self.dims().iter().zip(self.strides.iter()) {
            let end = s
                .checked_mul(d as isize - 1)
                .ok_or(StridedError::OffsetOverflow)?;
            if end >= 0 {
                hi = hi.checked_add(end).ok_or(StridedError::OffsetOverflow)?;
            } else {
                lo = lo.checked_add(end).ok_or(StridedError::OffsetOverflow)?;
            }
        }
        if lo < 0 {
            return Err(StridedError::OffsetOverflow);
        }
        Ok((lo as usize, hi as usize))
    }

    /// Check that every reachable position lies inside a buffer of `len`.
    pub fn validate(&self, len: usize) -> Result<()> {
        let (_, hi) = self.pointer_span()?;
        if hi >= len {
            return Err(StridedError::OffsetOverflow);
        }
        Ok(())
    }

    // ========================================================================
    // Structural transforms
    // ========================================================================

    /// Restrict `axis` to `[start, end)`. A length-1 result axis is dropped
    /// unless `keep_dim`.
    pub fn narrow(&self, axis: usize, keep_dim: bool, start: usize, end: usize) -> Result<Self> {
        self.shape.check_axis(axis)?;
        if start >= end || end > self.dim(axis) {
            return Err(StridedError::IndexOutOfBounds {
                index: vec![start, end],
                dims: self.dims().to_vec(),
            });
        }
        let offset = (self.offset as isize + start as isize * self.strides[axis]) as usize;
        let mut dims: Dims = SmallVec::from_slice(self.dims());
        let mut strides = self.strides.clone();
        if !keep_dim && end - start == 1 && self.rank() > 1 {
            dims.remove(axis);
            strides.remove(axis);
        } else {
            dims[axis] = end - start;
        }
        Ok(self.with(dims, offset, strides))
    }

    /// Narrow every axis at once.
    pub fn narrow_all(&self, keep_dim: bool, starts: &[usize], ends: &[usize]) -> Result<Self> {
        if starts.len() != self.rank() || ends.len() != self.rank() {
            return Err(StridedError::RankMismatch(starts.len(), self.rank()));
        }
        let mut offset = self.offset as isize;
        let mut dims = Dims::new();
        let mut strides = Strides::new();
        for axis in 0..self.rank() {
            let (s, e) = (starts[axis], ends[axis]);
            if s >= e || e > self.dim(axis) {
                return Err(StridedError::IndexOutOfBounds {
                    index: vec![s, e],
                    dims: self.dims().to_vec(),
                });
            }
            offset += s as isize * self.strides[axis];
            if keep_dim || e - s > 1 {
                dims.push(e - s);
                strides.push(self.strides[axis]);
            }
        }
        if dims.is_empty() {
            dims.push(1);
            strides.push(1);
        }
        Ok(self.with(dims, offset as usize, strides))
    }

    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        let rank = self.rank();
        if perm.len() != rank {
            return Err(StridedError::RankMismatch(perm.len(), rank));
        }
        let mut seen = vec![false; rank];
        for &p in perm {
            if p >= rank || seen[p] {
                return Err(StridedError::InvalidAxis { axis: p, rank });
            }
            seen[p] = true;
        }
        let dims = perm.iter().map(|&p| self.dim(p)).collect();
        let strides = perm.iter().map(|&p| self.strides[p]).collect();
        Ok(self.with(dims, self.offset, strides))
    }

    /// Reverse all axes.
    pub fn transpose(&self) -> Self {
        let dims = self.dims().iter().rev().copied().collect();
        let strides = self.strides.iter().rev().copied().collect();
        self.with(dims, self.offset, strides)
    }

    pub fn swap_axis(&self, a: usize, b: usize) -> Result<Self> {
        self.shape.check_axis(a)?;
        self.shape.check_axis(b)?;
        let mut dims: Dims = SmallVec::from_slice(self.dims());
        let mut strides = self.strides.clone();
        dims.swap(a, b);
        strides.swap(a, b);
        Ok(self.with(dims, self.offset, strides))
    }

    /// Move axis `src` to position `dst`, shifting the axes between them.
    pub fn move_axis(&self, src: usize, dst: usize) -> Result<Self> {
        self.shape.check_axis(src)?;
        self.shape.check_axis(dst)?;
        let mut dims: Dims = SmallVec::from_slice(self.dims());
        let mut strides = self.strides.clone();
        let d = dims.remove(src);
        let s = strides.remove(src);
        dims.insert(dst, d);
        strides.insert(dst, s);
        Ok(self.with(dims, self.offset, strides))
    }

    /// Drop every unit axis. An all-unit layout collapses to rank 0.
    pub fn squeeze(&self) -> Self {
        let mut dims = Dims::new();
        let mut strides = Strides::new();
        for (&d, &s) in self.dims().iter().zip(self.strides.iter()) {
            if d != 1 {
                dims.push(d);
                strides.push(s);
            }
        }
        self.with(dims, self.offset, strides)
    }

    /// Drop the listed axes when they have size 1; other axes are kept.
    pub fn squeeze_axes(&self, axes: &[usize]) -> Result<Self> {
        for &a in axes {
            self.shape.check_axis(a)?;
        }
        let mut dims = Dims::new();
        let mut strides = Strides::new();
        for (i, (&d, &s)) in self.dims().iter().zip(self.strides.iter()).enumerate() {
            if d == 1 && axes.contains(&i) {
                continue;
            }
            dims.push(d);
            strides.push(s);
        }
        Ok(self.with(dims, self.offset, strides))
    }

    /// Insert a unit axis with stride 0 at `axis` (`axis <= rank`).
    pub fn unsqueeze(&self, axis: usize) -> Result<Self> {
        if axis > self.rank() {
            return Err(StridedError::InvalidAxis {
                axis,
                rank: self.rank(),
            });
        }
        let mut dims: Dims = SmallVec::from_slice(self.dims());
        let mut strides = self.strides.clone();
        dims.insert(axis, 1);
        strides.insert(axis, 0);
        Ok(self.with(dims, self.offset, strides))
    }

    /// Repeat a unit axis `size` times through a zero stride.
    pub fn expand(&self, axis: usize, size: usize) -> Result<Self> {
        self.shape.check_axis(axis)?;
        if self.dim(axis) != 1 || size == 0 {
            return Err(StridedError::ShapeMismatch(
                self.dims().to_vec(),
                vec![size],
            ));
        }
        let mut dims: Dims = SmallVec::from_slice(self.dims());
        let mut strides = self.strides.clone();
        dims[axis] = size;
        strides[axis] = 0;
        Ok(self.with(dims, self.offset, strides))
    }

    /// Layout whose axis 0 is the fastest axis of a traversal in `order`.
    ///
    /// `C` reverses the axes, `F` keeps them and `S` sorts them by absolute
    /// stride. With `compact`, unit axes are dropped and neighbouring axes
    /// that are contiguous with each other are merged; the traversal
    /// sequence is unchanged by compaction.
    pub fn fortran_layout(&self, order: Order, compact: bool) -> Self {
        let rank = self.rank();
        let mut axes: Vec<usize> = match order {
            Order::F => (0..rank).collect(),
            Order::S => {
                let mut a: Vec<usize> = (0..rank).collect();
                a.sort_by_key(|&i| (self.strides[i].unsigned_abs(), i));
                a
            }
            Order::A => match self.resolve_order(Order::A) {
                Order::F => (0..rank).collect(),
                _ => (0..rank).rev().collect(),
            },
            Order::C => (0..rank).rev().collect(),
        };
        if compact {
            axes.retain(|&i| self.dim(i) != 1);
        }

        let mut dims = Dims::new();
        let mut strides = Strides::new();
        for &i in &axes {
            let (d, s) = (self.dim(i), self.strides[i]);
            if compact {
                if let (Some(ld), Some(&ls)) = (dims.last_mut(), strides.last()) {
                    if s == *ld as isize * ls {
                        *ld *= d;
                        continue;
                    }
                }
            }
            dims.push(d);
            strides.push(s);
        }
        if dims.is_empty() {
            dims.push(1);
            strides.push(1);
        }
        self.with(dims, self.offset, strides)
    }

    /// Reinterpret this layout with `target` dims without moving data.
    ///
    /// Succeeds only when the current layout, traversed in `order`, visits
    /// storage in a sequence that the target shape can reproduce with
    /// strides. `S` is not a valid reshape order.
    pub fn attempt_reshape(&self, target: &Shape, order: Order) -> Result<Option<Self>> {
        if target.size() != self.size() {
            return Err(StridedError::ReshapeSize {
                from: self.dims().to_vec(),
                to: target.dims().to_vec(),
            });
        }
        let order = match self.resolve_order(order) {
            Order::S => {
                return Err(StridedError::InvalidOrder {
                    op: "reshape",
                    order: Order::S,
                })
            }
            o => o,
        };
        if target.is_scalar() {
            return Ok(Some(StrideLayout::scalar(self.offset)));
        }

        // Work in C order; F is handled by reversing axes on both sides.
        let (old_dims, old_strides, new_dims): (Vec<usize>, Vec<isize>, Vec<usize>) = match order
        {
            Order::F => (
                self.dims().iter().rev().copied().collect(),
                self.strides.iter().rev().copied().collect(),
                target.dims().iter().rev().copied().collect(),
            ),
            _ => (
                self.dims().to_vec(),
                self.strides.to_vec(),
                target.dims().to_vec(),
            ),
        };
        let Some(mut new_strides) = reshape_strides_c(&old_dims, &old_strides, &new_dims) else {
            return Ok(None);
        };
        if order == Order::F {
            new_strides.reverse();
        }
        Ok(Some(Self::from_parts(
            target.clone(),
            self.offset,
            SmallVec::from_vec(new_strides),
        )))
    }
}

/// Row-major stride-compatible reshape. Returns `None` when a copy is needed.
fn reshape_strides_c(old_dims: &[usize], old_strides: &[isize], new_dims: &[usize]) -> Option<Vec<isize>> {
    let (od, os): (Vec<usize>, Vec<isize>) = old_dims
        .iter()
        .zip(old_strides)
        .filter(|(&d, _)| d != 1)
        .map(|(&d, &s)| (d, s))
        .unzip();
    let mut ns = vec![0isize; new_dims.len()];

    let (mut oi, mut oj) = (0usize, 1usize);
    let (mut ni, mut nj) = (0usize, 1usize);
    while ni < new_dims.len() && oi < od.len() {
        let mut np = new_dims[ni];
        let mut op = od[oi];
        while np != op {
            if np < op {
                np *= new_dims[nj];
                nj += 1;
            } else {
                op *= od[oj];
                oj += 1;
            }
        }
        for ok in oi..oj - 1 {
            if os[ok] != od[ok + 1] as isize * os[ok + 1] {
                return None;
            }
        }
        ns[nj - 1] = os[oj - 1];
        for nk in (ni + 1..nj).rev() {
            ns[nk - 1] = ns[nk] * new_dims[nk] as isize;
        }
        ni = nj;
        nj += 1;
        oi = oj;
        oj += 1;
    }

    // Trailing unit axes.
    let last = if ni >= 1 { ns[ni - 1] } else { 1 };
    for s in ns.iter_mut().skip(ni) {
        *s = last;
    }
    Some(ns)
}
