//! Rearrangements: concatenation, index selection, repetition, padding,
//! sorting and grid splits.
//!
//! Selections that a stride can express (`take` of a single index or of an
//! arithmetic progression, `stretch`, `split_all`) return views; the rest
//! allocate a dense result.

use std::cmp::Ordering;

use smallvec::SmallVec;

use crate::dtype::Element;
use crate::layout::{StrideLayout, Strides};
use crate::order::Order;
use crate::shape::{Dims, Shape};
use crate::tensor::{dense_order, Tensor};
use crate::{Result, StridedError};

/// Ascending or descending order with NaN always last.
fn sort_ordering<T: Element>(a: T, b: T, asc: bool) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => {
            let o = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
            if asc {
                o
            } else {
                o.reverse()
            }
        }
    }
}

impl<T: Element> Tensor<T> {
    /// Join `parts` along `axis`. All parts have the same rank and agree on
    /// every other axis.
    pub(crate) fn concat(axis: usize, parts: &[Tensor<T>], order: Order) -> Result<Tensor<T>> {
        let first = parts
            .first()
            .ok_or_else(|| StridedError::InvalidArgument("nothing to concatenate".into()))?;
        first.shape().check_axis(axis)?;
        let mut dims = first.dims().to_vec();
        dims[axis] = 0;
        for p in parts {
            if p.rank() != first.rank() {
                return Err(StridedError::RankMismatch(p.rank(), first.rank()));
            }
            let agree = p
                .dims()
                .iter()
                .zip(first.dims())
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
            if !agree {
                return Err(StridedError::ShapeMismatch(p.dims().to_vec(), first.dims().to_vec()));
            }
            dims[axis] += p.dim(axis);
        }
        let order = dense_order("cat", order)?;
        let out = first.zeros_like::<T>(Shape::of(&dims)?, order)?;
        let mut start = 0;
        for p in parts {
            let end = start + p.dim(axis);
            let mut slot = out.narrow(axis, true, start, end)?;
            p.copy_to(&mut slot)?;
            start = end;
        }
        tracing::trace!(axis, parts = parts.len(), dims = ?dims, "concatenated");
        Ok(out)
    }

    /// Join equally shaped `parts` along a new axis inserted at `axis`.
    pub(crate) fn stack(axis: usize, parts: &[Tensor<T>], order: Order) -> Result<Tensor<T>> {
        let first = parts
            .first()
            .ok_or_else(|| StridedError::InvalidArgument("nothing to stack".into()))?;
        let lifted = parts
            .iter()
            .map(|p| {
                if p.dims() != first.dims() {
                    return Err(StridedError::ShapeMismatch(p.dims().to_vec(), first.dims().to_vec()));
                }
                p.unsqueeze(axis)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::concat(axis, &lifted, order)
    }

    // ========================================================================
    // Index selection
    // ========================================================================

    /// Slices of `axis` at `indices`, in the given sequence.
    ///
    /// One index, or indices forming a non-decreasing arithmetic
    /// progression, give a view (a zero step repeats one slice through a
    /// zero stride). Anything else is copied into a tensor dense in `order`.
    pub fn take(&self, axis: usize, indices: &[usize], order: Order) -> Result<Tensor<T>> {
        self.shape().check_axis(axis)?;
        let d = self.dim(axis);
        if indices.is_empty() {
            return Err(StridedError::InvalidArgument("take needs at least one index".into()));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= d) {
            return Err(StridedError::IndexOutOfBounds {
                index: vec![bad],
                dims: self.dims().to_vec(),
            });
        }
        if indices.len() == 1 {
            return self.narrow(axis, true, indices[0], indices[0] + 1);
        }
        let step = indices[1] as isize - indices[0] as isize;
        if step >= 0 && indices.windows(2).all(|w| w[1] as isize - w[0] as isize == step) {
            let mut dims: Dims = SmallVec::from_slice(self.dims());
            let mut strides: Strides = SmallVec::from_slice(self.layout.strides());
            let offset = self.layout.offset() as isize + indices[0] as isize * strides[axis];
            dims[axis] = indices.len();
            strides[axis] *= step;
            let layout = StrideLayout::from_parts(Shape::from_dims(dims), offset as usize, strides);
            return Ok(self.view(layout));
        }
        let parts = indices
            .iter()
            .map(|&i| self.narrow(axis, true, i, i + 1))
            .collect::<Result<Vec<_>>>()?;
        Self::concat(axis, &parts, order)
    }

    /// Every slice of `axis` except those at `indices`.
    pub fn rem(&self, axis: usize, indices: &[usize], order: Order) -> Result<Tensor<T>> {
        self.shape().check_axis(axis)?;
        let keep: Vec<usize> = (0..self.dim(axis)).filter(|i| !indices.contains(i)).collect();
        self.take(axis, &keep, order)
    }

    // ========================================================================
    // Repetition and padding
    // ========================================================================

    /// `n` copies joined along `axis`, or along a new axis at `axis` when
    /// `stack` is set.
    pub fn repeat(&self, axis: usize, n: usize, stack: bool, order: Order) -> Result<Tensor<T>> {
        if n == 0 {
            return Err(StridedError::InvalidArgument("repeat count must be positive".into()));
        }
        let parts = vec![self.clone(); n];
        if stack {
            Self::stack(axis, &parts, order)
        } else {
            Self::concat(axis, &parts, order)
        }
    }

    /// Repeat the whole tensor `repeats[i]` times along axis `i`.
    ///
    /// Shorter `repeats` are padded with ones on the left; longer ones
    /// prepend unit axes to the tensor. The result is dense in C order.
    pub fn tile(&self, repeats: &[usize]) -> Result<Tensor<T>> {
        if repeats.contains(&0) {
            return Err(StridedError::InvalidArgument("tile repeats must be positive".into()));
        }
        let mut layout = self.layout.clone();
        while layout.rank() < repeats.len() {
            layout = layout.unsqueeze(0)?;
        }
        let mut reps = vec![1usize; layout.rank() - repeats.len()];
        reps.extend_from_slice(repeats);

        // Each axis is preceded by a zero-stride axis of its repeat count.
        let (mut dims, mut strides) = (Dims::new(), Strides::new());
        let mut target = Vec::with_capacity(layout.rank());
        for ((&d, &s), &r) in layout.dims().iter().zip(layout.strides()).zip(&reps) {
            dims.extend_from_slice(&[r, d]);
            strides.extend_from_slice(&[0, s]);
            target.push(r * d);
        }
        if target.is_empty() {
            return self.copy(Order::C);
        }
        let spread = self.view(StrideLayout::from_parts(Shape::from_dims(dims), layout.offset(), strides));
        spread.copy(Order::C)?.reshape(&Shape::of(&target)?, Order::C)
    }

    /// Zero padding of `before` and `after` slices around `axis`.
    pub fn pad(&self, axis: usize, before: usize, after: usize) -> Result<Tensor<T>> {
        self.shape().check_axis(axis)?;
        let mut dims = self.dims().to_vec();
        dims[axis] += before + after;
        let out = self.zeros_like::<T>(Shape::of(&dims)?, Order::C)?;
        let mut slot = out.narrow(axis, true, before, before + self.dim(axis))?;
        self.copy_to(&mut slot)?;
        Ok(out)
    }

    // ========================================================================
    // Sorting
    // ========================================================================

    /// Sort every lane along `axis` in place. NaN goes last in either
    /// direction.
    pub fn sort_(&mut self, axis: usize, asc: bool) -> Result<&mut Self> {
        for lane in self.axis_lanes(axis)? {
            let mut values = lane.to_vec(Order::C);
            values.sort_by(|&a, &b| sort_ordering(a, b, asc));
            lane.write_runs(&values, Order::C);
        }
        Ok(self)
    }

    /// Sorted copy dense in `order`.
    pub fn sort(&self, axis: usize, asc: bool, order: Order) -> Result<Tensor<T>> {
        let mut out = self.copy(order)?;
        out.sort_(axis, asc)?;
        Ok(out)
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Insert unit axes so that they sit at `axes` in the result.
    pub fn stretch(&self, axes: &[usize]) -> Result<Tensor<T>> {
        let mut sorted = axes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != axes.len() {
            return Err(StridedError::InvalidArgument(format!("repeated axes in {axes:?}")));
        }
        let mut layout = self.layout.clone();
        for &a in &sorted {
            layout = layout.unsqueeze(a)?;
        }
        Ok(self.view(layout))
    }

    /// Grid of views: axis `i` is cut at the increasing starts
    /// `indexes[i]`, and one view is produced per combination of pieces,
    /// the last axis varying fastest.
    pub fn split_all(&self, keep_dim: bool, indexes: &[Vec<usize>]) -> Result<Vec<Tensor<T>>> {
        if indexes.len() != self.rank() {
            return Err(StridedError::RankMismatch(indexes.len(), self.rank()));
        }
        let rank = self.rank();
        if indexes.iter().any(Vec::is_empty) {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut pos = vec![0usize; rank];
        let (mut starts, mut ends) = (vec![0usize; rank], vec![0usize; rank]);
        loop {
            for axis in 0..rank {
                let cuts = &indexes[axis];
                starts[axis] = cuts[pos[axis]];
                ends[axis] = cuts.get(pos[axis] + 1).copied().unwrap_or(self.dim(axis));
            }
            out.push(self.narrow_all(keep_dim, &starts, &ends)?);

            let mut axis = rank;
            loop {
                if axis == 0 {
                    return Ok(out);
                }
                axis -= 1;
                pos[axis] += 1;
                if pos[axis] < indexes[axis].len() {
                    break;
                }
                pos[axis] = 0;
            }
        }
    }

    /// [`Tensor::split_all`] with pieces of `steps[i]` along axis `i`; the
    /// last piece of an axis may be shorter.
    pub fn chunk_all(&self, keep_dim: bool, steps: &[usize]) -> Result<Vec<Tensor<T>>> {
        if steps.len() != self.rank() {
            return Err(StridedError::RankMismatch(steps.len(), self.rank()));
        }
        if steps.contains(&0) {
            return Err(StridedError::InvalidArgument("chunk step must be positive".into()));
        }
        let indexes: Vec<Vec<usize>> = steps
            .iter()
            .enumerate()
            .map(|(axis, &step)| (0..self.dim(axis)).step_by(step).collect())
            .collect();
        self.split_all(keep_dim, &indexes)
    }
}

#[cfg(test)]
mod tests {
    use crate::manager::Manager;
    use crate::shape::Shape;
    use crate::{Order, StridedError, Tensor};

    fn m() -> Manager {
        Manager::default()
    }

    fn seq(dims: &[usize]) -> Tensor<f64> {
        m().seq(Shape::of(dims).unwrap(), Order::C).unwrap()
    }

    #[test]
    fn test_cat_and_stack() {
        let a = seq(&[2, 2]);
        let b = m().full(Shape::of(&[1, 2]).unwrap(), 9.0, Order::C).unwrap();
        let c = m().cat(0, &[a.clone(), b.clone()], Order::C).unwrap();
        assert_eq!(c.dims(), &[3, 2]);
        assert_eq!(c.to_vec(Order::C), vec![0.0, 1.0, 2.0, 3.0, 9.0, 9.0]);
        assert!(matches!(m().cat(1, &[a.clone(), b], Order::C), Err(StridedError::ShapeMismatch(_, _))));

        let v = seq(&[2]);
        let w = m().full(Shape::of(&[2]).unwrap(), 5.0, Order::C).unwrap();
        let s = m().stack(1, &[v, w], Order::F).unwrap();
        assert_eq!(s.dims(), &[2, 2]);
        assert!(s.layout().is_f_ordered());
        assert_eq!(s.to_vec(Order::C), vec![0.0, 5.0, 1.0, 5.0]);
        assert!(m().stack::<f64>(0, &[], Order::C).is_err());
    }

    #[test]
    fn test_take_views_and_copies() {
        let a = seq(&[3, 4]);
        let one = a.take(1, &[2], Order::C).unwrap();
        assert_eq!(one.dims(), &[3, 1]);
        assert_eq!(one.to_vec(Order::C), vec![2.0, 6.0, 10.0]);

        let even = a.take(1, &[0, 2], Order::C).unwrap();
        assert!(even.shares_storage(&a));
        assert_eq!(even.to_vec(Order::C), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);

        let same = a.take(1, &[1, 1], Order::C).unwrap();
        assert_eq!(same.layout().stride(1), 0);
        assert_eq!(same.to_vec(Order::C), vec![1.0, 1.0, 5.0, 5.0, 9.0, 9.0]);

        let back = a.take(0, &[2, 0], Order::C).unwrap();
        assert!(!back.shares_storage(&a));
        assert_eq!(back.sel(0, 0).unwrap().to_vec(Order::C), vec![8.0, 9.0, 10.0, 11.0]);

        assert!(matches!(a.take(0, &[], Order::C), Err(StridedError::InvalidArgument(_))));
        assert!(matches!(a.take(0, &[3], Order::C), Err(StridedError::IndexOutOfBounds { .. })));
    }

    #[test]
    fn test_rem() {
        let a = seq(&[3, 4]);
        let r = a.rem(1, &[1], Order::C).unwrap();
        assert_eq!(r.dims(), &[3, 3]);
        assert_eq!(r.to_vec(Order::C), vec![0.0, 2.0, 3.0, 4.0, 6.0, 7.0, 8.0, 10.0, 11.0]);
        let tail = a.rem(0, &[0], Order::C).unwrap();
        assert!(tail.shares_storage(&a));
        assert!(a.rem(0, &[0, 1, 2], Order::C).is_err());
    }

    #[test]
    fn test_repeat_and_tile() {
        let v = seq(&[2]);
        assert_eq!(v.repeat(0, 3, false, Order::C).unwrap().to_vec(Order::C), vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
        let s = v.repeat(0, 3, true, Order::C).unwrap();
        assert_eq!(s.dims(), &[3, 2]);
        assert!(v.repeat(0, 0, false, Order::C).is_err());

        let t = v.tile(&[2, 3]).unwrap();
        assert_eq!(t.dims(), &[2, 6]);
        assert_eq!(t.sel(0, 1).unwrap().to_vec(Order::C), vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
        let mt = seq(&[2, 2]).tile(&[2]).unwrap();
        assert_eq!(mt.dims(), &[2, 4]);
        assert_eq!(mt.to_vec(Order::C), vec![0.0, 1.0, 0.0, 1.0, 2.0, 3.0, 2.0, 3.0]);
        assert!(v.tile(&[0]).is_err());
    }

    #[test]
    fn test_pad() {
        let p = seq(&[2, 2]).pad(1, 1, 2).unwrap();
        assert_eq!(p.dims(), &[2, 5]);
        assert_eq!(
            p.to_vec(Order::C),
            vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0, 3.0, 0.0, 0.0]
        );
        assert!(seq(&[2]).pad(1, 1, 1).is_err());
    }

    #[test]
    fn test_sort_lanes_nan_last() {
        let mut a = m()
            .from_vec(Shape::of(&[2, 3]).unwrap(), vec![3.0, 1.0, 2.0, f64::NAN, 0.0, 5.0], Order::C)
            .unwrap();
        let desc = a.sort(1, false, Order::F).unwrap();
        assert!(desc.get(&[1, 2]).unwrap().is_nan());
        assert_eq!(desc.sel(0, 0).unwrap().to_vec(Order::C), vec![3.0, 2.0, 1.0]);
        assert_eq!(a.get(&[0, 0]).unwrap(), 3.0);

        a.sort_(1, true).unwrap();
        assert_eq!(a.sel(0, 0).unwrap().to_vec(Order::C), vec![1.0, 2.0, 3.0]);
        assert_eq!(a.get(&[1, 1]).unwrap(), 5.0);
        assert!(a.get(&[1, 2]).unwrap().is_nan());

        let b = m().from_vec(Shape::of(&[2, 2]).unwrap(), vec![4, 1, 3, 2], Order::C).unwrap();
        let mut col = b.transpose();
        col.sort_(1, true).unwrap();
        assert_eq!(b.to_vec(Order::C), vec![3, 1, 4, 2]);
    }

    #[test]
    fn test_stretch() {
        let a = seq(&[2, 3]);
        let s = a.stretch(&[2, 0]).unwrap();
        assert_eq!(s.dims(), &[1, 2, 1, 3]);
        assert!(s.shares_storage(&a));
        assert!(a.stretch(&[1, 1]).is_err());
    }

    #[test]
    fn test_split_all_and_chunk_all() {
        let a = seq(&[4, 3]);
        let parts = a.split_all(true, &[vec![0, 2], vec![0, 1]]).unwrap();
        let dims: Vec<Vec<usize>> = parts.iter().map(|p| p.dims().to_vec()).collect();
        assert_eq!(dims, vec![vec![2, 1], vec![2, 2], vec![2, 1], vec![2, 2]]);
        assert_eq!(parts[3].get(&[0, 0]).unwrap(), 7.0);
        assert!(matches!(a.split_all(true, &[vec![0]]), Err(StridedError::RankMismatch(1, 2))));

        let c = seq(&[3, 3]).chunk_all(true, &[2, 2]).unwrap();
        assert_eq!(c.len(), 4);
        assert_eq!(c[1].dims(), &[2, 1]);
        assert_eq!(c[3].to_vec(Order::C), vec![8.0]);
        assert!(seq(&[3, 3]).chunk_all(true, &[0, 1]).is_err());
    }
}
