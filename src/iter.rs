//! Traversal of a single layout.
//!
//! - [`PointerIterator`] walks storage positions one at a time in a logical order.
//! - [`StrideLoopDescriptor`] splits the same traversal into uniform-step runs,
//!   the unit of work for single-operand kernels.
//! - [`IndexIterator`] enumerates multi-indices for gather/scatter.

use crate::layout::StrideLayout;
use crate::order::Order;
use crate::shape::Shape;

// ============================================================================
// PointerIterator
// ============================================================================

/// Storage positions of a layout in a traversal order.
///
/// The iterator is finite and cannot be restarted; build a new one to walk
/// the layout again.
#[derive(Debug, Clone)]
pub enum PointerIterator {
    /// The traversal is a single arithmetic progression.
    Dense {
        next: isize,
        step: isize,
        remaining: usize,
    },
    /// Odometer over a compacted layout whose axis 0 varies fastest.
    Stride {
        dims: Vec<usize>,
        strides: Vec<isize>,
        index: Vec<usize>,
        ptr: isize,
        remaining: usize,
    },
}

impl PointerIterator {
    pub fn of(layout: &StrideLayout, order: Order) -> Self {
        let fl = layout.fortran_layout(order, true);
        let remaining = layout.size();
        if fl.rank() == 1 {
            return PointerIterator::Dense {
                next: fl.offset() as isize,
                step: fl.stride(0),
                remaining,
            };
        }
        PointerIterator::Stride {
            dims: fl.dims().to_vec(),
            strides: fl.strides().to_vec(),
            index: vec![0; fl.rank()],
            ptr: fl.offset() as isize,
            remaining,
        }
    }
}

impl Iterator for PointerIterator {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        match self {
            PointerIterator::Dense {
                next,
                step,
                remaining,
            } => {
                if *remaining == 0 {
                    return None;
                }
                let p = *next;
                *next += *step;
                *remaining -= 1;
                Some(p as usize)
            }
            PointerIterator::Stride {
                dims,
                strides,
                index,
                ptr,
                remaining,
            } => {
                if *remaining == 0 {
                    return None;
                }
                let p = *ptr;
                *remaining -= 1;
                if *remaining > 0 {
                    for axis in 0..dims.len() {
                        index[axis] += 1;
                        *ptr += strides[axis];
                        if index[axis] < dims[axis] {
                            break;
                        }
                        *ptr -= dims[axis] as isize * strides[axis];
                        index[axis] = 0;
                    }
                }
                Some(p as usize)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = match self {
            PointerIterator::Dense { remaining, .. } | PointerIterator::Stride { remaining, .. } => {
                *remaining
            }
        };
        (n, Some(n))
    }
}

impl ExactSizeIterator for PointerIterator {}

// ============================================================================
// StrideLoopDescriptor
// ============================================================================

/// One uniform-step run of storage positions.
///
/// Positions `[0, simd_bound)` come in whole groups of `lanes`; the rest of
/// the run is the scalar tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub offset: usize,
    pub len: usize,
    pub step: isize,
    pub lanes: usize,
    pub simd_bound: usize,
}

impl Run {
    #[inline]
    pub fn position(&self, i: usize) -> usize {
        (self.offset as isize + i as isize * self.step) as usize
    }
}

#[inline]
fn simd_bound(len: usize, lanes: usize) -> usize {
    if lanes > 1 {
        len - len % lanes
    } else {
        0
    }
}

/// A traversal of a layout as a list of runs with a common length and step.
///
/// Runs are listed in traversal order, so the logical position of element
/// `j` in run `r` is `r * bound + j`. Positions `[0, simd_bound)` of each
/// run form whole groups of `lanes` elements; the rest is the scalar tail.
#[derive(Debug, Clone)]
pub struct StrideLoopDescriptor {
    pub offsets: Vec<usize>,
    pub bound: usize,
    pub step: isize,
    pub lanes: usize,
    pub simd_bound: usize,
    /// Per-lane element offsets for a non-unit step; empty when `step == 1`.
    pub simd_idx: Vec<isize>,
}

impl StrideLoopDescriptor {
    /// `lanes == 1` disables the vector bound; kernels pass
    /// [`crate::simd::lanes`], which is 1 when SIMD is unavailable.
    pub fn of(layout: &StrideLayout, order: Order, lanes: usize) -> Self {
        let fl = layout.fortran_layout(order, true);
        let bound = fl.dim(0);
        let step = fl.stride(0);

        let outer_dims = &fl.dims()[1..];
        let outer_strides = &fl.strides()[1..];
        let count: usize = outer_dims.iter().product();
        let mut offsets = Vec::with_capacity(count);
        let mut index = vec![0usize; outer_dims.len()];
        let mut ptr = fl.offset() as isize;
        for _ in 0..count {
            offsets.push(ptr as usize);
            for axis in 0..outer_dims.len() {
                index[axis] += 1;
                ptr += outer_strides[axis];
                if index[axis] < outer_dims[axis] {
                    break;
                }
                ptr -= outer_dims[axis] as isize * outer_strides[axis];
                index[axis] = 0;
            }
        }

        let lanes = lanes.max(1);
        let simd_bound = simd_bound(bound, lanes);
        let simd_idx = if step != 1 && lanes > 1 {
            (0..lanes as isize).map(|i| i * step).collect()
        } else {
            Vec::new()
        };
        Self {
            offsets,
            bound,
            step,
            lanes,
            simd_bound,
            simd_idx,
        }
    }

    /// Total number of elements covered.
    #[inline]
    pub fn size(&self) -> usize {
        self.offsets.len() * self.bound
    }

    pub fn runs(&self) -> impl Iterator<Item = Run> + '_ {
        self.offsets.iter().map(move |&offset| Run {
            offset,
            len: self.bound,
            step: self.step,
            lanes: self.lanes,
            simd_bound: self.simd_bound,
        })
    }

    /// Runs cut into pieces of at most `max_len` elements, in traversal
    /// order. Used to hand balanced work to threads even when the whole
    /// traversal is a single run.
    pub fn segments(&self, max_len: usize) -> Vec<Run> {
        let max_len = max_len.max(1);
        let mut out = Vec::new();
        for run in self.runs() {
            let mut start = 0;
            while start < run.len {
                let len = max_len.min(run.len - start);
                out.push(Run {
                    offset: run.position(start),
                    len,
                    step: run.step,
                    lanes: run.lanes,
                    simd_bound: simd_bound(len, run.lanes),
                });
                start += len;
            }
        }
        out
    }
}

// ============================================================================
// IndexIterator
// ============================================================================

/// Multi-indices of a shape in C or F order.
#[derive(Debug, Clone)]
pub struct IndexIterator {
    dims: Vec<usize>,
    order: Order,
    index: Vec<usize>,
    remaining: usize,
}

impl IndexIterator {
    /// `S` and `A` enumerate in C order.
    pub fn of(shape: &Shape, order: Order) -> Self {
        Self {
            dims: shape.dims().to_vec(),
            order: order.auto_fc(),
            index: vec![0; shape.rank()],
            remaining: shape.size(),
        }
    }

    fn advance(&mut self) {
        let rank = self.dims.len();
        let step = |axis: usize, index: &mut [usize]| -> bool {
            index[axis] += 1;
            if index[axis] < self.dims[axis] {
                return true;
            }
            index[axis] = 0;
            false
        };
        match self.order {
            Order::F => {
                for axis in 0..rank {
                    if step(axis, &mut self.index) {
                        break;
                    }
                }
            }
            _ => {
                for axis in (0..rank).rev() {
                    if step(axis, &mut self.index) {
                        break;
                    }
                }
            }
        }
    }
}

impl Iterator for IndexIterator {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.index.clone();
        self.remaining -= 1;
        if self.remaining > 0 {
            self.advance();
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for IndexIterator {}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(dims: &[usize], offset: usize, strides: &[isize]) -> StrideLayout {
        StrideLayout::of(Shape::of(dims).unwrap(), offset, strides).unwrap()
    }

    #[test]
    fn test_dense_pointer_iterator() {
        let l = StrideLayout::of_dense(Shape::of(&[2, 3]).unwrap(), 4, Order::C);
        let it = PointerIterator::of(&l, Order::C);
        assert!(matches!(it, PointerIterator::Dense { .. }));
        assert_eq!(it.collect::<Vec<_>>(), vec![4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_stride_pointer_iterator_orders() {
        let l = StrideLayout::of_dense(Shape::of(&[2, 3]).unwrap(), 0, Order::C);
        let f: Vec<usize> = PointerIterator::of(&l, Order::F).collect();
        assert_eq!(f, vec![0, 3, 1, 4, 2, 5]);
        // Storage order of a C-dense layout is plain C order.
        let s: Vec<usize> = PointerIterator::of(&l, Order::S).collect();
        assert_eq!(s, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_pointer_iterator_len() {
        let l = layout(&[3, 4], 1, &[10, 2]);
        let it = PointerIterator::of(&l, Order::C);
        assert_eq!(it.len(), 12);
        let all: Vec<usize> = it.collect();
        assert_eq!(&all[..5], &[1, 3, 5, 7, 11]);
    }

    #[test]
    fn test_loop_descriptor_runs() {
        let l = layout(&[3, 4], 0, &[10, 2]);
        let d = StrideLoopDescriptor::of(&l, Order::C, 2);
        assert_eq!(d.offsets, vec![0, 10, 20]);
        assert_eq!(d.bound, 4);
        assert_eq!(d.step, 2);
        assert_eq!(d.simd_bound, 4);
        assert_eq!(d.simd_idx, vec![0, 2]);
        assert_eq!(d.size(), 12);
    }

    #[test]
    fn test_loop_descriptor_compacts_dense() {
        let l = StrideLayout::of_dense(Shape::of(&[4, 5, 6]).unwrap(), 0, Order::C);
        let d = StrideLoopDescriptor::of(&l, Order::C, 4);
        assert_eq!(d.offsets, vec![0]);
        assert_eq!(d.bound, 120);
        assert_eq!(d.simd_bound, 120);
        assert!(d.simd_idx.is_empty());
    }

    #[test]
    fn test_segments_split_long_runs() {
        let l = StrideLayout::of_dense(Shape::of(&[10]).unwrap(), 2, Order::C);
        let d = StrideLoopDescriptor::of(&l, Order::C, 1);
        let segs = d.segments(4);
        assert_eq!(
            segs.iter().map(|r| (r.offset, r.len)).collect::<Vec<_>>(),
            vec![(2, 4), (6, 4), (10, 2)]
        );
    }

    #[test]
    fn test_segments_carry_lane_bounds() {
        let l = StrideLayout::of_dense(Shape::of(&[10]).unwrap(), 0, Order::C);
        let d = StrideLoopDescriptor::of(&l, Order::C, 4);
        assert_eq!(d.runs().next().unwrap().simd_bound, 8);
        let segs = d.segments(6);
        assert_eq!(
            segs.iter().map(|r| (r.len, r.simd_bound)).collect::<Vec<_>>(),
            vec![(6, 4), (4, 4)]
        );
        assert!(segs.iter().all(|r| r.lanes == 4));
    }

    #[test]
    fn test_index_iterator() {
        let s = Shape::of(&[2, 2]).unwrap();
        let c: Vec<Vec<usize>> = IndexIterator::of(&s, Order::C).collect();
        assert_eq!(c, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
        let f: Vec<Vec<usize>> = IndexIterator::of(&s, Order::F).collect();
        assert_eq!(f, vec![vec![0, 0], vec![1, 0], vec![0, 1], vec![1, 1]]);
    }
}
