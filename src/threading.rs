//! Fork-join execution on the rayon pool.
//!
//! Two partitioning schemes are used by the kernels:
//!
//! - [`for_each_threaded`] recursively halves a planned traversal along the
//!   axis with the largest `(dim - 1) * cost`, the way a cache-blocked map is
//!   split across threads. Axes the destination does not advance along carry
//!   cost 0 and are never split.
//! - [`par_chunks`] cuts an index range into fixed-size chunks and maps each
//!   chunk independently, collecting results in chunk order.
//!
//! Both schemes hand every task a write region disjoint from every other
//! task's. A worker error surfaces after the join as
//! [`StridedError::TaskFailed`].

use std::ops::Range;

use crate::plan::KernelPlan;
use crate::{Result, StridedError};

/// Raw pointer that may cross to worker threads.
///
/// Tasks receiving a `SendPtr` only write locations inside their own
/// partition, which is what makes sharing it sound.
#[derive(Debug)]
pub(crate) struct SendPtr<T>(pub(crate) *mut T);

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SendPtr<T> {}

unsafe impl<T: Send> Send for SendPtr<T> {}
unsafe impl<T: Send> Sync for SendPtr<T> {}

impl<T> SendPtr<T> {
    #[inline]
    pub(crate) fn get(self) -> *mut T {
        self.0
    }
}

/// Wrap a worker error once; errors already wrapped pass through.
pub(crate) fn task_failed(err: StridedError) -> StridedError {
    match err {
        e @ StridedError::TaskFailed(_) => e,
        e => StridedError::TaskFailed(Box::new(e)),
    }
}

/// Threads available to a kernel under `limit`.
pub(crate) fn pool_threads(limit: usize) -> usize {
    #[cfg(feature = "parallel")]
    {
        rayon::current_num_threads().min(limit).max(1)
    }
    #[cfg(not(feature = "parallel"))]
    {
        let _ = limit;
        1
    }
}

// ============================================================================
// Recursive split over a kernel plan
// ============================================================================

/// Axis to split next, or `None` when no axis may be split.
pub(crate) fn find_split_axis(dims: &[usize], blocks: &[usize], costs: &[isize]) -> Option<usize> {
    let mut best = 0isize;
    let mut idx = None;
    for i in 0..dims.len() {
        let (d, c) = (dims[i], costs[i]);
        if c == 0 || d <= blocks[i].min(1024) || d <= 1 {
            continue;
        }
        let score = (d as isize - 1) * c;
        if score >= best {
            best = score;
            idx = Some(i);
        }
    }
    idx
}

/// Region of a plan handled by one task.
#[derive(Debug, Clone)]
pub(crate) struct Region {
    pub dims: Vec<usize>,
    pub offsets: Vec<isize>,
}

impl Region {
    fn len(&self) -> usize {
        self.dims.iter().product()
    }

    /// Split `axis` in two halves; the second half's offsets advance by the
    /// first half's extent.
    fn halve(&self, axis: usize, strides: &[Vec<isize>]) -> (Region, Region) {
        let d = self.dims[axis];
        let first = d >> 1;
        let mut left = self.clone();
        let mut right = self.clone();
        left.dims[axis] = first;
        right.dims[axis] = d - first;
        for (o, s) in right.offsets.iter_mut().zip(strides) {
            *o += first as isize * s[axis];
        }
        (left, right)
    }
}

/// Run `leaf` over the whole plan, split across up to `nthreads` tasks when
/// the plan has more than `threshold` elements.
///
/// `leaf` receives a sub-region's dims (loop order) and per-operand base
/// offsets; strides and blocks are those of `plan`.
pub(crate) fn for_each_threaded<F>(
    plan: &KernelPlan,
    offsets: Vec<isize>,
    nthreads: usize,
    threshold: usize,
    leaf: &F,
) -> Result<()>
where
    F: Fn(&Region) -> Result<()> + Sync,
{
    let region = Region {
        dims: plan.dims.clone(),
        offsets,
    };
    if nthreads <= 1 || region.len() <= threshold {
        return leaf(&region);
    }
    tracing::debug!(
        len = region.len(),
        nthreads,
        "splitting kernel across threads"
    );
    split_recursive(plan, region, nthreads, threshold, leaf).map_err(task_failed)
}

fn split_recursive<F>(
    plan: &KernelPlan,
    region: Region,
    nthreads: usize,
    threshold: usize,
    leaf: &F,
) -> Result<()>
where
    F: Fn(&Region) -> Result<()> + Sync,
{
    if nthreads <= 1 || region.len() <= threshold {
        return leaf(&region);
    }
    let Some(axis) = find_split_axis(&region.dims, &plan.blocks, &plan.costs) else {
        return leaf(&region);
    };
    let (left, right) = region.halve(axis, &plan.strides);
    tracing::trace!(axis, left = ?left.dims, right = ?right.dims, "split region");
    let n1 = nthreads >> 1;
    let n2 = nthreads - n1;
    let (a, b) = join(
        || split_recursive(plan, left, n1, threshold, leaf),
        || split_recursive(plan, right, n2, threshold, leaf),
    );
    a?;
    b
}

#[inline]
fn join<A, B, RA, RB>(a: A, b: B) -> (RA, RB)
where
    A: FnOnce() -> RA + Send,
    B: FnOnce() -> RB + Send,
    RA: Send,
    RB: Send,
{
    #[cfg(feature = "parallel")]
    {
        rayon::join(a, b)
    }
    #[cfg(not(feature = "parallel"))]
    {
        (a(), b())
    }
}

// ============================================================================
// Chunked ranges
// ============================================================================

/// Index ranges of `chunk` items covering `0..n`.
pub(crate) fn chunk_ranges(n: usize, chunk: usize) -> Vec<Range<usize>> {
    let chunk = chunk.max(1);
    (0..n)
        .step_by(chunk)
        .map(|start| start..(start + chunk).min(n))
        .collect()
}

/// Map every chunk of `0..n` through `f`, in parallel when `parallel` is
/// set, returning the per-chunk results in order.
pub(crate) fn par_chunks<R, F>(n: usize, chunk: usize, parallel: bool, f: F) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(Range<usize>) -> Result<R> + Sync + Send,
{
    let ranges = chunk_ranges(n, chunk);
    debug_assert_disjoint(&ranges);
    if !parallel || ranges.len() <= 1 {
        return ranges.into_iter().map(&f).collect();
    }
    tracing::trace!(n, chunks = ranges.len(), "parallel chunk map");
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        ranges
            .into_par_iter()
            .map(&f)
            .collect::<Result<Vec<R>>>()
            .map_err(task_failed)
    }
    #[cfg(not(feature = "parallel"))]
    {
        ranges.into_iter().map(&f).collect()
    }
}

/// Run every task, in parallel when `parallel` is set.
pub(crate) fn par_tasks<T, F>(tasks: Vec<T>, parallel: bool, f: F) -> Result<()>
where
    T: Send,
    F: Fn(T) -> Result<()> + Sync + Send,
{
    if !parallel || tasks.len() <= 1 {
        return tasks.into_iter().try_for_each(&f);
    }
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        tasks.into_par_iter().try_for_each(&f).map_err(task_failed)
    }
    #[cfg(not(feature = "parallel"))]
    {
        tasks.into_iter().try_for_each(&f)
    }
}

/// Debug check that no two ranges overlap.
pub(crate) fn debug_assert_disjoint(ranges: &[Range<usize>]) {
    if cfg!(debug_assertions) {
        let mut sorted: Vec<&Range<usize>> = ranges.iter().filter(|r| !r.is_empty()).collect();
        sorted.sort_by_key(|r| r.start);
        for w in sorted.windows(2) {
            debug_assert!(w[0].end <= w[1].start, "overlapping partitions {:?}", w);
        }
    }
}

/// Debug check that no two boxes (per-axis `[start, end)`) overlap.
pub(crate) fn debug_assert_disjoint_boxes(boxes: &[(Vec<usize>, Vec<usize>)]) {
    if cfg!(debug_assertions) {
        for (i, (sa, ea)) in boxes.iter().enumerate() {
            for (sb, eb) in &boxes[i + 1..] {
                let overlap = sa
                    .iter()
                    .zip(ea)
                    .zip(sb.iter().zip(eb))
                    .all(|((&s1, &e1), (&s2, &e2))| s1 < e2 && s2 < e1);
                debug_assert!(!overlap, "overlapping partitions {:?}..{:?}", sa, sb);
            }
        }
    }
}
