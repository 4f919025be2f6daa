//! Raw strided kernels.
//!
//! Multi-operand element-wise work (tensor-tensor binary ops, fused
//! multiply-add, cross-layout assignment) goes through a [`KernelPlan`] and a
//! blocked odometer; single-operand in-place work goes through the runs of a
//! [`StrideLoopDescriptor`]. Both fan out through [`crate::threading`] once the
//! element count passes the configured threshold.

use crate::config::EngineConfig;
use crate::dtype::Element;
use crate::iter::{Run, StrideLoopDescriptor};
use crate::layout::StrideLayout;
use crate::order::Order;
use crate::plan::KernelPlan;
use crate::simd::{self, MAX_LANES};
use crate::threading::{self, Region, SendPtr};
use crate::{Result, StridedError};

/// A storage base pointer paired with a layout over it.
///
/// This is what kernels and worker tasks operate on; it carries no
/// ownership. The creator keeps the storage alive for the duration of the
/// kernel call and guarantees that concurrent tasks write disjoint positions.
#[derive(Debug)]
pub(crate) struct RawView<T> {
    pub ptr: *mut T,
    pub layout: StrideLayout,
}

impl<T> Clone for RawView<T> {
    fn clone(&self) -> Self {
        Self {
            ptr: self.ptr,
            layout: self.layout.clone(),
        }
    }
}

unsafe impl<T: Send> Send for RawView<T> {}
unsafe impl<T: Send> Sync for RawView<T> {}

impl<T: Element> RawView<T> {
    pub(crate) fn new(ptr: *mut T, layout: StrideLayout) -> Self {
        Self { ptr, layout }
    }

    #[inline]
    pub(crate) fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    #[inline]
    pub(crate) fn strides(&self) -> &[isize] {
        self.layout.strides()
    }

    #[inline]
    pub(crate) unsafe fn read(&self, pos: usize) -> T {
        *self.ptr.add(pos)
    }

    #[inline]
    pub(crate) unsafe fn write(&self, pos: usize, value: T) {
        *self.ptr.add(pos) = value;
    }

    /// Read `out.len()` lanes at `pos`: consecutive positions when
    /// `simd_idx` is empty, `pos + simd_idx[l]` otherwise.
    #[inline(always)]
    pub(crate) unsafe fn read_lanes(&self, pos: usize, simd_idx: &[isize], out: &mut [T]) {
        let base = self.ptr.add(pos);
        if simd_idx.is_empty() {
            for (l, v) in out.iter_mut().enumerate() {
                *v = *base.add(l);
            }
        } else {
            for (v, &o) in out.iter_mut().zip(simd_idx) {
                *v = *base.offset(o);
            }
        }
    }

    /// Inverse of [`RawView::read_lanes`].
    #[inline(always)]
    pub(crate) unsafe fn write_lanes(&self, pos: usize, simd_idx: &[isize], values: &[T]) {
        let base = self.ptr.add(pos);
        if simd_idx.is_empty() {
            for (l, &v) in values.iter().enumerate() {
                *base.add(l) = v;
            }
        } else {
            for (&v, &o) in values.iter().zip(simd_idx) {
                *base.offset(o) = v;
            }
        }
    }

    /// Same storage, different layout.
    pub(crate) fn with_layout(&self, layout: StrideLayout) -> Self {
        Self {
            ptr: self.ptr,
            layout,
        }
    }

    /// Contiguous slice starting at `offset` (valid only for unit-step runs).
    #[inline]
    pub(crate) unsafe fn slice(&self, offset: usize, len: usize) -> &[T] {
        std::slice::from_raw_parts(self.ptr.add(offset), len)
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [T] {
        std::slice::from_raw_parts_mut(self.ptr.add(offset), len)
    }
}

pub(crate) fn ensure_same_shape(a: &[usize], b: &[usize]) -> Result<()> {
    if a != b {
        return Err(StridedError::ShapeMismatch(a.to_vec(), b.to_vec()));
    }
    Ok(())
}

/// Dense order shared by all layouts (with identical strides), if any.
fn shared_dense_order(layouts: &[&StrideLayout]) -> Option<Order> {
    let first = layouts.first()?;
    let order = match first.storage_fast_order() {
        Order::S => return None,
        o => o,
    };
    let same = layouts[1..].iter().all(|l| {
        l.strides() == first.strides()
            && match order {
                Order::F => l.is_f_ordered(),
                _ => l.is_c_ordered(),
            }
    });
    same.then_some(order)
}

// ============================================================================
// Blocked odometer
// ============================================================================

/// Visit every innermost run of a planned region block by block.
///
/// `dims`, `blocks` and every `strides[k]` are in loop order (axis 0
/// innermost). `f` receives per-operand offsets and the run length along
/// axis 0.
pub(crate) fn for_each_inner_block<F>(
    dims: &[usize],
    blocks: &[usize],
    strides: &[Vec<isize>],
    base: &[isize],
    mut f: F,
) -> Result<()>
where
    F: FnMut(&[isize], usize) -> Result<()>,
{
    let rank = dims.len();
    if rank == 0 || dims.iter().any(|&d| d == 0) {
        if rank == 0 {
            return f(base, 1);
        }
        return Ok(());
    }
    let blocks: Vec<usize> = blocks.iter().zip(dims).map(|(&b, &d)| b.clamp(1, d)).collect();
    let mut block_start = vec![0usize; rank];
    let mut offsets = vec![0isize; base.len()];
    let mut index = vec![0usize; rank];
    let mut extent = vec![0usize; rank];

    loop {
        for i in 0..rank {
            extent[i] = blocks[i].min(dims[i] - block_start[i]);
        }
        for (k, o) in offsets.iter_mut().enumerate() {
            *o = base[k]
                + block_start
                    .iter()
                    .zip(&strides[k])
                    .map(|(&j, &s)| j as isize * s)
                    .sum::<isize>();
        }

        // Odometer over axes 1.. inside the block; axis 0 is the run.
        index.iter_mut().for_each(|i| *i = 0);
        'runs: loop {
            f(&offsets, extent[0])?;
            let mut axis = 1;
            loop {
                if axis >= rank {
                    break 'runs;
                }
                index[axis] += 1;
                for (o, s) in offsets.iter_mut().zip(strides) {
                    *o += s[axis];
                }
                if index[axis] < extent[axis] {
                    break;
                }
                for (o, s) in offsets.iter_mut().zip(strides) {
                    *o -= extent[axis] as isize * s[axis];
                }
                index[axis] = 0;
                axis += 1;
            }
        }

        // Next block, axis 0 fastest.
        let mut axis = 0;
        loop {
            if axis >= rank {
                return Ok(());
            }
            block_start[axis] += blocks[axis];
            if block_start[axis] < dims[axis] {
                break;
            }
            block_start[axis] = 0;
            axis += 1;
        }
    }
}

/// Plan `views` (destination first), then run `run` on every innermost run,
/// threaded when large.
fn drive<T, F>(views: &[&RawView<T>], config: &EngineConfig, run: F) -> Result<()>
where
    T: Element,
    F: Fn(&[isize], usize, &[isize]) -> Result<()> + Sync,
{
    let dims = views[0].dims().to_vec();
    let strides: Vec<&[isize]> = views.iter().map(|v| v.strides()).collect();
    let plan = KernelPlan::new(&dims, &strides, Some(0), std::mem::size_of::<T>());
    let inner: Vec<isize> = plan.strides.iter().map(|s| s[0]).collect();
    let base: Vec<isize> = views.iter().map(|v| v.layout.offset() as isize).collect();
    let nthreads = if views[0].layout.is_injective() {
        threading::pool_threads(config.threads)
    } else {
        1
    };
    tracing::debug!(
        dims = ?plan.dims,
        blocks = ?plan.blocks,
        nthreads,
        "blocked kernel"
    );
    threading::for_each_threaded(
        &plan,
        base,
        nthreads,
        config.parallel_threshold,
        &|region: &Region| {
            for_each_inner_block(
                &region.dims,
                &plan.blocks,
                &plan.strides,
                &region.offsets,
                |offsets, len| run(offsets, len, &inner),
            )
        },
    )
}

/// Contiguous fast path shared by the map kernels: every view is dense in
/// the same order, so the traversal is one flat slice per operand. Splits
/// into chunks on the pool when large.
fn drive_flat<T, F>(views: &[&RawView<T>], config: &EngineConfig, run: F) -> Result<()>
where
    T: Element,
    F: Fn(&[usize], usize) -> Result<()> + Sync + Send,
{
    let len = views[0].layout.size();
    let offsets: Vec<usize> = views.iter().map(|v| v.layout.offset()).collect();
    let parallel = threading::pool_threads(config.threads) > 1 && len > config.parallel_threshold;
    tracing::debug!(len, parallel, "contiguous kernel");
    let chunk = if parallel {
        config.parallel_threshold.max(len / (4 * threading::pool_threads(config.threads)))
    } else {
        len
    };
    threading::par_chunks(len, chunk, parallel, |r| {
        let offs: Vec<usize> = offsets.iter().map(|&o| o + r.start).collect();
        run(&offs, r.len())
    })
    .map(|_| ())
}

// ============================================================================
// Element-wise maps
// ============================================================================

/// `dst[i] = f(src[i])` over two views of the same shape.
pub(crate) fn map_into<T, F>(dst: &RawView<T>, src: &RawView<T>, config: &EngineConfig, f: F) -> Result<()>
where
    T: Element,
    F: Fn(T) -> T + Sync + Send,
{
    ensure_same_shape(dst.dims(), src.dims())?;
    let (d, s) = (SendPtr(dst.ptr), SendPtr(src.ptr));
    if shared_dense_order(&[&dst.layout, &src.layout]).is_some() {
        return drive_flat(&[dst, src], config, |offs, len| {
            let (dp, sp) = (d.get(), s.get());
            simd::dispatch_if_large(len, || unsafe {
                for i in 0..len {
                    *dp.add(offs[0] + i) = f(*sp.add(offs[1] + i));
                }
            });
            Ok(())
        });
    }
    drive(&[dst, src], config, |offs, len, inner| {
        let (mut dp, mut sp) = unsafe { (d.get().offset(offs[0]), s.get().offset(offs[1])) };
        let (ds, ss) = (inner[0], inner[1]);
        unsafe {
            if ds == 1 && ss == 1 {
                for i in 0..len {
                    *dp.add(i) = f(*sp.add(i));
                }
            } else {
                for _ in 0..len {
                    *dp = f(*sp);
                    dp = dp.offset(ds);
                    sp = sp.offset(ss);
                }
            }
        }
        Ok(())
    })
}

/// `dst[i] = f(a[i], b[i])` over three views of the same shape. `dst` may
/// be the same view as `a`.
pub(crate) fn zip_map_into<T, F>(
    dst: &RawView<T>,
    a: &RawView<T>,
    b: &RawView<T>,
    config: &EngineConfig,
    f: F,
) -> Result<()>
where
    T: Element,
    F: Fn(T, T) -> T + Sync + Send,
{
    ensure_same_shape(dst.dims(), a.dims())?;
    ensure_same_shape(dst.dims(), b.dims())?;
    let (d, pa, pb) = (SendPtr(dst.ptr), SendPtr(a.ptr), SendPtr(b.ptr));
    if shared_dense_order(&[&dst.layout, &a.layout, &b.layout]).is_some() {
        return drive_flat(&[dst, a, b], config, |offs, len| {
            let (dp, ap, bp) = (d.get(), pa.get(), pb.get());
            simd::dispatch_if_large(len, || unsafe {
                for i in 0..len {
                    *dp.add(offs[0] + i) = f(*ap.add(offs[1] + i), *bp.add(offs[2] + i));
                }
            });
            Ok(())
        });
    }
    drive(&[dst, a, b], config, |offs, len, inner| {
        unsafe {
            let mut dp = d.get().offset(offs[0]);
            let mut ap = pa.get().offset(offs[1]);
            let mut bp = pb.get().offset(offs[2]);
            if inner.iter().all(|&s| s == 1) {
                for i in 0..len {
                    *dp.add(i) = f(*ap.add(i), *bp.add(i));
                }
            } else {
                for _ in 0..len {
                    *dp = f(*ap, *bp);
                    dp = dp.offset(inner[0]);
                    ap = ap.offset(inner[1]);
                    bp = bp.offset(inner[2]);
                }
            }
        }
        Ok(())
    })
}

// ============================================================================
// Single-operand runs
// ============================================================================

/// Apply `f` to every element of `view` in place, over the runs of its
/// storage-order loop descriptor. Whole lane groups go first, then the tail.
pub(crate) fn apply_inplace<T, F>(view: &RawView<T>, config: &EngineConfig, f: F) -> Result<()>
where
    T: Element,
    F: Fn(T) -> T + Sync + Send,
{
    for_each_run(view, config, |p, run, simd_idx| {
        let lanes = run.lanes;
        unsafe {
            simd::dispatch_if_large(run.len, || {
                if run.step == 1 {
                    let s = std::slice::from_raw_parts_mut(p.add(run.offset), run.len);
                    let (head, tail) = s.split_at_mut(run.simd_bound);
                    for group in head.chunks_exact_mut(lanes) {
                        for v in group.iter_mut() {
                            *v = f(*v);
                        }
                    }
                    for v in tail.iter_mut() {
                        *v = f(*v);
                    }
                } else {
                    let mut buf = [T::zero(); MAX_LANES];
                    let group = &mut buf[..lanes];
                    let mut i = 0;
                    while i < run.simd_bound {
                        let pos = run.position(i);
                        view.read_lanes(pos, simd_idx, group);
                        for v in group.iter_mut() {
                            *v = f(*v);
                        }
                        view.write_lanes(pos, simd_idx, group);
                        i += lanes;
                    }
                    for j in run.simd_bound..run.len {
                        let q = p.add(run.position(j));
                        *q = f(*q);
                    }
                }
            });
        }
        Ok(())
    })
}

/// Hand every run of `view`'s storage-order traversal to `f`, together with
/// the descriptor's lane index map, split into segments on the pool when the
/// view is large. Segments never overlap, so `f` may write through the
/// pointer.
pub(crate) fn for_each_run<T, F>(view: &RawView<T>, config: &EngineConfig, f: F) -> Result<()>
where
    T: Element,
    F: Fn(*mut T, Run, &[isize]) -> Result<()> + Sync + Send,
{
    // Several indices reaching one position would race across segments, and
    // a lane group would read a repeated position before writing it back.
    let overlapping = !view.layout.is_injective();
    let lanes = if overlapping { 1 } else { simd::lanes::<T>() };
    let desc = StrideLoopDescriptor::of(&view.layout, Order::S, lanes);
    let simd_idx = desc.simd_idx.as_slice();
    let len = desc.size();
    let nthreads = threading::pool_threads(config.threads);
    let ptr = SendPtr(view.ptr);
    if overlapping || nthreads <= 1 || len <= config.parallel_threshold {
        for run in desc.runs() {
            f(ptr.get(), run, simd_idx)?;
        }
        return Ok(());
    }
    let segments = desc.segments(config.parallel_threshold.max(len / (4 * nthreads)));
    tracing::debug!(len, segments = segments.len(), lanes = desc.lanes, "parallel run kernel");
    threading::par_tasks(segments, true, |run| f(ptr.get(), run, simd_idx))
}
