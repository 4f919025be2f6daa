//! Reduction engine over loop-descriptor runs.
//!
//! Every reduction walks the storage-order runs of one layout. Inside a run,
//! whole groups of `lanes` elements feed `lanes` independent accumulators
//! (vectorized by LLVM under [`simd::dispatch`]), the tail folds into lane 0,
//! and the lanes are merged at the end of the run. Contiguous f32/f64 runs use
//! the explicit pulp kernels for sums and centered moments instead.
//!
//! Large layouts are cut into segments that are folded on the pool and merged
//! in segment order. The grouping of partial sums therefore depends on the
//! thread count, so floating-point results agree across pool sizes only up to
//! rounding.
//!
//! Mean and variance use the offset-corrected multi-pass scheme: a raw mean,
//! a correction pass adding `Σ(x - mean) / n`, then a pass accumulating
//! `Σ(x - mean)²` and `Σ(x - mean)` for
//! `var = (Σ(x - mean)² - (Σ(x - mean))² / (n - ddof)) / (n - ddof)`.

use crate::config::EngineConfig;
use crate::dtype::Element;
use crate::iter::{Run, StrideLoopDescriptor};
use crate::kernel::RawView;
use crate::ops::ReduceOp;
use crate::order::Order;
use crate::simd::{self, MAX_LANES};
use crate::threading::{self, SendPtr};
use crate::Result;

/// Mean and variance over all elements and over the non-NaN elements,
/// computed in one set of sweeps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics<T> {
    pub size: usize,
    /// Number of non-NaN elements.
    pub nan_size: usize,
    pub mean: T,
    pub nan_mean: T,
    pub variance: T,
    pub nan_variance: T,
}

// ============================================================================
// Run folding
// ============================================================================

/// Fold one run with `run.lanes` independent accumulators. Positions
/// `[0, simd_bound)` are read a lane group at a time through `simd_idx`
/// (consecutive when the run has unit step); the tail folds into lane 0.
///
/// # Safety
/// Every position of `run` must be readable through `p`.
#[inline(always)]
unsafe fn lane_fold<T, A, F, M>(p: *const T, run: Run, simd_idx: &[isize], init: A, f: F, merge: M) -> A
where
    T: Element,
    A: Copy,
    F: Fn(A, T) -> A,
    M: Fn(A, A) -> A,
{
    let lanes = run.lanes;
    let mut acc = [init; MAX_LANES];
    let base = p.add(run.offset);
    simd::dispatch_if_large(run.len, || {
        let mut i = 0;
        if run.step == 1 {
            while i < run.simd_bound {
                for (l, a) in acc[..lanes].iter_mut().enumerate() {
                    *a = f(*a, *base.add(i + l));
                }
                i += lanes;
            }
        } else {
            while i < run.simd_bound {
                let group = base.offset(i as isize * run.step);
                for (a, &o) in acc[..lanes].iter_mut().zip(simd_idx) {
                    *a = f(*a, *group.offset(o));
                }
                i += lanes;
            }
        }
        for j in run.simd_bound..run.len {
            acc[0] = f(acc[0], *base.offset(j as isize * run.step));
        }
    });
    acc[1..lanes].iter().fold(acc[0], |a, &b| merge(a, b))
}

/// Fold every run of `view`, in segments on the pool when large. `f`
/// receives the run and the descriptor's lane index map.
fn fold_runs<T, A, F, M>(view: &RawView<T>, config: &EngineConfig, init: A, f: F, merge: M) -> Result<A>
where
    T: Element,
    A: Copy + Send + Sync,
    F: Fn(*const T, Run, &[isize]) -> A + Sync + Send,
    M: Fn(A, A) -> A + Sync + Send,
{
    let desc = StrideLoopDescriptor::of(&view.layout, Order::S, simd::lanes::<T>());
    let simd_idx = desc.simd_idx.as_slice();
    let len = desc.size();
    let ptr = SendPtr(view.ptr);
    let nthreads = threading::pool_threads(config.threads);
    if nthreads <= 1 || len <= config.parallel_threshold {
        return Ok(desc
            .runs()
            .fold(init, |acc, run| merge(acc, f(ptr.get() as *const T, run, simd_idx))));
    }
    let segments = desc.segments(config.parallel_threshold.max(len / (4 * nthreads)));
    tracing::debug!(len, segments = segments.len(), lanes = desc.lanes, "parallel reduction");
    let parts = threading::par_chunks(segments.len(), 1, true, |r| {
        Ok(segments[r]
            .iter()
            .fold(init, |acc, &run| merge(acc, f(ptr.get() as *const T, run, simd_idx))))
    })?;
    Ok(parts.into_iter().fold(init, &merge))
}

#[inline]
fn as_t<T: Element>(n: usize) -> T {
    T::from_f64(n as f64)
}

// ============================================================================
// Associative reductions
// ============================================================================

/// Reduce all elements with `op`; NaN propagates.
pub(crate) fn reduce<T: Element>(view: &RawView<T>, op: ReduceOp, config: &EngineConfig) -> Result<T> {
    fold_runs(
        view,
        config,
        op.identity::<T>(),
        |p, run, simd_idx| unsafe {
            if op == ReduceOp::Sum && run.step == 1 {
                if let Some(s) = T::simd_sum(std::slice::from_raw_parts(p.add(run.offset), run.len)) {
                    return s;
                }
            }
            lane_fold(p, run, simd_idx, op.identity(), |a, x| op.combine(a, x), |a, b| op.combine(a, b))
        },
        move |a, b| op.combine(a, b),
    )
}

/// Reduce the non-NaN elements with `op`. All-NaN input yields the identity.
pub(crate) fn nan_reduce<T: Element>(view: &RawView<T>, op: ReduceOp, config: &EngineConfig) -> Result<T> {
    fold_runs(
        view,
        config,
        op.identity::<T>(),
        |p, run, simd_idx| unsafe {
            lane_fold(p, run, simd_idx, op.identity(), |a, x| op.combine_nan(a, x), |a, b| op.combine(a, b))
        },
        move |a, b| op.combine(a, b),
    )
}

/// Number of elements satisfying `pred`.
pub(crate) fn count<T, P>(view: &RawView<T>, config: &EngineConfig, pred: P) -> Result<usize>
where
    T: Element,
    P: Fn(T) -> bool + Sync + Send,
{
    fold_runs(
        view,
        config,
        0usize,
        |p, run, simd_idx| unsafe { lane_fold(p, run, simd_idx, 0usize, |a, x| a + pred(x) as usize, |a, b| a + b) },
        |a, b| a + b,
    )
}

/// Sum of `f(x)` over all elements.
pub(crate) fn sum_map<T, F>(view: &RawView<T>, config: &EngineConfig, f: F) -> Result<T>
where
    T: Element,
    F: Fn(T) -> T + Sync + Send,
{
    fold_runs(
        view,
        config,
        T::zero(),
        |p, run, simd_idx| unsafe { lane_fold(p, run, simd_idx, T::zero(), |a, x| a.add(f(x)), |a, b| a.add(b)) },
        |a, b| a.add(b),
    )
}

// ============================================================================
// Moments
// ============================================================================

/// `(Σ(x - m), Σ(x - m)²)` over the non-NaN elements when `skip_nan`, over
/// every element otherwise.
fn centered_sums<T: Element>(
    view: &RawView<T>,
    m: T,
    skip_nan: bool,
    config: &EngineConfig,
) -> Result<(T, T)> {
    let zero = (T::zero(), T::zero());
    fold_runs(
        view,
        config,
        zero,
        move |p, run, simd_idx| unsafe {
            if !skip_nan && run.step == 1 {
                if let Some(s) = T::simd_centered(std::slice::from_raw_parts(p.add(run.offset), run.len), m) {
                    return s;
                }
            }
            lane_fold(
                p,
                run,
                simd_idx,
                zero,
                |(s1, s2), x| {
                    if skip_nan && x.is_nan() {
                        return (s1, s2);
                    }
                    let c = x.sub(m);
                    (s1.add(c), c.mul_add(c, s2))
                },
                |a, b| (a.0.add(b.0), a.1.add(b.1)),
            )
        },
        |a, b| (a.0.add(b.0), a.1.add(b.1)),
    )
}

/// Offset-corrected mean. Returns the mean and the element count it was
/// taken over.
pub(crate) fn mean<T: Element>(view: &RawView<T>, skip_nan: bool, config: &EngineConfig) -> Result<(T, usize)> {
    let (sum, n) = if skip_nan {
        let n = count(view, config, |x: T| !x.is_nan())?;
        (nan_reduce(view, ReduceOp::Sum, config)?, n)
    } else {
        (reduce(view, ReduceOp::Sum, config)?, view.layout.size())
    };
    if n == 0 {
        return Ok((T::from_f64(f64::NAN), 0));
    }
    let raw = sum.div(as_t(n));
    let (correction, _) = centered_sums(view, raw, skip_nan, config)?;
    Ok((raw.add(correction.div(as_t(n))), n))
}

/// Variance with `ddof` delta degrees of freedom around `mean`, or around
/// the offset-corrected mean when `mean` is `None`. NaN when `n - ddof <= 0`.
pub(crate) fn var<T: Element>(
    view: &RawView<T>,
    ddof: usize,
    mean_hint: Option<T>,
    skip_nan: bool,
    config: &EngineConfig,
) -> Result<T> {
    let (m, n) = match mean_hint {
        Some(m) => {
            let n = if skip_nan {
                count(view, config, |x: T| !x.is_nan())?
            } else {
                view.layout.size()
            };
            (m, n)
        }
        None => mean(view, skip_nan, config)?,
    };
    if n <= ddof {
        return Ok(T::from_f64(f64::NAN));
    }
    let (s1, s2) = centered_sums(view, m, skip_nan, config)?;
    let d = as_t::<T>(n - ddof);
    Ok(s2.sub(s1.mul(s1).div(d)).div(d))
}

/// All-element and NaN-excluding mean and variance in three sweeps.
pub(crate) fn stats<T: Element>(view: &RawView<T>, config: &EngineConfig) -> Result<Statistics<T>> {
    let size = view.layout.size();
    let z = T::zero();

    let (sum, nan_sum, nan_size) = fold_runs(
        view,
        config,
        (z, z, 0usize),
        |p, run, simd_idx| unsafe {
            lane_fold(
                p,
                run,
                simd_idx,
                (z, z, 0usize),
                |(s, ns, n), x| {
                    if x.is_nan() {
                        (s.add(x), ns, n)
                    } else {
                        (s.add(x), ns.add(x), n + 1)
                    }
                },
                |a, b| (a.0.add(b.0), a.1.add(b.1), a.2 + b.2),
            )
        },
        |a, b| (a.0.add(b.0), a.1.add(b.1), a.2 + b.2),
    )?;
    let mut mean = sum.div(as_t(size));
    let mut nan_mean = nan_sum.div(as_t(nan_size));

    let (m0, nm0) = (mean, nan_mean);
    let (c, nc) = fold_runs(
        view,
        config,
        (z, z),
        move |p, run, simd_idx| unsafe {
            lane_fold(
                p,
                run,
                simd_idx,
                (z, z),
                |(c, nc), x| {
                    if x.is_nan() {
                        (c.add(x.sub(m0)), nc)
                    } else {
                        (c.add(x.sub(m0)), nc.add(x.sub(nm0)))
                    }
                },
                |a, b| (a.0.add(b.0), a.1.add(b.1)),
            )
        },
        |a, b| (a.0.add(b.0), a.1.add(b.1)),
    )?;
    mean = mean.add(c.div(as_t(size)));
    nan_mean = nan_mean.add(nc.div(as_t(nan_size)));

    let (m1, nm1) = (mean, nan_mean);
    let add4 = |a: (T, T, T, T), b: (T, T, T, T)| (a.0.add(b.0), a.1.add(b.1), a.2.add(b.2), a.3.add(b.3));
    let (s2, s3, ns2, ns3) = fold_runs(
        view,
        config,
        (z, z, z, z),
        move |p, run, simd_idx| unsafe {
            lane_fold(
                p,
                run,
                simd_idx,
                (z, z, z, z),
                |(s2, s3, ns2, ns3), x| {
                    let c = x.sub(m1);
                    if x.is_nan() {
                        (c.mul_add(c, s2), s3.add(c), ns2, ns3)
                    } else {
                        let nc = x.sub(nm1);
                        (c.mul_add(c, s2), s3.add(c), nc.mul_add(nc, ns2), ns3.add(nc))
                    }
                },
                add4,
            )
        },
        add4,
    )?;
    let n = as_t::<T>(size);
    let nn = as_t::<T>(nan_size);
    Ok(Statistics {
        size,
        nan_size,
        mean,
        nan_mean,
        variance: s2.sub(s3.mul(s3).div(n)).div(n),
        nan_variance: ns2.sub(ns3.mul(ns3).div(nn)).div(nn),
    })
}

// ============================================================================
// Arg extrema
// ============================================================================

/// Position, in `order`, of the first maximum (or minimum) element.
/// Comparisons are strict, so ties keep the earliest position and NaN never
/// wins; all-NaN input yields 0.
pub(crate) fn arg_extreme<T: Element>(view: &RawView<T>, order: Order, max: bool) -> usize {
    let desc = StrideLoopDescriptor::of(&view.layout, order, simd::lanes::<T>());
    let mut best = if max { T::lowest() } else { T::highest() };
    let mut best_pos = 0usize;
    let mut pos = 0usize;
    let mut visit = |v: T| {
        let better = if max { v > best } else { v < best };
        if better {
            best = v;
            best_pos = pos;
        }
        pos += 1;
    };
    let mut group = [T::zero(); MAX_LANES];
    for run in desc.runs() {
        let lanes = &mut group[..run.lanes];
        let mut j = 0;
        while j < run.simd_bound {
            unsafe { view.read_lanes(run.position(j), &desc.simd_idx, lanes) };
            lanes.iter().for_each(|&v| visit(v));
            j += run.lanes;
        }
        for j in run.simd_bound..run.len {
            visit(unsafe { view.read(run.position(j)) });
        }
    }
    best_pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::StrideLayout;
    use crate::shape::Shape;
    use approx::assert_relative_eq;

    fn view<T: Element>(data: &mut [T], dims: &[usize], strides: &[isize]) -> RawView<T> {
        let layout = StrideLayout::of(Shape::of(dims).unwrap(), 0, strides).unwrap();
        RawView::new(data.as_mut_ptr(), layout)
    }

    fn cfg() -> EngineConfig {
        EngineConfig::default().with_parallel_threshold(64)
    }

    #[test]
    fn test_lane_fold_groups_and_tail() {
        let mut d: Vec<f64> = (0..40).map(f64::from).collect();
        let strided = view(&mut d, &[13], &[3]);
        for lanes in [1, 4] {
            let desc = StrideLoopDescriptor::of(&strided.layout, Order::C, lanes);
            assert_eq!(desc.simd_bound, if lanes == 4 { 12 } else { 0 });
            let run = desc.runs().next().unwrap();
            let s = unsafe { lane_fold(strided.ptr as *const f64, run, &desc.simd_idx, 0.0, |a, x| a + x, |a, b| a + b) };
            assert_eq!(s, 234.0);
        }
        let dense = view(&mut d, &[10], &[1]);
        let desc = StrideLoopDescriptor::of(&dense.layout, Order::C, 4);
        let run = desc.runs().next().unwrap();
        let m = unsafe { lane_fold(dense.ptr as *const f64, run, &desc.simd_idx, f64::MIN, f64::max, f64::max) };
        assert_eq!(m, 9.0);
    }

    #[test]
    fn test_reduce_basic() {
        let mut d = vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let v = view(&mut d, &[2, 3], &[3, 1]);
        assert_eq!(reduce(&v, ReduceOp::Sum, &cfg()).unwrap(), 21.0);
        assert_eq!(reduce(&v, ReduceOp::Prod, &cfg()).unwrap(), 720.0);
        assert_eq!(reduce(&v, ReduceOp::Max, &cfg()).unwrap(), 6.0);
        assert_eq!(reduce(&v, ReduceOp::Min, &cfg()).unwrap(), 1.0);
    }

    #[test]
    fn test_reduce_strided_and_large() {
        let mut d: Vec<f64> = (0..10_000).map(|x| (x % 17) as f64).collect();
        let expected: f64 = d.iter().step_by(2).sum();
        let v = view(&mut d, &[100, 50], &[100, 2]);
        assert_relative_eq!(reduce(&v, ReduceOp::Sum, &cfg()).unwrap(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_nan_reductions() {
        let mut d = vec![1.0f64, f64::NAN, 3.0];
        let v = view(&mut d, &[3], &[1]);
        assert!(reduce(&v, ReduceOp::Sum, &cfg()).unwrap().is_nan());
        assert!(reduce(&v, ReduceOp::Max, &cfg()).unwrap().is_nan());
        assert_eq!(nan_reduce(&v, ReduceOp::Sum, &cfg()).unwrap(), 4.0);
        assert_eq!(nan_reduce(&v, ReduceOp::Max, &cfg()).unwrap(), 3.0);
        assert_eq!(count(&v, &cfg(), |x: f64| x.is_nan()).unwrap(), 1);
    }

    #[test]
    fn test_integer_sum_wraps() {
        let mut d = vec![200u8, 100, 1];
        let v = view(&mut d, &[3], &[1]);
        assert_eq!(reduce(&v, ReduceOp::Sum, &cfg()).unwrap(), 45);
        assert_eq!(reduce(&v, ReduceOp::Max, &cfg()).unwrap(), 200);
    }

    #[test]
    fn test_mean_and_var() {
        let mut d = vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let v = view(&mut d, &[6], &[1]);
        let (m, n) = mean(&v, false, &cfg()).unwrap();
        assert_eq!(n, 6);
        assert_relative_eq!(m, 3.5);
        assert_relative_eq!(var(&v, 0, None, false, &cfg()).unwrap(), 35.0 / 12.0, epsilon = 1e-12);
        assert_relative_eq!(var(&v, 1, None, false, &cfg()).unwrap(), 3.5, epsilon = 1e-12);
        assert!(var(&v, 6, None, false, &cfg()).unwrap().is_nan());
    }

    #[test]
    fn test_mean_is_offset_corrected() {
        let n = 100_001;
        let mut d: Vec<f32> = (0..n).map(|i| 1.0e4 + (i % 3) as f32 * 0.1).collect();
        let v = view(&mut d, &[n], &[1]);
        let (m, _) = mean(&v, false, &cfg()).unwrap();
        let exact: f64 = d.iter().map(|&x| x as f64).sum::<f64>() / d.len() as f64;
        assert_relative_eq!(m as f64, exact, max_relative = 1e-5);
    }

    #[test]
    fn test_nan_mean_var() {
        let mut d = vec![1.0f64, f64::NAN, 3.0, f64::NAN];
        let v = view(&mut d, &[4], &[1]);
        let (m, n) = mean(&v, true, &cfg()).unwrap();
        assert_eq!(n, 2);
        assert_eq!(m, 2.0);
        assert_relative_eq!(var(&v, 0, None, true, &cfg()).unwrap(), 1.0);
    }

    #[test]
    fn test_stats() {
        let mut d = vec![2.0f64, 4.0, f64::NAN, 6.0];
        let v = view(&mut d, &[4], &[1]);
        let s = stats(&v, &cfg()).unwrap();
        assert_eq!(s.size, 4);
        assert_eq!(s.nan_size, 3);
        assert!(s.mean.is_nan());
        assert_relative_eq!(s.nan_mean, 4.0);
        assert_relative_eq!(s.nan_variance, 8.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_arg_extreme_first_index() {
        let mut d = vec![3.0f64, 7.0, 7.0, -1.0, -1.0];
        let v = view(&mut d, &[5], &[1]);
        assert_eq!(arg_extreme(&v, Order::C, true), 1);
        assert_eq!(arg_extreme(&v, Order::C, false), 3);

        let mut n = vec![f64::NAN, f64::NAN];
        let nv = view(&mut n, &[2], &[1]);
        assert_eq!(arg_extreme(&nv, Order::C, true), 0);
    }

    #[test]
    fn test_arg_extreme_order() {
        // [[1, 9], [8, 2]] stored row-major.
        let mut d = vec![1i32, 9, 8, 2];
        let v = view(&mut d, &[2, 2], &[2, 1]);
        assert_eq!(arg_extreme(&v, Order::C, true), 1);
        assert_eq!(arg_extreme(&v, Order::F, true), 2);
    }
}
