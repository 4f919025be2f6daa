//! Dense linear algebra kernels.
//!
//! Products are built from one primitive: the strided dot product of two
//! runs. Contiguous f32/f64 runs use the pulp kernel; everything else folds
//! `lanes` independent accumulators so LLVM can vectorize the loop.
//!
//! `mm` splits the output into `(row-block, col-block)` tiles sized from the
//! L2 cache. Each tile is an independent task that owns its output region;
//! inside a tile the shared dimension is walked in `vector_chunk` slices so
//! the rows and columns touched stay cache resident.

use std::ops::Range;

use crate::config::EngineConfig;
use crate::dtype::Element;
use crate::kernel::RawView;
use crate::simd::{self, MAX_LANES};
use crate::threading::{self, SendPtr};
use crate::{Result, StridedError};

/// Dot product of `len` elements read with steps `sa` and `sb`.
///
/// # Safety
/// Both progressions must stay inside their storages.
#[inline]
pub(crate) unsafe fn dot_strided<T: Element>(pa: *const T, sa: isize, pb: *const T, sb: isize, len: usize) -> T {
    if sa == 1 && sb == 1 {
        let (a, b) = (
            std::slice::from_raw_parts(pa, len),
            std::slice::from_raw_parts(pb, len),
        );
        if let Some(d) = T::simd_dot(a, b) {
            return d;
        }
    }
    let lanes = simd::lanes::<T>();
    let mut acc = [T::zero(); MAX_LANES];
    let simd_bound = len - len % lanes;
    simd::dispatch_if_large(len, || {
        let mut i = 0;
        while i < simd_bound {
            for (l, a) in acc[..lanes].iter_mut().enumerate() {
                let k = (i + l) as isize;
                *a = (*pa.offset(k * sa)).mul_add(*pb.offset(k * sb), *a);
            }
            i += lanes;
        }
        for k in simd_bound..len {
            let k = k as isize;
            acc[0] = (*pa.offset(k * sa)).mul_add(*pb.offset(k * sb), acc[0]);
        }
    });
    acc[1..lanes].iter().fold(acc[0], |s, &x| s.add(x))
}

/// Inner product of two rank-1 views over positions `[start, end)`.
pub(crate) fn inner<T: Element>(a: &RawView<T>, b: &RawView<T>, start: usize, end: usize) -> Result<T> {
    if a.layout.rank() != 1 || b.layout.rank() != 1 {
        return Err(StridedError::RankMismatch(a.layout.rank(), 1));
    }
    if a.dims() != b.dims() {
        return Err(StridedError::ShapeMismatch(a.dims().to_vec(), b.dims().to_vec()));
    }
    if start > end || end > a.dims()[0] {
        return Err(StridedError::IndexOutOfBounds {
            index: vec![start, end],
            dims: a.dims().to_vec(),
        });
    }
    let (sa, sb) = (a.strides()[0], b.strides()[0]);
    Ok(unsafe {
        dot_strided(
            a.ptr.offset(a.layout.offset() as isize + start as isize * sa),
            sa,
            b.ptr.offset(b.layout.offset() as isize + start as isize * sb),
            sb,
            end - start,
        )
    })
}

/// `dst[i] = m[i, :] · v`.
pub(crate) fn mv_into<T: Element>(dst: &RawView<T>, m: &RawView<T>, v: &RawView<T>, config: &EngineConfig) -> Result<()> {
    let (rows, cols) = matrix_dims(m)?;
    if v.layout.rank() != 1 || v.dims()[0] != cols {
        return Err(StridedError::ShapeMismatch(m.dims().to_vec(), v.dims().to_vec()));
    }
    if dst.dims() != [rows] {
        return Err(StridedError::ShapeMismatch(dst.dims().to_vec(), vec![rows]));
    }
    let (ms0, ms1) = (m.strides()[0], m.strides()[1]);
    let vs = v.strides()[0];
    let ds = dst.strides()[0];
    let (dp, mp, vp) = (SendPtr(dst.ptr), SendPtr(m.ptr), SendPtr(v.ptr));
    let (doff, moff, voff) = (
        dst.layout.offset() as isize,
        m.layout.offset() as isize,
        v.layout.offset() as isize,
    );
    let parallel = threading::pool_threads(config.threads) > 1 && rows * cols > config.parallel_threshold;
    let chunk = (config.parallel_threshold / cols.max(1)).max(1);
    threading::par_chunks(rows, chunk, parallel, |r| {
        for i in r {
            unsafe {
                let d = dot_strided(
                    mp.get().offset(moff + i as isize * ms0),
                    ms1,
                    vp.get().offset(voff),
                    vs,
                    cols,
                );
                *dp.get().offset(doff + i as isize * ds) = d;
            }
        }
        Ok(())
    })
    .map(|_| ())
}

/// `dst[j] = v · m[:, j]`.
pub(crate) fn vtm_into<T: Element>(dst: &RawView<T>, v: &RawView<T>, m: &RawView<T>, config: &EngineConfig) -> Result<()> {
    let (rows, cols) = matrix_dims(m)?;
    if v.layout.rank() != 1 || v.dims()[0] != rows {
        return Err(StridedError::ShapeMismatch(v.dims().to_vec(), m.dims().to_vec()));
    }
    let mt = m.with_layout(m.layout.transpose());
    debug_assert_eq!(mt.dims(), [cols, rows]);
    mv_into(dst, &mt, v, config)
}

/// Tile sizes used by [`mm_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmChunks {
    /// Square tile edge derived from the L2 budget.
    pub tile: usize,
    /// Slice of the shared dimension walked per step.
    pub vector_chunk: usize,
    /// Rows and columns per task.
    pub inner_chunk: usize,
}

impl MmChunks {
    pub fn of(config: &EngineConfig, elem_size: usize) -> Self {
        let tile = config.mm_tile(elem_size);
        let (vector_chunk, inner_chunk) = if tile > 64 {
            (tile * 4, (tile as f64 / 4.0).sqrt().ceil() as usize)
        } else {
            (tile, (tile as f64).sqrt().ceil() as usize)
        };
        Self {
            tile,
            vector_chunk: vector_chunk.max(1),
            inner_chunk: inner_chunk.max(1),
        }
    }
}

fn matrix_dims<T: Element>(m: &RawView<T>) -> Result<(usize, usize)> {
    match m.dims() {
        &[r, c] => Ok((r, c)),
        d => Err(StridedError::RankMismatch(d.len(), 2)),
    }
}

/// `dst = a · b` for matrices `a: (m, n)`, `b: (n, p)`, `dst: (m, p)`.
///
/// Rows of `a` and columns of `b` are read in place through their strides.
/// `dst` must not overlap `a` or `b`.
pub(crate) fn mm_into<T: Element>(dst: &RawView<T>, a: &RawView<T>, b: &RawView<T>, config: &EngineConfig) -> Result<()> {
    let (m, n) = matrix_dims(a)?;
    let (n2, p) = matrix_dims(b)?;
    if n != n2 {
        return Err(StridedError::ShapeMismatch(a.dims().to_vec(), b.dims().to_vec()));
    }
    if dst.dims() != [m, p] {
        return Err(StridedError::ShapeMismatch(dst.dims().to_vec(), vec![m, p]));
    }
    let chunks = MmChunks::of(config, std::mem::size_of::<T>());
    let nthreads = threading::pool_threads(config.threads);
    let parallel = nthreads > 1 && m.saturating_mul(n).saturating_mul(p) > config.parallel_threshold;
    tracing::debug!(m, n, p, ?chunks, parallel, "matrix multiply");

    let row_blocks = threading::chunk_ranges(m, chunks.inner_chunk);
    let col_blocks = threading::chunk_ranges(p, chunks.inner_chunk);
    let tasks: Vec<(Range<usize>, Range<usize>)> = row_blocks
        .iter()
        .flat_map(|r| col_blocks.iter().map(move |c| (r.clone(), c.clone())))
        .collect();
    if cfg!(debug_assertions) {
        let boxes: Vec<(Vec<usize>, Vec<usize>)> = tasks
            .iter()
            .map(|(r, c)| (vec![r.start, c.start], vec![r.end, c.end]))
            .collect();
        threading::debug_assert_disjoint_boxes(&boxes);
    }

    let (as0, as1) = (a.strides()[0], a.strides()[1]);
    let (bs0, bs1) = (b.strides()[0], b.strides()[1]);
    let (ds0, ds1) = (dst.strides()[0], dst.strides()[1]);
    let (aoff, boff, doff) = (
        a.layout.offset() as isize,
        b.layout.offset() as isize,
        dst.layout.offset() as isize,
    );
    let (ap, bp, dp) = (SendPtr(a.ptr), SendPtr(b.ptr), SendPtr(dst.ptr));
    let vector_chunk = chunks.vector_chunk;

    threading::par_tasks(tasks, parallel, move |(rows, cols)| {
        let mut k = 0;
        while k < n {
            let end = (k + vector_chunk).min(n);
            for i in rows.clone() {
                let row = aoff + i as isize * as0 + k as isize * as1;
                for j in cols.clone() {
                    let col = boff + j as isize * bs1 + k as isize * bs0;
                    let out = doff + i as isize * ds0 + j as isize * ds1;
                    unsafe {
                        let d = dot_strided(ap.get().offset(row), as1, bp.get().offset(col), bs0, end - k);
                        let q = dp.get().offset(out);
                        *q = if k == 0 { d } else { (*q).add(d) };
                    }
                }
            }
            k = end;
        }
        if n == 0 {
            for i in rows.clone() {
                for j in cols.clone() {
                    unsafe { *dp.get().offset(doff + i as isize * ds0 + j as isize * ds1) = T::zero() };
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::StrideLayout;
    use crate::order::Order;
    use crate::shape::Shape;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn view<T: Element>(data: &mut [T], dims: &[usize], order: Order) -> RawView<T> {
        RawView::new(data.as_mut_ptr(), StrideLayout::of_dense(Shape::of(dims).unwrap(), 0, order))
    }

    fn naive(a: &[f64], b: &[f64], m: usize, n: usize, p: usize) -> Vec<f64> {
        let mut out = vec![0.0; m * p];
        for i in 0..m {
            for j in 0..p {
                for k in 0..n {
                    out[i * p + j] += a[i * n + k] * b[k * p + j];
                }
            }
        }
        out
    }

    #[test]
    fn test_dot_strided() {
        let a = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [1.0f64, 1.0, 1.0];
        let d = unsafe { dot_strided(a.as_ptr(), 2, b.as_ptr(), 1, 3) };
        assert_eq!(d, 9.0);
        let i = [1i32, 2, 3];
        assert_eq!(unsafe { dot_strided(i.as_ptr(), 1, i.as_ptr(), 1, 3) }, 14);
    }

    #[test]
    fn test_inner_range() {
        let mut a = vec![1.0f64, 2.0, 3.0, 4.0];
        let mut b = vec![2.0f64; 4];
        let (av, bv) = (view(&mut a, &[4], Order::C), view(&mut b, &[4], Order::C));
        assert_eq!(inner(&av, &bv, 0, 4).unwrap(), 20.0);
        assert_eq!(inner(&av, &bv, 1, 3).unwrap(), 10.0);
        assert!(inner(&av, &bv, 2, 5).is_err());
    }

    #[test]
    fn test_mv_and_vtm() {
        let mut m = vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut v = vec![1.0f64, 0.0, -1.0];
        let mut w = vec![1.0f64, 1.0];
        let mut out2 = vec![0.0f64; 2];
        let mut out3 = vec![0.0f64; 3];
        let cfg = EngineConfig::default();
        let mv = view(&mut m, &[2, 3], Order::C);
        mv_into(&view(&mut out2, &[2], Order::C), &mv, &view(&mut v, &[3], Order::C), &cfg).unwrap();
        assert_eq!(out2, vec![-2.0, -2.0]);
        vtm_into(&view(&mut out3, &[3], Order::C), &view(&mut w, &[2], Order::C), &mv, &cfg).unwrap();
        assert_eq!(out3, vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_mm_chunks() {
        let cfg = EngineConfig::default().with_threads(8);
        let c = MmChunks::of(&cfg, 8);
        assert_eq!(c.tile, 88);
        assert_eq!(c.vector_chunk, 352);
        assert_eq!(c.inner_chunk, 5);
        let small = MmChunks::of(&cfg.with_l2_cache_size(1 << 14), 8);
        assert_eq!(small.vector_chunk, small.tile);
    }

    #[test]
    fn test_mm_matches_naive_across_tiles() {
        let (m, n, p) = (37, 401, 23);
        let mut rng = StdRng::seed_from_u64(7);
        let mut a: Vec<f64> = (0..m * n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut b: Vec<f64> = (0..n * p).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let expected = naive(&a, &b, m, n, p);
        let mut out = vec![f64::NAN; m * p];
        let cfg = EngineConfig::default().with_parallel_threshold(256);
        let (av, bv) = (view(&mut a, &[m, n], Order::C), view(&mut b, &[n, p], Order::C));
        mm_into(&view(&mut out, &[m, p], Order::C), &av, &bv, &cfg).unwrap();
        for (x, y) in out.iter().zip(&expected) {
            assert_relative_eq!(*x, *y, max_relative = 1e-9, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_mm_f_ordered_output() {
        let mut a = vec![1.0f64, 2.0, 3.0, 4.0];
        let mut b = vec![5.0f64, 6.0, 7.0, 8.0];
        let mut out = vec![0.0f64; 4];
        let cfg = EngineConfig::default();
        mm_into(
            &view(&mut out, &[2, 2], Order::F),
            &view(&mut a, &[2, 2], Order::C),
            &view(&mut b, &[2, 2], Order::C),
            &cfg,
        )
        .unwrap();
        // [[19, 22], [43, 50]] stored column-major.
        assert_eq!(out, vec![19.0, 43.0, 22.0, 50.0]);
    }

    #[test]
    fn test_mm_shape_errors() {
        let mut a = vec![0.0f64; 6];
        let mut b = vec![0.0f64; 6];
        let mut out = vec![0.0f64; 4];
        let cfg = EngineConfig::default();
        let err = mm_into(
            &view(&mut out, &[2, 2], Order::C),
            &view(&mut a, &[2, 3], Order::C),
            &view(&mut b, &[2, 3], Order::C),
            &cfg,
        )
        .unwrap_err();
        assert!(matches!(err, StridedError::ShapeMismatch(_, _)));
    }
}
