//! Copy between two layouts of the same shape.
//!
//! When both sides are dense in the same order the copy is a contiguous
//! stream, cut into chunks on the pool when large. Any other pairing (C to F,
//! strided views) is partitioned spatially: the shape is halved along its
//! largest axis until every box holds at most
//! [`EngineConfig::copy_block_limit`] elements, and each box is copied by its
//! own task through a blocked plan over narrowed views.

use crate::config::EngineConfig;
use crate::dtype::Element;
use crate::kernel::{ensure_same_shape, for_each_inner_block, RawView};
use crate::order::Order;
use crate::plan::KernelPlan;
use crate::threading::{self, SendPtr};
use crate::Result;

/// `dst[i] = src[i]` for every logical index `i`. `dst` must not overlap `src`.
pub(crate) fn copy_into<T: Element>(dst: &RawView<T>, src: &RawView<T>, config: &EngineConfig) -> Result<()> {
    ensure_same_shape(dst.dims(), src.dims())?;
    let order = dst.layout.storage_fast_order();
    if order != Order::S && src.layout.storage_fast_order() == order && dst.strides() == src.strides() {
        return stream_copy(dst, src, config);
    }
    block_copy(dst, src, config)
}

fn stream_copy<T: Element>(dst: &RawView<T>, src: &RawView<T>, config: &EngineConfig) -> Result<()> {
    let len = dst.layout.size();
    let parallel = threading::pool_threads(config.threads) > 1 && len > config.parallel_threshold;
    tracing::debug!(len, parallel, "same-order copy");
    let chunk = if parallel {
        config.parallel_threshold
    } else {
        len
    };
    let (dp, sp) = (SendPtr(dst.ptr), SendPtr(src.ptr));
    let (doff, soff) = (dst.layout.offset(), src.layout.offset());
    threading::par_chunks(len, chunk, parallel, |r| {
        unsafe {
            std::ptr::copy_nonoverlapping(sp.get().add(soff + r.start), dp.get().add(doff + r.start), r.len());
        }
        Ok(())
    })
    .map(|_| ())
}

/// Boxes `(starts, ends)` covering `dims`, each with at most `limit` elements
/// unless it is a single element.
pub(crate) fn partition_boxes(dims: &[usize], limit: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
    let mut out = Vec::new();
    let mut stack = vec![(vec![0usize; dims.len()], dims.to_vec())];
    while let Some((starts, ends)) = stack.pop() {
        let size: usize = starts.iter().zip(&ends).map(|(s, e)| e - s).product();
        let largest = (0..dims.len()).max_by_key(|&i| (ends[i] - starts[i], usize::MAX - i));
        match largest {
            Some(axis) if size > limit && ends[axis] - starts[axis] > 1 => {
                let mid = starts[axis] + (ends[axis] - starts[axis]) / 2;
                let mut left_end = ends.clone();
                left_end[axis] = mid;
                let mut right_start = starts.clone();
                right_start[axis] = mid;
                stack.push((right_start, ends));
                stack.push((starts, left_end));
            }
            _ => out.push((starts, ends)),
        }
    }
    out
}

fn block_copy<T: Element>(dst: &RawView<T>, src: &RawView<T>, config: &EngineConfig) -> Result<()> {
    let elem_size = std::mem::size_of::<T>();
    let parallel = dst.layout.is_injective()
        && threading::pool_threads(config.threads) > 1
        && dst.layout.size() > config.parallel_threshold;
    let boxes = if parallel {
        partition_boxes(dst.dims(), config.copy_block_limit(elem_size))
    } else {
        vec![(vec![0; dst.layout.rank()], dst.dims().to_vec())]
    };
    threading::debug_assert_disjoint_boxes(&boxes);
    tracing::debug!(
        dims = ?dst.dims(),
        partitions = boxes.len(),
        parallel,
        "block copy"
    );
    threading::par_tasks(boxes, parallel, |(starts, ends)| {
        let d = dst.with_layout(dst.layout.narrow_all(true, &starts, &ends)?);
        let s = src.with_layout(src.layout.narrow_all(true, &starts, &ends)?);
        copy_partition(&d, &s, elem_size)
    })
}

/// Sequential blocked copy of one partition.
fn copy_partition<T: Element>(dst: &RawView<T>, src: &RawView<T>, elem_size: usize) -> Result<()> {
    let plan = KernelPlan::new(dst.dims(), &[dst.strides(), src.strides()], Some(0), elem_size);
    tracing::trace!(dims = ?plan.dims, blocks = ?plan.blocks, "copy partition");
    let base = [dst.layout.offset() as isize, src.layout.offset() as isize];
    let (ds, ss) = (plan.strides[0][0], plan.strides[1][0]);
    for_each_inner_block(&plan.dims, &plan.blocks, &plan.strides, &base, |offs, len| {
        unsafe {
            let mut dp = dst.ptr.offset(offs[0]);
            let mut sp = src.ptr.offset(offs[1]) as *const T;
            if ds == 1 && ss == 1 {
                std::ptr::copy_nonoverlapping(sp, dp, len);
            } else {
                for _ in 0..len {
                    *dp = *sp;
                    dp = dp.offset(ds);
                    sp = sp.offset(ss);
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
    use crate::shape::Shape;

    fn view(data: &mut [f64], dims: &[usize], order: Order) -> RawView<f64> {
        RawView::new(data.as_mut_ptr(), StrideLayout::of_dense(Shape::of(dims).unwrap(), 0, order))
    }

    #[test]
    fn test_partition_boxes_cover_and_fit() {
        let boxes = partition_boxes(&[10, 7, 3], 20);
        let total: usize = boxes
            .iter()
            .map(|(s, e)| s.iter().zip(e).map(|(a, b)| b - a).product::<usize>())
            .sum();
        assert_eq!(total, 210);
        for (s, e) in &boxes {
            assert!(s.iter().zip(e).map(|(a, b)| b - a).product::<usize>() <= 20);
        }
    }

    #[test]
    fn test_partition_single_box_when_small() {
        assert_eq!(partition_boxes(&[4, 4], 100), vec![(vec![0, 0], vec![4, 4])]);
    }

    #[test]
    fn test_same_order_copy() {
        let mut src: Vec<f64> = (0..24).map(|x| x as f64).collect();
        let mut dst = vec![0.0; 24];
        copy_into(
            &view(&mut dst, &[2, 3, 4], Order::F),
            &view(&mut src, &[2, 3, 4], Order::F),
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn test_cross_order_copy_parallel() {
        let (r, c) = (300, 170);
        let mut src: Vec<f64> = (0..r * c).map(|x| x as f64).collect();
        let mut dst = vec![0.0; r * c];
        let cfg = EngineConfig::default()
            .with_parallel_threshold(64)
            .with_l2_cache_size(1 << 16);
        copy_into(&view(&mut dst, &[r, c], Order::F), &view(&mut src, &[r, c], Order::C), &cfg).unwrap();
        for i in [0, 1, 150, 299] {
            for j in [0, 7, 169] {
                assert_eq!(dst[i + j * r], src[i * c + j]);
            }
        }
    }

    #[test]
    fn test_copy_from_strided_view() {
        let mut src: Vec<f64> = (0..20).map(|x| x as f64).collect();
        let mut dst = vec![0.0; 6];
        let layout = StrideLayout::of(Shape::of(&[2, 3]).unwrap(), 1, &[10, 3]).unwrap();
        let s = RawView::new(src.as_mut_ptr(), layout);
        copy_into(&view(&mut dst, &[2, 3], Order::C), &s, &EngineConfig::default()).unwrap();
        assert_eq!(dst, vec![1.0, 4.0, 7.0, 11.0, 14.0, 17.0]);
    }
}
