//! Broadcast shape resolution and stride-0 promotion.
//!
//! Shapes are aligned on their trailing axes; a shorter shape is padded
//! with unit axes on the left. Each aligned axis must either agree or be 1
//! in all but one operand. Promotion keeps the strides of matching axes and
//! gives stretched axes stride 0, so a promoted layout reads every source
//! element as many times as it is repeated, without copying.

use smallvec::SmallVec;

use crate::layout::{StrideLayout, Strides};
use crate::shape::{Dims, Shape};
use crate::{Result, StridedError};

/// Common broadcast shape of two shapes.
pub fn broadcast_shape(a: &Shape, b: &Shape) -> Result<Shape> {
    let (ad, bd) = (a.dims(), b.dims());
    let rank = ad.len().max(bd.len());
    let mut dims: Dims = SmallVec::with_capacity(rank);
    for i in 0..rank {
        let x = aligned_dim(ad, rank, i);
        let y = aligned_dim(bd, rank, i);
        let d = match (x, y) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(StridedError::BroadcastIncompatible(
                    ad.to_vec(),
                    bd.to_vec(),
                ))
            }
        };
        dims.push(d);
    }
    Ok(Shape::from_dims(dims))
}

/// Common broadcast shape of any number of shapes.
pub fn broadcast_shapes(shapes: &[&Shape]) -> Result<Shape> {
    let Some((first, rest)) = shapes.split_first() else {
        return Ok(Shape::scalar());
    };
    rest.iter()
        .try_fold((*first).clone(), |acc, s| broadcast_shape(&acc, s))
}

/// Dim of `dims` at axis `i` of a `rank`-axis alignment, 1 for padded axes.
#[inline]
fn aligned_dim(dims: &[usize], rank: usize, i: usize) -> usize {
    let pad = rank - dims.len();
    if i < pad {
        1
    } else {
        dims[i - pad]
    }
}

/// View `layout` with shape `target`. Stretched and padded axes get stride 0.
pub fn promote_shape(layout: &StrideLayout, target: &Shape) -> Result<StrideLayout> {
    let (dims, td) = (layout.dims(), target.dims());
    if dims.len() > td.len() {
        return Err(StridedError::BroadcastIncompatible(dims.to_vec(), td.to_vec()));
    }
    let pad = td.len() - dims.len();
    let mut strides: Strides = SmallVec::with_capacity(td.len());
    for (i, &t) in td.iter().enumerate() {
        if i < pad {
            strides.push(0);
            continue;
        }
        let (d, s) = (dims[i - pad], layout.stride(i - pad));
        if d == t {
            strides.push(s);
        } else if d == 1 {
            strides.push(0);
        } else {
            return Err(StridedError::BroadcastIncompatible(dims.to_vec(), td.to_vec()));
        }
    }
    Ok(StrideLayout::from_parts(target.clone(), layout.offset(), strides))
}

/// Axes of `target` along which `source` is stretched when broadcast to it,
/// including the padded leading axes.
pub fn stretched_axes(source: &Shape, target: &Shape) -> Result<Vec<usize>> {
    let (sd, td) = (source.dims(), target.dims());
    if sd.len() > td.len() {
        return Err(StridedError::BroadcastIncompatible(sd.to_vec(), td.to_vec()));
    }
    let pad = td.len() - sd.len();
    let mut axes = Vec::new();
    for (i, &t) in td.iter().enumerate() {
        if i < pad {
            axes.push(i);
            continue;
        }
        match sd[i - pad] {
            d if d == t => {}
            1 => axes.push(i),
            _ => return Err(StridedError::BroadcastIncompatible(sd.to_vec(), td.to_vec())),
        }
    }
    Ok(axes)
}
