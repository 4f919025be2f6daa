//! Execution plans for multi-operand kernels.
//!
//! Building a plan runs four steps over operands that share one set of dims:
//!
//! 1. order: permute axes so the smallest strides (destination first) are innermost
//! 2. fuse: merge neighbouring axes that are contiguous in every operand
//! 3. compress: drop the unit axes left behind by fusion
//! 4. block: pick per-axis block sizes so one block's memory region fits in
//!    [`BLOCK_MEMORY_SIZE`]
//!
//! The resulting dims and strides are in loop order, innermost axis first.

use crate::order::{loop_order, stride_ranks};
use crate::{BLOCK_MEMORY_SIZE, CACHE_LINE_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KernelPlan {
    /// Loop dims, innermost first.
    pub dims: Vec<usize>,
    /// Per-operand strides aligned with `dims`.
    pub strides: Vec<Vec<isize>>,
    pub blocks: Vec<usize>,
    /// Split weights for the threaded driver.
    pub costs: Vec<isize>,
}

impl KernelPlan {
    /// Plan a traversal of `dims` over every operand in `strides_list`.
    /// Operand `dest_index` is the one written to.
    pub(crate) fn new(
        dims: &[usize],
        strides_list: &[&[isize]],
        dest_index: Option<usize>,
        elem_size: usize,
    ) -> Self {
        let perm = loop_order(dims, strides_list, dest_index);
        let ordered_dims: Vec<usize> = perm.iter().map(|&i| dims[i]).collect();
        let ordered: Vec<Vec<isize>> = strides_list
            .iter()
            .map(|s| perm.iter().map(|&i| s[i]).collect())
            .collect();
        let refs: Vec<&[isize]> = ordered.iter().map(|s| s.as_slice()).collect();

        let fused = fuse_dims(&ordered_dims, &refs);
        let (dims, strides) = compress_dims(&fused, &ordered);
        let refs: Vec<&[isize]> = strides.iter().map(|s| s.as_slice()).collect();

        let blocks = compute_blocks(&dims, &refs, elem_size, BLOCK_MEMORY_SIZE);
        let mut costs = compute_costs(&refs);
        if let Some(d) = dest_index {
            costs = mask_costs(&costs, &strides[d]);
        }
        Self {
            dims,
            strides,
            blocks,
            costs,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.dims.iter().product()
    }
}

/// Merge axis `i` into axis `i - 1` whenever every operand has
/// `s[i] == dims[i - 1] * s[i - 1]`. Merged-away axes become 1.
pub(crate) fn fuse_dims(dims: &[usize], strides_list: &[&[isize]]) -> Vec<usize> {
    let mut out = dims.to_vec();
    if out.len() <= 1 || strides_list.is_empty() {
        return out;
    }
    for i in (1..out.len()).rev() {
        let contiguous = strides_list
            .iter()
            .all(|s| s[i] == out[i - 1] as isize * s[i - 1]);
        if contiguous {
            out[i - 1] *= out[i];
            out[i] = 1;
        }
    }
    out
}

/// Drop unit axes from `dims` and every stride list. A fully unit shape
/// keeps a single axis of length 1.
pub(crate) fn compress_dims(dims: &[usize], strides: &[Vec<isize>]) -> (Vec<usize>, Vec<Vec<isize>>) {
    let keep: Vec<usize> = (0..dims.len()).filter(|&i| dims[i] > 1).collect();
    if keep.is_empty() {
        return (vec![1], strides.iter().map(|_| vec![0]).collect());
    }
    let new_dims = keep.iter().map(|&i| dims[i]).collect();
    let new_strides = strides
        .iter()
        .map(|s| keep.iter().map(|&i| s[i]).collect())
        .collect();
    (new_dims, new_strides)
}

/// Per-axis split weight: twice the smallest absolute stride over all
/// operands, or 1 when some operand broadcasts along the axis.
pub(crate) fn compute_costs(strides_list: &[&[isize]]) -> Vec<isize> {
    let Some(first) = strides_list.first() else {
        return Vec::new();
    };
    (0..first.len())
        .map(|i| {
            let m = strides_list
                .iter()
                .map(|s| s[i].abs())
                .min()
                .unwrap_or(0);
            if m == 0 {
                1
            } else {
                m * 2
            }
        })
        .collect()
}

/// Zero the cost of axes the destination does not advance along, so the
/// threaded driver never splits two tasks onto the same output element.
pub(crate) fn mask_costs(costs: &[isize], dest_strides: &[isize]) -> Vec<isize> {
    costs
        .iter()
        .zip(dest_strides)
        .map(|(&c, &s)| if s == 0 { 0 } else { c })
        .collect()
}

/// Bytes touched by one traversal of `dims`, counted in cache lines.
fn memory_region(dims: &[usize], byte_strides: &[Vec<isize>]) -> usize {
    byte_strides
        .iter()
        .map(|strides| {
            let mut contiguous = 0usize;
            let mut blocks = 1usize;
            for (&d, &s) in dims.iter().zip(strides) {
                let s = s.unsigned_abs();
                if s < CACHE_LINE_SIZE {
                    contiguous += d.saturating_sub(1) * s;
                } else {
                    blocks = blocks.saturating_mul(d);
                }
            }
            (contiguous / CACHE_LINE_SIZE + 1)
                .saturating_mul(CACHE_LINE_SIZE)
                .saturating_mul(blocks)
        })
        .fold(0usize, |a, b| a.saturating_add(b))
}

/// Last index maximizing `(value - 1) * cost`.
pub(crate) fn last_argmax_weighted(values: &[usize], costs: &[isize]) -> Option<usize> {
    let mut best = 0isize;
    let mut idx = None;
    for (i, (&v, &c)) in values.iter().zip(costs).enumerate() {
        if v <= 1 {
            continue;
        }
        let score = (v as isize - 1) * c;
        if score >= best {
            best = score;
            idx = Some(i);
        }
    }
    idx
}

/// Block sizes for `dims` (loop order) that keep one block within
/// `budget` bytes.
pub(crate) fn compute_blocks(
    dims: &[usize],
    strides_list: &[&[isize]],
    elem_size: usize,
    budget: usize,
) -> Vec<usize> {
    if dims.is_empty() {
        return Vec::new();
    }
    let byte_strides: Vec<Vec<isize>> = strides_list
        .iter()
        .map(|s| s.iter().map(|&x| x * elem_size as isize).collect())
        .collect();
    if memory_region(dims, &byte_strides) <= budget {
        return dims.to_vec();
    }

    // The innermost axis is kept whole when it is the fastest for everyone.
    let innermost_everywhere = strides_list
        .iter()
        .all(|s| stride_ranks(s).first() == Some(&1));
    if innermost_everywhere && dims.len() > 1 {
        let tails: Vec<&[isize]> = strides_list.iter().map(|s| &s[1..]).collect();
        let mut out = vec![dims[0]];
        out.extend(compute_blocks(&dims[1..], &tails, elem_size, budget));
        return out;
    }

    let min_stride = byte_strides
        .iter()
        .flat_map(|s| s.iter().map(|x| x.unsigned_abs()))
        .filter(|&s| s > 0)
        .min()
        .unwrap_or(0);
    if min_stride > budget {
        return vec![1; dims.len()];
    }

    let costs = compute_costs(strides_list);
    let mut blocks = dims.to_vec();
    while memory_region(&blocks, &byte_strides) >= 2 * budget {
        match last_argmax_weighted(&blocks, &costs) {
            Some(i) => blocks[i] = (blocks[i] + 1) / 2,
            None => break,
        }
    }
    while memory_region(&blocks, &byte_strides) > budget {
        match last_argmax_weighted(&blocks, &costs) {
            Some(i) => blocks[i] -= 1,
            None => break,
        }
    }
    blocks
}
