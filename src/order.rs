//! Traversal orders and kernel loop ordering.

use std::fmt;

/// Logical traversal convention.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Order {
    /// Row-major: last axis varies fastest.
    #[default]
    C,
    /// Column-major: first axis varies fastest.
    F,
    /// Storage order: whichever traversal is cheapest for the existing strides.
    S,
    /// Automatic: C or F, chosen from the operand layout.
    A,
}

impl Order {
    /// Collapse `S` and `A` to the default dense order.
    #[inline]
    pub fn auto_fc(self) -> Order {
        match self {
            Order::F => Order::F,
            _ => Order::C,
        }
    }

    #[inline]
    pub fn is_dense(self) -> bool {
        matches!(self, Order::C | Order::F)
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Order::C => "C",
            Order::F => "F",
            Order::S => "S",
            Order::A => "A",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Loop ordering for multi-operand kernels
// ============================================================================

/// Rank of each stride among the non-zero strides (1 = smallest).
/// Zero strides rank 1.
pub(crate) fn stride_ranks(strides: &[isize]) -> Vec<usize> {
    strides
        .iter()
        .map(|&s| {
            let si = s.unsigned_abs();
            if si == 0 {
                return 1;
            }
            1 + strides
                .iter()
                .filter(|&&t| t != 0 && t.unsigned_abs() < si)
                .count()
        })
        .collect()
}

/// Permutation of axes, innermost first, for iterating several operands
/// that share `dims`.
///
/// Each operand votes for its small-stride axes with a bit-packed score so
/// that the rank order of one operand dominates ties from the others; the
/// destination operand votes twice. Unit axes sort last.
pub(crate) fn loop_order(
    dims: &[usize],
    strides_list: &[&[isize]],
    dest_index: Option<usize>,
) -> Vec<usize> {
    let rank = dims.len();
    if rank == 0 {
        return Vec::new();
    }
    if strides_list.is_empty() {
        return (0..rank).collect();
    }

    let bits = (64 - (strides_list.len() as u64 + 1).leading_zeros()) as u64;
    let mut score = vec![0u64; rank];
    for (k, strides) in strides_list.iter().enumerate() {
        let weight = if dest_index == Some(k) { 2 } else { 1 };
        for (axis, r) in stride_ranks(strides).into_iter().enumerate() {
            let shift = bits * (rank - r) as u64;
            score[axis] = score[axis].saturating_add(weight * (1u64 << shift.min(62)));
        }
    }
    for (s, &d) in score.iter_mut().zip(dims) {
        if d <= 1 {
            *s = 0;
        }
    }

    let mut perm: Vec<usize> = (0..rank).collect();
    perm.sort_by(|&a, &b| score[b].cmp(&score[a]).then(a.cmp(&b)));
    perm
}
