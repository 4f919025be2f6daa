//! Strided N-dimensional tensors with SIMD and fork-join parallel kernels.
//!
//! A [`Tensor`] is a [`StrideLayout`] (shape, offset, strides) over a shared
//! [`Storage`] buffer. Views such as [`Tensor::narrow`], [`Tensor::permute`]
//! or a stride-compatible [`Tensor::reshape`] build a new layout over the same
//! storage, so a write through one view is visible through every other.
//!
//! # Core Types
//!
//! - [`Shape`], [`StrideLayout`], [`Order`]: the layout model
//! - [`Storage`], [`DType`], [`Element`]: typed flat buffers for `u8`, `i32`, `f32`, `f64`
//! - [`PointerIterator`], [`StrideLoopDescriptor`], [`IndexIterator`]: traversal of one layout
//! - [`UnaryOp`], [`BinaryOp`], [`ReduceOp`], [`Compare`]: operator descriptors
//! - [`Manager`], [`DynTensor`]: factories and runtime element-type dispatch
//!
//! # Execution
//!
//! Single-operand work (in-place maps, reductions) walks the uniform-step
//! runs of a loop descriptor. Multi-operand work (tensor-tensor operators,
//! cross-layout copies) goes through a kernel plan:
//!
//! - Dimensions are ordered by stride so the destination's smallest stride is innermost
//! - Neighbouring contiguous axes are fused
//! - The traversal is blocked into tiles of [`BLOCK_MEMORY_SIZE`] bytes
//! - Large traversals are split recursively across the rayon pool
//!
//! Matrix products are tiled from the L2 cache size in [`EngineConfig`], and
//! every parallel partition writes a region disjoint from all others.
//!
//! # Example
//!
//! ```rust
//! use strided_tensor::{Manager, Order, Shape};
//!
//! let m = Manager::default();
//! let a = m.seq::<f64>(Shape::of(&[2, 3]).unwrap(), Order::C).unwrap();
//! assert_eq!(a.sum().unwrap(), 15.0);
//!
//! // Transpose is a view; copying it in C order moves the data.
//! let t = a.transpose();
//! assert_eq!(t.dims(), &[3, 2]);
//! assert_eq!(t.copy(Order::C).unwrap().to_vec(Order::C), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
//! ```

pub mod broadcast;
pub mod config;
mod copy;
pub mod dtype;
pub mod iter;
mod kernel;
pub mod layout;
mod linalg;
pub mod manager;
pub mod ops;
pub mod order;
mod plan;
mod reduce;
pub mod shape;
pub mod simd;
pub mod storage;
pub mod tensor;
mod threading;

pub use broadcast::{broadcast_shape, broadcast_shapes, promote_shape};
pub use config::EngineConfig;
pub use dtype::{DType, Element};
pub use iter::{IndexIterator, PointerIterator, Run, StrideLoopDescriptor};
pub use layout::StrideLayout;
pub use linalg::MmChunks;
pub use manager::{DynTensor, Manager};
pub use ops::{BinaryOp, Compare, ReduceOp, UnaryOp};
pub use order::Order;
pub use reduce::Statistics;
pub use shape::Shape;
pub use storage::Storage;
pub use tensor::Tensor;

// ============================================================================
// Constants
// ============================================================================

/// Block memory size for cache-blocked iteration (L1 cache target).
pub const BLOCK_MEMORY_SIZE: usize = 32 * 1024;

/// Cache line size in bytes.
///
/// Used for memory region calculations in block size computation.
pub const CACHE_LINE_SIZE: usize = 64;

// ============================================================================
// Error types
// ============================================================================

/// Errors raised by tensor operations.
#[derive(Debug, thiserror::Error)]
pub enum StridedError {
    /// Operand ranks do not match.
    #[error("rank mismatch: {0} vs {1}")]
    RankMismatch(usize, usize),

    /// Operand shapes are incompatible for the operation.
    #[error("shape mismatch: {0:?} vs {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    #[error("shapes {0:?} and {1:?} cannot be broadcast together")]
    BroadcastIncompatible(Vec<usize>, Vec<usize>),

    /// Invalid axis index for the given rank.
    #[error("invalid axis {axis} for rank {rank}")]
    InvalidAxis { axis: usize, rank: usize },

    /// Shapes must have at least one axis and no zero dims.
    #[error("invalid shape {0:?}")]
    InvalidShape(Vec<usize>),

    #[error("index {index:?} out of bounds for dims {dims:?}")]
    IndexOutOfBounds { index: Vec<usize>, dims: Vec<usize> },

    /// Matrix is not square when a square matrix was required.
    #[error("non-square matrix: rows={rows}, cols={cols}")]
    NonSquare { rows: usize, cols: usize },

    /// Floating-point operation applied to an integer tensor.
    #[error("operation {op} is not available for dtype {dtype}")]
    UnsupportedForDType { op: &'static str, dtype: dtype::DType },

    /// Order token the operation does not accept.
    #[error("operation {op} does not accept order {order}")]
    InvalidOrder { op: &'static str, order: order::Order },

    #[error("cannot reshape {from:?} into {to:?}")]
    ReshapeSize { from: Vec<usize>, to: Vec<usize> },

    /// Stride array length doesn't match dimensions.
    #[error("stride and dims length mismatch")]
    StrideLengthMismatch,

    /// Offset arithmetic overflowed or left the storage.
    #[error("offset overflow while computing pointer")]
    OffsetOverflow,

    #[error("integer division by zero")]
    DivisionByZero,

    /// Argument outside the domain of the operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A worker task failed; the whole operation is abandoned.
    #[error("parallel task failed: {0}")]
    TaskFailed(Box<StridedError>),
}

/// Result type for tensor operations.
pub type Result<T> = std::result::Result<T, StridedError>;
