//! Tensor factories and runtime element-type dispatch.
//!
//! Every tensor is created through a [`Manager`], which stamps it with the
//! manager's [`EngineConfig`]. Typed constructors are generic over
//! [`Element`]; the `*_dyn` constructors take a [`DType`] and return a
//! [`DynTensor`], the one place where a runtime tag selects a concrete type.

use std::sync::Arc;

use rand::distributions::Distribution;
use rand::Rng;

use crate::config::EngineConfig;
use crate::dtype::{DType, Element};
use crate::layout::StrideLayout;
use crate::order::Order;
use crate::shape::Shape;
use crate::storage::Storage;
use crate::tensor::{dense_order, Tensor};
use crate::Result;

/// Factory for tensors sharing one engine configuration.
#[derive(Debug, Clone)]
pub struct Manager {
    config: Arc<EngineConfig>,
}

impl Default for Manager {
    fn default() -> Self {
        Self {
            config: EngineConfig::global(),
        }
    }
}

impl Manager {
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    fn dense<T: Element>(&self, shape: Shape, values: Vec<T>, order: Order) -> Result<Tensor<T>> {
        Tensor::dense_in(shape, order, Storage::from_vec(values), self.config.clone())
    }

    // ========================================================================
    // Typed constructors
    // ========================================================================

    pub fn zeros<T: Element>(&self, shape: Shape, order: Order) -> Result<Tensor<T>> {
        Tensor::zeros_in(shape, order, self.config.clone())
    }

    pub fn full<T: Element>(&self, shape: Shape, value: T, order: Order) -> Result<Tensor<T>> {
        let storage = Storage::full(shape.size(), value);
        Tensor::dense_in(shape, order, storage, self.config.clone())
    }

    /// Values `0, 1, 2, ...` in the traversal `order`.
    pub fn seq<T: Element>(&self, shape: Shape, order: Order) -> Result<Tensor<T>> {
        let values = (0..shape.size()).map(|i| T::from_f64(i as f64)).collect();
        self.dense(shape, values, order)
    }

    /// `n x n` identity matrix.
    pub fn eye<T: Element>(&self, n: usize, order: Order) -> Result<Tensor<T>> {
        let t = self.zeros::<T>(Shape::of(&[n, n])?, order)?;
        for i in 0..n {
            t.storage().set(i * (n + 1), T::one());
        }
        Ok(t)
    }

    /// Standard normal samples for floats, uniform values for integers.
    pub fn random<T: Element, R: Rng + ?Sized>(&self, shape: Shape, rng: &mut R, order: Order) -> Result<Tensor<T>> {
        let values = (0..shape.size()).map(|_| T::sample(rng)).collect();
        self.dense(shape, values, order)
    }

    /// Samples of `dist`, converted to `T`.
    pub fn random_with<T, D, R>(&self, shape: Shape, dist: &D, rng: &mut R, order: Order) -> Result<Tensor<T>>
    where
        T: Element,
        D: Distribution<f64>,
        R: Rng + ?Sized,
    {
        let values = (0..shape.size()).map(|_| T::from_f64(dist.sample(rng))).collect();
        self.dense(shape, values, order)
    }

    /// Tensor over `data` with an explicit offset and strides. Every
    /// reachable position must lie inside `data`.
    pub fn stride<T: Element>(&self, shape: Shape, offset: usize, strides: &[isize], data: Vec<T>) -> Result<Tensor<T>> {
        let layout = StrideLayout::of(shape, offset, strides)?;
        layout.validate(data.len())?;
        Ok(Tensor::from_parts(layout, Storage::from_vec(data), self.config.clone()))
    }

    /// Dense tensor over `data`, laid out in `order`.
    pub fn from_vec<T: Element>(&self, shape: Shape, data: Vec<T>, order: Order) -> Result<Tensor<T>> {
        dense_order("from_vec", order)?;
        self.dense(shape, data, order)
    }

    /// Rank-0 tensor holding `value`.
    pub fn scalar<T: Element>(&self, value: T) -> Tensor<T> {
        Tensor::from_parts(StrideLayout::scalar(0), Storage::from_vec(vec![value]), self.config.clone())
    }

    /// Join `parts` along an existing `axis` into a tensor dense in `order`.
    pub fn cat<T: Element>(&self, axis: usize, parts: &[Tensor<T>], order: Order) -> Result<Tensor<T>> {
        Tensor::concat(axis, parts, order)
    }

    /// Join equally shaped `parts` along a new axis at `axis`.
    pub fn stack<T: Element>(&self, axis: usize, parts: &[Tensor<T>], order: Order) -> Result<Tensor<T>> {
        Tensor::stack(axis, parts, order)
    }

    // ========================================================================
    // Runtime dtype
    // ========================================================================

    pub fn zeros_dyn(&self, dtype: DType, shape: Shape, order: Order) -> Result<DynTensor> {
        Ok(match dtype {
            DType::U8 => self.zeros::<u8>(shape, order)?.into(),
            DType::I32 => self.zeros::<i32>(shape, order)?.into(),
            DType::F32 => self.zeros::<f32>(shape, order)?.into(),
            DType::F64 => self.zeros::<f64>(shape, order)?.into(),
        })
    }

    /// `value` converted to `dtype`, saturating for integers.
    pub fn full_dyn(&self, dtype: DType, shape: Shape, value: f64, order: Order) -> Result<DynTensor> {
        Ok(match dtype {
            DType::U8 => self.full(shape, u8::from_f64(value), order)?.into(),
            DType::I32 => self.full(shape, i32::from_f64(value), order)?.into(),
            DType::F32 => self.full(shape, f32::from_f64(value), order)?.into(),
            DType::F64 => self.full(shape, value, order)?.into(),
        })
    }

    pub fn seq_dyn(&self, dtype: DType, shape: Shape, order: Order) -> Result<DynTensor> {
        Ok(match dtype {
            DType::U8 => self.seq::<u8>(shape, order)?.into(),
            DType::I32 => self.seq::<i32>(shape, order)?.into(),
            DType::F32 => self.seq::<f32>(shape, order)?.into(),
            DType::F64 => self.seq::<f64>(shape, order)?.into(),
        })
    }
}

/// A tensor whose element type is known only at runtime.
#[derive(Debug, Clone)]
pub enum DynTensor {
    U8(Tensor<u8>),
    I32(Tensor<i32>),
    F32(Tensor<f32>),
    F64(Tensor<f64>),
}

macro_rules! dispatch {
    ($self:expr, $t:ident => $body:expr) => {
        match $self {
            DynTensor::U8($t) => $body,
            DynTensor::I32($t) => $body,
            DynTensor::F32($t) => $body,
            DynTensor::F64($t) => $body,
        }
    };
}

impl DynTensor {
    pub fn dtype(&self) -> DType {
        dispatch!(self, t => t.dtype())
    }

    pub fn shape(&self) -> &Shape {
        dispatch!(self, t => t.shape())
    }

    pub fn size(&self) -> usize {
        dispatch!(self, t => t.size())
    }

    pub fn get_f64(&self, index: &[usize]) -> Result<f64> {
        dispatch!(self, t => t.get_f64(index))
    }

    pub fn sum_f64(&self) -> Result<f64> {
        dispatch!(self, t => t.sum().map(|s| s.to_f64()))
    }

    /// Element-wise conversion to `f64`.
    pub fn to_f64(&self) -> Result<Tensor<f64>> {
        dispatch!(self, t => t.cast::<f64>())
    }

    pub fn copy(&self, order: Order) -> Result<DynTensor> {
        dispatch!(self, t => t.copy(order).map(DynTensor::from))
    }
}

macro_rules! dyn_from {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl From<Tensor<$t>> for DynTensor {
                fn from(t: Tensor<$t>) -> Self {
                    DynTensor::$variant(t)
                }
            }
        )*
    };
}

dyn_from!(u8 => U8, i32 => I32, f32 => F32, f64 => F64);
