//! Reductions along axes.
//!
//! Every variant goes through [`Tensor::reduce_groups`]: the axes are split
//! into reduced and kept ones, each index of the kept space selects a
//! sub-layout over the reduced axes, and that sub-layout is folded by the
//! scalar reduction engine. Groups are handed out to the pool in chunks of
//! [`EngineConfig::reduce_chunk`]; every group writes its own output
//! element, so tasks never share a destination.

use crate::broadcast;
use crate::config::EngineConfig;
use crate::dtype::Element;
use crate::kernel::RawView;
use crate::layout::{StrideLayout, Strides};
use crate::ops::ReduceOp;
use crate::order::Order;
use crate::reduce;
use crate::shape::{Dims, Shape};
use crate::tensor::Tensor;
use crate::threading::{self, SendPtr};
use crate::{Result, StridedError};

impl<T: Element> Tensor<T> {
    /// Dense order of a result derived from this tensor.
    fn result_order(&self, order: Order) -> Order {
        match self.layout.resolve_order(order) {
            Order::F => Order::F,
            Order::S if self.layout.is_f_ordered() => Order::F,
            _ => Order::C,
        }
    }

    /// Fold every group of elements spanned by `axes` with `f`.
    ///
    /// The result holds the remaining axes, dense in `order`. With
    /// `keep_dim` the reduced axes stay in place as unit axes.
    pub(crate) fn reduce_groups<R, F>(&self, axes: &[usize], keep_dim: bool, order: Order, f: F) -> Result<Tensor<R>>
    where
        R: Element,
        F: Fn(&RawView<T>, &EngineConfig) -> Result<R> + Sync + Send,
    {
        for &a in axes {
            self.shape().check_axis(a)?;
        }
        let mut axes = axes.to_vec();
        axes.sort_unstable();
        axes.dedup();

        let (mut kept_dims, mut kept_strides) = (Dims::new(), Strides::new());
        let (mut red_dims, mut red_strides) = (Dims::new(), Strides::new());
        for (i, (&d, &s)) in self.dims().iter().zip(self.layout.strides()).enumerate() {
            if axes.contains(&i) {
                red_dims.push(d);
                red_strides.push(s);
            } else {
                kept_dims.push(d);
                kept_strides.push(s);
            }
        }
        let kept_shape = Shape::from_dims(kept_dims);
        let red_shape = Shape::from_dims(red_dims);
        let out = self.zeros_like::<R>(kept_shape.clone(), self.result_order(order))?;

        let groups = kept_shape.size();
        let parallel = threading::pool_threads(self.config.threads) > 1
            && groups > 1
            && self.size() > self.config.parallel_threshold;
        let inner = if parallel {
            self.config.as_ref().clone().with_threads(1)
        } else {
            self.config.as_ref().clone()
        };
        tracing::debug!(
            dims = ?self.dims(),
            ?axes,
            groups,
            parallel,
            "axis reduction"
        );

        let src = self.raw();
        let base = self.layout.offset() as isize;
        let out_layout = out.layout.clone();
        let dst = SendPtr(out.storage.as_ptr());
        threading::par_chunks(groups, self.config.reduce_chunk, parallel, |range| {
            for g in range {
                let idx = kept_shape.index(Order::C, g);
                let offset = idx
                    .iter()
                    .zip(kept_strides.iter())
                    .fold(base, |p, (&i, &s)| p + i as isize * s);
                let group = src.with_layout(StrideLayout::from_parts(
                    red_shape.clone(),
                    offset as usize,
                    red_strides.clone(),
                ));
                let v = f(&group, &inner)?;
                unsafe {
                    *dst.get().add(out_layout.pointer_unchecked(&idx)) = v;
                }
            }
            Ok(())
        })?;

        if !keep_dim {
            return Ok(out);
        }
        let mut layout = out.layout.clone();
        for &a in &axes {
            layout = layout.unsqueeze(a)?;
        }
        Ok(out.view(layout))
    }

    // ========================================================================
    // Single axis
    // ========================================================================

    /// Reduce along `axis` with `op`; the axis is removed from the result.
    pub fn reduce1d(&self, op: ReduceOp, axis: usize, order: Order) -> Result<Tensor<T>> {
        self.reduce_groups(&[axis], false, order, move |v, c| reduce::reduce(v, op, c))
    }

    pub fn nan_reduce1d(&self, op: ReduceOp, axis: usize, order: Order) -> Result<Tensor<T>> {
        self.reduce_groups(&[axis], false, order, move |v, c| reduce::nan_reduce(v, op, c))
    }

    pub fn sum1d(&self, axis: usize, order: Order) -> Result<Tensor<T>> {
        self.reduce1d(ReduceOp::Sum, axis, order)
    }

    pub fn prod1d(&self, axis: usize, order: Order) -> Result<Tensor<T>> {
        self.reduce1d(ReduceOp::Prod, axis, order)
    }

    pub fn min1d(&self, axis: usize, order: Order) -> Result<Tensor<T>> {
        self.reduce1d(ReduceOp::Min, axis, order)
    }

    pub fn max1d(&self, axis: usize, order: Order) -> Result<Tensor<T>> {
        self.reduce1d(ReduceOp::Max, axis, order)
    }

    /// Same as [`Tensor::max1d`].
    pub fn amax1d(&self, axis: usize, order: Order) -> Result<Tensor<T>> {
        self.reduce1d(ReduceOp::Max, axis, order)
    }

    /// Same as [`Tensor::min1d`].
    pub fn amin1d(&self, axis: usize, order: Order) -> Result<Tensor<T>> {
        self.reduce1d(ReduceOp::Min, axis, order)
    }

    pub fn nan_sum1d(&self, axis: usize, order: Order) -> Result<Tensor<T>> {
        self.nan_reduce1d(ReduceOp::Sum, axis, order)
    }

    pub fn mean1d(&self, axis: usize, order: Order) -> Result<Tensor<T>> {
        self.require_floating("mean")?;
        self.reduce_groups(&[axis], false, order, |v, c| Ok(reduce::mean(v, false, c)?.0))
    }

    pub fn nan_mean1d(&self, axis: usize, order: Order) -> Result<Tensor<T>> {
        self.require_floating("nan_mean")?;
        self.reduce_groups(&[axis], false, order, |v, c| Ok(reduce::mean(v, true, c)?.0))
    }

    /// Variance along `axis` with `ddof` delta degrees of freedom.
    pub fn var1d(&self, axis: usize, ddof: usize, order: Order) -> Result<Tensor<T>> {
        self.require_floating("var")?;
        self.reduce_groups(&[axis], false, order, move |v, c| reduce::var(v, ddof, None, false, c))
    }

    /// Standard deviation along `axis` with `ddof` delta degrees of freedom.
    pub fn std1d(&self, axis: usize, ddof: usize, order: Order) -> Result<Tensor<T>> {
        let mut out = self.var1d(axis, ddof, order)?;
        out.sqrt_()?;
        Ok(out)
    }

    /// Index along `axis` of the first maximum of every lane.
    pub fn argmax1d(&self, axis: usize, keep_dim: bool, order: Order) -> Result<Tensor<i32>> {
        self.reduce_groups(&[axis], keep_dim, order, |v, _| {
            Ok(reduce::arg_extreme(v, Order::C, true) as i32)
        })
    }

    /// Index along `axis` of the first minimum of every lane.
    pub fn argmin1d(&self, axis: usize, keep_dim: bool, order: Order) -> Result<Tensor<i32>> {
        self.reduce_groups(&[axis], keep_dim, order, |v, _| {
            Ok(reduce::arg_extreme(v, Order::C, false) as i32)
        })
    }

    // ========================================================================
    // Trailing and broadcast shapes
    // ========================================================================

    /// Trailing axes matching `shape`, which must equal the last dims.
    fn trailing_axes(&self, shape: &Shape) -> Result<Vec<usize>> {
        let (rank, k) = (self.rank(), shape.rank());
        if k > rank || &self.dims()[rank - k..] != shape.dims() {
            return Err(StridedError::ShapeMismatch(self.dims().to_vec(), shape.dims().to_vec()));
        }
        Ok((rank - k..rank).collect())
    }

    /// Reduce the trailing axes given by `shape`, keeping the leading ones.
    pub fn reduce_on(&self, op: ReduceOp, shape: &Shape, keep_dim: bool, order: Order) -> Result<Tensor<T>> {
        let axes = self.trailing_axes(shape)?;
        self.reduce_groups(&axes, keep_dim, order, move |v, c| reduce::reduce(v, op, c))
    }

    pub fn sum_on(&self, shape: &Shape, keep_dim: bool, order: Order) -> Result<Tensor<T>> {
        self.reduce_on(ReduceOp::Sum, shape, keep_dim, order)
    }

    pub fn mean_on(&self, shape: &Shape, keep_dim: bool, order: Order) -> Result<Tensor<T>> {
        self.require_floating("mean")?;
        let axes = self.trailing_axes(shape)?;
        self.reduce_groups(&axes, keep_dim, order, |v, c| Ok(reduce::mean(v, false, c)?.0))
    }

    pub fn var_on(&self, shape: &Shape, ddof: usize, keep_dim: bool, order: Order) -> Result<Tensor<T>> {
        self.require_floating("var")?;
        let axes = self.trailing_axes(shape)?;
        self.reduce_groups(&axes, keep_dim, order, move |v, c| reduce::var(v, ddof, None, false, c))
    }

    /// Undo a broadcast: reduce every axis along which `target` would be
    /// stretched to this tensor's shape. The result has `target`'s shape,
    /// or this tensor's rank with unit axes when `keep_dim` is set.
    pub fn reduce_to(&self, op: ReduceOp, target: &Shape, keep_dim: bool, order: Order) -> Result<Tensor<T>> {
        self.fold_to(target, keep_dim, order, move |v, c| reduce::reduce(v, op, c))
    }

    /// Mean over the axes [`Tensor::reduce_to`] would sum.
    pub fn mean_at(&self, target: &Shape, keep_dim: bool, order: Order) -> Result<Tensor<T>> {
        self.require_floating("mean")?;
        self.fold_to(target, keep_dim, order, |v, c| Ok(reduce::mean(v, false, c)?.0))
    }

    fn fold_to<F>(&self, target: &Shape, keep_dim: bool, order: Order, f: F) -> Result<Tensor<T>>
    where
        F: Fn(&RawView<T>, &EngineConfig) -> Result<T> + Sync + Send,
    {
        let axes = broadcast::stretched_axes(target, self.shape())?;
        let out = self.reduce_groups(&axes, true, order, f)?;
        if keep_dim {
            return Ok(out);
        }
        let pad: Vec<usize> = (0..self.rank() - target.rank()).collect();
        let layout = out.layout.squeeze_axes(&pad)?;
        Ok(out.view(layout))
    }

    /// Rank-1 views along `axis`, one per index of the other axes in C order.
    pub(crate) fn axis_lanes(&self, axis: usize) -> Result<Vec<Tensor<T>>> {
        self.shape().check_axis(axis)?;
        let others = Shape::from_dims(self.layout.narrow_dims(axis));
        let strides = self.layout.narrow_strides(axis);
        let lane_shape = Shape::from_dims(Dims::from_slice(&[self.dim(axis)]));
        let lane_strides = Strides::from_slice(&[self.layout.stride(axis)]);
        let base = self.layout.offset() as isize;
        Ok((0..others.size())
            .map(|g| {
                let idx = others.index(Order::C, g);
                let offset = idx
                    .iter()
                    .zip(strides.iter())
                    .fold(base, |p, (&i, &s)| p + i as isize * s);
                self.view(StrideLayout::from_parts(
                    lane_shape.clone(),
                    offset as usize,
                    lane_strides.clone(),
                ))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::manager::Manager;
    use crate::shape::Shape;
    use crate::{EngineConfig, Order, ReduceOp, StridedError, Tensor};
    use approx::assert_relative_eq;

    fn seq(dims: &[usize]) -> Tensor<f64> {
        Manager::default().seq(Shape::of(dims).unwrap(), Order::C).unwrap()
    }

    #[test]
    fn test_sum1d() {
        let a = seq(&[2, 3]);
        let rows = a.sum1d(1, Order::C).unwrap();
        assert_eq!(rows.dims(), &[2]);
        assert_eq!(rows.to_vec(Order::C), vec![3.0, 12.0]);
        let cols = a.sum1d(0, Order::C).unwrap();
        assert_eq!(cols.to_vec(Order::C), vec![3.0, 5.0, 7.0]);
        assert!(matches!(a.sum1d(2, Order::C), Err(StridedError::InvalidAxis { axis: 2, rank: 2 })));
    }

    #[test]
    fn test_reduce1d_on_view_and_rank1() {
        let a = seq(&[3, 4]).transpose();
        assert_eq!(a.max1d(1, Order::C).unwrap().to_vec(Order::C), vec![8.0, 9.0, 10.0, 11.0]);
        let v = seq(&[5]);
        let s = v.sum1d(0, Order::C).unwrap();
        assert!(s.is_scalar());
        assert_eq!(s.get(&[]).unwrap(), 10.0);
    }

    #[test]
    fn test_mean_var1d() {
        let a = seq(&[2, 4]);
        assert_eq!(a.mean1d(1, Order::C).unwrap().to_vec(Order::C), vec![1.5, 5.5]);
        let v = a.var1d(1, 1, Order::C).unwrap();
        assert_relative_eq!(v.get(&[0]).unwrap(), 5.0 / 3.0, epsilon = 1e-12);
        let i = Manager::default().seq::<i32>(Shape::of(&[2, 2]).unwrap(), Order::C).unwrap();
        assert!(i.mean1d(0, Order::C).is_err());
    }

    #[test]
    fn test_argmax1d_first_wins() {
        let m = Manager::default();
        let a = m
            .from_vec(Shape::of(&[2, 3]).unwrap(), vec![1.0, 5.0, 5.0, 7.0, 2.0, 7.0], Order::C)
            .unwrap();
        let idx = a.argmax1d(1, false, Order::C).unwrap();
        assert_eq!(idx.to_vec(Order::C), vec![1, 0]);
        let kept = a.argmin1d(1, true, Order::C).unwrap();
        assert_eq!(kept.dims(), &[2, 1]);
        assert_eq!(kept.to_vec(Order::C), vec![0, 1]);
    }

    #[test]
    fn test_keep_dim_and_f_order() {
        let a = seq(&[2, 3, 4]);
        let r = a.sum1d(1, Order::F).unwrap();
        assert!(r.layout().is_f_ordered());
        let k = a.reduce_groups(&[1], true, Order::C, |v, c| crate::reduce::reduce(v, ReduceOp::Sum, c)).unwrap();
        assert_eq!(k.dims(), &[2, 1, 4]);
        assert_eq!(k.get(&[1, 0, 3]).unwrap(), r.get(&[1, 3]).unwrap());
    }

    #[test]
    fn test_reduce_on_trailing_shape() {
        let a = seq(&[2, 3, 4]);
        let r = a.reduce_on(ReduceOp::Sum, &Shape::of(&[3, 4]).unwrap(), false, Order::C).unwrap();
        assert_eq!(r.to_vec(Order::C), vec![66.0, 210.0]);
        assert!(a.reduce_on(ReduceOp::Sum, &Shape::of(&[2, 3]).unwrap(), false, Order::C).is_err());
        let m = a.mean_on(&Shape::of(&[4]).unwrap(), true, Order::C).unwrap();
        assert_eq!(m.dims(), &[2, 3, 1]);
        assert_eq!(m.get(&[0, 0, 0]).unwrap(), 1.5);
    }

    #[test]
    fn test_reduce_to_undoes_broadcast() {
        let a = seq(&[2, 3, 4]);
        let r = a.reduce_to(ReduceOp::Sum, &Shape::of(&[3, 1]).unwrap(), false, Order::C).unwrap();
        assert_eq!(r.dims(), &[3, 1]);
        assert_eq!(r.to_vec(Order::C), vec![60.0, 92.0, 124.0]);
        let k = a.reduce_to(ReduceOp::Sum, &Shape::of(&[4]).unwrap(), true, Order::C).unwrap();
        assert_eq!(k.dims(), &[1, 1, 4]);
        assert_eq!(k.to_vec(Order::C), vec![60.0, 66.0, 72.0, 78.0]);
        assert!(a.reduce_to(ReduceOp::Sum, &Shape::of(&[2]).unwrap(), false, Order::C).is_err());
    }

    #[test]
    fn test_mean_at_and_sum_on() {
        let a = seq(&[2, 3, 4]);
        let m = a.mean_at(&Shape::of(&[3, 1]).unwrap(), false, Order::C).unwrap();
        assert_eq!(m.dims(), &[3, 1]);
        assert_eq!(m.to_vec(Order::C), vec![7.5, 11.5, 15.5]);
        let s = a.sum_on(&Shape::of(&[4]).unwrap(), false, Order::C).unwrap();
        assert_eq!(s.dims(), &[2, 3]);
        assert_eq!(s.get(&[1, 2]).unwrap(), 20.0 + 21.0 + 22.0 + 23.0);
    }

    #[test]
    fn test_std_and_extremes1d() {
        let a = seq(&[2, 4]);
        let s = a.std1d(1, 0, Order::C).unwrap();
        assert_relative_eq!(s.get(&[0]).unwrap(), 1.25f64.sqrt(), epsilon = 1e-12);
        assert_eq!(a.amax1d(0, Order::C).unwrap().to_vec(Order::C), vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(a.amin1d(1, Order::C).unwrap().to_vec(Order::C), vec![0.0, 4.0]);
    }

    #[test]
    fn test_parallel_groups_match_sequential() {
        let cfg = EngineConfig::default().with_parallel_threshold(16).with_threads(4);
        let m = Manager::with_config(cfg);
        let a = m.seq::<f64>(Shape::of(&[300, 7]).unwrap(), Order::F).unwrap();
        let s = a.sum1d(1, Order::C).unwrap();
        for i in [0usize, 150, 299] {
            assert_relative_eq!(s.get(&[i]).unwrap(), (0..7).map(|j| (i + j * 300) as f64).sum::<f64>());
        }
    }

    #[test]
    fn test_axis_lanes() {
        let a = seq(&[2, 3]);
        let lanes = a.axis_lanes(0).unwrap();
        assert_eq!(lanes.len(), 3);
        assert_eq!(lanes[2].to_vec(Order::C), vec![2.0, 5.0]);
    }
}
