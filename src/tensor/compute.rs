//! Element-wise operators and whole-tensor reductions.
//!
//! Methods ending in `_` mutate the receiver in place (and every view that
//! shares its storage) and return it for chaining.

use crate::broadcast;
use crate::dtype::Element;
use crate::kernel::{self, RawView};
use crate::ops::{BinaryOp, Compare, ReduceOp, UnaryOp};
use crate::order::Order;
use crate::reduce::{self, Statistics};
use crate::tensor::Tensor;
use crate::{Result, StridedError};

macro_rules! unary_methods {
    ($($(#[$doc:meta])* $name:ident => $op:expr;)*) => {
        impl<T: Element> Tensor<T> {
            $(
                $(#[$doc])*
                pub fn $name(&mut self) -> Result<&mut Self> {
                    self.unary_($op)
                }
            )*
        }
    };
}

unary_methods! {
    abs_ => UnaryOp::Abs;
    neg_ => UnaryOp::Neg;
    sqr_ => UnaryOp::Sqr;
    sqrt_ => UnaryOp::Sqrt;
    exp_ => UnaryOp::Exp;
    expm1_ => UnaryOp::Expm1;
    log_ => UnaryOp::Log;
    log1p_ => UnaryOp::Log1p;
    sin_ => UnaryOp::Sin;
    asin_ => UnaryOp::Asin;
    sinh_ => UnaryOp::Sinh;
    cos_ => UnaryOp::Cos;
    acos_ => UnaryOp::Acos;
    cosh_ => UnaryOp::Cosh;
    tan_ => UnaryOp::Tan;
    atan_ => UnaryOp::Atan;
    tanh_ => UnaryOp::Tanh;
    /// Round half to even.
    rint_ => UnaryOp::Rint;
    ceil_ => UnaryOp::Ceil;
    floor_ => UnaryOp::Floor;
    sigmoid_ => UnaryOp::Sigmoid;
}

macro_rules! binary_methods {
    ($($name:ident, $scalar:ident, $alloc:ident => $op:expr;)*) => {
        impl<T: Element> Tensor<T> {
            $(
                pub fn $name(&mut self, other: &Tensor<T>) -> Result<&mut Self> {
                    self.binary_($op, other)
                }

                pub fn $scalar(&mut self, value: T) -> Result<&mut Self> {
                    self.binary_scalar_($op, value)
                }

                /// Allocating variant; both operands are broadcast.
                pub fn $alloc(&self, other: &Tensor<T>) -> Result<Tensor<T>> {
                    self.binary($op, other)
                }
            )*
        }
    };
}

binary_methods! {
    add_, add_scalar_, add => BinaryOp::Add;
    sub_, sub_scalar_, sub => BinaryOp::Sub;
    mul_, mul_scalar_, mul => BinaryOp::Mul;
    div_, div_scalar_, div => BinaryOp::Div;
    min_, min_scalar_, min_with => BinaryOp::Min;
    max_, max_scalar_, max_with => BinaryOp::Max;
}

impl<T: Element> Tensor<T> {
    pub(crate) fn require_floating(&self, op: &'static str) -> Result<()> {
        if !T::is_floating() {
            return Err(StridedError::UnsupportedForDType { op, dtype: T::DTYPE });
        }
        Ok(())
    }

    /// Apply `f` to every element in place.
    pub(crate) fn apply_(&mut self, f: impl Fn(T) -> T + Sync + Send) -> Result<&mut Self> {
        kernel::apply_inplace(&self.raw(), &self.config, f)?;
        Ok(self)
    }

    // ========================================================================
    // Unary
    // ========================================================================

    pub fn unary_(&mut self, op: UnaryOp) -> Result<&mut Self> {
        if op.floating_only() {
            self.require_floating(op.name())?;
        }
        self.apply_(move |x| op.apply(x))
    }

    /// Allocating variant of [`Tensor::unary_`], in C order.
    pub fn unary(&self, op: UnaryOp) -> Result<Tensor<T>> {
        let mut out = self.copy(Order::C)?;
        out.unary_(op)?;
        Ok(out)
    }

    pub fn pow_(&mut self, power: f64) -> Result<&mut Self> {
        self.unary_(UnaryOp::Pow(power))
    }

    pub fn fill_(&mut self, value: T) -> Result<&mut Self> {
        self.apply_(move |_| value)
    }

    /// Replace NaN elements with `value`.
    pub fn fill_nan_(&mut self, value: T) -> Result<&mut Self> {
        self.apply_(move |x| if x.is_nan() { value } else { x })
    }

    /// Replace NaN, positive infinity and negative infinity.
    pub fn nan_to_num_(&mut self, nan: T, pos_inf: T, neg_inf: T) -> Result<&mut Self> {
        self.require_floating("nan_to_num")?;
        self.apply_(move |x| {
            if x.is_nan() {
                nan
            } else if x.to_f64() == f64::INFINITY {
                pos_inf
            } else if x.to_f64() == f64::NEG_INFINITY {
                neg_inf
            } else {
                x
            }
        })
    }

    /// Clamp into `[min, max]`; NaN stays NaN.
    pub fn clamp_(&mut self, min: T, max: T) -> Result<&mut Self> {
        self.apply_(move |x| x.max_nan(min).min_nan(max))
    }

    /// Replace every element with 1 where `cmp(x, value)` holds and 0
    /// elsewhere.
    pub fn compare_mask_(&mut self, cmp: Compare, value: T) -> Result<&mut Self> {
        self.apply_(move |x| if cmp.test(x, value) { T::one() } else { T::zero() })
    }

    // ========================================================================
    // Binary
    // ========================================================================

    pub fn binary_scalar_(&mut self, op: BinaryOp, value: T) -> Result<&mut Self> {
        if op == BinaryOp::Div && !T::is_floating() && value == T::zero() {
            return Err(StridedError::DivisionByZero);
        }
        self.apply_(move |x| op.apply(x, value))
    }

    /// `self = op(self, other)` with `other` broadcast to the receiver's
    /// shape. The receiver itself is never enlarged.
    pub fn binary_(&mut self, op: BinaryOp, other: &Tensor<T>) -> Result<&mut Self> {
        let target = broadcast::broadcast_shape(self.shape(), other.shape())?;
        if &target != self.shape() {
            return Err(StridedError::BroadcastIncompatible(
                self.dims().to_vec(),
                other.dims().to_vec(),
            ));
        }
        if op == BinaryOp::Div && !T::is_floating() && other.zero_count()? > 0 {
            return Err(StridedError::DivisionByZero);
        }
        let rhs = self.detached(other)?;
        let rhs = RawView::new(rhs.storage.as_ptr(), broadcast::promote_shape(&rhs.layout, self.shape())?);
        let dst = self.raw();
        kernel::zip_map_into(&dst, &dst, &rhs, &self.config, move |a, b| op.apply(a, b))?;
        Ok(self)
    }

    /// `op(self, other)` into a new C-ordered tensor of the broadcast shape.
    pub fn binary(&self, op: BinaryOp, other: &Tensor<T>) -> Result<Tensor<T>> {
        let target = broadcast::broadcast_shape(self.shape(), other.shape())?;
        let mut out = self.broadcast_to(&target)?.copy(Order::C)?;
        out.binary_(op, other)?;
        Ok(out)
    }

    /// `other`, or a private copy of it when it shares storage with `self`
    /// under a different layout.
    fn detached(&self, other: &Tensor<T>) -> Result<Tensor<T>> {
        if self.shares_storage(other) && self.layout != other.layout {
            tracing::trace!("operand aliases receiver, copying");
            return other.copy(Order::C);
        }
        Ok(other.clone())
    }

    /// `self += a * t`. A scalar `t` is added everywhere; otherwise the
    /// shapes must be equal.
    pub fn fma_(&mut self, a: T, t: &Tensor<T>) -> Result<&mut Self> {
        if t.is_scalar() {
            let v = t.get(&[])?;
            return self.add_scalar_(a.mul(v));
        }
        kernel::ensure_same_shape(self.dims(), t.dims())?;
        let rhs = self.detached(t)?;
        let dst = self.raw();
        kernel::zip_map_into(&dst, &dst, &rhs.raw(), &self.config, move |x, y| a.mul_add(y, x))?;
        Ok(self)
    }

    /// Softmax along `axis`, into a new C-ordered tensor.
    pub fn softmax1d(&self, axis: usize) -> Result<Tensor<T>> {
        self.require_floating("softmax")?;
        let out = self.copy(Order::C)?;
        for mut lane in out.axis_lanes(axis)? {
            let m = lane.max()?;
            lane.apply_(move |x| x.sub(m).unary(UnaryOp::Exp))?;
            let s = lane.sum()?;
            lane.div_scalar_(s)?;
        }
        Ok(out)
    }

    /// Log-softmax along `axis`, into a new C-ordered tensor.
    pub fn log_softmax1d(&self, axis: usize) -> Result<Tensor<T>> {
        self.require_floating("log_softmax")?;
        let out = self.copy(Order::C)?;
        for mut lane in out.axis_lanes(axis)? {
            let m = lane.max()?;
            let s = reduce::sum_map(&lane.raw(), &lane.config, move |x| x.sub(m).unary(UnaryOp::Exp))?;
            let shift = m.add(s.unary(UnaryOp::Log));
            lane.sub_scalar_(shift)?;
        }
        Ok(out)
    }

    // ========================================================================
    // Reductions
    // ========================================================================

    pub fn reduce(&self, op: ReduceOp) -> Result<T> {
        reduce::reduce(&self.raw(), op, &self.config)
    }

    /// Reduce skipping NaN elements.
    pub fn nan_reduce(&self, op: ReduceOp) -> Result<T> {
        reduce::nan_reduce(&self.raw(), op, &self.config)
    }

    pub fn sum(&self) -> Result<T> {
        self.reduce(ReduceOp::Sum)
    }

    pub fn prod(&self) -> Result<T> {
        self.reduce(ReduceOp::Prod)
    }

    pub fn min(&self) -> Result<T> {
        self.reduce(ReduceOp::Min)
    }

    pub fn max(&self) -> Result<T> {
        self.reduce(ReduceOp::Max)
    }

    /// Largest element; NaN propagates. Same as [`Tensor::max`].
    pub fn amax(&self) -> Result<T> {
        self.reduce(ReduceOp::Max)
    }

    /// Smallest element; NaN propagates. Same as [`Tensor::min`].
    pub fn amin(&self) -> Result<T> {
        self.reduce(ReduceOp::Min)
    }

    pub fn nan_sum(&self) -> Result<T> {
        self.nan_reduce(ReduceOp::Sum)
    }

    pub fn nan_prod(&self) -> Result<T> {
        self.nan_reduce(ReduceOp::Prod)
    }

    pub fn nan_min(&self) -> Result<T> {
        self.nan_reduce(ReduceOp::Min)
    }

    pub fn nan_max(&self) -> Result<T> {
        self.nan_reduce(ReduceOp::Max)
    }

    pub fn nan_count(&self) -> Result<usize> {
        reduce::count(&self.raw(), &self.config, |x: T| x.is_nan())
    }

    pub fn zero_count(&self) -> Result<usize> {
        reduce::count(&self.raw(), &self.config, |x: T| x == T::zero())
    }

    pub fn mean(&self) -> Result<T> {
        self.require_floating("mean")?;
        Ok(reduce::mean(&self.raw(), false, &self.config)?.0)
    }

    /// Mean of the non-NaN elements; NaN when there are none.
    pub fn nan_mean(&self) -> Result<T> {
        self.require_floating("nan_mean")?;
        Ok(reduce::mean(&self.raw(), true, &self.config)?.0)
    }

    /// Population variance.
    pub fn var(&self) -> Result<T> {
        self.varc(0)
    }

    /// Variance with `ddof` delta degrees of freedom.
    pub fn varc(&self, ddof: usize) -> Result<T> {
        self.require_floating("var")?;
        reduce::var(&self.raw(), ddof, None, false, &self.config)
    }

    /// Standard deviation with `ddof` delta degrees of freedom.
    pub fn std(&self, ddof: usize) -> Result<T> {
        Ok(self.varc(ddof)?.unary(UnaryOp::Sqrt))
    }

    pub fn nan_var(&self) -> Result<T> {
        self.nan_varc(0)
    }

    pub fn nan_varc(&self, ddof: usize) -> Result<T> {
        self.require_floating("nan_var")?;
        reduce::var(&self.raw(), ddof, None, true, &self.config)
    }

    /// Mean and variance over all and over non-NaN elements.
    pub fn stats(&self) -> Result<Statistics<T>> {
        self.require_floating("stats")?;
        reduce::stats(&self.raw(), &self.config)
    }

    /// Flat position, in `order`, of the first maximum.
    pub fn argmax(&self, order: Order) -> usize {
        reduce::arg_extreme(&self.raw(), self.layout.resolve_order(order).auto_fc(), true)
    }

    /// Flat position, in `order`, of the first minimum.
    pub fn argmin(&self, order: Order) -> usize {
        reduce::arg_extreme(&self.raw(), self.layout.resolve_order(order).auto_fc(), false)
    }

    /// `p`-norm: the element count for `p == 0`, otherwise `(Σ|x|^p)^(1/p)`.
    pub fn norm(&self, p: f64) -> Result<T> {
        self.require_floating("norm")?;
        if p < 0.0 || p.is_nan() {
            return Err(StridedError::InvalidArgument(format!(
                "norm power {p} must be non-negative"
            )));
        }
        let raw = self.raw();
        if p == 0.0 {
            return Ok(T::from_f64(self.size() as f64));
        }
        if p == 1.0 {
            return reduce::sum_map(&raw, &self.config, |x| x.unary(UnaryOp::Abs));
        }
        if p == 2.0 {
            let s = reduce::sum_map(&raw, &self.config, |x| x.mul(x))?;
            return Ok(s.unary(UnaryOp::Sqrt));
        }
        let s = reduce::sum_map(&raw, &self.config, move |x| x.unary(UnaryOp::Abs).unary(UnaryOp::Pow(p)))?;
        Ok(s.unary(UnaryOp::Pow(1.0 / p)))
    }

    /// Divide by the `p`-norm.
    pub fn normalize_(&mut self, p: f64) -> Result<&mut Self> {
        let n = self.norm(p)?;
        self.div_scalar_(n)
    }
}

#[cfg(test)]
mod tests {
    use crate::manager::Manager;
    use crate::shape::Shape;
    use crate::{Compare, Order, StridedError, Tensor, UnaryOp};
    use approx::assert_relative_eq;

    fn m() -> Manager {
        Manager::default()
    }

    fn t(dims: &[usize], v: Vec<f64>) -> Tensor<f64> {
        m().from_vec(Shape::of(dims).unwrap(), v, Order::C).unwrap()
    }

    #[test]
    fn test_unary_inplace_on_view() {
        let base = t(&[2, 2], vec![1.0, 4.0, 9.0, 16.0]);
        let mut col = base.sel(1, 1).unwrap();
        col.sqrt_().unwrap();
        assert_eq!(base.to_vec(Order::C), vec![1.0, 2.0, 9.0, 4.0]);
    }

    #[test]
    fn test_float_only_on_integers() {
        let mut i = m().seq::<i32>(Shape::of(&[3]).unwrap(), Order::C).unwrap();
        let err = i.exp_().unwrap_err();
        assert!(matches!(err, StridedError::UnsupportedForDType { op: "exp", .. }));
        i.neg_().unwrap();
        assert_eq!(i.to_vec(Order::C), vec![0, -1, -2]);
        assert!(i.mean().is_err());
    }

    #[test]
    fn test_broadcast_add_allocating() {
        let a = t(&[3, 1], vec![1.0, 2.0, 3.0]);
        let b = t(&[1, 4], vec![10.0, 20.0, 30.0, 40.0]);
        let c = a.add(&b).unwrap();
        assert_eq!(c.dims(), &[3, 4]);
        assert_eq!(c.sel(0, 1).unwrap().to_vec(Order::C), vec![12.0, 22.0, 32.0, 42.0]);
    }

    #[test]
    fn test_inplace_cannot_enlarge_receiver() {
        let mut a = t(&[3, 1], vec![1.0, 2.0, 3.0]);
        let b = t(&[1, 4], vec![1.0; 4]);
        assert!(matches!(a.add_(&b), Err(StridedError::BroadcastIncompatible(_, _))));
        let mut c = t(&[2, 3], vec![0.0; 6]);
        c.add_(&t(&[3], vec![1.0, 2.0, 3.0])).unwrap();
        assert_eq!(c.to_vec(Order::C), vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_aliased_operand() {
        let mut a = t(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let at = a.transpose();
        a.add_(&at).unwrap();
        assert_eq!(a.to_vec(Order::C), vec![2.0, 5.0, 5.0, 8.0]);
    }

    #[test]
    fn test_integer_division_by_zero() {
        let mut a = m().full::<i32>(Shape::of(&[3]).unwrap(), 6, Order::C).unwrap();
        assert!(matches!(a.div_scalar_(0), Err(StridedError::DivisionByZero)));
        let z = m().from_vec(Shape::of(&[3]).unwrap(), vec![1, 0, 2], Order::C).unwrap();
        assert!(matches!(a.div_(&z), Err(StridedError::DivisionByZero)));
        a.div_scalar_(4).unwrap();
        assert_eq!(a.to_vec(Order::C), vec![1, 1, 1]);
    }

    #[test]
    fn test_fma() {
        let mut a = t(&[3], vec![1.0, 1.0, 1.0]);
        a.fma_(2.0, &t(&[3], vec![1.0, 2.0, 3.0])).unwrap();
        assert_eq!(a.to_vec(Order::C), vec![3.0, 5.0, 7.0]);
        a.fma_(3.0, &m().scalar(1.0)).unwrap();
        assert_eq!(a.to_vec(Order::C), vec![6.0, 8.0, 10.0]);
        assert!(a.fma_(1.0, &t(&[2], vec![0.0, 0.0])).is_err());
    }

    #[test]
    fn test_fill_clamp_nan_to_num() {
        let mut a = t(&[4], vec![f64::NAN, -5.0, 0.5, f64::INFINITY]);
        a.nan_to_num_(0.0, 1.0, -1.0).unwrap();
        assert_eq!(a.to_vec(Order::C), vec![0.0, -5.0, 0.5, 1.0]);
        a.clamp_(-1.0, 0.25).unwrap();
        assert_eq!(a.to_vec(Order::C), vec![0.0, -1.0, 0.25, 0.25]);
        a.fill_(7.0).unwrap();
        assert_eq!(a.sum().unwrap(), 28.0);
    }

    #[test]
    fn test_reductions() {
        let a = t(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(a.sum().unwrap(), 21.0);
        assert_eq!(a.mean().unwrap(), 3.5);
        assert_eq!(a.max().unwrap(), 6.0);
        assert_eq!(a.argmax(Order::C), 5);
        assert_eq!(a.argmin(Order::F), 0);
        assert_eq!(a.transpose().argmax(Order::F), 5);
        assert_relative_eq!(a.varc(1).unwrap(), 3.5, epsilon = 1e-12);
    }

    #[test]
    fn test_std_amax_amin() {
        let a = t(&[4], vec![1.0, 2.0, 3.0, 4.0]);
        assert_relative_eq!(a.std(0).unwrap(), 1.25f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(a.std(1).unwrap(), (5.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_eq!(a.amax().unwrap(), 4.0);
        assert_eq!(a.amin().unwrap(), 1.0);
    }

    #[test]
    fn test_compare_mask() {
        let base = t(&[2, 3], vec![1.0, f64::NAN, 3.0, 4.0, 2.0, 6.0]);
        let mut col = base.sel(1, 1).unwrap();
        col.compare_mask_(Compare::Ge, 2.0).unwrap();
        assert_eq!(col.to_vec(Order::C), vec![0.0, 1.0]);
        let mut b = t(&[3], vec![1.0, f64::NAN, 3.0]);
        b.compare_mask_(Compare::Ne, 3.0).unwrap();
        assert_eq!(b.to_vec(Order::C), vec![1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_nan_reductions() {
        let a = t(&[3], vec![1.0, f64::NAN, 3.0]);
        assert_eq!(a.nan_sum().unwrap(), 4.0);
        assert_eq!(a.nan_count().unwrap(), 1);
        assert!(a.sum().unwrap().is_nan());
        assert_eq!(a.nan_mean().unwrap(), 2.0);
        let s = a.stats().unwrap();
        assert_eq!(s.nan_size, 2);
        assert_relative_eq!(s.nan_variance, 1.0);
    }

    #[test]
    fn test_norms() {
        let mut a = t(&[2], vec![3.0, -4.0]);
        assert_eq!(a.norm(2.0).unwrap(), 5.0);
        assert_eq!(a.norm(1.0).unwrap(), 7.0);
        assert_eq!(a.norm(0.0).unwrap(), 2.0);
        assert_relative_eq!(a.norm(3.0).unwrap(), 91f64.powf(1.0 / 3.0), epsilon = 1e-12);
        assert!(a.norm(-1.0).is_err());
        a.normalize_(2.0).unwrap();
        assert_eq!(a.to_vec(Order::C), vec![0.6, -0.8]);
    }

    #[test]
    fn test_softmax() {
        let a = t(&[2, 2], vec![0.0, 0.0, 1.0, 3.0]);
        let s = a.softmax1d(1).unwrap();
        assert_relative_eq!(s.get(&[0, 0]).unwrap(), 0.5);
        assert_relative_eq!(s.sel(0, 1).unwrap().sum().unwrap(), 1.0, epsilon = 1e-12);
        let l = a.log_softmax1d(1).unwrap();
        assert_relative_eq!(l.get(&[1, 1]).unwrap(), s.get(&[1, 1]).unwrap().ln(), epsilon = 1e-12);
        assert_eq!(a.to_vec(Order::C), vec![0.0, 0.0, 1.0, 3.0]);
    }

    #[test]
    fn test_unary_allocating() {
        let a = t(&[2], vec![0.0, 1.0]);
        let e = a.unary(UnaryOp::Exp).unwrap();
        assert_relative_eq!(e.get(&[1]).unwrap(), std::f64::consts::E);
        assert_eq!(a.get(&[1]).unwrap(), 1.0);
    }
}
