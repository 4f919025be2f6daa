//! Element types.
//!
//! [`DType`] is the runtime tag; [`Element`] is the numeric trait every
//! algorithm is written against. Integer arithmetic wraps, floats follow
//! IEEE semantics.

use std::fmt;

use num_traits::{Float, NumCast};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::ops::UnaryOp;
use crate::simd::{self, SimdKernels};

/// Runtime tag of an element type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    U8,
    I32,
    F32,
    F64,
}

impl DType {
    pub fn byte_size(self) -> usize {
        match self {
            DType::U8 => 1,
            DType::I32 | DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    pub fn is_floating(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::I32 => "i32",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    /// Vector lanes this element type gets on the current hardware.
    pub fn lanes(self) -> usize {
        (simd::register_bytes() / self.byte_size()).clamp(1, simd::MAX_LANES)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Numeric element stored in a tensor.
pub trait Element:
    Copy + Send + Sync + PartialOrd + Default + fmt::Debug + SimdKernels + 'static
{
    const DTYPE: DType;

    fn zero() -> Self;
    fn one() -> Self;
    /// Identity of `max`: the smallest representable value.
    fn lowest() -> Self;
    /// Identity of `min`: the largest representable value.
    fn highest() -> Self;

    /// Always false for integral types.
    fn is_nan(self) -> bool;

    fn add(self, other: Self) -> Self;
    fn sub(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
    /// Integer division by zero yields zero; callers reject zero divisors first.
    fn div(self, other: Self) -> Self;
    /// `self * a + b`, fused for floats.
    fn mul_add(self, a: Self, b: Self) -> Self;

    fn unary(self, op: UnaryOp) -> Self;

    fn to_f64(self) -> f64;
    /// Saturating conversion; NaN becomes zero for integers.
    fn from_f64(v: f64) -> Self;

    fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self;

    #[inline]
    fn is_floating() -> bool {
        Self::DTYPE.is_floating()
    }

    /// `min` that propagates NaN.
    #[inline]
    fn min_nan(self, other: Self) -> Self {
        if self.is_nan() {
            self
        } else if other.is_nan() || other < self {
            other
        } else {
            self
        }
    }

    /// `max` that propagates NaN.
    #[inline]
    fn max_nan(self, other: Self) -> Self {
        if self.is_nan() {
            self
        } else if other.is_nan() || other > self {
            other
        } else {
            self
        }
    }
}

pub(crate) fn float_unary<F: Float>(op: UnaryOp, x: F) -> F {
    match op {
        UnaryOp::Abs => x.abs(),
        UnaryOp::Neg => -x,
        UnaryOp::Sqr => x * x,
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Expm1 => x.exp_m1(),
        UnaryOp::Log => x.ln(),
        UnaryOp::Log1p => x.ln_1p(),
        UnaryOp::Sin => x.sin(),
        UnaryOp::Asin => x.asin(),
        UnaryOp::Sinh => x.sinh(),
        UnaryOp::Cos => x.cos(),
        UnaryOp::Acos => x.acos(),
        UnaryOp::Cosh => x.cosh(),
        UnaryOp::Tan => x.tan(),
        UnaryOp::Atan => x.atan(),
        UnaryOp::Tanh => x.tanh(),
        UnaryOp::Rint => rint(x),
        UnaryOp::Ceil => x.ceil(),
        UnaryOp::Floor => x.floor(),
        UnaryOp::Sigmoid => F::one() / (F::one() + (-x).exp()),
        UnaryOp::Pow(p) => match F::from(p) {
            Some(p) => x.powf(p),
            None => F::nan(),
        },
    }
}

/// Round half to even.
fn rint<F: Float>(x: F) -> F {
    let r = x.round();
    let two = F::one() + F::one();
    if (x - x.trunc()).abs() == F::one() / two && r % two != F::zero() {
        r - x.signum()
    } else {
        r
    }
}

macro_rules! float_element {
    ($t:ty, $dtype:expr) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;

            #[inline]
            fn zero() -> Self {
                0.0
            }
            #[inline]
            fn one() -> Self {
                1.0
            }
            #[inline]
            fn lowest() -> Self {
                <$t>::NEG_INFINITY
            }
            #[inline]
            fn highest() -> Self {
                <$t>::INFINITY
            }
            #[inline]
            fn is_nan(self) -> bool {
                <$t>::is_nan(self)
            }
            #[inline]
            fn add(self, other: Self) -> Self {
                self + other
            }
            #[inline]
            fn sub(self, other: Self) -> Self {
                self - other
            }
            #[inline]
            fn mul(self, other: Self) -> Self {
                self * other
            }
            #[inline]
            fn div(self, other: Self) -> Self {
                self / other
            }
            #[inline]
            fn mul_add(self, a: Self, b: Self) -> Self {
                <$t>::mul_add(self, a, b)
            }
            #[inline]
            fn unary(self, op: UnaryOp) -> Self {
                float_unary(op, self)
            }
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $t
            }
            fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
                let v: f64 = StandardNormal.sample(rng);
                v as $t
            }
        }
    };
}

macro_rules! int_element {
    ($t:ty, $dtype:expr) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;

            #[inline]
            fn zero() -> Self {
                0
            }
            #[inline]
            fn one() -> Self {
                1
            }
            #[inline]
            fn lowest() -> Self {
                <$t>::MIN
            }
            #[inline]
            fn highest() -> Self {
                <$t>::MAX
            }
            #[inline]
            fn is_nan(self) -> bool {
                false
            }
            #[inline]
            fn add(self, other: Self) -> Self {
                self.wrapping_add(other)
            }
            #[inline]
            fn sub(self, other: Self) -> Self {
                self.wrapping_sub(other)
            }
            #[inline]
            fn mul(self, other: Self) -> Self {
                self.wrapping_mul(other)
            }
            #[inline]
            fn div(self, other: Self) -> Self {
                self.checked_div(other).unwrap_or(0)
            }
            #[inline]
            fn mul_add(self, a: Self, b: Self) -> Self {
                self.wrapping_mul(a).wrapping_add(b)
            }
            #[inline]
            fn unary(self, op: UnaryOp) -> Self {
                match op {
                    UnaryOp::Abs => int_abs(self),
                    UnaryOp::Neg => self.wrapping_neg(),
                    UnaryOp::Sqr => self.wrapping_mul(self),
                    // Float-only ops are rejected before reaching integer data.
                    _ => self,
                }
            }
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
            #[inline]
            fn from_f64(v: f64) -> Self {
                <$t as NumCast>::from(v.round()).unwrap_or(if v > 0.0 {
                    <$t>::MAX
                } else if v < 0.0 {
                    <$t>::MIN
                } else {
                    0
                })
            }
            fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
                rng.gen()
            }
        }
    };
}

trait IntAbs {
    fn int_abs(self) -> Self;
}

impl IntAbs for u8 {
    #[inline]
    fn int_abs(self) -> Self {
        self
    }
}

impl IntAbs for i32 {
    #[inline]
    fn int_abs(self) -> Self {
        self.wrapping_abs()
    }
}

#[inline]
fn int_abs<T: IntAbs>(x: T) -> T {
    x.int_abs()
}

float_element!(f32, DType::F32);
float_element!(f64, DType::F64);
int_element!(u8, DType::U8);
int_element!(i32, DType::I32);

/// Lossy conversion between element types through `f64`.
#[inline]
pub(crate) fn convert<A: Element, B: Element>(x: A) -> B {
    B::from_f64(x.to_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_props() {
        assert_eq!(DType::F64.byte_size(), 8);
        assert!(DType::F32.is_floating());
        assert!(!DType::I32.is_floating());
        assert!(DType::U8.lanes() >= DType::F64.lanes());
        assert_eq!(<f32 as Element>::DTYPE, DType::F32);
    }

    #[test]
    fn test_integer_arith_wraps() {
        assert_eq!(Element::add(250u8, 10u8), 4);
        assert_eq!(Element::mul(i32::MAX, 2), -2);
        assert_eq!(Element::div(7i32, 0), 0);
        assert!(!Element::is_nan(3i32));
    }

    #[test]
    fn test_from_f64_saturates() {
        assert_eq!(<u8 as Element>::from_f64(300.0), 255);
        assert_eq!(<u8 as Element>::from_f64(-3.0), 0);
        assert_eq!(<i32 as Element>::from_f64(2.6), 3);
        assert_eq!(<i32 as Element>::from_f64(f64::NAN), 0);
    }

    #[test]
    fn test_nan_propagating_extrema() {
        assert!(Element::max_nan(1.0f64, f64::NAN).is_nan());
        assert!(Element::min_nan(f64::NAN, 1.0f64).is_nan());
        assert_eq!(Element::max_nan(1.0f64, 2.0), 2.0);
        assert_eq!(Element::min_nan(3i32, -2), -2);
    }

    #[test]
    fn test_rint_half_even() {
        assert_eq!(rint(2.5f64), 2.0);
        assert_eq!(rint(3.5f64), 4.0);
        assert_eq!(rint(-2.5f64), -2.0);
        assert_eq!(rint(1.2f64), 1.0);
    }

    #[test]
    fn test_unary_int_ops() {
        assert_eq!((-4i32).unary(UnaryOp::Abs), 4);
        assert_eq!(5u8.unary(UnaryOp::Sqr), 25);
        assert_eq!(3i32.unary(UnaryOp::Neg), -3);
    }
}
