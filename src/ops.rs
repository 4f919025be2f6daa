//! Operator descriptors.
//!
//! Operators are plain `Copy` values; the kernels monomorphize over the
//! element type and call [`UnaryOp::apply`], [`BinaryOp::apply`] and
//! [`ReduceOp::combine`] in their inner loops.

use std::fmt;

use crate::dtype::Element;

/// Element-wise unary operators.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UnaryOp {
    Abs,
    Neg,
    Sqr,
    Sqrt,
    Exp,
    Expm1,
    Log,
    Log1p,
    Sin,
    Asin,
    Sinh,
    Cos,
    Acos,
    Cosh,
    Tan,
    Atan,
    Tanh,
    /// Round half to even.
    Rint,
    Ceil,
    Floor,
    Sigmoid,
    Pow(f64),
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Abs => "abs",
            UnaryOp::Neg => "neg",
            UnaryOp::Sqr => "sqr",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Expm1 => "expm1",
            UnaryOp::Log => "log",
            UnaryOp::Log1p => "log1p",
            UnaryOp::Sin => "sin",
            UnaryOp::Asin => "asin",
            UnaryOp::Sinh => "sinh",
            UnaryOp::Cos => "cos",
            UnaryOp::Acos => "acos",
            UnaryOp::Cosh => "cosh",
            UnaryOp::Tan => "tan",
            UnaryOp::Atan => "atan",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Rint => "rint",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Floor => "floor",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Pow(_) => "pow",
        }
    }

    /// Operators that only make sense on floating-point elements.
    pub fn floating_only(self) -> bool {
        !matches!(self, UnaryOp::Abs | UnaryOp::Neg | UnaryOp::Sqr)
    }

    #[inline(always)]
    pub fn apply<T: Element>(self, x: T) -> T {
        x.unary(self)
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element-wise binary operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
        }
    }

    #[inline(always)]
    pub fn apply<T: Element>(self, a: T, b: T) -> T {
        match self {
            BinaryOp::Add => a.add(b),
            BinaryOp::Sub => a.sub(b),
            BinaryOp::Mul => a.mul(b),
            BinaryOp::Div => a.div(b),
            BinaryOp::Min => a.min_nan(b),
            BinaryOp::Max => a.max_nan(b),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Comparison predicates for masks. Every comparison involving NaN is
/// false except [`Compare::Ne`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Compare {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Compare {
    #[inline(always)]
    pub fn test<T: Element>(self, a: T, b: T) -> bool {
        match self {
            Compare::Eq => a == b,
            Compare::Ne => a != b,
            Compare::Lt => a < b,
            Compare::Le => a <= b,
            Compare::Gt => a > b,
            Compare::Ge => a >= b,
        }
    }
}

/// Associative reductions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
}

impl ReduceOp {
    pub fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Prod => "prod",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
        }
    }

    #[inline(always)]
    pub fn identity<T: Element>(self) -> T {
        match self {
            ReduceOp::Sum => T::zero(),
            ReduceOp::Prod => T::one(),
            ReduceOp::Min => T::highest(),
            ReduceOp::Max => T::lowest(),
        }
    }

    /// Combine two partials. NaN propagates for every operator.
    #[inline(always)]
    pub fn combine<T: Element>(self, acc: T, x: T) -> T {
        match self {
            ReduceOp::Sum => acc.add(x),
            ReduceOp::Prod => acc.mul(x),
            ReduceOp::Min => acc.min_nan(x),
            ReduceOp::Max => acc.max_nan(x),
        }
    }

    /// Combine skipping NaN inputs.
    #[inline(always)]
    pub fn combine_nan<T: Element>(self, acc: T, x: T) -> T {
        if x.is_nan() {
            acc
        } else {
            self.combine(acc, x)
        }
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unary_flags() {
        assert!(!UnaryOp::Abs.floating_only());
        assert!(UnaryOp::Exp.floating_only());
        assert!(UnaryOp::Pow(2.0).floating_only());
        assert_eq!(UnaryOp::Log1p.to_string(), "log1p");
    }

    #[test]
    fn test_unary_apply() {
        assert_eq!(UnaryOp::Sqrt.apply(9.0f64), 3.0);
        assert_eq!(UnaryOp::Pow(3.0).apply(2.0f32), 8.0);
        assert_eq!(UnaryOp::Sigmoid.apply(0.0f64), 0.5);
        assert_eq!(UnaryOp::Neg.apply(4i32), -4);
    }

    #[test]
    fn test_binary_apply() {
        assert_eq!(BinaryOp::Sub.apply(5i32, 7), -2);
        assert_eq!(BinaryOp::Div.apply(1.0f64, 4.0), 0.25);
        assert_eq!(BinaryOp::Max.apply(3u8, 9), 9);
        assert!(BinaryOp::Min.apply(1.0f64, f64::NAN).is_nan());
    }

    #[test]
    fn test_reduce_identities() {
        assert_eq!(ReduceOp::Sum.identity::<f64>(), 0.0);
        assert_eq!(ReduceOp::Prod.identity::<i32>(), 1);
        assert_eq!(ReduceOp::Min.identity::<u8>(), 255);
        assert_eq!(ReduceOp::Max.identity::<f32>(), f32::NEG_INFINITY);
    }

    #[test]
    fn test_compare_nan() {
        assert!(Compare::Le.test(2i32, 2));
        assert!(!Compare::Gt.test(1u8, 3));
        assert!(!Compare::Eq.test(f64::NAN, f64::NAN));
        assert!(Compare::Ne.test(f64::NAN, 1.0));
        assert!(!Compare::Ge.test(f64::NAN, 1.0));
    }

    #[test]
    fn test_combine_nan_skips() {
        assert_eq!(ReduceOp::Sum.combine_nan(1.0f64, f64::NAN), 1.0);
        assert!(ReduceOp::Max.combine(1.0f64, f64::NAN).is_nan());
    }
}
