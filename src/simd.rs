//! Portable SIMD layer over `pulp` runtime dispatch.
//!
//! Contiguous f32/f64 runs go through explicit pulp kernels; everything
//! else uses lane-blocked scalar loops that LLVM vectorizes inside
//! [`dispatch`]. Without the `simd` feature every entry point degrades to
//! plain scalar code and [`supports_simd`] reports false.

use std::sync::OnceLock;

use crate::dtype::Element;

/// Upper bound on lanes per register for any element type (64-byte registers, u8).
pub const MAX_LANES: usize = 64;

#[inline(always)]
pub(crate) fn dispatch<R>(f: impl FnOnce() -> R) -> R {
    #[cfg(feature = "simd")]
    {
        pulp::Arch::new().dispatch(f)
    }
    #[cfg(not(feature = "simd"))]
    {
        f()
    }
}

/// Skip the dispatch overhead for short loops.
#[inline(always)]
pub(crate) fn dispatch_if_large<R>(len: usize, f: impl FnOnce() -> R) -> R {
    if len >= 64 {
        dispatch(f)
    } else {
        f()
    }
}

/// Whether the platform exposes vector registers the engine can target.
pub fn supports_simd() -> bool {
    cfg!(feature = "simd") && register_bytes() > 8
}

/// Width in bytes of the widest vector register selected at runtime.
pub fn register_bytes() -> usize {
    static BYTES: OnceLock<usize> = OnceLock::new();
    *BYTES.get_or_init(detect_register_bytes)
}

#[cfg(feature = "simd")]
fn detect_register_bytes() -> usize {
    use pulp::{Simd, WithSimd};

    struct Probe;
    impl WithSimd for Probe {
        type Output = usize;

        #[inline(always)]
        fn with_simd<S: Simd>(self, _simd: S) -> usize {
            std::mem::size_of::<S::f64s>()
        }
    }
    let bytes = pulp::Arch::new().dispatch(Probe);
    tracing::debug!(bytes, "simd register width");
    bytes
}

#[cfg(not(feature = "simd"))]
fn detect_register_bytes() -> usize {
    8
}

/// Lanes kernels group runs by: the register width of `T` when
/// [`supports_simd`], 1 otherwise.
#[inline]
pub fn lanes<T: Element>() -> usize {
    if supports_simd() {
        T::DTYPE.lanes()
    } else {
        1
    }
}

/// Explicit SIMD kernels over contiguous slices.
///
/// Defaults return `None`; f32 and f64 provide pulp implementations when
/// the `simd` feature is enabled.
pub trait SimdKernels: Copy + Sized {
    fn simd_sum(_src: &[Self]) -> Option<Self> {
        None
    }

    fn simd_dot(_a: &[Self], _b: &[Self]) -> Option<Self> {
        None
    }

    /// `(Σ(x - mean), Σ(x - mean)²)` over the slice.
    fn simd_centered(_src: &[Self], _mean: Self) -> Option<(Self, Self)> {
        None
    }
}

impl SimdKernels for u8 {}
impl SimdKernels for i32 {}

#[cfg(not(feature = "simd"))]
impl SimdKernels for f32 {}
#[cfg(not(feature = "simd"))]
impl SimdKernels for f64 {}

#[cfg(feature = "simd")]
mod kernels {
    use super::SimdKernels;
    use pulp::{Simd, WithSimd};

    macro_rules! float_kernels {
        ($t:ty, $as_simd:ident, $splat:ident, $add:ident, $sub:ident, $mul:ident,
         $mul_add:ident, $reduce:ident) => {
            impl SimdKernels for $t {
                fn simd_sum(src: &[$t]) -> Option<$t> {
                    struct Sum<'a>(&'a [$t]);
                    impl WithSimd for Sum<'_> {
                        type Output = $t;

                        #[inline(always)]
                        fn with_simd<S: Simd>(self, simd: S) -> $t {
                            let (head, tail) = S::$as_simd(self.0);
                            let mut acc = [simd.$splat(0.0); 4];
                            let mut chunks = head.chunks_exact(4);
                            for c in &mut chunks {
                                acc[0] = simd.$add(acc[0], c[0]);
                                acc[1] = simd.$add(acc[1], c[1]);
                                acc[2] = simd.$add(acc[2], c[2]);
                                acc[3] = simd.$add(acc[3], c[3]);
                            }
                            for &v in chunks.remainder() {
                                acc[0] = simd.$add(acc[0], v);
                            }
                            let v = simd.$add(simd.$add(acc[0], acc[1]), simd.$add(acc[2], acc[3]));
                            tail.iter().fold(simd.$reduce(v), |s, &x| s + x)
                        }
                    }
                    Some(pulp::Arch::new().dispatch(Sum(src)))
                }

                fn simd_dot(a: &[$t], b: &[$t]) -> Option<$t> {
                    if a.len() != b.len() {
                        return None;
                    }
                    struct Dot<'a>(&'a [$t], &'a [$t]);
                    impl WithSimd for Dot<'_> {
                        type Output = $t;

                        #[inline(always)]
                        fn with_simd<S: Simd>(self, simd: S) -> $t {
                            let (ah, at) = S::$as_simd(self.0);
                            let (bh, bt) = S::$as_simd(self.1);
                            let mut acc = [simd.$splat(0.0); 4];
                            let n4 = ah.len() / 4 * 4;
                            let mut i = 0;
                            while i < n4 {
                                acc[0] = simd.$mul_add(ah[i], bh[i], acc[0]);
                                acc[1] = simd.$mul_add(ah[i + 1], bh[i + 1], acc[1]);
                                acc[2] = simd.$mul_add(ah[i + 2], bh[i + 2], acc[2]);
                                acc[3] = simd.$mul_add(ah[i + 3], bh[i + 3], acc[3]);
                                i += 4;
                            }
                            for j in n4..ah.len() {
                                acc[0] = simd.$mul_add(ah[j], bh[j], acc[0]);
                            }
                            let v = simd.$add(simd.$add(acc[0], acc[1]), simd.$add(acc[2], acc[3]));
                            at.iter()
                                .zip(bt)
                                .fold(simd.$reduce(v), |s, (&x, &y)| s + x * y)
                        }
                    }
                    Some(pulp::Arch::new().dispatch(Dot(a, b)))
                }

                fn simd_centered(src: &[$t], mean: $t) -> Option<($t, $t)> {
                    struct Centered<'a>(&'a [$t], $t);
                    impl WithSimd for Centered<'_> {
                        type Output = ($t, $t);

                        #[inline(always)]
                        fn with_simd<S: Simd>(self, simd: S) -> ($t, $t) {
                            let (head, tail) = S::$as_simd(self.0);
                            let m = simd.$splat(self.1);
                            let mut s1 = simd.$splat(0.0);
                            let mut s2 = simd.$splat(0.0);
                            for &v in head {
                                let c = simd.$sub(v, m);
                                s1 = simd.$add(s1, c);
                                s2 = simd.$add(s2, simd.$mul(c, c));
                            }
                            let mut sum1 = simd.$reduce(s1);
                            let mut sum2 = simd.$reduce(s2);
                            for &x in tail {
                                let c = x - self.1;
                                sum1 += c;
                                sum2 += c * c;
                            }
                            (sum1, sum2)
                        }
                    }
                    Some(pulp::Arch::new().dispatch(Centered(src, mean)))
                }
            }
        };
    }

    float_kernels!(f32, as_simd_f32s, splat_f32s, add_f32s, sub_f32s, mul_f32s, mul_add_f32s, reduce_sum_f32s);
    float_kernels!(f64, as_simd_f64s, splat_f64s, add_f64s, sub_f64s, mul_f64s, mul_add_f64s, reduce_sum_f64s);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lanes_bounds() {
        assert!(lanes::<f64>() >= 1);
        assert!(lanes::<u8>() >= lanes::<f64>());
        assert!(lanes::<u8>() <= MAX_LANES);
        if !supports_simd() {
            assert_eq!(lanes::<f32>(), 1);
        }
    }

    #[test]
    fn test_sum_matches_scalar() {
        let v: Vec<f64> = (0..1037).map(|i| (i as f64) * 0.5 - 100.0).collect();
        let expected: f64 = v.iter().sum();
        match f64::simd_sum(&v) {
            Some(s) => assert_relative_eq!(s, expected, epsilon = 1e-9),
            None => assert!(!cfg!(feature = "simd")),
        }
        assert_eq!(i32::simd_sum(&[1, 2, 3]), None);
    }

    #[test]
    fn test_dot_matches_scalar() {
        let a: Vec<f32> = (0..301).map(|i| (i % 7) as f32).collect();
        let b: Vec<f32> = (0..301).map(|i| (i % 5) as f32 - 2.0).collect();
        let expected: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        if let Some(d) = f32::simd_dot(&a, &b) {
            assert_relative_eq!(d, expected, epsilon = 1e-3);
        }
        assert_eq!(f32::simd_dot(&a, &b[..10]), None);
    }

    #[test]
    fn test_centered_sums() {
        let v = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        if let Some((s1, s2)) = f64::simd_centered(&v, 5.0) {
            assert_relative_eq!(s1, 0.0, epsilon = 1e-12);
            assert_relative_eq!(s2, 60.0, epsilon = 1e-12);
        }
    }
}
