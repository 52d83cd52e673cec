//! Scalar element types
//!
//! Every kernel and matrix is generic over [`Scalar`], which is implemented for
//! the four supported precisions: `f32`, `f64`, `Complex<f32>` and `Complex<f64>`.

use std::fmt::Debug;
use std::ops::{Add, AddAssign, Mul, MulAssign, Sub};

use num_complex::Complex;
use num_traits::{Float, One, Zero};

/// Element precision tag, used for kernel names and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// single real
    S,
    /// double real
    D,
    /// single complex
    C,
    /// double complex
    Z,
}

impl DType {
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::S => 4,
            DType::D | DType::C => 8,
            DType::Z => 16,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            DType::S => "s",
            DType::D => "d",
            DType::C => "c",
            DType::Z => "z",
        }
    }
}

/// Matrix element
pub trait Scalar:
    Copy
    + Send
    + Sync
    + Debug
    + PartialEq
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + AddAssign
    + MulAssign
    + 'static
{
    /// Real type of norms and magnitudes
    type Real: RealScalar;

    const IS_COMPLEX: bool;
    const DTYPE: DType;

    /// |x|
    fn magnitude(self) -> Self::Real;

    /// Re(x)
    fn real_part(self) -> Self::Real;

    /// conj(x); identity for real types
    fn conjugate(self) -> Self;

    fn from_real(r: Self::Real) -> Self;
}

/// Real element, its own `Real` type
pub trait RealScalar: Scalar<Real = Self> + Float + Default {}

macro_rules! impl_real_scalar {
    ($t:ty, $dtype:expr) => {
        impl Scalar for $t {
            type Real = $t;

            const IS_COMPLEX: bool = false;
            const DTYPE: DType = $dtype;

            #[inline]
            fn magnitude(self) -> $t {
                self.abs()
            }

            #[inline]
            fn real_part(self) -> $t {
                self
            }

            #[inline]
            fn conjugate(self) -> $t {
                self
            }

            #[inline]
            fn from_real(r: $t) -> $t {
                r
            }
        }

        impl RealScalar for $t {}
    };
}

macro_rules! impl_complex_scalar {
    ($r:ty, $dtype:expr) => {
        impl Scalar for Complex<$r> {
            type Real = $r;

            const IS_COMPLEX: bool = true;
            const DTYPE: DType = $dtype;

            #[inline]
            fn magnitude(self) -> $r {
                self.norm()
            }

            #[inline]
            fn real_part(self) -> $r {
                self.re
            }

            #[inline]
            fn conjugate(self) -> Self {
                self.conj()
            }

            #[inline]
            fn from_real(r: $r) -> Self {
                Complex::new(r, 0.0)
            }
        }
    };
}

impl_real_scalar!(f32, DType::S);
impl_real_scalar!(f64, DType::D);
impl_complex_scalar!(f32, DType::C);
impl_complex_scalar!(f64, DType::Z);

/// max that propagates NaN from either side
#[inline]
pub fn max_nan<R: RealScalar>(a: R, b: R) -> R {
    if b.is_nan() || b > a {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::{Complex32, Complex64};

    #[test]
    fn test_dtype_tags() {
        assert_eq!(<f32 as Scalar>::DTYPE, DType::S);
        assert_eq!(<f64 as Scalar>::DTYPE, DType::D);
        assert_eq!(<Complex32 as Scalar>::DTYPE, DType::C);
        assert_eq!(<Complex64 as Scalar>::DTYPE, DType::Z);
        assert_eq!(DType::Z.size_bytes(), 16);
    }

    #[test]
    fn test_complex_magnitude_and_parts() {
        let z = Complex64::new(3.0, -4.0);
        assert_eq!(z.magnitude(), 5.0);
        assert_eq!(z.real_part(), 3.0);
        assert_eq!(z.conjugate(), Complex64::new(3.0, 4.0));
        assert!(<Complex64 as Scalar>::IS_COMPLEX);
        assert!(!<f64 as Scalar>::IS_COMPLEX);
    }

    #[test]
    fn test_max_nan_propagates() {
        assert_eq!(max_nan(1.0f64, 2.0), 2.0);
        assert_eq!(max_nan(3.0f64, 2.0), 3.0);
        assert!(max_nan(3.0f64, f64::NAN).is_nan());
        assert!(max_nan(f32::NAN, 1.0).is_nan());
    }
}
