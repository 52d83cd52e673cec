//! Dense reference implementation
//!
//! Straightforward column-major loops used to verify the tiled kernels.
//! Nothing here is tiled, distributed or parallel.

use num_traits::{Float, Zero};
use tilegrid_core::scalar::max_nan;
use tilegrid_core::{Norm, Scalar, Uplo};

/// True if element (i, j) is in the stored half
pub fn in_half(uplo: Uplo, i: usize, j: usize) -> bool {
    match uplo {
        Uplo::Lower => i >= j,
        Uplo::Upper => i <= j,
        Uplo::General => true,
    }
}

/// `C := alpha A B^T + alpha B A^T + beta C` on the `uplo` half of `n x n` `c`.
///
/// `a` and `b` are column-major `n x k` with leading dimension `n`.
#[allow(clippy::too_many_arguments)]
pub fn syr2k<T: Scalar>(uplo: Uplo, n: usize, k: usize, alpha: T, a: &[T], b: &[T], beta: T, c: &mut [T]) {
    for j in 0..n {
        for i in (0..n).filter(|&i| in_half(uplo, i, j)) {
            let mut sum = T::zero();
            for l in 0..k {
                sum += a[i + l * n] * b[j + l * n] + b[i + l * n] * a[j + l * n];
            }
            let old = if beta == T::zero() { T::zero() } else { beta * c[i + j * n] };
            c[i + j * n] = alpha * sum + old;
        }
    }
}

/// Element (i, j) of the full matrix whose `uplo` half is stored in `a`
pub fn mirrored<T: Scalar>(uplo: Uplo, hermitian: bool, n: usize, a: &[T], i: usize, j: usize) -> T {
    if i == j && hermitian {
        T::from_real(a[i + i * n].real_part())
    } else if in_half(uplo, i, j) {
        a[i + j * n]
    } else if hermitian {
        a[j + i * n].conjugate()
    } else {
        a[j + i * n]
    }
}

/// Norm of the symmetric (or Hermitian) matrix stored in the `uplo` half of `a`
pub fn henorm<T: Scalar>(kind: Norm, uplo: Uplo, hermitian: bool, n: usize, a: &[T]) -> T::Real {
    let at = |i, j| mirrored(uplo, hermitian, n, a, i, j).magnitude();
    match kind {
        Norm::Max => {
            let mut max = T::Real::zero();
            for j in 0..n {
                for i in 0..n {
                    max = max_nan(max, at(i, j));
                }
            }
            max
        }
        Norm::One | Norm::Inf => {
            let mut max = T::Real::zero();
            for j in 0..n {
                let mut sum = T::Real::zero();
                for i in 0..n {
                    sum += at(i, j);
                }
                max = max_nan(max, sum);
            }
            max
        }
        Norm::Fro => {
            let mut sum = T::Real::zero();
            for j in 0..n {
                for i in 0..n {
                    let v = at(i, j);
                    sum += v * v;
                }
            }
            Float::sqrt(sum)
        }
    }
}

/// Largest `|got - want|` over the `uplo` half
pub fn max_error<T: Scalar>(uplo: Uplo, n: usize, got: &[T], want: &[T]) -> T::Real {
    let mut err = T::Real::zero();
    for j in 0..n {
        for i in (0..n).filter(|&i| in_half(uplo, i, j)) {
            err = max_nan(err, (got[i + j * n] - want[i + j * n]).magnitude());
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    #[test]
    fn test_syr2k_identity_and_ones() {
        // A = I, B = ones: A B^T + B A^T = every entry 2
        let n = 2;
        let a = vec![1.0, 0.0, 0.0, 1.0];
        let b = vec![1.0; 4];
        let mut c = vec![0.0; 4];
        syr2k(Uplo::Lower, n, n, 1.0, &a, &b, 0.0, &mut c);
        assert_eq!(c, vec![2.0, 2.0, 0.0, 2.0]);
    }

    #[test]
    fn test_hermitian_mirror() {
        let a = vec![
            Complex64::new(1.0, 5.0),
            Complex64::new(2.0, 3.0),
            Complex64::new(0.0, 0.0),
            Complex64::new(4.0, 0.0),
        ];
        assert_eq!(mirrored(Uplo::Lower, true, 2, &a, 0, 1), Complex64::new(2.0, -3.0));
        assert_eq!(mirrored(Uplo::Lower, true, 2, &a, 0, 0), Complex64::new(1.0, 0.0));
        assert_eq!(mirrored(Uplo::Lower, false, 2, &a, 0, 1), Complex64::new(2.0, 3.0));
    }

    #[test]
    fn test_norm_of_small_symmetric() {
        // [[1, -2], [-2, 3]] stored lower
        let a: Vec<f64> = vec![1.0, -2.0, 99.0, 3.0];
        assert_eq!(henorm(Norm::Max, Uplo::Lower, false, 2, &a), 3.0);
        assert_eq!(henorm(Norm::One, Uplo::Lower, false, 2, &a), 5.0);
        assert!((henorm(Norm::Fro, Uplo::Lower, false, 2, &a) - 18f64.sqrt()).abs() < 1e-12);
    }
}
