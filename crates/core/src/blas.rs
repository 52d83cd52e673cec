//! Host tile kernels
//!
//! Reference-quality loops over [`Tile`] handles, standing in for an external
//! BLAS. Operands are read through their own view orientation combined with
//! the op argument; outputs are written in their physical orientation.

use rayon::prelude::*;

use crate::batch::{GemmBatch, Syr2kBatch};
use crate::config::BatchBackend;
use crate::error::{EngineError, Result};
use crate::scalar::Scalar;
use crate::tile::{Tile, TileData, TileView};
use crate::types::{Op, Uplo};

fn aliased(name: &str) -> EngineError {
    EngineError::kernel(format!("{}: output tile aliases an input", name))
}

fn combine<T: Scalar>(alpha: T, sum: T, beta: T, old: impl FnOnce() -> T) -> T {
    // beta == 0 never reads C, so NaN in C is not propagated
    if beta == T::zero() {
        alpha * sum
    } else {
        alpha * sum + beta * old()
    }
}

fn gemm_data<T: Scalar>(
    alpha: T,
    a: &TileView<'_, T>,
    b: &TileView<'_, T>,
    beta: T,
    c: &mut TileData<T>,
    m: usize,
    n: usize,
) -> Result<()> {
    if a.rows() != m || b.cols() != n || a.cols() != b.rows() {
        return Err(EngineError::kernel(format!(
            "gemm: {}x{} * {}x{} into {}x{}",
            a.rows(),
            a.cols(),
            b.rows(),
            b.cols(),
            m,
            n
        )));
    }
    let k = a.cols();
    for j in 0..n {
        for i in 0..m {
            let mut sum = T::zero();
            for l in 0..k {
                sum += a.at(i, l) * b.at(l, j);
            }
            let value = combine(alpha, sum, beta, || c.get(i, j));
            c.set(i, j, value);
        }
    }
    Ok(())
}

/// `C := alpha op_a(A) op_b(B) + beta C`
///
/// `op_a` and `op_b` apply to the physical buffers of `a` and `b`; `c` is
/// updated in its physical orientation.
pub fn gemm<T: Scalar>(op_a: Op, op_b: Op, alpha: T, a: &Tile<T>, b: &Tile<T>, beta: T, c: &Tile<T>) -> Result<()> {
    if c.same_buffer(a) || c.same_buffer(b) {
        return Err(aliased("gemm"));
    }
    let (amb, anb) = a.physical_extent();
    let (bmb, bnb) = b.physical_extent();
    let (m, n) = c.physical_extent();
    let ga = a.read();
    let gb = b.read();
    let mut gc = c.write();
    let va = TileView::new(&ga, amb, anb, op_a);
    let vb = TileView::new(&gb, bmb, bnb, op_b);
    gemm_data(alpha, &va, &vb, beta, &mut gc, m, n)
}

fn in_triangle(uplo: Uplo, i: usize, j: usize) -> bool {
    match uplo {
        Uplo::Lower => i >= j,
        Uplo::Upper => i <= j,
        Uplo::General => true,
    }
}

fn syr2k_data<T: Scalar>(
    uplo: Uplo,
    alpha: T,
    a: &TileView<'_, T>,
    b: &TileView<'_, T>,
    beta: T,
    c: &mut TileData<T>,
    n: usize,
) -> Result<()> {
    if a.rows() != n || b.rows() != n || a.cols() != b.cols() {
        return Err(EngineError::kernel(format!(
            "syr2k: A {}x{}, B {}x{} into {}x{}",
            a.rows(),
            a.cols(),
            b.rows(),
            b.cols(),
            n,
            n
        )));
    }
    let k = a.cols();
    for j in 0..n {
        for i in (0..n).filter(|&i| in_triangle(uplo, i, j)) {
            let mut sum = T::zero();
            for l in 0..k {
                sum += a.at(i, l) * b.at(j, l) + b.at(i, l) * a.at(j, l);
            }
            let value = combine(alpha, sum, beta, || c.get(i, j));
            c.set(i, j, value);
        }
    }
    Ok(())
}

/// `C := alpha A B^T + alpha B A^T + beta C` on the `uplo` half of `c`.
///
/// With `trans != NoTrans`, `A` and `B` are stored `k x n` and read
/// transposed.
pub fn syr2k<T: Scalar>(uplo: Uplo, trans: Op, alpha: T, a: &Tile<T>, b: &Tile<T>, beta: T, c: &Tile<T>) -> Result<()> {
    if uplo == Uplo::General {
        return Err(EngineError::InvalidArgument("syr2k needs Lower or Upper".into()));
    }
    if c.same_buffer(a) || c.same_buffer(b) {
        return Err(aliased("syr2k"));
    }
    let (amb, anb) = a.physical_extent();
    let (bmb, bnb) = b.physical_extent();
    let (n, nc) = c.physical_extent();
    if n != nc {
        return Err(EngineError::kernel(format!("syr2k: output tile {}x{} is not square", n, nc)));
    }
    let ga = a.read();
    let gb = b.read();
    let mut gc = c.write();
    let va = TileView::new(&ga, amb, anb, trans);
    let vb = TileView::new(&gb, bmb, bnb, trans);
    syr2k_data(uplo, alpha, &va, &vb, beta, &mut gc, n)
}

/// `C := beta C` on the `uplo` half of `c`
pub fn scale<T: Scalar>(uplo: Uplo, beta: T, c: &Tile<T>) {
    let (m, n) = c.physical_extent();
    let mut gc = c.write();
    for j in 0..n {
        for i in (0..m).filter(|&i| in_triangle(uplo, i, j)) {
            let value = if beta == T::zero() { T::zero() } else { beta * gc.get(i, j) };
            gc.set(i, j, value);
        }
    }
}

// ============================================================================
// Batched
// ============================================================================

fn check_stride<T: Scalar>(name: &str, idx: usize, which: &str, tile: &Tile<T>, ld: usize) -> Result<()> {
    let stride = tile.stride();
    if stride != ld {
        return Err(EngineError::kernel(format!(
            "{} item {}: {} stride {} does not match ld {}",
            name, idx, which, stride, ld
        )));
    }
    Ok(())
}

fn gemm_item<T: Scalar>(batch: &GemmBatch<T>, idx: usize) -> Result<()> {
    check_stride("gemm_batch", idx, "A", &batch.a[idx], batch.lda[idx])?;
    check_stride("gemm_batch", idx, "B", &batch.b[idx], batch.ldb[idx])?;
    check_stride("gemm_batch", idx, "C", &batch.c[idx], batch.ldc[idx])?;
    let c = &batch.c[idx];
    if c.physical_extent() != (batch.m[idx], batch.n[idx]) {
        return Err(EngineError::kernel(format!(
            "gemm_batch item {}: output tile {:?} recorded as {}x{}",
            idx,
            c.physical_extent(),
            batch.m[idx],
            batch.n[idx]
        )));
    }
    gemm(batch.op_a, batch.op_b, batch.alpha, &batch.a[idx], &batch.b[idx], batch.beta, c)
}

fn syr2k_item<T: Scalar>(batch: &Syr2kBatch<T>, idx: usize) -> Result<()> {
    check_stride("syr2k_batch", idx, "A", &batch.a[idx], batch.lda[idx])?;
    check_stride("syr2k_batch", idx, "B", &batch.b[idx], batch.ldb[idx])?;
    check_stride("syr2k_batch", idx, "C", &batch.c[idx], batch.ldc[idx])?;
    syr2k(
        batch.uplo,
        batch.trans,
        batch.alpha,
        &batch.a[idx],
        &batch.b[idx],
        batch.beta,
        &batch.c[idx],
    )
}

fn run_batch<F>(name: &str, backend: BatchBackend, len: usize, item: F) -> Result<()>
where
    F: Fn(usize) -> Result<()> + Sync + Send,
{
    match backend {
        BatchBackend::Disabled => Err(EngineError::UnsupportedBackend(format!(
            "no batched {} primitive configured",
            name
        ))),
        BatchBackend::Sequential => (0..len).try_for_each(item),
        BatchBackend::Parallel => (0..len).into_par_iter().try_for_each(item),
    }
}

/// Every product of `batch`, on `backend`
pub fn gemm_batch<T: Scalar>(backend: BatchBackend, batch: &GemmBatch<T>) -> Result<()> {
    run_batch("gemm", backend, batch.len(), |idx| gemm_item(batch, idx))
}

pub fn syr2k_batch<T: Scalar>(backend: BatchBackend, batch: &Syr2kBatch<T>) -> Result<()> {
    run_batch("syr2k", backend, batch.len(), |idx| syr2k_item(batch, idx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Layout, Location};
    use num_complex::Complex64;

    fn tile(mb: usize, nb: usize, data: Vec<f64>) -> Tile<f64> {
        Tile::new(mb, nb, TileData::from_vec(mb, nb, data, mb, Layout::ColMajor).unwrap(), Location::Host)
    }

    fn dense(t: &Tile<f64>) -> Vec<f64> {
        let (mb, nb) = t.physical_extent();
        t.read().to_col_major(mb, nb)
    }

    #[test]
    fn test_gemm_with_transposed_b() {
        // A = [1 2; 3 4], B = [1 0; 1 1]; A * B^T = [1 3; 3 7]
        let a = tile(2, 2, vec![1.0, 3.0, 2.0, 4.0]);
        let b = tile(2, 2, vec![1.0, 1.0, 0.0, 1.0]);
        let c = tile(2, 2, vec![1.0; 4]);
        gemm(Op::NoTrans, Op::Trans, 1.0, &a, &b, 2.0, &c).unwrap();
        assert_eq!(dense(&c), vec![3.0, 5.0, 5.0, 9.0]);
    }

    #[test]
    fn test_gemm_beta_zero_ignores_nan() {
        let a = tile(1, 1, vec![2.0]);
        let b = tile(1, 1, vec![3.0]);
        let c = tile(1, 1, vec![f64::NAN]);
        gemm(Op::NoTrans, Op::NoTrans, 1.0, &a, &b, 0.0, &c).unwrap();
        assert_eq!(dense(&c), vec![6.0]);
    }

    #[test]
    fn test_gemm_shape_mismatch_is_kernel_error() {
        let a = tile(2, 3, vec![0.0; 6]);
        let b = tile(2, 2, vec![0.0; 4]);
        let c = tile(2, 2, vec![0.0; 4]);
        let err = gemm(Op::NoTrans, Op::NoTrans, 1.0, &a, &b, 0.0, &c).unwrap_err();
        assert!(matches!(err, EngineError::Kernel { .. }));
        assert!(gemm(Op::NoTrans, Op::NoTrans, 1.0, &c, &b, 0.0, &c).is_err());
    }

    #[test]
    fn test_syr2k_touches_only_triangle() {
        // A = I, B = ones: A B^T + B A^T = 2 * ones
        let a = tile(2, 2, vec![1.0, 0.0, 0.0, 1.0]);
        let b = tile(2, 2, vec![1.0; 4]);
        let c = tile(2, 2, vec![0.0, 0.0, -5.0, 0.0]);
        syr2k(Uplo::Lower, Op::NoTrans, 1.0, &a, &b, 0.0, &c).unwrap();
        assert_eq!(dense(&c), vec![2.0, 2.0, -5.0, 2.0]);
    }

    #[test]
    fn test_syr2k_transposed_operands() {
        // k x n operands read transposed give the same result
        let a = tile(1, 2, vec![1.0, 2.0]);
        let b = tile(1, 2, vec![3.0, 4.0]);
        let c = tile(2, 2, vec![0.0; 4]);
        syr2k(Uplo::Upper, Op::Trans, 1.0, &a, &b, 0.0, &c).unwrap();
        // a b^T + b a^T with a = [1,2], b = [3,4]
        assert_eq!(dense(&c), vec![6.0, 0.0, 10.0, 16.0]);
    }

    #[test]
    fn test_complex_syr2k_is_not_conjugated() {
        let i = Complex64::new(0.0, 1.0);
        let one = Complex64::new(1.0, 0.0);
        let mk = |v: Complex64| Tile::new(1, 1, TileData::from_vec(1, 1, vec![v], 1, Layout::ColMajor).unwrap(), Location::Host);
        let (a, b, c) = (mk(i), mk(i), mk(Complex64::new(0.0, 0.0)));
        syr2k(Uplo::Lower, Op::NoTrans, one, &a, &b, Complex64::new(0.0, 0.0), &c).unwrap();
        assert_eq!(c.at(0, 0), Complex64::new(-2.0, 0.0));
    }

    #[test]
    fn test_gemm_batch_backends_agree() {
        let build = || {
            let mut batch = GemmBatch::new(Op::NoTrans, Op::Trans, 1.0, 0.0);
            for k in 0..4 {
                let v = k as f64;
                batch.push(tile(2, 1, vec![v, 1.0]), tile(2, 1, vec![1.0, v]), tile(2, 2, vec![0.0; 4]));
            }
            batch
        };
        let seq = build();
        let par = build();
        gemm_batch(BatchBackend::Sequential, &seq).unwrap();
        gemm_batch(BatchBackend::Parallel, &par).unwrap();
        for (x, y) in seq.c.iter().zip(par.c.iter()) {
            assert_eq!(dense(x), dense(y));
        }
        assert_eq!(dense(&seq.c[2]), vec![2.0, 1.0, 4.0, 2.0]);
        assert!(matches!(
            gemm_batch(BatchBackend::Disabled, &seq),
            Err(EngineError::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn test_batch_stride_mismatch() {
        let mut batch = GemmBatch::new(Op::NoTrans, Op::Trans, 1.0, 0.0);
        batch.push(tile(2, 1, vec![1.0, 1.0]), tile(2, 1, vec![1.0, 1.0]), tile(2, 2, vec![0.0; 4]));
        batch.ldc[0] = 3;
        let err = gemm_batch(BatchBackend::Sequential, &batch).unwrap_err();
        assert!(err.to_string().contains("stride"));
    }
}
