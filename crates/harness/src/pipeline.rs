//! End-to-end checks of the tiled operations against the dense reference

use num_traits::{Float, NumCast, One, Zero};
use tilegrid_core::{level3, DistributedMatrix, Engine, Norm, NormPartials, ProcessGrid, Scalar, Target, Uplo};

use crate::error::{HarnessError, Result};
use crate::generate::{OperandGenerator, Sample};
use crate::reference;

/// Outcome of one checked run
#[derive(Debug, Clone, Copy)]
pub struct CaseResult<R> {
    pub target: Target,
    pub max_error: R,
    pub tolerance: R,
}

impl<R: Float> CaseResult<R> {
    pub fn passed(&self) -> bool {
        self.max_error <= self.tolerance
    }
}

/// Absolute tolerance for sums of `terms` products of unit-sized entries
pub fn tolerance<R: Float>(terms: usize) -> R {
    let scale: R = NumCast::from(32 * (terms + 2)).unwrap_or_else(R::one);
    R::epsilon() * scale
}

/// A symmetric rank-2k update with seeded operands.
///
/// With a `p x q` grid, every rank is emulated in turn: `C` is distributed
/// over the grid while `A` and `B` are replicated on every rank, and the
/// per-rank results are merged before the comparison.
#[derive(Debug, Clone)]
pub struct Syr2kCase {
    pub n: usize,
    pub k: usize,
    pub nb: usize,
    pub uplo: Uplo,
    pub num_devices: usize,
    pub grid: (usize, usize),
    pub seed: u64,
}

impl Syr2kCase {
    pub fn new(n: usize, k: usize, nb: usize) -> Self {
        Self {
            n,
            k,
            nb,
            uplo: Uplo::Lower,
            num_devices: 0,
            grid: (1, 1),
            seed: 42,
        }
    }

    pub fn uplo(mut self, uplo: Uplo) -> Self {
        self.uplo = uplo;
        self
    }

    pub fn devices(mut self, num_devices: usize) -> Self {
        self.num_devices = num_devices;
        self
    }

    pub fn grid(mut self, p: usize, q: usize) -> Self {
        self.grid = (p, q);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Run on `target` and measure the error of the stored half
    pub fn run<T: Sample>(&self, engine: &Engine, target: Target) -> Result<CaseResult<T::Real>> {
        let (n, k) = (self.n, self.k);
        let mut source = OperandGenerator::new(self.seed);
        let da: Vec<T> = source.dense(n, k);
        let db: Vec<T> = source.dense(n, k);
        let dc: Vec<T> = source.symmetric(n, false);
        let alpha = T::sample_nonzero(&mut source);
        let beta = T::sample_nonzero(&mut source);

        let mut want = dc.clone();
        reference::syr2k(self.uplo, n, k, alpha, &da, &db, beta, &mut want);

        let (p, q) = self.grid;
        let mut got = vec![T::zero(); n * n];
        for rank in 0..p * q {
            let part = self.run_rank(engine, target, rank, alpha, beta, &da, &db, &dc)?;
            for (g, v) in got.iter_mut().zip(part) {
                *g += v;
            }
        }

        let result = CaseResult {
            target,
            max_error: reference::max_error(self.uplo, n, &got, &want),
            tolerance: tolerance(2 * k),
        };
        tracing::debug!(%target, n, k, nb = self.nb, ranks = p * q, "syr2k case checked");
        Ok(result)
    }

    /// Like [`Self::run`], failing when the error exceeds the tolerance
    pub fn verify<T: Sample>(&self, engine: &Engine, target: Target) -> Result<CaseResult<T::Real>> {
        let result = self.run::<T>(engine, target)?;
        if !result.passed() {
            return Err(HarnessError::VerificationFailed {
                message: format!(
                    "syr2k {:?} on {}: error {:?} above {:?}",
                    T::DTYPE,
                    target,
                    result.max_error,
                    result.tolerance
                ),
            });
        }
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_rank<T: Scalar>(
        &self,
        engine: &Engine,
        target: Target,
        rank: usize,
        alpha: T,
        beta: T,
        da: &[T],
        db: &[T],
        dc: &[T],
    ) -> Result<Vec<T>> {
        let (n, k, nb) = (self.n, self.k, self.nb);
        let (p, q) = self.grid;
        let a = DistributedMatrix::<T>::builder(n, k, nb).devices(self.num_devices).build()?;
        let b = DistributedMatrix::<T>::builder(n, k, nb).devices(self.num_devices).build()?;
        let c = DistributedMatrix::<T>::builder(n, n, nb)
            .symmetric(self.uplo)
            .grid(ProcessGrid::new(p, q, rank)?)
            .devices(self.num_devices)
            .build()?;
        a.from_dense(da, n.max(1))?;
        b.from_dense(db, n.max(1))?;
        c.from_dense(dc, n.max(1))?;

        level3::syr2k(engine, alpha, &a, &b, beta, &c, &level3::Options::with_target(target))?;
        Ok(c.to_dense()?)
    }
}

/// A Hermitian or symmetric norm with a seeded operand.
///
/// With a `p x q` grid every rank is emulated in turn and the per-rank
/// partials are combined before the norm is taken.
#[derive(Debug, Clone)]
pub struct NormCase {
    pub n: usize,
    pub nb: usize,
    pub uplo: Uplo,
    pub hermitian: bool,
    pub num_devices: usize,
    pub grid: (usize, usize),
    pub seed: u64,
}

impl NormCase {
    pub fn new(n: usize, nb: usize) -> Self {
        Self {
            n,
            nb,
            uplo: Uplo::Lower,
            hermitian: false,
            num_devices: 0,
            grid: (1, 1),
            seed: 7,
        }
    }

    pub fn uplo(mut self, uplo: Uplo) -> Self {
        self.uplo = uplo;
        self
    }

    pub fn hermitian(mut self, hermitian: bool) -> Self {
        self.hermitian = hermitian;
        self
    }

    pub fn devices(mut self, num_devices: usize) -> Self {
        self.num_devices = num_devices;
        self
    }

    pub fn grid(mut self, p: usize, q: usize) -> Self {
        self.grid = (p, q);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Relative error of every norm kind on `target`
    pub fn run<T: Sample>(&self, engine: &Engine, target: Target) -> Result<Vec<(Norm, T::Real)>> {
        let n = self.n;
        let dense: Vec<T> = OperandGenerator::new(self.seed).symmetric(n, self.hermitian);
        let (p, q) = self.grid;
        let mut ranks = Vec::with_capacity(p * q);
        for rank in 0..p * q {
            let builder = DistributedMatrix::<T>::builder(n, n, self.nb)
                .grid(ProcessGrid::new(p, q, rank)?)
                .devices(self.num_devices);
            let a = if self.hermitian {
                builder.hermitian(self.uplo).build()?
            } else {
                builder.symmetric(self.uplo).build()?
            };
            a.from_dense(&dense, n.max(1))?;
            ranks.push(a);
        }

        let mut out = Vec::new();
        for kind in [Norm::Max, Norm::One, Norm::Inf, Norm::Fro] {
            let mut total = NormPartials::new(kind, n);
            for a in &ranks {
                total.combine(&tilegrid_core::henorm_partials(engine, kind, a, target)?)?;
            }
            let got = total.finish();
            let want = reference::henorm(kind, self.uplo, self.hermitian, n, &dense);
            let denom = if want > T::Real::zero() { want } else { T::Real::one() };
            out.push((kind, (got - want).abs() / denom));
        }
        Ok(out)
    }
}

/// Nonzero scalars for `alpha` and `beta`
trait SampleNonzero: Sample {
    fn sample_nonzero(source: &mut OperandGenerator) -> Self;
}

impl<T: Sample> SampleNonzero for T {
    fn sample_nonzero(source: &mut OperandGenerator) -> Self {
        let x: Vec<T> = source.dense(1, 1);
        x[0] + T::one()
    }
}
