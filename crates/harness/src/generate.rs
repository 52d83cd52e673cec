//! Seeded operand generators

use num_complex::Complex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tilegrid_core::Scalar;

/// Scalars that can be drawn uniformly from `[-1, 1)` (both parts for complex)
pub trait Sample: Scalar {
    fn sample(rng: &mut ChaCha8Rng) -> Self;
}

impl Sample for f32 {
    fn sample(rng: &mut ChaCha8Rng) -> Self {
        rng.gen_range(-1.0..1.0)
    }
}

impl Sample for f64 {
    fn sample(rng: &mut ChaCha8Rng) -> Self {
        rng.gen_range(-1.0..1.0)
    }
}

impl Sample for Complex<f32> {
    fn sample(rng: &mut ChaCha8Rng) -> Self {
        Complex::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))
    }
}

impl Sample for Complex<f64> {
    fn sample(rng: &mut ChaCha8Rng) -> Self {
        Complex::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))
    }
}

/// Deterministic source of dense column-major operands
pub struct OperandGenerator {
    rng: ChaCha8Rng,
}

impl OperandGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// `m x n` column-major array
    pub fn dense<T: Sample>(&mut self, m: usize, n: usize) -> Vec<T> {
        (0..m * n).map(|_| T::sample(&mut self.rng)).collect()
    }

    /// `n x n` symmetric array; Hermitian with a real diagonal if `hermitian`
    pub fn symmetric<T: Sample>(&mut self, n: usize, hermitian: bool) -> Vec<T> {
        let mut out = vec![T::zero(); n * n];
        for j in 0..n {
            for i in j..n {
                let v = T::sample(&mut self.rng);
                if i == j && hermitian {
                    out[i + j * n] = T::from_real(v.real_part());
                } else {
                    out[i + j * n] = v;
                    out[j + i * n] = if hermitian { v.conjugate() } else { v };
                }
            }
        }
        out
    }
}
