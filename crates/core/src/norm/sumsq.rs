//! Scaled sum of squares

use crate::scalar::RealScalar;

/// Running `scale^2 * sumsq`, kept scaled to avoid overflow
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SumSq<R> {
    pub scale: R,
    pub sumsq: R,
}

impl<R: RealScalar> Default for SumSq<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RealScalar> SumSq<R> {
    /// Empty sum: value 0
    pub fn new() -> Self {
        Self {
            scale: R::zero(),
            sumsq: R::one(),
        }
    }

    pub fn from_parts(scale: R, sumsq: R) -> Self {
        Self { scale, sumsq }
    }

    /// Add `absx^2`
    #[inline]
    pub fn add(&mut self, absx: R) {
        if self.scale < absx {
            let r = self.scale / absx;
            self.sumsq = R::one() + self.sumsq * r * r;
            self.scale = absx;
        } else if self.scale != R::zero() {
            let r = absx / self.scale;
            self.sumsq = self.sumsq + r * r;
        }
    }

    /// Merge another partial sum; associative and commutative
    #[inline]
    pub fn combine(&mut self, other: SumSq<R>) {
        if self.scale > other.scale {
            let r = other.scale / self.scale;
            self.sumsq = self.sumsq + other.sumsq * r * r;
        } else if other.scale != R::zero() {
            let r = self.scale / other.scale;
            self.sumsq = self.sumsq * r * r + other.sumsq;
            self.scale = other.scale;
        }
    }

    /// Multiply the represented sum by `factor`
    #[inline]
    pub fn scale_by(&mut self, factor: R) {
        self.sumsq = self.sumsq * factor;
    }

    /// `scale * sqrt(sumsq)`
    pub fn value(&self) -> R {
        self.scale * self.sumsq.sqrt()
    }
}
