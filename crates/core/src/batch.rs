//! Tile-batch builders
//!
//! A batch holds one entry per product: the operand and output tile handles,
//! their leading dimensions and the per-item shape. Device kernels need every
//! item of a launch to share one [`ShapeClass`]; host batches may mix shapes.
//! Spent batches go back to a [`BatchArena`] keyed by location and shape
//! class so their arrays are reused by the next call.

use std::collections::HashMap;

use crate::scalar::Scalar;
use crate::tile::Tile;
use crate::types::{Location, Op, Uplo};

/// Uniform (m, n, k) of every item in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeClass {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

/// Arena key: where the batch runs and what it computes
pub type BatchKey = (Location, ShapeClass);

fn uniform(m: &[usize], n: &[usize], k: &[usize]) -> Option<ShapeClass> {
    let class = ShapeClass {
        m: *m.first()?,
        n: *n.first()?,
        k: *k.first()?,
    };
    let same = m.iter().all(|&x| x == class.m) && n.iter().all(|&x| x == class.n) && k.iter().all(|&x| x == class.k);
    same.then_some(class)
}

// ============================================================================
// gemm
// ============================================================================

/// Batch of `C_i := alpha op_a(A_i) op_b(B_i) + beta C_i`
pub struct GemmBatch<T: Scalar> {
    pub op_a: Op,
    pub op_b: Op,
    pub alpha: T,
    pub beta: T,
    pub m: Vec<usize>,
    pub n: Vec<usize>,
    pub k: Vec<usize>,
    pub a: Vec<Tile<T>>,
    pub lda: Vec<usize>,
    pub b: Vec<Tile<T>>,
    pub ldb: Vec<usize>,
    pub c: Vec<Tile<T>>,
    pub ldc: Vec<usize>,
}

impl<T: Scalar> GemmBatch<T> {
    pub fn new(op_a: Op, op_b: Op, alpha: T, beta: T) -> Self {
        Self {
            op_a,
            op_b,
            alpha,
            beta,
            m: Vec::new(),
            n: Vec::new(),
            k: Vec::new(),
            a: Vec::new(),
            lda: Vec::new(),
            b: Vec::new(),
            ldb: Vec::new(),
            c: Vec::new(),
            ldc: Vec::new(),
        }
    }

    fn reset(&mut self, op_a: Op, op_b: Op, alpha: T, beta: T) {
        self.op_a = op_a;
        self.op_b = op_b;
        self.alpha = alpha;
        self.beta = beta;
        self.clear();
    }

    /// Drop every tile handle, keeping capacity
    pub fn clear(&mut self) {
        self.m.clear();
        self.n.clear();
        self.k.clear();
        self.a.clear();
        self.lda.clear();
        self.b.clear();
        self.ldb.clear();
        self.c.clear();
        self.ldc.clear();
    }

    /// Append one product; shapes are read from the physical tiles
    pub fn push(&mut self, a: Tile<T>, b: Tile<T>, c: Tile<T>) {
        let (m, n) = c.physical_extent();
        let (amb, anb) = a.physical_extent();
        let k = if self.op_a.is_transposed() { amb } else { anb };
        self.m.push(m);
        self.n.push(n);
        self.k.push(k);
        self.lda.push(a.stride());
        self.ldb.push(b.stride());
        self.ldc.push(c.stride());
        self.a.push(a);
        self.b.push(b);
        self.c.push(c);
    }

    pub fn len(&self) -> usize {
        self.c.len()
    }

    pub fn is_empty(&self) -> bool {
        self.c.is_empty()
    }

    /// Shared shape of all items, `None` if empty or mixed
    pub fn shape_class(&self) -> Option<ShapeClass> {
        uniform(&self.m, &self.n, &self.k)
    }
}

// ============================================================================
// syr2k
// ============================================================================

/// Batch of `C_i := alpha A_i B_i^T + alpha B_i A_i^T + beta C_i` on `uplo`
pub struct Syr2kBatch<T: Scalar> {
    pub uplo: Uplo,
    pub trans: Op,
    pub alpha: T,
    pub beta: T,
    pub n: Vec<usize>,
    pub k: Vec<usize>,
    pub a: Vec<Tile<T>>,
    pub lda: Vec<usize>,
    pub b: Vec<Tile<T>>,
    pub ldb: Vec<usize>,
    pub c: Vec<Tile<T>>,
    pub ldc: Vec<usize>,
}

impl<T: Scalar> Syr2kBatch<T> {
    pub fn new(uplo: Uplo, trans: Op, alpha: T, beta: T) -> Self {
        Self {
            uplo,
            trans,
            alpha,
            beta,
            n: Vec::new(),
            k: Vec::new(),
            a: Vec::new(),
            lda: Vec::new(),
            b: Vec::new(),
            ldb: Vec::new(),
            c: Vec::new(),
            ldc: Vec::new(),
        }
    }

    fn reset(&mut self, uplo: Uplo, trans: Op, alpha: T, beta: T) {
        self.uplo = uplo;
        self.trans = trans;
        self.alpha = alpha;
        self.beta = beta;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.n.clear();
        self.k.clear();
        self.a.clear();
        self.lda.clear();
        self.b.clear();
        self.ldb.clear();
        self.c.clear();
        self.ldc.clear();
    }

    pub fn push(&mut self, a: Tile<T>, b: Tile<T>, c: Tile<T>) {
        let (n, _) = c.physical_extent();
        let (amb, anb) = a.physical_extent();
        let k = if self.trans.is_transposed() { amb } else { anb };
        self.n.push(n);
        self.k.push(k);
        self.lda.push(a.stride());
        self.ldb.push(b.stride());
        self.ldc.push(c.stride());
        self.a.push(a);
        self.b.push(b);
        self.c.push(c);
    }

    pub fn len(&self) -> usize {
        self.c.len()
    }

    pub fn is_empty(&self) -> bool {
        self.c.is_empty()
    }

    pub fn shape_class(&self) -> Option<ShapeClass> {
        uniform(&self.n, &self.n, &self.k)
    }
}

// ============================================================================
// Arena
// ============================================================================

/// Spent batches, reused across calls
pub struct BatchArena<T: Scalar> {
    gemm: HashMap<BatchKey, Vec<GemmBatch<T>>>,
    syr2k: HashMap<BatchKey, Vec<Syr2kBatch<T>>>,
    reused: usize,
}

impl<T: Scalar> Default for BatchArena<T> {
    fn default() -> Self {
        Self {
            gemm: HashMap::new(),
            syr2k: HashMap::new(),
            reused: 0,
        }
    }
}

impl<T: Scalar> BatchArena<T> {
    pub fn take_gemm(&mut self, key: BatchKey, op_a: Op, op_b: Op, alpha: T, beta: T) -> GemmBatch<T> {
        match self.gemm.get_mut(&key).and_then(|free| free.pop()) {
            Some(mut batch) => {
                self.reused += 1;
                batch.reset(op_a, op_b, alpha, beta);
                batch
            }
            None => GemmBatch::new(op_a, op_b, alpha, beta),
        }
    }

    pub fn put_gemm(&mut self, key: BatchKey, mut batch: GemmBatch<T>) {
        batch.clear();
        self.gemm.entry(key).or_default().push(batch);
    }

    pub fn take_syr2k(&mut self, key: BatchKey, uplo: Uplo, trans: Op, alpha: T, beta: T) -> Syr2kBatch<T> {
        match self.syr2k.get_mut(&key).and_then(|free| free.pop()) {
            Some(mut batch) => {
                self.reused += 1;
                batch.reset(uplo, trans, alpha, beta);
                batch
            }
            None => Syr2kBatch::new(uplo, trans, alpha, beta),
        }
    }

    pub fn put_syr2k(&mut self, key: BatchKey, mut batch: Syr2kBatch<T>) {
        batch.clear();
        self.syr2k.entry(key).or_default().push(batch);
    }

    /// Batches handed out from the arena instead of allocated
    pub fn reused(&self) -> usize {
        self.reused
    }
}
