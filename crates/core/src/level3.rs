//! User-level block operations
//!
//! These accept any declared half of `C` and any number of block columns in
//! `A` and `B`, and reduce to the single block-column operations in
//! [`internal`](crate::internal).

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::internal;
use crate::matrix::{DistributedMatrix, Structure};
use crate::scalar::Scalar;
use crate::types::{Layout, Location, Target, Uplo};

/// Execution options of a block operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub target: Target,
    /// Priority hint of the spawned tasks; higher runs earlier
    pub priority: i32,
    /// Compute queue used on each device
    pub queue_index: usize,
    pub layout: Layout,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            target: Target::HostTask,
            priority: 0,
            queue_index: 0,
            layout: Layout::ColMajor,
        }
    }
}

impl Options {
    pub fn with_target(target: Target) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }
}

/// Symmetric rank-2k update `C := alpha A B^T + alpha B A^T + beta C`.
///
/// `A` and `B` are `n x k`; only the stored half of the symmetric `C` is
/// updated. An Upper `C` is updated through its Lower transposed view.
pub fn syr2k<T: Scalar>(
    engine: &Engine,
    alpha: T,
    a: &DistributedMatrix<T>,
    b: &DistributedMatrix<T>,
    beta: T,
    c: &DistributedMatrix<T>,
    opts: &Options,
) -> Result<()> {
    if c.structure() != Structure::Symmetric {
        return Err(EngineError::InvalidArgument(format!(
            "syr2k needs a symmetric C, got {:?}",
            c.structure()
        )));
    }
    if a.mt() != b.mt() || a.nt() != b.nt() {
        return Err(EngineError::InvalidArgument(format!(
            "A is {}x{} tiles but B is {}x{}",
            a.mt(),
            a.nt(),
            b.mt(),
            b.nt()
        )));
    }

    let c = if c.uplo() == Uplo::Upper {
        c.transpose()?
    } else {
        c.clone()
    };

    if a.nt() == 0 {
        return scale_stored(&c, beta);
    }

    tracing::debug!(strategy = %opts.target, steps = a.nt(), "syr2k");
    for kk in 0..a.nt() {
        let a_col = a.sub(0..a.mt(), kk..kk + 1)?;
        let b_col = b.sub(0..b.mt(), kk..kk + 1)?;
        let beta_k = if kk == 0 { beta } else { T::one() };
        internal::syr2k(
            engine,
            opts.target,
            alpha,
            &a_col,
            &b_col,
            beta_k,
            &c,
            opts.priority,
            opts.queue_index,
            opts.layout,
        )?;
    }
    Ok(())
}

/// `C := beta C` on the locally owned stored half
fn scale_stored<T: Scalar>(c: &DistributedMatrix<T>, beta: T) -> Result<()> {
    if beta == T::one() {
        return Ok(());
    }
    for (i, j) in c.local_tiles() {
        let tile = c.tile_acquire_for_writing(i, j, Location::Host, Layout::ColMajor)?;
        crate::blas::scale(tile.uplo_physical(), beta, &tile);
    }
    Ok(())
}
