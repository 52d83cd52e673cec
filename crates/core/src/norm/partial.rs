//! Batched partial norms of Hermitian/symmetric tiles
//!
//! One launch reduces every tile of a batch to its partial norm. Only the
//! declared triangle is read; the diagonal contributes `|Re a_ii|`. The host
//! emulation runs one task per tile and, inside a tile, reduces rows in
//! blocks of `block_size` like the device kernel's thread blocks.

use num_traits::{Float, One, Zero};
use rayon::prelude::*;

use crate::error::{EngineError, Result};
use crate::norm::sumsq::SumSq;
use crate::scalar::{max_nan, Scalar};
use crate::tile::{Tile, TileData};
use crate::types::{Layout, Norm, Uplo};

/// Threads per block of the reduction kernels
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Minimum `ldv` for `kind` on `n x n` tiles
pub fn min_ldv(kind: Norm, n: usize) -> usize {
    match kind {
        Norm::Max => 1,
        Norm::One | Norm::Inf => n,
        Norm::Fro => 2,
    }
}

/// Partial norm of every tile of `tiles`, written to `values[b * ldv ..]`.
///
/// - Max: `values[b * ldv]` is the largest magnitude in the triangle
/// - One/Inf: `values[b * ldv + c]` is the sum of column `c` of the full tile
/// - Fro: `values[b * ldv]` and `values[b * ldv + 1]` are scale and sumsq
pub fn partial_norm<T: Scalar>(
    kind: Norm,
    uplo: Uplo,
    n: usize,
    tiles: &[Tile<T>],
    lda: usize,
    values: &mut [T::Real],
    ldv: usize,
) -> Result<()> {
    partial_norm_blocked(DEFAULT_BLOCK_SIZE, kind, uplo, n, tiles, lda, values, ldv)
}

pub(crate) fn check_args<T: Scalar>(
    kind: Norm,
    uplo: Uplo,
    n: usize,
    tiles: &[Tile<T>],
    lda: usize,
    values_len: usize,
    ldv: usize,
) -> Result<()> {
    if uplo == Uplo::General {
        return Err(EngineError::InvalidArgument(
            "partial norm needs a Lower or Upper triangle".into(),
        ));
    }
    let need = min_ldv(kind, n);
    if ldv < need.max(1) {
        return Err(EngineError::InvalidArgument(format!(
            "{:?} norm needs ldv >= {}, got {}",
            kind,
            need.max(1),
            ldv
        )));
    }
    if values_len < tiles.len() * ldv {
        return Err(EngineError::InvalidArgument(format!(
            "values holds {} entries, {} tiles with ldv {} need {}",
            values_len,
            tiles.len(),
            ldv,
            tiles.len() * ldv
        )));
    }
    if n == 0 {
        return Ok(());
    }
    for (b, tile) in tiles.iter().enumerate() {
        let layout = tile.layout();
        if layout != Layout::ColMajor {
            return Err(EngineError::Layout {
                location: tile.location(),
                from: layout,
                to: Layout::ColMajor,
            });
        }
        if tile.stride() != lda {
            return Err(EngineError::kernel(format!(
                "partial norm tile {}: stride {} does not match lda {}",
                b,
                tile.stride(),
                lda
            )));
        }
        let (mb, nb) = tile.physical_extent();
        if mb < n || nb < n {
            return Err(EngineError::kernel(format!(
                "partial norm tile {} is {}x{}, smaller than n = {}",
                b, mb, nb, n
            )));
        }
    }
    Ok(())
}

/// [`partial_norm`] with an explicit reduction block size
#[allow(clippy::too_many_arguments)]
pub fn partial_norm_blocked<T: Scalar>(
    block_size: usize,
    kind: Norm,
    uplo: Uplo,
    n: usize,
    tiles: &[Tile<T>],
    lda: usize,
    values: &mut [T::Real],
    ldv: usize,
) -> Result<()> {
    if tiles.is_empty() {
        return Ok(());
    }
    check_args(kind, uplo, n, tiles, lda, values.len(), ldv)?;
    let block = block_size.max(1);
    let batch = tiles.len();

    values[..batch * ldv]
        .par_chunks_mut(ldv)
        .zip(tiles.par_iter())
        .for_each(|(out, tile)| {
            if n == 0 {
                fill_empty(kind, out);
                return;
            }
            let data = tile.read();
            match kind {
                Norm::Max => out[0] = tile_max(&data, uplo, n, block),
                Norm::One | Norm::Inf => tile_col_sums(&data, uplo, n, block, &mut out[..n]),
                Norm::Fro => {
                    let s = tile_sumsq(&data, uplo, n, block);
                    out[0] = s.scale;
                    out[1] = s.sumsq;
                }
            }
        });
    Ok(())
}

fn fill_empty<R: Float>(kind: Norm, out: &mut [R]) {
    match kind {
        Norm::Max => out[0] = R::zero(),
        Norm::One | Norm::Inf => {}
        Norm::Fro => {
            out[0] = R::zero();
            out[1] = R::one();
        }
    }
}

#[inline]
fn stored(uplo: Uplo, i: usize, j: usize) -> bool {
    match uplo {
        Uplo::Lower => i >= j,
        _ => i <= j,
    }
}

/// Strictly triangular columns of row `i`
fn strict_cols(uplo: Uplo, i: usize, n: usize) -> std::ops::Range<usize> {
    match uplo {
        Uplo::Lower => 0..i,
        _ => i + 1..n,
    }
}

#[inline]
fn diag_abs<T: Scalar>(data: &TileData<T>, i: usize) -> T::Real {
    Float::abs(data.get(i, i).real_part())
}

fn blocks(n: usize, block: usize) -> impl Iterator<Item = std::ops::Range<usize>> {
    (0..n).step_by(block).map(move |start| start..(start + block).min(n))
}

fn tile_max<T: Scalar>(data: &TileData<T>, uplo: Uplo, n: usize, block: usize) -> T::Real {
    let mut result = T::Real::zero();
    for rows in blocks(n, block) {
        let mut part = T::Real::zero();
        for i in rows {
            for j in strict_cols(uplo, i, n) {
                part = max_nan(part, data.get(i, j).magnitude());
            }
            part = max_nan(part, diag_abs(data, i));
        }
        result = max_nan(result, part);
    }
    result
}

fn tile_col_sums<T: Scalar>(data: &TileData<T>, uplo: Uplo, n: usize, block: usize, out: &mut [T::Real]) {
    for cols in blocks(n, block) {
        for c in cols {
            let mut sum = diag_abs(data, c);
            for r in (0..n).filter(|&r| r != c) {
                let (i, j) = if stored(uplo, r, c) { (r, c) } else { (c, r) };
                sum += data.get(i, j).magnitude();
            }
            out[c] = sum;
        }
    }
}

fn tile_sumsq<T: Scalar>(data: &TileData<T>, uplo: Uplo, n: usize, block: usize) -> SumSq<T::Real> {
    let two = T::Real::one() + T::Real::one();
    let mut total = SumSq::new();
    for rows in blocks(n, block) {
        let mut part = SumSq::new();
        for i in rows {
            let mut row = SumSq::new();
            for j in strict_cols(uplo, i, n) {
                row.add(data.get(i, j).magnitude());
            }
            row.scale_by(two);
            row.add(diag_abs(data, i));
            part.combine(row);
        }
        total.combine(part);
    }
    total
}
