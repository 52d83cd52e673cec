//! Partial norms of one general tile

use crate::norm::sumsq::SumSq;
use crate::scalar::{max_nan, Scalar};
use crate::tile::Tile;

/// Everything a norm reduction needs from one tile
#[derive(Debug, Clone)]
pub struct TilePartials<R> {
    /// Largest magnitude; NaN if any entry is NaN
    pub max: R,
    /// Sum of magnitudes of each column
    pub col_sums: Vec<R>,
    /// Sum of magnitudes of each row
    pub row_sums: Vec<R>,
    pub sumsq: SumSq<R>,
}

/// Partials of the physical `mb x nb` tile, in one pass
pub fn genorm_tile<T: Scalar>(tile: &Tile<T>) -> TilePartials<T::Real> {
    let (mb, nb) = tile.physical_extent();
    let zero = <T::Real as num_traits::Zero>::zero();
    let mut out = TilePartials {
        max: zero,
        col_sums: vec![zero; nb],
        row_sums: vec![zero; mb],
        sumsq: SumSq::new(),
    };
    let data = tile.read();
    for j in 0..nb {
        for i in 0..mb {
            let absx = data.get(i, j).magnitude();
            out.max = max_nan(out.max, absx);
            out.col_sums[j] += absx;
            out.row_sums[i] += absx;
            out.sumsq.add(absx);
        }
    }
    out
}
