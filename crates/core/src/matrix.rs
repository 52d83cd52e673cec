//! Distributed matrices
//!
//! A [`DistributedMatrix`] is a view onto shared tile storage: a rectangular
//! range of tiles seen through an orientation. Tile `(i, j)` is owned by one
//! rank of a `p x q` process grid (block-cyclic, column-major grid order) and,
//! when computing on devices, by one device index. Ownership depends only on
//! the physical coordinate and the grid, so transposed and sub-matrix views
//! agree with the full matrix on every tile.

use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::batch::BatchArena;
use crate::error::{EngineError, Result};
use crate::scalar::Scalar;
use crate::storage::{Access, CopyState, TileKey, TileStore};
use crate::tile::{Tile, TileData};
use crate::types::{Layout, Location, Op, Uplo};

/// Which tiles of the matrix exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Structure {
    General,
    /// Only the `uplo` half is stored
    Symmetric,
    /// Only the `uplo` half is stored; diagonal is real
    Hermitian,
    /// Tiles intersecting the band `-kl <= col - row <= ku`
    Band { kl: usize, ku: usize },
}

/// Process grid and the rank of this process within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessGrid {
    pub p: usize,
    pub q: usize,
    pub rank: usize,
}

impl ProcessGrid {
    pub fn new(p: usize, q: usize, rank: usize) -> Result<Self> {
        if p == 0 || q == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "process grid {}x{} is empty",
                p, q
            )));
        }
        if rank >= p * q {
            return Err(EngineError::InvalidArgument(format!(
                "rank {} outside {}x{} grid",
                rank, p, q
            )));
        }
        Ok(Self { p, q, rank })
    }

    /// Single-process grid
    pub fn single() -> Self {
        Self { p: 1, q: 1, rank: 0 }
    }

    pub fn size(&self) -> usize {
        self.p * self.q
    }

    /// Owner of tile (i, j)
    pub fn rank_of(&self, i: usize, j: usize) -> usize {
        (i % self.p) + (j % self.q) * self.p
    }
}

impl Default for ProcessGrid {
    fn default() -> Self {
        Self::single()
    }
}

// ============================================================================
// Shared storage
// ============================================================================

pub(crate) struct MatrixStorage<T: Scalar> {
    m: usize,
    n: usize,
    mb: usize,
    nb: usize,
    mt: usize,
    nt: usize,
    structure: Structure,
    uplo: Uplo,
    grid: ProcessGrid,
    num_devices: usize,
    tiles: TileStore<T>,
    batches: Mutex<BatchArena<T>>,
}

impl<T: Scalar> MatrixStorage<T> {
    fn row_extent(&self, i: usize) -> usize {
        if i + 1 < self.mt {
            self.mb
        } else {
            self.m - i * self.mb
        }
    }

    fn col_extent(&self, j: usize) -> usize {
        if j + 1 < self.nt {
            self.nb
        } else {
            self.n - j * self.nb
        }
    }

    fn exists(&self, i: usize, j: usize) -> bool {
        if i >= self.mt || j >= self.nt {
            return false;
        }
        match self.structure {
            Structure::General => true,
            Structure::Symmetric | Structure::Hermitian => match self.uplo {
                Uplo::Lower => i >= j,
                Uplo::Upper => i <= j,
                Uplo::General => true,
            },
            Structure::Band { kl, ku } => {
                let (mb, nb) = (self.mb as i64, self.nb as i64);
                let (i, j) = (i as i64, j as i64);
                // smallest row - col and col - row over the tile's elements
                let below = i * mb - ((j + 1) * nb - 1);
                let above = j * nb - ((i + 1) * mb - 1);
                below <= kl as i64 && above <= ku as i64
            }
        }
    }

    fn device_of(&self, j: usize) -> usize {
        (j / self.grid.q) % self.num_devices.max(1)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`DistributedMatrix`]
#[derive(Debug, Clone)]
pub struct MatrixBuilder<T> {
    m: usize,
    n: usize,
    mb: usize,
    nb: usize,
    structure: Structure,
    uplo: Uplo,
    grid: ProcessGrid,
    num_devices: usize,
    _marker: PhantomData<T>,
}

impl<T: Scalar> MatrixBuilder<T> {
    /// Row and column tile extents, if they differ
    pub fn tile_size(mut self, mb: usize, nb: usize) -> Self {
        self.mb = mb;
        self.nb = nb;
        self
    }

    pub fn symmetric(mut self, uplo: Uplo) -> Self {
        self.structure = Structure::Symmetric;
        self.uplo = uplo;
        self
    }

    pub fn hermitian(mut self, uplo: Uplo) -> Self {
        self.structure = Structure::Hermitian;
        self.uplo = uplo;
        self
    }

    pub fn band(mut self, kl: usize, ku: usize) -> Self {
        self.structure = Structure::Band { kl, ku };
        self.uplo = Uplo::General;
        self
    }

    pub fn grid(mut self, grid: ProcessGrid) -> Self {
        self.grid = grid;
        self
    }

    pub fn devices(mut self, num_devices: usize) -> Self {
        self.num_devices = num_devices;
        self
    }

    pub fn build(self) -> Result<DistributedMatrix<T>> {
        if self.mb == 0 || self.nb == 0 {
            return Err(EngineError::InvalidArgument("tile size must be positive".into()));
        }
        let square = matches!(self.structure, Structure::Symmetric | Structure::Hermitian);
        if square && (self.m != self.n || self.mb != self.nb) {
            return Err(EngineError::InvalidArgument(format!(
                "symmetric storage needs square matrix and tiles, got {}x{} with {}x{} tiles",
                self.m, self.n, self.mb, self.nb
            )));
        }
        if square && self.uplo == Uplo::General {
            return Err(EngineError::InvalidArgument(
                "symmetric storage needs Lower or Upper".into(),
            ));
        }
        ProcessGrid::new(self.grid.p, self.grid.q, self.grid.rank)?;

        let mt = self.m.div_ceil(self.mb);
        let nt = self.n.div_ceil(self.nb);
        let storage = MatrixStorage {
            m: self.m,
            n: self.n,
            mb: self.mb,
            nb: self.nb,
            mt,
            nt,
            structure: self.structure,
            uplo: self.uplo,
            grid: self.grid,
            num_devices: self.num_devices,
            tiles: TileStore::new(self.num_devices),
            batches: Mutex::new(BatchArena::default()),
        };
        Ok(DistributedMatrix {
            storage: Arc::new(storage),
            op: Op::NoTrans,
            row0: 0,
            col0: 0,
            mt,
            nt,
        })
    }
}

// ============================================================================
// Views
// ============================================================================

/// View onto tiled, distributed storage
#[derive(Clone)]
pub struct DistributedMatrix<T: Scalar> {
    storage: Arc<MatrixStorage<T>>,
    op: Op,
    row0: usize,
    col0: usize,
    mt: usize,
    nt: usize,
}

impl<T: Scalar> DistributedMatrix<T> {
    /// `m x n` general matrix with square `nb` tiles on a single process
    pub fn builder(m: usize, n: usize, nb: usize) -> MatrixBuilder<T> {
        MatrixBuilder {
            m,
            n,
            mb: nb,
            nb,
            structure: Structure::General,
            uplo: Uplo::General,
            grid: ProcessGrid::single(),
            num_devices: 0,
            _marker: PhantomData,
        }
    }

    // ------------------------------------------------------------------
    // Coordinates
    // ------------------------------------------------------------------

    fn physical(&self, i: usize, j: usize) -> TileKey {
        if self.op.is_transposed() {
            (self.row0 + j, self.col0 + i)
        } else {
            (self.row0 + i, self.col0 + j)
        }
    }

    fn in_view(&self, i: usize, j: usize) -> bool {
        i < self.mt() && j < self.nt()
    }

    fn checked(&self, i: usize, j: usize) -> Result<TileKey> {
        if !self.tile_exists(i, j) {
            return Err(EngineError::Resource(format!(
                "tile ({}, {}) outside the matrix structure",
                i, j
            )));
        }
        Ok(self.physical(i, j))
    }

    /// Tile rows of the view
    pub fn mt(&self) -> usize {
        if self.op.is_transposed() {
            self.nt
        } else {
            self.mt
        }
    }

    /// Tile columns of the view
    pub fn nt(&self) -> usize {
        if self.op.is_transposed() {
            self.mt
        } else {
            self.nt
        }
    }

    /// Element rows of the view
    pub fn m(&self) -> usize {
        (0..self.mt()).map(|i| self.tile_mb(i)).sum()
    }

    /// Element columns of the view
    pub fn n(&self) -> usize {
        (0..self.nt()).map(|j| self.tile_nb(j)).sum()
    }

    pub fn op(&self) -> Op {
        self.op
    }

    /// Stored half as seen through the view
    pub fn uplo(&self) -> Uplo {
        if self.op.is_transposed() {
            self.storage.uplo.flip()
        } else {
            self.storage.uplo
        }
    }

    pub fn uplo_physical(&self) -> Uplo {
        self.storage.uplo
    }

    pub fn structure(&self) -> Structure {
        self.storage.structure
    }

    pub fn is_real(&self) -> bool {
        !T::IS_COMPLEX
    }

    pub fn num_devices(&self) -> usize {
        self.storage.num_devices
    }

    pub fn grid(&self) -> ProcessGrid {
        self.storage.grid
    }

    /// Rows in tile row `i` of the view
    pub fn tile_mb(&self, i: usize) -> usize {
        if self.op.is_transposed() {
            self.storage.col_extent(self.col0 + i)
        } else {
            self.storage.row_extent(self.row0 + i)
        }
    }

    /// Columns in tile column `j` of the view
    pub fn tile_nb(&self, j: usize) -> usize {
        if self.op.is_transposed() {
            self.storage.row_extent(self.row0 + j)
        } else {
            self.storage.col_extent(self.col0 + j)
        }
    }

    pub fn tile_extent(&self, i: usize, j: usize) -> (usize, usize) {
        (self.tile_mb(i), self.tile_nb(j))
    }

    /// True if tile (i, j) is part of the matrix structure
    pub fn tile_exists(&self, i: usize, j: usize) -> bool {
        if !self.in_view(i, j) {
            return false;
        }
        let (pi, pj) = self.physical(i, j);
        self.storage.exists(pi, pj)
    }

    pub fn tile_rank(&self, i: usize, j: usize) -> usize {
        let (pi, pj) = self.physical(i, j);
        self.storage.grid.rank_of(pi, pj)
    }

    /// True if this process owns tile (i, j)
    pub fn tile_is_local(&self, i: usize, j: usize) -> bool {
        self.tile_exists(i, j) && self.tile_rank(i, j) == self.storage.grid.rank
    }

    /// Device computing on tile (i, j)
    pub fn tile_device(&self, i: usize, j: usize) -> usize {
        let (_, pj) = self.physical(i, j);
        self.storage.device_of(pj)
    }

    // ------------------------------------------------------------------
    // Acquisition protocol
    // ------------------------------------------------------------------

    fn acquire(&self, i: usize, j: usize, location: Location, layout: Layout, access: Access) -> Result<Tile<T>> {
        let (pi, pj) = self.checked(i, j)?;
        let create = if self.tile_is_local(i, j) {
            Some((self.storage.row_extent(pi), self.storage.col_extent(pj)))
        } else {
            None
        };
        let tile = self
            .storage
            .tiles
            .acquire((pi, pj), location, layout, access, create)?;
        let uplo = match self.storage.structure {
            Structure::Symmetric | Structure::Hermitian if pi == pj => self.storage.uplo,
            _ => Uplo::General,
        };
        Ok(tile.with_view(self.op, uplo))
    }

    /// Make tile (i, j) valid at `location` in `layout` and take a read hold.
    /// Every successful call must be paired with one [`Self::tile_tick`].
    pub fn tile_acquire_for_reading(&self, i: usize, j: usize, location: Location, layout: Layout) -> Result<Tile<T>> {
        self.acquire(i, j, location, layout, Access::Read)
    }

    /// Make tile (i, j) valid at `location` and invalidate every other copy
    pub fn tile_acquire_for_writing(&self, i: usize, j: usize, location: Location, layout: Layout) -> Result<Tile<T>> {
        self.acquire(i, j, location, layout, Access::Write)
    }

    pub fn tile_tick(&self, i: usize, j: usize) -> Result<()> {
        self.storage.tiles.tick(self.physical(i, j))
    }

    /// Tick a hold taken at `location`
    pub(crate) fn tile_tick_at(&self, i: usize, j: usize, location: Location) -> Result<()> {
        self.storage.tiles.tick_at(self.physical(i, j), Some(location))
    }

    /// Drop the workspace copy of tile (i, j) on `device`
    pub fn tile_release(&self, i: usize, j: usize, device: usize) -> Result<()> {
        self.storage.tiles.release(self.physical(i, j), device)
    }

    pub fn tile_life(&self, i: usize, j: usize) -> Option<usize> {
        self.storage.tiles.life(self.physical(i, j))
    }

    pub fn tile_set_life(&self, i: usize, j: usize, life: usize) -> Result<()> {
        self.storage.tiles.set_life(self.physical(i, j), life)
    }

    /// Outstanding read holds on tile (i, j)
    pub fn tile_holds(&self, i: usize, j: usize) -> usize {
        self.storage.tiles.holds(self.physical(i, j))
    }

    pub fn tile_copies(&self, i: usize, j: usize) -> Vec<(Location, CopyState)> {
        self.storage.tiles.copies(self.physical(i, j))
    }

    /// Insert a locally owned tile in physical orientation
    pub fn tile_insert(&self, i: usize, j: usize, data: TileData<T>) -> Result<Tile<T>> {
        let key = self.checked(i, j)?;
        if !self.tile_is_local(i, j) {
            return Err(EngineError::InvalidArgument(format!(
                "tile ({}, {}) belongs to rank {}",
                i,
                j,
                self.tile_rank(i, j)
            )));
        }
        let (mb, nb) = (self.storage.row_extent(key.0), self.storage.col_extent(key.1));
        self.storage.tiles.insert(key, mb, nb, data, Location::Host)
    }

    /// Accept a copy of a remote tile, to be consumed `life` times
    pub fn tile_receive(&self, i: usize, j: usize, data: TileData<T>, life: usize) -> Result<()> {
        let key = self.checked(i, j)?;
        if self.tile_is_local(i, j) {
            return Err(EngineError::InvalidArgument(format!(
                "tile ({}, {}) is owned by this rank",
                i, j
            )));
        }
        let (mb, nb) = (self.storage.row_extent(key.0), self.storage.col_extent(key.1));
        self.storage.tiles.insert_workspace(key, mb, nb, data, life);
        Ok(())
    }

    pub fn tile_erase(&self, i: usize, j: usize) {
        self.storage.tiles.erase(self.physical(i, j));
    }

    pub(crate) fn batch_arena(&self) -> &Mutex<BatchArena<T>> {
        &self.storage.batches
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub fn transpose(&self) -> Result<Self> {
        let mut out = self.clone();
        out.op = self.op.transpose()?;
        Ok(out)
    }

    pub fn conj_transpose(&self) -> Result<Self> {
        let mut out = self.clone();
        out.op = self.op.conj_transpose()?;
        Ok(out)
    }

    /// View of tile rows `rows` and tile columns `cols` of this view
    pub fn sub(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Self> {
        if rows.start > rows.end || cols.start > cols.end || rows.end > self.mt() || cols.end > self.nt() {
            return Err(EngineError::InvalidArgument(format!(
                "sub-matrix {:?} x {:?} outside {}x{} tiles",
                rows,
                cols,
                self.mt(),
                self.nt()
            )));
        }
        let mut out = self.clone();
        let (prows, pcols) = if self.op.is_transposed() {
            (cols, rows)
        } else {
            (rows, cols)
        };
        out.row0 = self.row0 + prows.start;
        out.col0 = self.col0 + pcols.start;
        out.mt = prows.end - prows.start;
        out.nt = pcols.end - pcols.start;
        Ok(out)
    }

    /// True if both views share tile storage
    pub fn same_storage(&self, other: &DistributedMatrix<T>) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    // ------------------------------------------------------------------
    // Dense import / export of local tiles
    // ------------------------------------------------------------------

    /// Copy the locally owned tiles out of a column-major `m x n` array
    pub fn from_dense(&self, data: &[T], ld: usize) -> Result<()> {
        if self.op.is_transposed() {
            return Err(EngineError::InvalidArgument(
                "dense import needs a non-transposed view".into(),
            ));
        }
        let (m, n) = (self.m(), self.n());
        if ld < m.max(1) || (m > 0 && n > 0 && data.len() < ld * (n - 1) + m) {
            return Err(EngineError::InvalidArgument(format!(
                "dense array too small for {}x{} with ld {}",
                m, n, ld
            )));
        }
        let mut col = 0;
        for j in 0..self.nt() {
            let nb = self.tile_nb(j);
            let mut row = 0;
            for i in 0..self.mt() {
                let mb = self.tile_mb(i);
                if self.tile_is_local(i, j) {
                    let mut tile = TileData::zeros(mb, nb, Layout::ColMajor);
                    for jj in 0..nb {
                        for ii in 0..mb {
                            tile.set(ii, jj, data[(row + ii) + (col + jj) * ld]);
                        }
                    }
                    self.tile_insert(i, j, tile)?;
                }
                row += mb;
            }
            col += nb;
        }
        Ok(())
    }

    /// Column-major `m x n` copy of the locally owned tiles; other entries are zero
    pub fn to_dense(&self) -> Result<Vec<T>> {
        let (m, n) = (self.m(), self.n());
        let mut out = vec![T::zero(); m * n];
        let mut col = 0;
        for j in 0..self.nt() {
            let nb = self.tile_nb(j);
            let mut row = 0;
            for i in 0..self.mt() {
                let mb = self.tile_mb(i);
                if self.tile_is_local(i, j) {
                    let tile = self.tile_acquire_for_reading(i, j, Location::Host, Layout::ColMajor)?;
                    for jj in 0..nb {
                        for ii in 0..mb {
                            out[(row + ii) + (col + jj) * m] = tile.at(ii, jj);
                        }
                    }
                    self.tile_tick(i, j)?;
                }
                row += mb;
            }
            col += nb;
        }
        Ok(out)
    }

    /// Locally owned tiles of the view, column by column
    pub fn local_tiles(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for j in 0..self.nt() {
            for i in 0..self.mt() {
                if self.tile_is_local(i, j) {
                    out.push((i, j));
                }
            }
        }
        out
    }
}

impl<T: Scalar> std::fmt::Debug for DistributedMatrix<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedMatrix")
            .field("mt", &self.mt())
            .field("nt", &self.nt())
            .field("op", &self.op)
            .field("uplo", &self.uplo())
            .field("structure", &self.storage.structure)
            .field("grid", &self.storage.grid)
            .field("num_devices", &self.storage.num_devices)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(m: usize, n: usize) -> Vec<f64> {
        (0..m * n).map(|x| x as f64).collect()
    }

    #[test]
    fn test_tile_extents_with_ragged_edge() {
        let a = DistributedMatrix::<f64>::builder(10, 7, 4).build().unwrap();
        assert_eq!((a.mt(), a.nt()), (3, 2));
        assert_eq!(a.tile_extent(2, 1), (2, 3));
        assert_eq!((a.m(), a.n()), (10, 7));
        let at = a.transpose().unwrap();
        assert_eq!((at.mt(), at.nt()), (2, 3));
        assert_eq!(at.tile_extent(1, 2), (3, 2));
        assert_eq!((at.m(), at.n()), (7, 10));
    }

    #[test]
    fn test_block_cyclic_ownership() {
        let grid = ProcessGrid::new(2, 3, 4).unwrap();
        let a = DistributedMatrix::<f64>::builder(32, 32, 4)
            .grid(grid)
            .devices(2)
            .build()
            .unwrap();
        assert_eq!(a.tile_rank(0, 0), 0);
        assert_eq!(a.tile_rank(1, 0), 1);
        assert_eq!(a.tile_rank(0, 2), 4);
        assert!(a.tile_is_local(2, 2));
        assert!(!a.tile_is_local(2, 1));
        assert_eq!(a.tile_device(0, 2), 0);
        assert_eq!(a.tile_device(0, 3), 1);
        assert_eq!(a.tile_device(0, 6), 0);
    }

    #[test]
    fn test_symmetric_structure_and_transpose_view() {
        let c = DistributedMatrix::<f64>::builder(8, 8, 4)
            .symmetric(Uplo::Upper)
            .build()
            .unwrap();
        assert!(c.tile_exists(0, 1));
        assert!(!c.tile_exists(1, 0));
        let ct = c.transpose().unwrap();
        assert_eq!(ct.uplo(), Uplo::Lower);
        assert_eq!(ct.uplo_physical(), Uplo::Upper);
        assert!(ct.tile_exists(1, 0));
        assert!(matches!(
            c.tile_acquire_for_reading(1, 0, Location::Host, Layout::ColMajor),
            Err(EngineError::Resource(_))
        ));
    }

    #[test]
    fn test_band_structure() {
        let a = DistributedMatrix::<f64>::builder(16, 16, 4)
            .band(4, 0)
            .build()
            .unwrap();
        assert!(a.tile_exists(0, 0));
        assert!(a.tile_exists(1, 0));
        assert!(!a.tile_exists(2, 0));
        assert!(!a.tile_exists(0, 1));
        let wide = DistributedMatrix::<f64>::builder(16, 16, 4)
            .band(5, 1)
            .build()
            .unwrap();
        assert!(wide.tile_exists(2, 0));
        assert!(!wide.tile_exists(3, 0));
        assert!(wide.tile_exists(0, 1));
        assert!(!wide.tile_exists(0, 2));
    }

    #[test]
    fn test_dense_round_trip_through_views() {
        let a = DistributedMatrix::<f64>::builder(5, 3, 2).build().unwrap();
        let dense = iota(5, 3);
        a.from_dense(&dense, 5).unwrap();
        assert_eq!(a.to_dense().unwrap(), dense);

        let at = a.transpose().unwrap();
        let t = at.to_dense().unwrap();
        for i in 0..5 {
            for j in 0..3 {
                assert_eq!(t[j + i * 3], dense[i + j * 5]);
            }
        }

        let sub = a.sub(1..3, 1..2).unwrap();
        assert_eq!((sub.m(), sub.n()), (3, 1));
        assert_eq!(sub.to_dense().unwrap(), vec![dense[12], dense[13], dense[14]]);
        assert!(sub.same_storage(&a));
    }

    #[test]
    fn test_lazy_local_creation_and_remote_receive() {
        let grid = ProcessGrid::new(2, 1, 0).unwrap();
        let a = DistributedMatrix::<f64>::builder(4, 2, 2)
            .grid(grid)
            .build()
            .unwrap();
        // local tile created zero-filled on first access
        let t = a.tile_acquire_for_reading(0, 0, Location::Host, Layout::ColMajor).unwrap();
        assert_eq!(t.at(1, 1), 0.0);
        a.tile_tick(0, 0).unwrap();

        // remote tile must be received first
        assert!(a.tile_acquire_for_reading(1, 0, Location::Host, Layout::ColMajor).is_err());
        let data = TileData::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0], 2, Layout::ColMajor).unwrap();
        a.tile_receive(1, 0, data, 1).unwrap();
        let r = a.tile_acquire_for_reading(1, 0, Location::Host, Layout::ColMajor).unwrap();
        assert_eq!(r.at(0, 1), 3.0);
        a.tile_tick(1, 0).unwrap();
        assert_eq!(a.tile_life(1, 0), None);
    }

    #[test]
    fn test_received_tile_life_can_be_extended_and_erased() {
        let grid = ProcessGrid::new(2, 1, 0).unwrap();
        let a = DistributedMatrix::<f64>::builder(4, 2, 2).grid(grid).build().unwrap();
        assert!(matches!(a.tile_set_life(1, 0, 2), Err(EngineError::Resource(_))));

        a.tile_receive(1, 0, TileData::zeros(2, 2, Layout::ColMajor), 1).unwrap();
        a.tile_set_life(1, 0, 2).unwrap();
        for remaining in [1, 0] {
            a.tile_acquire_for_reading(1, 0, Location::Host, Layout::ColMajor).unwrap();
            a.tile_tick(1, 0).unwrap();
            if remaining > 0 {
                assert_eq!(a.tile_life(1, 0), Some(remaining));
            }
        }
        assert_eq!(a.tile_life(1, 0), None);

        // an unconsumed copy is dropped on request
        a.tile_receive(1, 0, TileData::zeros(2, 2, Layout::ColMajor), 3).unwrap();
        a.tile_erase(1, 0);
        assert_eq!(a.tile_life(1, 0), None);
        assert!(a.tile_copies(1, 0).is_empty());
    }

    #[test]
    fn test_builder_rejects_bad_symmetric() {
        assert!(DistributedMatrix::<f64>::builder(4, 6, 2)
            .symmetric(Uplo::Lower)
            .build()
            .is_err());
        assert!(DistributedMatrix::<f64>::builder(4, 4, 0).build().is_err());
    }
}
