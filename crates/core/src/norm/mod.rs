//! Norms of Hermitian and symmetric matrices
//!
//! [`partial_norm`] reduces a batch of diagonal tiles in one launch.
//! [`henorm_partials`] drives the reduction of the tiles owned by one rank:
//! diagonal tiles go through the batched reduction, off-diagonal tiles
//! through [`genorm_tile`], and the per-tile partials are merged on the host.
//! Partials from every rank are folded with [`NormPartials::combine`] before
//! [`NormPartials::finish`] yields the norm; [`henorm`] does both for a
//! single rank.

#[cfg(feature = "cuda")]
mod cuda;
mod genorm;
mod partial;
mod sumsq;

pub use genorm::{genorm_tile, TilePartials};
pub use partial::{min_ldv, partial_norm, partial_norm_blocked, DEFAULT_BLOCK_SIZE};
pub use sumsq::SumSq;

use std::collections::BTreeMap;
use std::sync::Arc;

use num_traits::Zero;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::gpu::GpuDevice;
use crate::internal::Lease;
use crate::matrix::{DistributedMatrix, Structure};
use crate::runtime::{ComputeQueue, Task};
use crate::scalar::{max_nan, RealScalar, Scalar};
use crate::tile::Tile;
use crate::types::{Layout, Norm, Op, Target, Uplo};

/// Diagonal tiles sharing `(n, lda)`, each with its element offset
type DiagGroups<T> = BTreeMap<(usize, usize), Vec<(usize, Tile<T>)>>;

/// Off-diagonal tiles with their row and column element offsets
type OffDiag<T> = Vec<(usize, usize, Tile<T>)>;

/// Unfinished norm of the tiles seen so far.
///
/// For One/Inf this keeps one absolute sum per matrix column, so partials
/// from different ranks add up column by column; the maximum is only taken
/// by [`finish`](Self::finish).
#[derive(Debug, Clone, PartialEq)]
pub struct NormPartials<R> {
    kind: Norm,
    max: R,
    col_sums: Vec<R>,
    sumsq: SumSq<R>,
}

impl<R: RealScalar> NormPartials<R> {
    /// Empty partials of an `n x n` matrix
    pub fn new(kind: Norm, n: usize) -> Self {
        let col_sums = match kind {
            Norm::One | Norm::Inf => vec![R::zero(); n],
            _ => Vec::new(),
        };
        Self {
            kind,
            max: R::zero(),
            col_sums,
            sumsq: SumSq::new(),
        }
    }

    /// One `partial_norm` output of a diagonal tile at element offset `off`
    fn merge_diag(&mut self, off: usize, n: usize, values: &[R]) {
        match self.kind {
            Norm::Max => self.max = max_nan(self.max, values[0]),
            Norm::One | Norm::Inf => {
                for (sum, &v) in self.col_sums[off..off + n].iter_mut().zip(values) {
                    *sum += v;
                }
            }
            Norm::Fro => self.sumsq.combine(SumSq::from_parts(values[0], values[1])),
        }
    }

    /// An off-diagonal tile stands for itself and its mirror
    fn merge_off(&mut self, row_off: usize, col_off: usize, p: &TilePartials<R>) {
        match self.kind {
            Norm::Max => self.max = max_nan(self.max, p.max),
            Norm::One | Norm::Inf => {
                for (c, &v) in p.col_sums.iter().enumerate() {
                    self.col_sums[col_off + c] += v;
                }
                for (r, &v) in p.row_sums.iter().enumerate() {
                    self.col_sums[row_off + r] += v;
                }
            }
            Norm::Fro => {
                let mut twice = p.sumsq;
                twice.scale_by(R::one() + R::one());
                self.sumsq.combine(twice);
            }
        }
    }

    pub fn kind(&self) -> Norm {
        self.kind
    }

    /// Largest magnitude seen (Max)
    pub fn max(&self) -> R {
        self.max
    }

    /// Absolute sum of every matrix column (One/Inf); empty for other kinds
    pub fn col_sums(&self) -> &[R] {
        &self.col_sums
    }

    /// Scaled sum of squares (Fro)
    pub fn sumsq(&self) -> SumSq<R> {
        self.sumsq
    }

    /// Fold the partials of disjoint tiles, e.g. those of another rank
    pub fn combine(&mut self, other: &NormPartials<R>) -> Result<()> {
        if other.kind != self.kind || other.col_sums.len() != self.col_sums.len() {
            return Err(EngineError::InvalidArgument(format!(
                "cannot combine {:?} partials of {} columns with {:?} partials of {} columns",
                self.kind,
                self.col_sums.len(),
                other.kind,
                other.col_sums.len()
            )));
        }
        self.max = max_nan(self.max, other.max);
        for (sum, &v) in self.col_sums.iter_mut().zip(&other.col_sums) {
            *sum += v;
        }
        self.sumsq.combine(other.sumsq);
        Ok(())
    }

    /// The norm of every tile folded so far
    pub fn finish(&self) -> R {
        match self.kind {
            Norm::Max => self.max,
            Norm::One | Norm::Inf => self.col_sums.iter().fold(R::zero(), |m, &v| max_nan(m, v)),
            Norm::Fro => self.sumsq.value(),
        }
    }
}

/// Element offsets of each tile row and tile column
struct Offsets {
    rows: Vec<usize>,
    cols: Vec<usize>,
}

impl Offsets {
    fn of<T: Scalar>(a: &DistributedMatrix<T>) -> Self {
        let prefix = |extents: Vec<usize>| {
            let mut acc = 0;
            extents
                .into_iter()
                .map(|e| {
                    let start = acc;
                    acc += e;
                    start
                })
                .collect()
        };
        Self {
            rows: prefix((0..a.mt()).map(|i| a.tile_mb(i)).collect()),
            cols: prefix((0..a.nt()).map(|j| a.tile_nb(j)).collect()),
        }
    }
}

/// Norm of a Hermitian matrix, or of a symmetric one with real entries.
///
/// Only the tiles owned by this rank are read. On a multi-rank grid use
/// [`henorm_partials`] and combine the partials of every rank instead.
pub fn henorm<T: Scalar>(
    engine: &Engine,
    kind: Norm,
    a: &DistributedMatrix<T>,
    target: Target,
) -> Result<T::Real> {
    Ok(henorm_partials(engine, kind, a, target)?.finish())
}

/// Partials of the tiles of `a` owned by this rank.
///
/// Only the stored half is read; every off-diagonal tile is counted for its
/// mirror too.
pub fn henorm_partials<T: Scalar>(
    engine: &Engine,
    kind: Norm,
    a: &DistributedMatrix<T>,
    target: Target,
) -> Result<NormPartials<T::Real>> {
    match a.structure() {
        Structure::Hermitian => {}
        Structure::Symmetric if !T::IS_COMPLEX => {}
        other => {
            return Err(EngineError::InvalidArgument(format!(
                "henorm needs a Hermitian or real symmetric matrix, got {:?}",
                other
            )))
        }
    }
    let a = match a.op() {
        Op::NoTrans => a.clone(),
        Op::Trans => a.transpose()?,
        Op::ConjTrans => a.conj_transpose()?,
    };
    if a.mt() != a.nt() {
        return Err(EngineError::InvalidArgument(format!(
            "henorm needs a square tile grid, got {}x{} tiles",
            a.mt(),
            a.nt()
        )));
    }
    for i in 0..a.mt() {
        if a.tile_mb(i) != a.tile_nb(i) {
            return Err(EngineError::InvalidArgument(format!(
                "diagonal tile {} is {}x{}",
                i,
                a.tile_mb(i),
                a.tile_nb(i)
            )));
        }
    }

    let offsets = Offsets::of(&a);
    match target {
        Target::Devices => devices(engine, kind, &a, &offsets),
        _ => host(engine, kind, &a, &offsets),
    }
}

/// Split acquired tiles into diagonal groups and off-diagonal tiles
fn acquire_local<'a, T: Scalar>(
    a: &'a DistributedMatrix<T>,
    tiles: &[(usize, usize)],
    offsets: &Offsets,
    lease: &mut Lease<'a, T>,
) -> Result<(DiagGroups<T>, OffDiag<T>)> {
    let mut diag = DiagGroups::new();
    let mut off = OffDiag::new();
    for &(i, j) in tiles {
        let tile = lease.read(a, i, j, Layout::ColMajor)?;
        tracing::trace!(i, j, location = %tile.location(), "norm tile acquired");
        if i == j {
            diag.entry((tile.mb(), tile.stride()))
                .or_default()
                .push((offsets.cols[j], tile));
        } else {
            off.push((offsets.rows[i], offsets.cols[j], tile));
        }
    }
    Ok((diag, off))
}

/// Run one diagonal group through the batched reduction
fn reduce_diag<T: Scalar>(
    block_size: usize,
    kind: Norm,
    uplo: Uplo,
    (n, lda): (usize, usize),
    group: &[(usize, Tile<T>)],
    device: Option<&GpuDevice>,
    acc: &mut NormPartials<T::Real>,
) -> Result<()> {
    let tiles: Vec<Tile<T>> = group.iter().map(|(_, tile)| tile.clone()).collect();
    let ldv = min_ldv(kind, n).max(1);
    let mut values = vec![T::Real::zero(); tiles.len() * ldv];

    #[cfg(feature = "cuda")]
    let done = match device {
        Some(device) => {
            cuda::partial_norm_cuda(device, block_size, kind, uplo, n, &tiles, lda, &mut values, ldv)?
        }
        None => false,
    };
    #[cfg(not(feature = "cuda"))]
    let done = {
        let _ = device;
        false
    };
    if !done {
        partial_norm_blocked(block_size, kind, uplo, n, &tiles, lda, &mut values, ldv)?;
    }

    for ((off, _), chunk) in group.iter().zip(values.chunks(ldv)) {
        acc.merge_diag(*off, n, chunk);
    }
    Ok(())
}

fn host<T: Scalar>(
    engine: &Engine,
    kind: Norm,
    a: &DistributedMatrix<T>,
    offsets: &Offsets,
) -> Result<NormPartials<T::Real>> {
    let block_size = engine.config().batch.reduction_block_size;
    let tiles = a.local_tiles();
    let mut lease = Lease::host();
    let (diag, off) = acquire_local(a, &tiles, offsets, &mut lease)?;
    tracing::debug!(strategy = "host", ?kind, diag = diag.len(), off = off.len(), "henorm dispatch");

    engine.pool().install(|| {
        let mut acc = NormPartials::new(kind, a.n());
        for (&shape, group) in &diag {
            reduce_diag(block_size, kind, a.uplo_physical(), shape, group, None, &mut acc)?;
        }
        let partials: Vec<_> = off
            .par_iter()
            .map(|(row_off, col_off, tile)| (*row_off, *col_off, genorm_tile(tile)))
            .collect();
        for (row_off, col_off, p) in &partials {
            acc.merge_off(*row_off, *col_off, p);
        }
        Ok(acc)
    })
}

fn devices<T: Scalar>(
    engine: &Engine,
    kind: Norm,
    a: &DistributedMatrix<T>,
    offsets: &Offsets,
) -> Result<NormPartials<T::Real>> {
    let num_devices = a.num_devices();
    if num_devices == 0 || num_devices > engine.num_devices() {
        return Err(EngineError::Resource(format!(
            "matrix spans {} devices, engine has {}",
            num_devices,
            engine.num_devices()
        )));
    }
    let acc = Arc::new(Mutex::new(NormPartials::new(kind, a.n())));
    let local = a.local_tiles();

    let mut tasks = Vec::new();
    for device in 0..num_devices {
        let tiles: Vec<_> = local
            .iter()
            .copied()
            .filter(|&(i, j)| a.tile_device(i, j) == device)
            .collect();
        if tiles.is_empty() {
            continue;
        }
        let acc = Arc::clone(&acc);
        tasks.push(Task::new(format!("henorm device {}", device), 0, move || {
            device_task(engine, kind, a, offsets, device, &tiles, &acc)
        }));
    }
    engine.pool().run_tasks("henorm devices", tasks)?;

    let partials = acc.lock().clone();
    Ok(partials)
}

fn device_task<T: Scalar>(
    engine: &Engine,
    kind: Norm,
    a: &DistributedMatrix<T>,
    offsets: &Offsets,
    device: usize,
    tiles: &[(usize, usize)],
    acc: &Arc<Mutex<NormPartials<T::Real>>>,
) -> Result<()> {
    let gpu = engine.device(device)?;
    gpu.bind_to_thread()?;
    let mut queue = engine.queue(device, 0)?;
    let mut lease = Lease::device(device);
    let enqueued = enqueue_reductions(engine, kind, a, offsets, tiles, gpu, &mut queue, &mut lease, acc);
    let synced = queue.sync().and_then(|_| gpu.synchronize());
    drop(queue);
    drop(lease);
    enqueued.and(synced)
}

#[allow(clippy::too_many_arguments)]
fn enqueue_reductions<'a, T: Scalar>(
    engine: &Engine,
    kind: Norm,
    a: &'a DistributedMatrix<T>,
    offsets: &Offsets,
    tiles: &[(usize, usize)],
    gpu: &GpuDevice,
    queue: &mut ComputeQueue,
    lease: &mut Lease<'a, T>,
    acc: &Arc<Mutex<NormPartials<T::Real>>>,
) -> Result<()> {
    let (diag, off) = acquire_local(a, tiles, offsets, lease)?;
    tracing::debug!(
        strategy = "devices",
        device = gpu.device_id,
        diag = diag.len(),
        off = off.len(),
        "henorm dispatch"
    );
    let block_size = engine.config().batch.reduction_block_size;
    let uplo = a.uplo_physical();
    let n = a.n();

    for (shape, group) in diag {
        let acc = Arc::clone(acc);
        let gpu = gpu.clone();
        queue.enqueue(format!("henorm diagonal {}x{}", shape.0, shape.0), move || {
            let mut local = NormPartials::new(kind, n);
            reduce_diag(block_size, kind, uplo, shape, &group, Some(&gpu), &mut local)?;
            acc.lock().combine(&local)
        });
    }
    if !off.is_empty() {
        let acc = Arc::clone(acc);
        queue.enqueue("genorm off-diagonal", move || {
            let mut acc = acc.lock();
            for (row_off, col_off, tile) in &off {
                acc.merge_off(*row_off, *col_off, &genorm_tile(tile));
            }
            Ok(())
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::matrix::ProcessGrid;
    use num_complex::Complex64;

    fn engine(devices: usize) -> Engine {
        let mut config = EngineConfig::default();
        config.runtime.num_threads = 4;
        config.devices.num_devices = devices;
        config.batch.reduction_block_size = 2;
        Engine::new(config).unwrap()
    }

    /// Full symmetric dense matrix with a few larger entries off the diagonal
    fn dense_symmetric(n: usize) -> Vec<f64> {
        let mut out = vec![0.0; n * n];
        for j in 0..n {
            for i in j..n {
                let v = ((i * 7 + j * 3) % 11) as f64 - 5.0;
                out[i + j * n] = v;
                out[j + i * n] = v;
            }
        }
        out
    }

    fn dense_norm(kind: Norm, n: usize, a: &[f64]) -> f64 {
        match kind {
            Norm::Max => a.iter().fold(0.0, |m, v| m.max(v.abs())),
            Norm::One | Norm::Inf => (0..n)
                .map(|j| (0..n).map(|i| a[i + j * n].abs()).sum::<f64>())
                .fold(0.0, f64::max),
            Norm::Fro => a.iter().map(|v| v * v).sum::<f64>().sqrt(),
        }
    }

    #[test]
    fn test_matches_dense_on_every_target() {
        let n = 7;
        let dense = dense_symmetric(n);
        for uplo in [Uplo::Lower, Uplo::Upper] {
            let a = DistributedMatrix::<f64>::builder(n, n, 3)
                .symmetric(uplo)
                .devices(2)
                .build()
                .unwrap();
            a.from_dense(&dense, n).unwrap();
            let engine = engine(2);
            for target in Target::ALL {
                for kind in [Norm::Max, Norm::One, Norm::Inf, Norm::Fro] {
                    let got = henorm(&engine, kind, &a, target).unwrap();
                    let want = dense_norm(kind, n, &dense);
                    assert!(
                        (got - want).abs() < 1e-10,
                        "{:?} {:?} {:?}: {} vs {}",
                        uplo,
                        target,
                        kind,
                        got,
                        want
                    );
                }
            }
            for (i, j) in a.local_tiles() {
                assert_eq!(a.tile_holds(i, j), 0);
            }
        }
    }

    #[test]
    fn test_diagonal_scenario() {
        let mut dense = vec![0.0; 16];
        for i in 0..4 {
            dense[i + i * 4] = (i + 1) as f64;
        }
        let a = DistributedMatrix::<f64>::builder(4, 4, 2)
            .symmetric(Uplo::Lower)
            .build()
            .unwrap();
        a.from_dense(&dense, 4).unwrap();
        let engine = engine(0);
        assert_eq!(henorm(&engine, Norm::Max, &a, Target::HostTask).unwrap(), 4.0);
        assert_eq!(henorm(&engine, Norm::One, &a, Target::HostTask).unwrap(), 4.0);
        let fro = henorm(&engine, Norm::Fro, &a, Target::HostBatch).unwrap();
        assert!((fro - 30f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_transposed_view_has_same_norm() {
        let n = 5;
        let dense = dense_symmetric(n);
        let a = DistributedMatrix::<f64>::builder(n, n, 2)
            .symmetric(Uplo::Lower)
            .build()
            .unwrap();
        a.from_dense(&dense, n).unwrap();
        let engine = engine(0);
        let at = a.transpose().unwrap();
        for kind in [Norm::One, Norm::Fro] {
            let x = henorm(&engine, kind, &a, Target::HostNest).unwrap();
            let y = henorm(&engine, kind, &at, Target::HostNest).unwrap();
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_hermitian_diagonal_uses_real_part() {
        // [[2, 1-i], [1+i, 3]] with junk imaginary parts on the diagonal
        let dense = vec![
            Complex64::new(2.0, 9.0),
            Complex64::new(1.0, 1.0),
            Complex64::new(1.0, -1.0),
            Complex64::new(3.0, -9.0),
        ];
        let a = DistributedMatrix::<Complex64>::builder(2, 2, 1)
            .hermitian(Uplo::Lower)
            .build()
            .unwrap();
        a.from_dense(&dense, 2).unwrap();
        let engine = engine(0);
        let s2 = 2f64.sqrt();
        assert_eq!(henorm(&engine, Norm::Max, &a, Target::HostTask).unwrap(), 3.0);
        let one = henorm(&engine, Norm::One, &a, Target::HostTask).unwrap();
        assert!((one - (3.0 + s2)).abs() < 1e-12);
        let fro = henorm(&engine, Norm::Fro, &a, Target::HostTask).unwrap();
        assert!((fro - 17f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_general_and_complex_symmetric() {
        let engine = engine(0);
        let g = DistributedMatrix::<f64>::builder(4, 4, 2).build().unwrap();
        assert!(henorm(&engine, Norm::Max, &g, Target::HostTask)
            .unwrap_err()
            .is_invalid_argument());
        let s = DistributedMatrix::<Complex64>::builder(4, 4, 2)
            .symmetric(Uplo::Lower)
            .build()
            .unwrap();
        assert!(henorm(&engine, Norm::Max, &s, Target::HostTask)
            .unwrap_err()
            .is_invalid_argument());
    }

    #[test]
    fn test_devices_target_needs_devices() {
        let a = DistributedMatrix::<f64>::builder(4, 4, 2)
            .symmetric(Uplo::Lower)
            .devices(2)
            .build()
            .unwrap();
        let err = henorm(&engine(1), Norm::Max, &a, Target::Devices).unwrap_err();
        assert!(matches!(err, EngineError::Resource(_)));
    }

    #[test]
    fn test_partials_combine_across_ranks() {
        let n = 7;
        let dense = dense_symmetric(n);
        let engine = engine(2);
        for (p, q) in [(2, 1), (1, 2), (2, 2)] {
            for target in Target::ALL {
                for kind in [Norm::Max, Norm::One, Norm::Inf, Norm::Fro] {
                    let mut total = NormPartials::new(kind, n);
                    for rank in 0..p * q {
                        let a = DistributedMatrix::<f64>::builder(n, n, 2)
                            .symmetric(Uplo::Lower)
                            .grid(ProcessGrid::new(p, q, rank).unwrap())
                            .devices(2)
                            .build()
                            .unwrap();
                        a.from_dense(&dense, n).unwrap();
                        total
                            .combine(&henorm_partials(&engine, kind, &a, target).unwrap())
                            .unwrap();
                    }
                    let want = dense_norm(kind, n, &dense);
                    assert!(
                        (total.finish() - want).abs() < 1e-10,
                        "{}x{} {:?} {:?}: {} vs {}",
                        p,
                        q,
                        target,
                        kind,
                        total.finish(),
                        want
                    );
                }
            }
        }
    }

    #[test]
    fn test_one_norm_needs_column_sums_of_every_rank() {
        // [[1, 5], [5, 1]] with 1x1 tiles on a 2x1 grid: rank 0 owns (0, 0),
        // rank 1 owns (1, 0) and (1, 1). Column sums are [6, 6].
        let dense = vec![1.0f64, 5.0, 5.0, 1.0];
        let engine = engine(0);
        let mut total = NormPartials::new(Norm::One, 2);
        let mut per_rank = Vec::new();
        for rank in 0..2 {
            let a = DistributedMatrix::<f64>::builder(2, 2, 1)
                .symmetric(Uplo::Lower)
                .grid(ProcessGrid::new(2, 1, rank).unwrap())
                .build()
                .unwrap();
            a.from_dense(&dense, 2).unwrap();
            let part = henorm_partials(&engine, Norm::One, &a, Target::HostTask).unwrap();
            per_rank.push(part.col_sums().to_vec());
            total.combine(&part).unwrap();
        }
        assert_eq!(per_rank, vec![vec![1.0, 0.0], vec![5.0, 6.0]]);
        assert_eq!(total.col_sums(), &[6.0, 6.0]);
        assert_eq!(total.finish(), 6.0);
    }

    #[test]
    fn test_combine_rejects_mismatched_partials() {
        let mut one = NormPartials::<f64>::new(Norm::One, 3);
        assert!(one.combine(&NormPartials::new(Norm::Fro, 3)).unwrap_err().is_invalid_argument());
        assert!(one.combine(&NormPartials::new(Norm::One, 2)).unwrap_err().is_invalid_argument());
    }
}
