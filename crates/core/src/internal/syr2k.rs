//! Symmetric rank-2k update of the local tiles of `C`
//!
//! `C := alpha A B^T + alpha B A^T + beta C` for a Lower view of `C` and single
//! block-column `A` and `B`. Four interchangeable strategies:
//!
//! - host task: one task per output tile
//! - host nest: a diagonal task wave beside a flattened loop over the rest
//! - host batch: diagonal tasks beside two batched multiplies
//! - devices: one task per device, batched kernels on its compute queue

use std::collections::{BTreeSet, HashMap};

use crate::batch::{GemmBatch, ShapeClass};
use crate::blas;
use crate::config::BatchBackend;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::internal::Lease;
use crate::matrix::{DistributedMatrix, Structure};
use crate::orient::{Operand, Syr2kPlan};
use crate::runtime::{ComputeQueue, Task};
use crate::scalar::Scalar;
use crate::tile::Tile;
use crate::types::{Layout, Location, Op, Target, Uplo};

/// Device batches are emulated on the host pool
const DEVICE_BATCH: BatchBackend = BatchBackend::Parallel;

/// Everything one call needs, shared by its tasks
struct Call<'a, T: Scalar> {
    alpha: T,
    beta: T,
    a: &'a DistributedMatrix<T>,
    b: &'a DistributedMatrix<T>,
    c: &'a DistributedMatrix<T>,
    plan: Syr2kPlan,
    priority: i32,
    queue_index: usize,
    layout: Layout,
}

impl<'a, T: Scalar> Call<'a, T> {
    fn operand(&self, which: Operand) -> &'a DistributedMatrix<T> {
        match which {
            Operand::A => self.a,
            Operand::B => self.b,
        }
    }

    /// Beta of product `step` of an off-diagonal tile
    fn beta_for(&self, step: usize) -> T {
        if step == 0 {
            self.beta
        } else {
            T::one()
        }
    }

    /// Local lower tiles of `C`, split into diagonal and off-diagonal
    fn local_lower(&self) -> (Vec<(usize, usize)>, Vec<(usize, usize)>) {
        let mut diag = Vec::new();
        let mut off = Vec::new();
        for j in 0..self.c.nt() {
            for i in j..self.c.mt() {
                if self.c.tile_is_local(i, j) {
                    if i == j {
                        diag.push((i, j));
                    } else {
                        off.push((i, j));
                    }
                }
            }
        }
        (diag, off)
    }

    fn shape(&self, i: usize, j: usize) -> ShapeClass {
        ShapeClass {
            m: self.c.tile_mb(i),
            n: self.c.tile_nb(j),
            k: self.a.tile_nb(0),
        }
    }
}

/// `C := alpha A B^T + alpha B A^T + beta C` on the local Lower tiles of `C`.
///
/// Argument errors are reported before any work is scheduled; failures inside
/// tasks or queue jobs surface as a single [`EngineError::Kernel`] after every
/// sibling has finished.
#[allow(clippy::too_many_arguments)]
pub fn syr2k<T: Scalar>(
    engine: &Engine,
    target: Target,
    alpha: T,
    a: &DistributedMatrix<T>,
    b: &DistributedMatrix<T>,
    beta: T,
    c: &DistributedMatrix<T>,
    priority: i32,
    queue_index: usize,
    layout: Layout,
) -> Result<()> {
    let plan = check(engine, target, a, b, c)?;
    if c.mt() == 0 {
        return Ok(());
    }
    let call = Call {
        alpha,
        beta,
        a,
        b,
        c,
        plan,
        priority,
        queue_index,
        layout,
    };

    match target {
        Target::HostTask => host_task(engine, &call),
        Target::HostNest => host_nest(engine, &call),
        Target::HostBatch => host_batch(engine, &call),
        Target::Devices if c.nt() == 1 => device_single(engine, &call),
        Target::Devices => devices(engine, &call),
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidArgument(msg.into())
}

fn check<T: Scalar>(
    engine: &Engine,
    target: Target,
    a: &DistributedMatrix<T>,
    b: &DistributedMatrix<T>,
    c: &DistributedMatrix<T>,
) -> Result<Syr2kPlan> {
    if c.structure() != Structure::Symmetric {
        return Err(invalid(format!("syr2k output must be symmetric, got {:?}", c.structure())));
    }
    if c.mt() != c.nt() {
        return Err(invalid(format!("syr2k output is {}x{} tiles", c.mt(), c.nt())));
    }
    if c.uplo() != Uplo::Lower {
        return Err(invalid("syr2k output view must be Lower"));
    }
    if T::IS_COMPLEX && (c.op() == Op::ConjTrans || a.op() == Op::ConjTrans) {
        return Err(invalid("complex syr2k does not accept conjugate-transposed views"));
    }
    if a.op() != b.op() {
        return Err(invalid(format!("A op {:?} differs from B op {:?}", a.op(), b.op())));
    }
    if a.same_storage(c) || b.same_storage(c) {
        return Err(invalid("syr2k output shares storage with an operand"));
    }
    if c.mt() > 0 {
        if a.mt() != c.mt() || b.mt() != c.mt() || a.nt() != 1 || b.nt() != 1 {
            return Err(invalid(format!(
                "operands must be {}x1 tiles, got A {}x{} and B {}x{}",
                c.mt(),
                a.mt(),
                a.nt(),
                b.mt(),
                b.nt()
            )));
        }
        if a.tile_nb(0) != b.tile_nb(0) {
            return Err(invalid(format!(
                "operand widths differ: {} and {}",
                a.tile_nb(0),
                b.tile_nb(0)
            )));
        }
        for i in 0..c.mt() {
            if a.tile_mb(i) != c.tile_mb(i) || b.tile_mb(i) != c.tile_mb(i) {
                return Err(invalid(format!("operand tile row {} does not match the output", i)));
            }
        }
    }

    match target {
        Target::HostBatch if engine.batch_backend() == BatchBackend::Disabled => {
            return Err(EngineError::UnsupportedBackend(
                "host batch target needs a batched gemm primitive".into(),
            ));
        }
        Target::Devices => {
            let needed = c.num_devices();
            if needed == 0 {
                return Err(EngineError::Resource("output matrix is not mapped to any device".into()));
            }
            if needed > engine.num_devices() {
                return Err(EngineError::Resource(format!(
                    "output spans {} devices, engine has {}",
                    needed,
                    engine.num_devices()
                )));
            }
            if a.num_devices() < needed || b.num_devices() < needed {
                return Err(EngineError::Resource(format!(
                    "operands must be mapped to at least {} devices",
                    needed
                )));
            }
        }
        _ => {}
    }

    Syr2kPlan::resolve(a.op(), c.op(), c.is_real(), c.uplo_physical())
}

// ============================================================================
// Host strategies
// ============================================================================

/// Update one local tile of `C` on the host
fn host_tile<T: Scalar>(call: &Call<'_, T>, i: usize, j: usize) -> Result<()> {
    let mut lease = Lease::host();
    let c_tile = call.c.tile_acquire_for_writing(i, j, Location::Host, call.layout)?;
    if i == j {
        let a_tile = lease.read(call.a, i, 0, call.layout)?;
        let b_tile = lease.read(call.b, i, 0, call.layout)?;
        return blas::syr2k(call.plan.uplo, call.plan.trans, call.alpha, &a_tile, &b_tile, call.beta, &c_tile);
    }
    for (step, product) in call.plan.products(i, j).iter().enumerate() {
        let left = lease.read(call.operand(product.left), product.left_row, 0, call.layout)?;
        let right = lease.read(call.operand(product.right), product.right_row, 0, call.layout)?;
        blas::gemm(
            product.op_left,
            product.op_right,
            call.alpha,
            &left,
            &right,
            call.beta_for(step),
            &c_tile,
        )?;
    }
    Ok(())
}

fn tile_tasks<'a, T: Scalar>(call: &'a Call<'a, T>, tiles: &[(usize, usize)]) -> Vec<Task<'a>> {
    tiles
        .iter()
        .map(|&(i, j)| Task::new(format!("syr2k tile ({}, {})", i, j), call.priority, move || host_tile(call, i, j)))
        .collect()
}

fn host_task<T: Scalar>(engine: &Engine, call: &Call<'_, T>) -> Result<()> {
    let (diag, off) = call.local_lower();
    tracing::debug!(strategy = "host_task", diag = diag.len(), off = off.len(), "syr2k dispatch");
    let mut tiles = diag;
    tiles.extend(off);
    engine.pool().run_tasks("syr2k host task", tile_tasks(call, &tiles))
}

fn host_nest<T: Scalar>(engine: &Engine, call: &Call<'_, T>) -> Result<()> {
    let (diag, off) = call.local_lower();
    tracing::debug!(strategy = "host_nest", diag = diag.len(), off = off.len(), "syr2k dispatch");
    let tasks = tile_tasks(call, &diag);
    let (mt, nt) = (call.c.mt(), call.c.nt());
    let (diag_result, loop_result) = engine.pool().join(
        || engine.pool().run_tasks("syr2k host nest diagonal", tasks),
        || {
            engine.pool().parallel_for_2d("syr2k host nest", mt, nt, |i, j| {
                if i > j && call.c.tile_is_local(i, j) {
                    host_tile(call, i, j)
                } else {
                    Ok(())
                }
            })
        },
    );
    diag_result.and(loop_result)
}

/// Device copies of the operand rows `rows` at the lease's location
type Staged<T> = (HashMap<usize, Tile<T>>, HashMap<usize, Tile<T>>);

fn stage_operands<'a, T: Scalar>(
    call: &Call<'a, T>,
    lease: &mut Lease<'a, T>,
    rows: &BTreeSet<usize>,
) -> Result<Staged<T>> {
    let mut a_tiles = HashMap::with_capacity(rows.len());
    let mut b_tiles = HashMap::with_capacity(rows.len());
    for &r in rows {
        a_tiles.insert(r, lease.read(call.a, r, 0, call.layout)?);
        b_tiles.insert(r, lease.read(call.b, r, 0, call.layout)?);
    }
    Ok((a_tiles, b_tiles))
}

fn staged_tile<T: Scalar>(staged: &Staged<T>, which: Operand, row: usize) -> Result<Tile<T>> {
    let map = match which {
        Operand::A => &staged.0,
        Operand::B => &staged.1,
    };
    map.get(&row)
        .cloned()
        .ok_or_else(|| EngineError::kernel(format!("operand row {} was not staged", row)))
}

fn operand_rows(tiles: &[(usize, usize)]) -> BTreeSet<usize> {
    tiles.iter().flat_map(|&(i, j)| [i, j]).collect()
}

/// Fill the two product batches of off-diagonal `tiles`, acquiring `C` at `location`
fn fill_gemm_batches<T: Scalar>(
    call: &Call<'_, T>,
    staged: &Staged<T>,
    tiles: &[(usize, usize)],
    location: Location,
    batches: &mut [GemmBatch<T>; 2],
) -> Result<()> {
    for &(i, j) in tiles {
        let c_tile = call.c.tile_acquire_for_writing(i, j, location, call.layout)?;
        for (product, batch) in call.plan.products(i, j).iter().zip(batches.iter_mut()) {
            batch.push(
                staged_tile(staged, product.left, product.left_row)?,
                staged_tile(staged, product.right, product.right_row)?,
                c_tile.clone(),
            );
        }
    }
    Ok(())
}

fn take_gemm_batches<T: Scalar>(call: &Call<'_, T>, key: (Location, ShapeClass), i: usize, j: usize) -> [GemmBatch<T>; 2] {
    let [p0, p1] = call.plan.products(i, j);
    let mut arena = call.c.batch_arena().lock();
    [
        arena.take_gemm(key, p0.op_left, p0.op_right, call.alpha, call.beta_for(0)),
        arena.take_gemm(key, p1.op_left, p1.op_right, call.alpha, call.beta_for(1)),
    ]
}

fn host_offdiag_batch<T: Scalar>(call: &Call<'_, T>, backend: BatchBackend, off: &[(usize, usize)]) -> Result<()> {
    let Some(&(i0, j0)) = off.first() else {
        return Ok(());
    };
    let mut lease = Lease::host();
    let staged = stage_operands(call, &mut lease, &operand_rows(off))?;
    let key = (Location::Host, call.shape(i0, j0));
    let mut batches = take_gemm_batches(call, key, i0, j0);
    fill_gemm_batches(call, &staged, off, Location::Host, &mut batches)?;
    tracing::debug!(items = batches[0].len(), ?backend, "host gemm batch");

    let [first, second] = batches;
    let result = blas::gemm_batch(backend, &first).and_then(|_| blas::gemm_batch(backend, &second));
    let mut arena = call.c.batch_arena().lock();
    arena.put_gemm(key, first);
    arena.put_gemm(key, second);
    result
}

fn host_batch<T: Scalar>(engine: &Engine, call: &Call<'_, T>) -> Result<()> {
    let (diag, off) = call.local_lower();
    tracing::debug!(strategy = "host_batch", diag = diag.len(), off = off.len(), "syr2k dispatch");
    let backend = engine.batch_backend();
    let tasks = tile_tasks(call, &diag);
    let (diag_result, batch_result) = engine.pool().join(
        || engine.pool().run_tasks("syr2k host batch diagonal", tasks),
        || host_offdiag_batch(call, backend, &off).map_err(|e| EngineError::from_task("syr2k host batch", e)),
    );
    diag_result.and(batch_result)
}

// ============================================================================
// Device strategy
// ============================================================================

/// Run `body` with exclusive use of queue `call.queue_index` on `device`,
/// then drain the queue and return the operand holds.
fn device_scope<'a, T, F>(engine: &Engine, call: &Call<'a, T>, device: usize, body: F) -> Result<()>
where
    T: Scalar,
    F: FnOnce(&mut ComputeQueue, &mut Lease<'a, T>) -> Result<()>,
{
    let gpu = engine.device(device)?;
    gpu.bind_to_thread()?;
    let mut queue = engine.queue(device, call.queue_index)?;
    let mut lease = Lease::device(device);
    let enqueued = body(&mut queue, &mut lease);
    let synced = queue.sync().and_then(|_| gpu.synchronize());
    drop(queue);
    drop(lease);
    enqueued.and(synced)
}

fn uniform_or_err(class: Option<ShapeClass>, device: usize, group: &str) -> Result<ShapeClass> {
    class.ok_or_else(|| {
        EngineError::kernel(format!(
            "device {}: {} tiles do not share one shape",
            device, group
        ))
    })
}

fn enqueue_gemm_group<T: Scalar>(
    call: &Call<'_, T>,
    device: usize,
    group: &str,
    tiles: &[(usize, usize)],
    staged: &Staged<T>,
    queue: &mut ComputeQueue,
) -> Result<()> {
    let Some(&(i0, j0)) = tiles.first() else {
        return Ok(());
    };
    let location = Location::Device(device);
    let key = (location, call.shape(i0, j0));
    let mut batches = take_gemm_batches(call, key, i0, j0);
    fill_gemm_batches(call, staged, tiles, location, &mut batches)?;
    let class = uniform_or_err(batches[0].shape_class(), device, group)?;
    uniform_or_err(batches[1].shape_class(), device, group)?;

    for (step, batch) in batches.into_iter().enumerate() {
        let matrix = call.c.clone();
        let label = format!(
            "{} gemm {} {}x{}x{} ({} tiles)",
            group,
            step,
            class.m,
            class.n,
            class.k,
            batch.len()
        );
        queue.enqueue(label, move || {
            let result = blas::gemm_batch(DEVICE_BATCH, &batch);
            matrix.batch_arena().lock().put_gemm(key, batch);
            result
        });
    }
    Ok(())
}

fn enqueue_syr2k_group<T: Scalar>(
    call: &Call<'_, T>,
    device: usize,
    group: &str,
    tiles: &[(usize, usize)],
    staged: &Staged<T>,
    queue: &mut ComputeQueue,
) -> Result<()> {
    let Some(&(i0, j0)) = tiles.first() else {
        return Ok(());
    };
    let location = Location::Device(device);
    let key = (location, call.shape(i0, j0));
    let mut batch = call
        .c
        .batch_arena()
        .lock()
        .take_syr2k(key, call.plan.uplo, call.plan.trans, call.alpha, call.beta);
    for &(i, _) in tiles {
        let c_tile = call.c.tile_acquire_for_writing(i, i, location, call.layout)?;
        batch.push(
            staged_tile(staged, Operand::A, i)?,
            staged_tile(staged, Operand::B, i)?,
            c_tile,
        );
    }
    let class = uniform_or_err(batch.shape_class(), device, group)?;

    let matrix = call.c.clone();
    let label = format!("{} syr2k {}x{} ({} tiles)", group, class.n, class.k, batch.len());
    queue.enqueue(label, move || {
        let result = blas::syr2k_batch(DEVICE_BATCH, &batch);
        matrix.batch_arena().lock().put_syr2k(key, batch);
        result
    });
    Ok(())
}

fn device_task<'a, T: Scalar>(
    engine: &Engine,
    call: &Call<'a, T>,
    device: usize,
    diag: &[(usize, usize)],
    off: &[(usize, usize)],
) -> Result<()> {
    let last = call.c.mt() - 1;
    let (interior, edge): (Vec<_>, Vec<_>) = off.iter().copied().partition(|&(i, _)| i < last);
    let (inner_diag, corner): (Vec<_>, Vec<_>) = diag.iter().copied().partition(|&(i, _)| i < last);

    device_scope(engine, call, device, |queue, lease| {
        let mut rows = operand_rows(off);
        rows.extend(operand_rows(diag));
        let staged = stage_operands(call, lease, &rows)?;
        tracing::trace!(device, operands = lease.len(), "staged syr2k operands");

        enqueue_gemm_group(call, device, "interior", &interior, &staged, queue)?;
        enqueue_gemm_group(call, device, "edge", &edge, &staged, queue)?;
        enqueue_syr2k_group(call, device, "diagonal", &inner_diag, &staged, queue)?;
        enqueue_syr2k_group(call, device, "corner", &corner, &staged, queue)?;
        Ok(())
    })
}

fn devices<T: Scalar>(engine: &Engine, call: &Call<'_, T>) -> Result<()> {
    let (diag, off) = call.local_lower();
    let mut tasks = Vec::new();
    for device in 0..call.c.num_devices() {
        let on_device = |tiles: &[(usize, usize)]| -> Vec<(usize, usize)> {
            tiles
                .iter()
                .copied()
                .filter(|&(i, j)| call.c.tile_device(i, j) == device)
                .collect()
        };
        let (diag_d, off_d) = (on_device(&diag), on_device(&off));
        if diag_d.is_empty() && off_d.is_empty() {
            continue;
        }
        tracing::debug!(strategy = "devices", device, diag = diag_d.len(), off = off_d.len(), "syr2k dispatch");
        tasks.push(Task::new(format!("syr2k device {}", device), call.priority, move || {
            device_task(engine, call, device, &diag_d, &off_d)
        }));
    }
    engine.pool().run_tasks("syr2k devices", tasks)
}

/// Single block column of `C`: one kernel on the owning device
fn device_single<T: Scalar>(engine: &Engine, call: &Call<'_, T>) -> Result<()> {
    if !call.c.tile_is_local(0, 0) {
        return Ok(());
    }
    let device = call.c.tile_device(0, 0);
    tracing::debug!(strategy = "devices", device, "syr2k single tile");
    let task = Task::new("syr2k device tile (0, 0)", call.priority, move || {
        device_scope(engine, call, device, |queue, lease| {
            let a_tile = lease.read(call.a, 0, 0, call.layout)?;
            let b_tile = lease.read(call.b, 0, 0, call.layout)?;
            let c_tile = call.c.tile_acquire_for_writing(0, 0, Location::Device(device), call.layout)?;
            let (plan, alpha, beta) = (call.plan, call.alpha, call.beta);
            queue.enqueue("syr2k (0, 0)", move || {
                blas::syr2k(plan.uplo, plan.trans, alpha, &a_tile, &b_tile, beta, &c_tile)
            });
            Ok(())
        })
    });
    engine.pool().run_tasks("syr2k devices", vec![task])
}
