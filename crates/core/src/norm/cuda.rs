//! CUDA kernels for real partial norms
//!
//! One thread block per tile. Threads stride over the rows (columns for
//! One/Inf) of their tile and reduce through shared memory. Tiles are packed
//! contiguously before the launch; complex types stay on the host.

use std::sync::Arc;

use cudarc::driver::{CudaDevice, DeviceRepr, LaunchAsync, LaunchConfig, ValidAsZeroBits};
use num_traits::{NumCast, ToPrimitive};

use crate::error::{EngineError, Result};
use crate::gpu::GpuDevice;
use crate::norm::partial::check_args;
use crate::scalar::{DType, Scalar};
use crate::tile::Tile;
use crate::types::{Norm, Uplo};

const MODULE: &str = "tilegrid_norm";

const KERNEL_NAMES: &[&str] = &[
    "henorm_max_f32",
    "henorm_one_f32",
    "henorm_fro_f32",
    "henorm_max_f64",
    "henorm_one_f64",
    "henorm_fro_f64",
];

const HENORM_KERNELS: &str = r#"
#define DEFINE_HENORM(T, SUF)                                                        \
__device__ inline void add_sumsq_##SUF(T& scale, T& sumsq, T absx) {                 \
    if (scale < absx) {                                                              \
        T r = scale / absx;                                                          \
        sumsq = 1 + sumsq * r * r;                                                   \
        scale = absx;                                                                \
    } else if (scale != 0) {                                                         \
        T r = absx / scale;                                                          \
        sumsq += r * r;                                                              \
    }                                                                                \
}                                                                                    \
__device__ inline void combine_sumsq_##SUF(T& s1, T& q1, T s2, T q2) {               \
    if (s1 > s2) {                                                                   \
        T r = s2 / s1;                                                               \
        q1 += q2 * r * r;                                                            \
    } else if (s2 != 0) {                                                            \
        T r = s1 / s2;                                                               \
        q1 = q1 * r * r + q2;                                                        \
        s1 = s2;                                                                     \
    }                                                                                \
}                                                                                    \
extern "C" __global__ void henorm_max_##SUF(int n, int lower, const T* a, int lda,   \
                                            T* values, int ldv) {                    \
    extern __shared__ unsigned char smem_##SUF[];                                    \
    T* part = (T*)smem_##SUF;                                                        \
    const T* tile = a + (size_t)blockIdx.x * lda * n;                                \
    T m = 0;                                                                         \
    for (int i = threadIdx.x; i < n; i += blockDim.x) {                              \
        int j0 = lower ? 0 : i + 1;                                                  \
        int j1 = lower ? i : n;                                                      \
        for (int j = j0; j < j1; ++j) {                                              \
            T v = fabs(tile[i + j * lda]);                                           \
            if (v > m || isnan(v)) m = v;                                            \
        }                                                                            \
        T d = fabs(tile[i + i * lda]);                                               \
        if (d > m || isnan(d)) m = d;                                                \
    }                                                                                \
    part[threadIdx.x] = m;                                                           \
    __syncthreads();                                                                 \
    for (int s = blockDim.x / 2; s > 0; s >>= 1) {                                   \
        if (threadIdx.x < s) {                                                       \
            T o = part[threadIdx.x + s];                                             \
            if (o > part[threadIdx.x] || isnan(o)) part[threadIdx.x] = o;            \
        }                                                                            \
        __syncthreads();                                                             \
    }                                                                                \
    if (threadIdx.x == 0) values[(size_t)blockIdx.x * ldv] = part[0];                \
}                                                                                    \
extern "C" __global__ void henorm_one_##SUF(int n, int lower, const T* a, int lda,   \
                                            T* values, int ldv) {                    \
    const T* tile = a + (size_t)blockIdx.x * lda * n;                                \
    for (int c = threadIdx.x; c < n; c += blockDim.x) {                              \
        T s = fabs(tile[c + c * lda]);                                               \
        for (int r = 0; r < n; ++r) {                                                \
            if (r == c) continue;                                                    \
            int stored = lower ? (r >= c) : (r <= c);                                \
            s += fabs(stored ? tile[r + c * lda] : tile[c + r * lda]);               \
        }                                                                            \
        values[(size_t)blockIdx.x * ldv + c] = s;                                    \
    }                                                                                \
}                                                                                    \
extern "C" __global__ void henorm_fro_##SUF(int n, int lower, const T* a, int lda,   \
                                            T* values, int ldv) {                    \
    extern __shared__ unsigned char smem_##SUF[];                                    \
    T* scales = (T*)smem_##SUF;                                                      \
    T* sums = scales + blockDim.x;                                                   \
    const T* tile = a + (size_t)blockIdx.x * lda * n;                                \
    T scale = 0, sumsq = 1;                                                          \
    for (int i = threadIdx.x; i < n; i += blockDim.x) {                              \
        T rs = 0, rq = 1;                                                            \
        int j0 = lower ? 0 : i + 1;                                                  \
        int j1 = lower ? i : n;                                                      \
        for (int j = j0; j < j1; ++j) add_sumsq_##SUF(rs, rq, fabs(tile[i + j * lda]));\
        rq *= 2;                                                                     \
        add_sumsq_##SUF(rs, rq, fabs(tile[i + i * lda]));                            \
        combine_sumsq_##SUF(scale, sumsq, rs, rq);                                   \
    }                                                                                \
    scales[threadIdx.x] = scale;                                                     \
    sums[threadIdx.x] = sumsq;                                                       \
    __syncthreads();                                                                 \
    for (int s = blockDim.x / 2; s > 0; s >>= 1) {                                   \
        if (threadIdx.x < s) {                                                       \
            combine_sumsq_##SUF(scales[threadIdx.x], sums[threadIdx.x],              \
                                scales[threadIdx.x + s], sums[threadIdx.x + s]);     \
        }                                                                            \
        __syncthreads();                                                             \
    }                                                                                \
    if (threadIdx.x == 0) {                                                          \
        values[(size_t)blockIdx.x * ldv] = scales[0];                                \
        values[(size_t)blockIdx.x * ldv + 1] = sums[0];                              \
    }                                                                                \
}

DEFINE_HENORM(float, f32)
DEFINE_HENORM(double, f64)
"#;

fn gpu_err(what: &str, e: impl std::fmt::Debug) -> EngineError {
    EngineError::Gpu(format!("{}: {:?}", what, e))
}

/// Compile and load the norm kernels once per device
fn ensure_loaded(dev: &Arc<CudaDevice>, device_id: usize) -> Result<()> {
    if dev.has_func(MODULE, KERNEL_NAMES[0]) {
        return Ok(());
    }
    tracing::info!("Compiling norm kernels for GPU {}...", device_id);
    let ptx = cudarc::nvrtc::compile_ptx(HENORM_KERNELS).map_err(|e| gpu_err("NVRTC compilation failed", e))?;
    dev.load_ptx(ptx, MODULE, KERNEL_NAMES)
        .map_err(|e| gpu_err("Failed to load PTX", e))?;
    tracing::info!("Norm kernels loaded on GPU {}", device_id);
    Ok(())
}

fn kernel_name(kind: Norm, dtype: DType) -> String {
    let op = match kind {
        Norm::Max => "max",
        Norm::One | Norm::Inf => "one",
        Norm::Fro => "fro",
    };
    let suffix = if dtype == DType::S { "f32" } else { "f64" };
    format!("henorm_{}_{}", op, suffix)
}

#[allow(clippy::too_many_arguments)]
fn launch<E>(
    dev: &Arc<CudaDevice>,
    name: &str,
    block: usize,
    n: usize,
    lower: bool,
    packed: &[E],
    batch: usize,
    ldv: usize,
) -> Result<Vec<E>>
where
    E: DeviceRepr + ValidAsZeroBits + Clone + Default + Unpin,
{
    let kernel = dev
        .get_func(MODULE, name)
        .ok_or_else(|| EngineError::Gpu(format!("{} not found", name)))?;
    let a = dev.htod_sync_copy(packed).map_err(|e| gpu_err("Failed to copy tiles", e))?;
    let mut values = dev
        .alloc_zeros::<E>(batch * ldv)
        .map_err(|e| gpu_err("Failed to allocate values", e))?;

    let cfg = LaunchConfig {
        grid_dim: (batch as u32, 1, 1),
        block_dim: (block as u32, 1, 1),
        shared_mem_bytes: (2 * block * std::mem::size_of::<E>()) as u32,
    };
    unsafe {
        kernel
            .launch(cfg, (n as i32, lower as i32, &a, n as i32, &mut values, ldv as i32))
            .map_err(|e| gpu_err("henorm kernel launch failed", e))?;
    }
    dev.dtoh_sync_copy(&values).map_err(|e| gpu_err("Failed to copy values", e))
}

fn pack<T: Scalar, E: NumCast>(tiles: &[Tile<T>], n: usize) -> Result<Vec<E>> {
    let mut out = Vec::with_capacity(tiles.len() * n * n);
    for tile in tiles {
        let data = tile.read();
        for j in 0..n {
            for i in 0..n {
                let x = data.get(i, j).real_part();
                out.push(E::from(x).ok_or_else(|| EngineError::kernel("tile element not representable"))?);
            }
        }
    }
    Ok(out)
}

fn unpack<R: NumCast, E: ToPrimitive + Copy>(src: &[E], dst: &mut [R]) -> Result<()> {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = R::from(*s).ok_or_else(|| EngineError::kernel("norm value not representable"))?;
    }
    Ok(())
}

/// Partial norms on a CUDA device.
///
/// Returns `Ok(false)` without touching `values` when the device or the
/// element type has no kernel, so the caller can run the host emulation.
#[allow(clippy::too_many_arguments)]
pub(crate) fn partial_norm_cuda<T: Scalar>(
    device: &GpuDevice,
    block_size: usize,
    kind: Norm,
    uplo: Uplo,
    n: usize,
    tiles: &[Tile<T>],
    lda: usize,
    values: &mut [T::Real],
    ldv: usize,
) -> Result<bool> {
    let dev = match device.cuda_device() {
        Some(dev) if !T::IS_COMPLEX => dev,
        _ => return Ok(false),
    };
    if tiles.is_empty() || n == 0 {
        return Ok(false);
    }
    check_args(kind, uplo, n, tiles, lda, values.len(), ldv)?;
    ensure_loaded(dev, device.device_id)?;

    let block = block_size.clamp(1, 1024);
    let lower = uplo == Uplo::Lower;
    let batch = tiles.len();
    let name = kernel_name(kind, T::DTYPE);
    let out = &mut values[..batch * ldv];

    if T::DTYPE == DType::S {
        let packed: Vec<f32> = pack(tiles, n)?;
        let result = launch(dev, &name, block, n, lower, &packed, batch, ldv)?;
        unpack(&result, out)?;
    } else {
        let packed: Vec<f64> = pack(tiles, n)?;
        let result = launch(dev, &name, block, n, lower, &packed, batch, ldv)?;
        unpack(&result, out)?;
    }
    Ok(true)
}
