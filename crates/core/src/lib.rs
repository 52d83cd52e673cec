//! tilegrid core - tiled dense linear algebra over distributed matrices
//!
//! Matrices are split into tiles that live in a per-matrix [`TileStore`],
//! with copies on the host and on accelerator devices kept coherent by a
//! read/write acquisition protocol. Block operations run over the locally
//! owned tiles on one of four execution targets:
//!
//! | Target | Execution |
//! |--------|-----------|
//! | `HostTask` | one pool task per output tile |
//! | `HostNest` | diagonal tasks beside a flattened parallel loop |
//! | `HostBatch` | diagonal tasks beside batched multiplies |
//! | `Devices` | one task per device, batched jobs on its compute queue |
//!
//! # Example
//!
//! ```no_run
//! use tilegrid_core::{level3, DistributedMatrix, Engine, EngineConfig, Uplo};
//!
//! # fn main() -> tilegrid_core::Result<()> {
//! let engine = Engine::new(EngineConfig::default())?;
//! let a = DistributedMatrix::<f64>::builder(512, 64, 128).build()?;
//! let b = DistributedMatrix::<f64>::builder(512, 64, 128).build()?;
//! let c = DistributedMatrix::<f64>::builder(512, 512, 128)
//!     .symmetric(Uplo::Lower)
//!     .build()?;
//! level3::syr2k(&engine, 1.0, &a, &b, 0.0, &c, &level3::Options::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! # CUDA
//!
//! With the `cuda` feature, devices configured with the `cuda` backend are
//! opened through cudarc and the norm reductions for `f32`/`f64` run as
//! NVRTC-compiled kernels. Everything else runs on the host emulation.

pub mod batch;
pub mod blas;
pub mod config;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod internal;
pub mod level3;
pub mod matrix;
pub mod norm;
pub mod orient;
pub mod runtime;
pub mod scalar;
pub mod storage;
pub mod tile;
pub mod types;

pub use batch::{BatchArena, GemmBatch, ShapeClass, Syr2kBatch};
pub use config::{BatchBackend, BatchConfig, DeviceBackend, DeviceConfig, EngineConfig, RuntimeConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use gpu::{DeviceSet, GpuDevice};
pub use matrix::{DistributedMatrix, MatrixBuilder, ProcessGrid, Structure};
pub use norm::{henorm, henorm_partials, partial_norm, NormPartials, SumSq};
pub use orient::Syr2kPlan;
pub use runtime::{ComputeQueue, FirstError, Task, TaskPool};
pub use scalar::{DType, RealScalar, Scalar};
pub use storage::{CopyState, TileStore};
pub use tile::{Tile, TileData};
pub use types::{Layout, Location, Norm, Op, Target, Uplo};
