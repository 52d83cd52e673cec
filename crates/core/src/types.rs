//! Flags shared by tiles, matrices and kernels

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Orientation applied lazily to a tile or matrix view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    NoTrans,
    Trans,
    ConjTrans,
}

impl Op {
    /// Orientation of the transposed view
    pub fn transpose(self) -> Result<Op> {
        match self {
            Op::NoTrans => Ok(Op::Trans),
            Op::Trans => Ok(Op::NoTrans),
            Op::ConjTrans => Err(EngineError::InvalidArgument(
                "cannot transpose a conjugate-transposed view".into(),
            )),
        }
    }

    /// Orientation of the conjugate-transposed view
    pub fn conj_transpose(self) -> Result<Op> {
        match self {
            Op::NoTrans => Ok(Op::ConjTrans),
            Op::ConjTrans => Ok(Op::NoTrans),
            Op::Trans => Err(EngineError::InvalidArgument(
                "cannot conjugate-transpose a transposed view".into(),
            )),
        }
    }

    pub fn is_transposed(self) -> bool {
        self != Op::NoTrans
    }
}

/// Which triangular half of a symmetric or Hermitian matrix is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Uplo {
    Lower,
    Upper,
    General,
}

impl Uplo {
    /// The half seen through a transposed view
    pub fn flip(self) -> Uplo {
        match self {
            Uplo::Lower => Uplo::Upper,
            Uplo::Upper => Uplo::Lower,
            Uplo::General => Uplo::General,
        }
    }
}

/// Physical element order of a tile buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    ColMajor,
    RowMajor,
}

/// Where a tile copy lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    Host,
    Device(usize),
}

impl Location {
    pub fn device(self) -> Option<usize> {
        match self {
            Location::Host => None,
            Location::Device(d) => Some(d),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Host => write!(f, "host"),
            Location::Device(d) => write!(f, "device {}", d),
        }
    }
}

/// Execution strategy for a block operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// One task per output tile
    HostTask,
    /// Diagonal task wave plus a flattened parallel loop
    HostNest,
    /// Two batched multiplies over all off-diagonal tiles
    HostBatch,
    /// Per-device batched kernels on compute queues
    Devices,
}

impl Target {
    pub const ALL: [Target; 4] = [
        Target::HostTask,
        Target::HostNest,
        Target::HostBatch,
        Target::Devices,
    ];

    /// Memory location this target computes in, for a tile mapped to `device`
    pub fn location(self, device: usize) -> Location {
        match self {
            Target::Devices => Location::Device(device),
            _ => Location::Host,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Target::HostTask => "host_task",
            Target::HostNest => "host_nest",
            Target::HostBatch => "host_batch",
            Target::Devices => "devices",
        };
        f.write_str(name)
    }
}

impl FromStr for Target {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "t" | "task" | "host_task" => Ok(Target::HostTask),
            "n" | "nest" | "host_nest" => Ok(Target::HostNest),
            "b" | "batch" | "host_batch" => Ok(Target::HostBatch),
            "d" | "device" | "devices" => Ok(Target::Devices),
            other => Err(EngineError::InvalidArgument(format!(
                "unknown target '{}'",
                other
            ))),
        }
    }
}

/// Norm kind computed by the reduction kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Norm {
    Max,
    One,
    Inf,
    Fro,
}

impl FromStr for Norm {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "max" | "m" => Ok(Norm::Max),
            "one" | "1" | "o" => Ok(Norm::One),
            "inf" | "i" => Ok(Norm::Inf),
            "fro" | "f" | "frobenius" => Ok(Norm::Fro),
            other => Err(EngineError::InvalidArgument(format!(
                "unknown norm '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_transpose_rules() {
        assert_eq!(Op::NoTrans.transpose().unwrap(), Op::Trans);
        assert_eq!(Op::Trans.transpose().unwrap(), Op::NoTrans);
        assert!(Op::ConjTrans.transpose().is_err());
        assert_eq!(Op::ConjTrans.conj_transpose().unwrap(), Op::NoTrans);
        assert!(Op::Trans.conj_transpose().is_err());
    }

    #[test]
    fn test_target_parse() {
        assert_eq!("task".parse::<Target>().unwrap(), Target::HostTask);
        assert_eq!("host-nest".parse::<Target>().unwrap(), Target::HostNest);
        assert_eq!("Devices".parse::<Target>().unwrap(), Target::Devices);
        assert!("gpu-ish".parse::<Target>().is_err());
        for target in Target::ALL {
            assert_eq!(target.to_string().parse::<Target>().unwrap(), target);
        }
    }

    #[test]
    fn test_uplo_flip() {
        assert_eq!(Uplo::Lower.flip(), Uplo::Upper);
        assert_eq!(Uplo::General.flip(), Uplo::General);
    }
}
