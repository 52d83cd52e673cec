//! tilegrid test harness
//!
//! Dense reference implementation, seeded operand generators and end-to-end
//! cases that run the tiled operations on every target and compare the
//! result against the reference.

mod error;
pub mod generate;
mod pipeline;
pub mod reference;

pub use error::{HarnessError, Result};
pub use generate::{OperandGenerator, Sample};
pub use pipeline::{tolerance, CaseResult, NormCase, Syr2kCase};
