//! Orientation plan of the block symmetric rank-2k update
//!
//! Operand and output views may each carry an op. The plan folds them into
//! ops on the physical tile buffers, resolved once per call, so kernels never
//! look at view orientation.

use crate::error::{EngineError, Result};
use crate::types::{Op, Uplo};

/// Which input block column a product reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    A,
    B,
}

/// One off-diagonal product `C += alpha op_left(left) op_right(right)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Product {
    pub left: Operand,
    pub left_row: usize,
    pub op_left: Op,
    pub right: Operand,
    pub right_row: usize,
    pub op_right: Op,
}

/// Resolved physical ops of one syr2k call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Syr2kPlan {
    pub op1: Op,
    pub op2: Op,
    /// Output is a transposed view; products are written transposed
    pub swap: bool,
    /// Op of the diagonal-tile kernel
    pub trans: Op,
    /// Stored half of the diagonal tiles
    pub uplo: Uplo,
}

impl Syr2kPlan {
    pub fn resolve(a_op: Op, c_op: Op, is_real: bool, c_uplo_physical: Uplo) -> Result<Self> {
        let op1 = if c_op == Op::NoTrans {
            a_op
        } else if a_op == Op::NoTrans {
            c_op
        } else if a_op == c_op || is_real {
            Op::NoTrans
        } else {
            return Err(EngineError::InvalidArgument(format!(
                "operand op {:?} cannot be combined with output op {:?}",
                a_op, c_op
            )));
        };
        let op2 = if op1 == Op::NoTrans { Op::Trans } else { Op::NoTrans };
        Ok(Self {
            op1,
            op2,
            swap: c_op != Op::NoTrans,
            trans: a_op,
            uplo: c_uplo_physical,
        })
    }

    /// The two products updating off-diagonal tile (i, j); the second one
    /// accumulates with beta = 1.
    pub fn products(&self, i: usize, j: usize) -> [Product; 2] {
        if self.swap {
            [
                Product {
                    left: Operand::B,
                    left_row: j,
                    op_left: self.op2,
                    right: Operand::A,
                    right_row: i,
                    op_right: self.op1,
                },
                Product {
                    left: Operand::A,
                    left_row: j,
                    op_left: self.op2,
                    right: Operand::B,
                    right_row: i,
                    op_right: self.op1,
                },
            ]
        } else {
            [
                Product {
                    left: Operand::A,
                    left_row: i,
                    op_left: self.op1,
                    right: Operand::B,
                    right_row: j,
                    op_right: self.op2,
                },
                Product {
                    left: Operand::B,
                    left_row: i,
                    op_left: self.op1,
                    right: Operand::A,
                    right_row: j,
                    op_right: self.op2,
                },
            ]
        }
    }
}
