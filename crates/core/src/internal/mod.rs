//! Block operations over the local tiles of distributed matrices
//!
//! Each operation touches only tiles owned by this rank and runs on one of
//! the execution [`Target`](crate::types::Target)s. Inputs are expected to be
//! present already; moving remote tiles in is the caller's concern.

pub mod syr2k;

pub use syr2k::syr2k;

use crate::error::Result;
use crate::matrix::DistributedMatrix;
use crate::scalar::Scalar;
use crate::tile::Tile;
use crate::types::{Layout, Location};

/// Read acquisitions taken by one task.
///
/// Dropping the lease returns every hold, on success and error paths alike.
/// Device copies are released once all holds of the lease are back; a copy
/// another task still reads is left to that task's lease.
pub(crate) struct Lease<'a, T: Scalar> {
    device: Option<usize>,
    held: Vec<(&'a DistributedMatrix<T>, usize, usize)>,
}

impl<'a, T: Scalar> Lease<'a, T> {
    pub(crate) fn host() -> Self {
        Self {
            device: None,
            held: Vec::new(),
        }
    }

    pub(crate) fn device(device: usize) -> Self {
        Self {
            device: Some(device),
            held: Vec::new(),
        }
    }

    pub(crate) fn location(&self) -> Location {
        match self.device {
            Some(d) => Location::Device(d),
            None => Location::Host,
        }
    }

    pub(crate) fn read(&mut self, matrix: &'a DistributedMatrix<T>, i: usize, j: usize, layout: Layout) -> Result<Tile<T>> {
        let tile = matrix.tile_acquire_for_reading(i, j, self.location(), layout)?;
        self.held.push((matrix, i, j));
        Ok(tile)
    }

    pub(crate) fn len(&self) -> usize {
        self.held.len()
    }
}

impl<T: Scalar> Drop for Lease<'_, T> {
    fn drop(&mut self) {
        let location = self.location();
        for &(matrix, i, j) in &self.held {
            if let Err(e) = matrix.tile_tick_at(i, j, location) {
                tracing::warn!(i, j, error = %e, "failed to return tile hold");
            }
        }
        if let Some(device) = self.device {
            for (matrix, i, j) in self.held.drain(..) {
                if let Err(e) = matrix.tile_release(i, j, device) {
                    tracing::warn!(i, j, device, error = %e, "failed to release device copy");
                }
            }
        }
    }
}
