//! Tiles: the unit of storage, ownership and scheduling
//!
//! A [`Tile`] is a cheap handle onto one physical copy of a tile. The element
//! buffer, its stride and its layout sit behind a single lock so that kernels
//! read a consistent view while the acquisition protocol may convert layouts.
//! The tile's extents, orientation and residency never change once created.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{EngineError, Result};
use crate::scalar::Scalar;
use crate::types::{Layout, Location, Op, Uplo};

// ============================================================================
// Buffers
// ============================================================================

/// Element buffer of one tile copy
#[derive(Debug, Clone)]
pub struct TileData<T> {
    data: Vec<T>,
    stride: usize,
    layout: Layout,
}

impl<T: Scalar> TileData<T> {
    /// Zero-filled buffer with a packed stride
    pub fn zeros(mb: usize, nb: usize, layout: Layout) -> Self {
        let stride = match layout {
            Layout::ColMajor => mb.max(1),
            Layout::RowMajor => nb.max(1),
        };
        Self {
            data: vec![T::zero(); mb * nb],
            stride,
            layout,
        }
    }

    /// Wrap an existing buffer, checking it covers an `mb x nb` tile
    pub fn from_vec(mb: usize, nb: usize, data: Vec<T>, stride: usize, layout: Layout) -> Result<Self> {
        let (lead, trail) = match layout {
            Layout::ColMajor => (mb, nb),
            Layout::RowMajor => (nb, mb),
        };
        if stride < lead.max(1) {
            return Err(EngineError::InvalidArgument(format!(
                "stride {} smaller than leading extent {}",
                stride, lead
            )));
        }
        let needed = if trail == 0 { 0 } else { stride * (trail - 1) + lead };
        if data.len() < needed {
            return Err(EngineError::InvalidArgument(format!(
                "tile buffer holds {} elements, {} needed",
                data.len(),
                needed
            )));
        }
        Ok(Self { data, stride, layout })
    }

    /// Buffer for an existing allocation, reused from a pool
    pub(crate) fn recycle(mut data: Vec<T>, mb: usize, nb: usize, layout: Layout) -> Self {
        data.clear();
        data.resize(mb * nb, T::zero());
        let stride = match layout {
            Layout::ColMajor => mb.max(1),
            Layout::RowMajor => nb.max(1),
        };
        Self { data, stride, layout }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub(crate) fn into_vec(self) -> Vec<T> {
        self.data
    }

    #[inline]
    fn offset(&self, i: usize, j: usize) -> usize {
        match self.layout {
            Layout::ColMajor => i + j * self.stride,
            Layout::RowMajor => i * self.stride + j,
        }
    }

    /// Physical element (i, j)
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> T {
        self.data[self.offset(i, j)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: T) {
        let k = self.offset(i, j);
        self.data[k] = value;
    }

    /// Copy of an `mb x nb` tile in another layout, packed
    pub fn to_layout(&self, mb: usize, nb: usize, layout: Layout) -> Self {
        let mut out = Self::zeros(mb, nb, layout);
        for j in 0..nb {
            for i in 0..mb {
                out.set(i, j, self.get(i, j));
            }
        }
        out
    }

    /// Overwrite this buffer's elements with `src`, keeping this layout
    pub fn copy_from(&mut self, src: &TileData<T>, mb: usize, nb: usize) {
        for j in 0..nb {
            for i in 0..mb {
                self.set(i, j, src.get(i, j));
            }
        }
    }

    /// Column-major packed copy of the `mb x nb` elements
    pub fn to_col_major(&self, mb: usize, nb: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(mb * nb);
        for j in 0..nb {
            for i in 0..mb {
                out.push(self.get(i, j));
            }
        }
        out
    }
}

// ============================================================================
// Views used by kernels
// ============================================================================

/// Read-only logical view of a buffer under an orientation
pub struct TileView<'a, T> {
    data: &'a TileData<T>,
    rows: usize,
    cols: usize,
    op: Op,
}

impl<'a, T: Scalar> TileView<'a, T> {
    /// View of an `mb x nb` physical buffer seen through `op`
    pub fn new(data: &'a TileData<T>, mb: usize, nb: usize, op: Op) -> Self {
        let (rows, cols) = if op.is_transposed() { (nb, mb) } else { (mb, nb) };
        Self { data, rows, cols, op }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn stride(&self) -> usize {
        self.data.stride()
    }

    /// Logical element (i, j)
    #[inline]
    pub fn at(&self, i: usize, j: usize) -> T {
        match self.op {
            Op::NoTrans => self.data.get(i, j),
            Op::Trans => self.data.get(j, i),
            Op::ConjTrans => self.data.get(j, i).conjugate(),
        }
    }
}

// ============================================================================
// Tile handle
// ============================================================================

/// Handle onto one physical copy of a tile
#[derive(Clone)]
pub struct Tile<T: Scalar> {
    mb: usize,
    nb: usize,
    op: Op,
    uplo: Uplo,
    location: Location,
    buffer: Arc<RwLock<TileData<T>>>,
}

impl<T: Scalar> Tile<T> {
    pub fn new(mb: usize, nb: usize, data: TileData<T>, location: Location) -> Self {
        Self {
            mb,
            nb,
            op: Op::NoTrans,
            uplo: Uplo::General,
            location,
            buffer: Arc::new(RwLock::new(data)),
        }
    }

    /// Rows of the logical (op applied) tile
    pub fn mb(&self) -> usize {
        if self.op.is_transposed() {
            self.nb
        } else {
            self.mb
        }
    }

    /// Columns of the logical tile
    pub fn nb(&self) -> usize {
        if self.op.is_transposed() {
            self.mb
        } else {
            self.nb
        }
    }

    /// Stored (mb, nb), ignoring op
    pub fn physical_extent(&self) -> (usize, usize) {
        (self.mb, self.nb)
    }

    pub fn op(&self) -> Op {
        self.op
    }

    /// Logical triangular half
    pub fn uplo(&self) -> Uplo {
        if self.op.is_transposed() {
            self.uplo.flip()
        } else {
            self.uplo
        }
    }

    pub fn uplo_physical(&self) -> Uplo {
        self.uplo
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn layout(&self) -> Layout {
        self.buffer.read().layout()
    }

    pub fn stride(&self) -> usize {
        self.buffer.read().stride()
    }

    /// Shared access to the buffer; reentrant for the same thread
    pub fn read(&self) -> RwLockReadGuard<'_, TileData<T>> {
        self.buffer.read_recursive()
    }

    /// Exclusive access to the buffer
    pub fn write(&self) -> RwLockWriteGuard<'_, TileData<T>> {
        self.buffer.write()
    }

    /// Logical element (i, j)
    pub fn at(&self, i: usize, j: usize) -> T {
        let guard = self.read();
        TileView::new(&guard, self.mb, self.nb, self.op).at(i, j)
    }

    /// Same buffer seen transposed
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

    pub(crate) fn with_view(mut self, op: Op, uplo: Uplo) -> Self {
        self.op = op;
        self.uplo = uplo;
        self
    }

    /// True if both handles refer to the same copy
    pub fn same_buffer(&self, other: &Tile<T>) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Convert the buffer layout in place; waits for in-flight readers
    pub(crate) fn convert_layout(&self, layout: Layout) {
        let mut guard = self.buffer.write();
        if guard.layout() != layout {
            let converted = guard.to_layout(self.mb, self.nb, layout);
            *guard = converted;
        }
    }

    /// Recover the allocation if no other handle holds it
    pub(crate) fn try_into_vec(self) -> Option<Vec<T>> {
        Arc::try_unwrap(self.buffer)
            .ok()
            .map(|lock| lock.into_inner().into_vec())
    }
}

impl<T: Scalar> std::fmt::Debug for Tile<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("mb", &self.mb)
            .field("nb", &self.nb)
            .field("op", &self.op)
            .field("uplo", &self.uplo)
            .field("location", &self.location)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn sample(mb: usize, nb: usize) -> TileData<f64> {
        let data: Vec<f64> = (0..mb * nb).map(|x| x as f64).collect();
        TileData::from_vec(mb, nb, data, mb, Layout::ColMajor).unwrap()
    }

    #[test]
    fn test_from_vec_checks_extent() {
        assert!(TileData::<f64>::from_vec(3, 2, vec![0.0; 5], 3, Layout::ColMajor).is_err());
        assert!(TileData::<f64>::from_vec(3, 2, vec![0.0; 6], 2, Layout::ColMajor).is_err());
        let padded = TileData::<f64>::from_vec(3, 2, vec![0.0; 7], 4, Layout::ColMajor).unwrap();
        assert_eq!(padded.stride(), 4);
    }

    #[test]
    fn test_layout_conversion_preserves_elements() {
        let col = sample(3, 2);
        let row = col.to_layout(3, 2, Layout::RowMajor);
        assert_eq!(row.layout(), Layout::RowMajor);
        assert_eq!(row.stride(), 2);
        for j in 0..2 {
            for i in 0..3 {
                assert_eq!(col.get(i, j), row.get(i, j));
            }
        }
        assert_eq!(row.to_col_major(3, 2), col.to_col_major(3, 2));
    }

    #[test]
    fn test_transpose_is_lazy() {
        let tile = Tile::new(3, 2, sample(3, 2), Location::Host).with_view(Op::NoTrans, Uplo::Lower);
        let t = tile.transpose().unwrap();
        assert_eq!((t.mb(), t.nb()), (2, 3));
        assert_eq!(t.uplo(), Uplo::Upper);
        assert!(t.same_buffer(&tile));
        assert_eq!(t.at(1, 2), tile.at(2, 1));
    }

    #[test]
    fn test_conj_transpose_view() {
        let data = vec![Complex64::new(1.0, 2.0), Complex64::new(3.0, -1.0)];
        let buf = TileData::from_vec(2, 1, data, 2, Layout::ColMajor).unwrap();
        let tile = Tile::new(2, 1, buf, Location::Host);
        let h = tile.conj_transpose().unwrap();
        assert_eq!(h.at(0, 1), Complex64::new(3.0, 1.0));
    }

    #[test]
    fn test_convert_layout_in_place() {
        let tile = Tile::new(2, 3, TileData::<f32>::zeros(2, 3, Layout::ColMajor), Location::Host);
        tile.write().set(1, 2, 7.0);
        tile.convert_layout(Layout::RowMajor);
        assert_eq!(tile.layout(), Layout::RowMajor);
        assert_eq!(tile.at(1, 2), 7.0);
    }
}
