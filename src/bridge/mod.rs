//! Matrix buffer bridge.
//!
//! Converts between the host [`Matrix`] and the external form kernels
//! expect: an array of `size` row pointers, each pointing to `size`
//! `c_int`s, owned by an [`ExternalAllocator`]. Raw pointers never leave
//! this module except through [`ExternalMatrix::as_raw`], which is only
//! visible inside the crate.

pub mod allocator;

use std::slice;

use libc::c_int;
use tracing::debug;

use crate::error::{BenchError, Result};
use crate::matrix::Matrix;

pub use allocator::{AllocationStats, CAllocator, CountingAllocator, ExternalAllocator, RowTable};

/// Owned handle to an externally allocated `size`×`size` matrix.
///
/// Dropping the handle releases the memory through the allocator that
/// produced it, so each handle is released exactly once.
pub struct ExternalMatrix<'a> {
    table: RowTable,
    size: usize,
    allocator: &'a dyn ExternalAllocator,
}

impl<'a> ExternalMatrix<'a> {
    /// Allocates a zero-filled matrix.
    pub fn zeroed(allocator: &'a dyn ExternalAllocator, size: usize) -> Result<Self> {
        let handle = Self::allocate(allocator, size)?;
        for i in 0..size {
            // SAFETY: row `i` is a live `size`-element buffer owned by this handle.
            unsafe { handle.row_mut(i) }.fill(0);
        }
        Ok(handle)
    }

    fn allocate(allocator: &'a dyn ExternalAllocator, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(BenchError::InvalidDimension { size });
        }
        let table = allocator.allocate(size)?;
        debug!(size, allocator = allocator.name(), "allocated external matrix");
        Ok(Self {
            table,
            size,
            allocator,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Element at `(i, j)`.
    ///
    /// # Panics
    ///
    /// Panics if `i` or `j` is out of bounds.
    pub fn get(&self, i: usize, j: usize) -> i32 {
        assert!(i < self.size && j < self.size, "({}, {}) out of bounds", i, j);
        // SAFETY: bounds checked above.
        unsafe { self.row(i)[j] }
    }

    /// Table pointer in the layout kernels receive.
    pub(crate) fn as_raw(&self) -> *mut *mut c_int {
        self.table.as_ptr()
    }

    /// # Safety
    ///
    /// `i < size`, and no mutable view of row `i` may be alive.
    unsafe fn row(&self, i: usize) -> &[i32] {
        // SAFETY: per the allocator contract row `i` holds `size` elements.
        unsafe { slice::from_raw_parts(*self.table.as_ptr().add(i), self.size) }
    }

    /// # Safety
    ///
    /// `i < size`, and no other view of row `i` may be alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn row_mut(&self, i: usize) -> &mut [i32] {
        // SAFETY: per the allocator contract row `i` holds `size` elements.
        unsafe { slice::from_raw_parts_mut(*self.table.as_ptr().add(i), self.size) }
    }
}

impl Drop for ExternalMatrix<'_> {
    fn drop(&mut self) {
        // SAFETY: the table came from `self.allocator` with `self.size`, and
        // drop runs once per handle.
        unsafe { self.allocator.deallocate(self.table, self.size) };
        debug!(size = self.size, allocator = self.allocator.name(), "released external matrix");
    }
}

/// Copies `native` into a freshly allocated external matrix.
///
/// Fails with [`BenchError::DimensionMismatch`] if `native` is not
/// `size`×`size`, or [`BenchError::Allocation`] if the allocator is out of
/// memory.
pub fn to_external<'a>(
    native: &Matrix,
    size: usize,
    allocator: &'a dyn ExternalAllocator,
) -> Result<ExternalMatrix<'a>> {
    if size == 0 {
        return Err(BenchError::InvalidDimension { size });
    }
    if !native.is_square(size) {
        return Err(BenchError::DimensionMismatch {
            operand: "matrix",
            rows: native.rows(),
            cols: native.cols(),
            size,
        });
    }

    let handle = ExternalMatrix::allocate(allocator, size)?;
    for i in 0..size {
        // SAFETY: row `i` is live and not otherwise borrowed.
        unsafe { handle.row_mut(i) }.copy_from_slice(native.row(i));
    }
    Ok(handle)
}

/// Reads a `size`×`size` external matrix back into host memory.
///
/// The external memory is left untouched; see [`release`].
pub fn to_native(handle: &ExternalMatrix<'_>, size: usize) -> Result<Matrix> {
    if size != handle.size() {
        return Err(BenchError::DimensionMismatch {
            operand: "external matrix",
            rows: handle.size(),
            cols: handle.size(),
            size,
        });
    }

    // SAFETY: every row index is in bounds and only read.
    let rows = (0..size).map(|i| unsafe { handle.row(i) }.to_vec()).collect();
    Ok(Matrix::from_rows(rows))
}

/// Frees every row and then the table. Consumes the handle, so a second
/// release of the same memory cannot be written.
pub fn release(handle: ExternalMatrix<'_>) {
    drop(handle);
}
