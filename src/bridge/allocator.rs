//! External allocators: who owns the memory on the far side of the kernel call.

use std::fmt;
use std::mem;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::{c_int, c_void};

use crate::error::{BenchError, Result};

/// Top-level pointer array of an externally allocated matrix.
///
/// `table[i]` points to row `i`, a buffer of `size` `c_int`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowTable(NonNull<*mut c_int>);

impl RowTable {
    /// Wraps a raw table pointer, `None` if null.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must point to a table of row pointers that stays
    /// valid until it is handed back to the allocator that produced it.
    pub unsafe fn from_raw(ptr: *mut *mut c_int) -> Option<Self> {
        NonNull::new(ptr).map(RowTable)
    }

    pub fn as_ptr(self) -> *mut *mut c_int {
        self.0.as_ptr()
    }
}

/// Memory manager for external-form matrices.
///
/// # Safety
///
/// A successful `allocate(size)` must return a table of `size` non-null row
/// pointers, each to a distinct buffer of at least `size` writable `c_int`s.
/// The table and rows must stay valid and unaliased until the table is passed
/// to `deallocate` on the same allocator. The bridge reads and writes through
/// these pointers without further checks.
pub unsafe trait ExternalAllocator: Send + Sync {
    /// Allocates an uninitialised `size`×`size` row table.
    fn allocate(&self, size: usize) -> Result<RowTable>;

    /// Releases every row and then the table.
    ///
    /// # Safety
    ///
    /// `table` must have come from `allocate` on this allocator with the
    /// same `size` and must not have been released already.
    unsafe fn deallocate(&self, table: RowTable, size: usize);

    fn name(&self) -> &str;
}

/// The process C allocator (`calloc`/`free`).
#[derive(Debug, Default, Clone, Copy)]
pub struct CAllocator;

// SAFETY: every row is calloc'ed and checked before the table is returned.
unsafe impl ExternalAllocator for CAllocator {
    fn allocate(&self, size: usize) -> Result<RowTable> {
        if size == 0 {
            return Err(BenchError::InvalidDimension { size });
        }

        // SAFETY: calloc either returns null or a zeroed block large enough
        // for `size` pointers; rows are only written inside that block.
        unsafe {
            let raw = libc::calloc(size, mem::size_of::<*mut c_int>()) as *mut *mut c_int;
            let table = RowTable::from_raw(raw).ok_or(BenchError::Allocation { size })?;

            for i in 0..size {
                let row = libc::calloc(size, mem::size_of::<c_int>()) as *mut c_int;
                if row.is_null() {
                    // Hand back what we already got before reporting.
                    for j in 0..i {
                        libc::free(*table.as_ptr().add(j) as *mut c_void);
                    }
                    libc::free(table.as_ptr() as *mut c_void);
                    return Err(BenchError::Allocation { size });
                }
                *table.as_ptr().add(i) = row;
            }

            Ok(table)
        }
    }

    unsafe fn deallocate(&self, table: RowTable, size: usize) {
        // SAFETY: caller guarantees `table` came from `allocate(size)` above.
        unsafe {
            for i in 0..size {
                libc::free(*table.as_ptr().add(i) as *mut c_void);
            }
            libc::free(table.as_ptr() as *mut c_void);
        }
    }

    fn name(&self) -> &str {
        "libc"
    }
}

/// Snapshot of a [`CountingAllocator`]'s counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocationStats {
    pub allocations: usize,
    pub releases: usize,
}

impl AllocationStats {
    /// Matrices allocated but not yet released.
    pub fn live(&self) -> usize {
        self.allocations.saturating_sub(self.releases)
    }

    pub fn since(&self, earlier: AllocationStats) -> AllocationStats {
        AllocationStats {
            allocations: self.allocations - earlier.allocations,
            releases: self.releases - earlier.releases,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.allocations == self.releases
    }
}

/// Wraps an allocator and counts matrix allocations and releases.
///
/// With a limit set, allocation calls past the limit fail with
/// [`BenchError::Allocation`] without reaching the inner allocator.
pub struct CountingAllocator {
    inner: Arc<dyn ExternalAllocator>,
    limit: Option<usize>,
    calls: AtomicUsize,
    allocations: AtomicUsize,
    releases: AtomicUsize,
}

impl CountingAllocator {
    pub fn new(inner: Arc<dyn ExternalAllocator>) -> Self {
        Self {
            inner,
            limit: None,
            calls: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    /// Allows at most `limit` allocation calls in total.
    pub fn with_limit(inner: Arc<dyn ExternalAllocator>, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new(inner)
        }
    }

    pub fn stats(&self) -> AllocationStats {
        AllocationStats {
            allocations: self.allocations.load(Ordering::SeqCst),
            releases: self.releases.load(Ordering::SeqCst),
        }
    }

    /// Allocation calls made, including the ones that failed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

// SAFETY: successful allocations come straight from `inner`.
unsafe impl ExternalAllocator for CountingAllocator {
    fn allocate(&self, size: usize) -> Result<RowTable> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.limit.is_some_and(|limit| call >= limit) {
            return Err(BenchError::Allocation { size });
        }
        let table = self.inner.allocate(size)?;
        self.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(table)
    }

    unsafe fn deallocate(&self, table: RowTable, size: usize) {
        // SAFETY: forwarded contract.
        unsafe { self.inner.deallocate(table, size) };
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

impl fmt::Debug for CountingAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingAllocator")
            .field("inner", &self.inner.name())
            .field("limit", &self.limit)
            .field("stats", &self.stats())
            .finish()
    }
}
