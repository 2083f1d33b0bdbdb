//! Helper exports that make this crate's cdylib a complete kernel unit.
//!
//! A unit may export `create_matrix`, `free_matrix` and
//! `init_test_matrices` next to its entry point. Memory handed out by
//! `create_matrix` must only ever go back through `free_matrix`.

use libc::c_int;

use crate::bridge::{CAllocator, ExternalAllocator, RowTable};
use crate::matrix::Matrix;

use super::{dim, rows_mut};

/// Allocates a `size`×`size` row table, null on failure or bad size.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn create_matrix(size: c_int) -> *mut *mut c_int {
    match dim(size).map(|n| CAllocator.allocate(n)) {
        Some(Ok(table)) => table.as_ptr(),
        _ => std::ptr::null_mut(),
    }
}

/// Releases a table from [`create_matrix`]. Null is ignored.
///
/// # Safety
///
/// `matrix` must come from `create_matrix(size)` and not be freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn free_matrix(matrix: *mut *mut c_int, size: c_int) {
    let Some(n) = dim(size) else { return };
    // SAFETY: upheld by the caller.
    if let Some(table) = unsafe { RowTable::from_raw(matrix) } {
        unsafe { CAllocator.deallocate(table, n) };
    }
}

/// Fills A and B with the benchmark inputs, see [`Matrix::test_pair`].
///
/// # Safety
///
/// `a` and `b` must each point to `size` row pointers of `size` `c_int`s.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn init_test_matrices(size: c_int, a: *mut *mut c_int, b: *mut *mut c_int) {
    let Some(n) = dim(size) else { return };
    let (native_a, native_b) = Matrix::test_pair(n);
    // SAFETY: upheld by the caller.
    let (mut a, mut b) = unsafe { (rows_mut(a, n), rows_mut(b, n)) };
    for i in 0..n {
        a[i].copy_from_slice(native_a.row(i));
        b[i].copy_from_slice(native_b.row(i));
    }
}
