//! Textbook triple loop over row tables.

use libc::c_int;

use super::{dim, rows, rows_mut};

/// C = A × B using i-j-k loop order.
///
/// The innermost loop walks B down a column, touching a different row
/// buffer on every step. This is the reference the other kernels are
/// measured and verified against.
///
/// # Safety
///
/// `a`, `b` and `c` must each point to `n` row pointers of `n` `c_int`s,
/// and `c` must not alias `a` or `b`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn matrixmultiply_basic(
    n: c_int,
    a: *mut *mut c_int,
    b: *mut *mut c_int,
    c: *mut *mut c_int,
) {
    let Some(n) = dim(n) else { return };
    // SAFETY: upheld by the caller.
    let (a, b, mut c) = unsafe { (rows(a, n), rows(b, n), rows_mut(c, n)) };

    for row in c.iter_mut() {
        row.fill(0);
    }

    for i in 0..n {
        for j in 0..n {
            for p in 0..n {
                c[i][j] = c[i][j].wrapping_add(a[i][p].wrapping_mul(b[p][j]));
            }
        }
    }
}
