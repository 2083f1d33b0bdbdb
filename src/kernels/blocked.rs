//! Cache-blocked kernel.

use libc::c_int;

use super::{dim, rows, rows_mut};

/// Block edge for a given matrix size.
///
/// Larger matrices get larger blocks so the outer loops stay short.
pub fn adaptive_block_size(n: usize) -> usize {
    if n <= 512 {
        32
    } else if n <= 1024 {
        64
    } else if n <= 2048 {
        128
    } else {
        256
    }
}

/// C = A × B using k-i-j blocking.
///
/// Breaks the computation into square blocks so that a block of B stays in
/// cache while every row of the matching A block is streamed over it. The
/// innermost loop runs along a row of both B and C.
///
/// # Safety
///
/// Same contract as `matrixmultiply_basic`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn matrixmultiply_blocked_adaptive(
    n: c_int,
    a: *mut *mut c_int,
    b: *mut *mut c_int,
    c: *mut *mut c_int,
) {
    let Some(n) = dim(n) else { return };
    // SAFETY: upheld by the caller.
    let (a, b, mut c) = unsafe { (rows(a, n), rows(b, n), rows_mut(c, n)) };

    let block = adaptive_block_size(n);

    for row in c.iter_mut() {
        row.fill(0);
    }

    for kk in (0..n).step_by(block) {
        let k_end = (kk + block).min(n);
        for ii in (0..n).step_by(block) {
            let i_end = (ii + block).min(n);
            for jj in (0..n).step_by(block) {
                let j_end = (jj + block).min(n);

                for p in kk..k_end {
                    let b_row = &b[p][jj..j_end];
                    for i in ii..i_end {
                        let a_ip = a[i][p];
                        let c_row = &mut c[i][jj..j_end];
                        for (c_ij, &b_pj) in c_row.iter_mut().zip(b_row) {
                            *c_ij = c_ij.wrapping_add(a_ip.wrapping_mul(b_pj));
                        }
                    }
                }
            }
        }
    }
}
