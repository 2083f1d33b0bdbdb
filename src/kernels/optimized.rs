//! Everything at once: threads, blocking and vectorised row updates.

use std::thread;

use libc::c_int;

use super::simd::{RowUpdate, select_row_update};
use super::{available_threads, choose_thread_count, dim, rows, rows_mut};

const MAX_THREADS: usize = 8;
const BLOCK: usize = 64;

/// C = A × B combining the other strategies.
///
/// Rows of C are split into bands, one per thread. Inside a band the
/// k-i-j blocked loop runs with a fixed 64-wide block, and each block row
/// is updated with the AVX2 row update when the CPU has it.
///
/// # Safety
///
/// Same contract as `matrixmultiply_basic`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn matrixmultiply_ultimate(
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

    let update = select_row_update();
    let threads = choose_thread_count(n, available_threads(MAX_THREADS));
    if threads == 1 {
        blocked_band(&a, &b, &mut c, 0, n, update);
        return;
    }

    let rows_per_thread = n / threads;
    thread::scope(|s| {
        let mut rest: &mut [&mut [i32]] = &mut c;
        let mut start_row = 0;
        for tid in 0..threads {
            let band_len = if tid == threads - 1 {
                rest.len()
            } else {
                rows_per_thread
            };
            let (band, tail) = std::mem::take(&mut rest).split_at_mut(band_len);
            rest = tail;

            let (a, b) = (&a, &b);
            let first = start_row;
            s.spawn(move || blocked_band(a, b, band, first, n, update));
            start_row += band_len;
        }
    });
}

/// Accumulates rows `first_row..first_row + band.len()` of A × B into `band`.
fn blocked_band(
    a: &[&[i32]],
    b: &[&[i32]],
    band: &mut [&mut [i32]],
    first_row: usize,
    n: usize,
    update: RowUpdate,
) {
    let band_rows = band.len();

    for kk in (0..n).step_by(BLOCK) {
        let k_end = (kk + BLOCK).min(n);
        for ii in (0..band_rows).step_by(BLOCK) {
            let i_end = (ii + BLOCK).min(band_rows);
            for jj in (0..n).step_by(BLOCK) {
                let j_end = (jj + BLOCK).min(n);

                for p in kk..k_end {
                    let b_block = &b[p][jj..j_end];
                    for i in ii..i_end {
                        let a_ip = a[first_row + i][p];
                        update(&mut band[i][jj..j_end], a_ip, b_block);
                    }
                }
            }
        }
    }
}
