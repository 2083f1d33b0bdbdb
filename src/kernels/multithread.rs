//! Row-banded multi-threaded kernel.

use std::thread;

use libc::c_int;

use super::{available_threads, choose_thread_count, dim, rows, rows_mut};

/// Upper bound on worker threads.
const MAX_THREADS: usize = 16;

/// C = A × B with rows of C split across threads.
///
/// Each thread owns a contiguous band of C rows and runs the plain triple
/// loop over it. Thread count adapts to the problem size, see
/// `choose_thread_count`; the last band takes the leftover rows.
///
/// # Safety
///
/// Same contract as `matrixmultiply_basic`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn matrixmultiply_multithread(
    n: c_int,
    a: *mut *mut c_int,
    b: *mut *mut c_int,
    c: *mut *mut c_int,
) {
    let Some(n) = dim(n) else { return };
    // SAFETY: upheld by the caller.
    let (a, b, mut c) = unsafe { (rows(a, n), rows(b, n), rows_mut(c, n)) };

    let threads = choose_thread_count(n, available_threads(MAX_THREADS));
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
            s.spawn(move || multiply_band(a, b, band, first, n));
            start_row += band_len;
        }
    });
}

fn multiply_band(a: &[&[i32]], b: &[&[i32]], band: &mut [&mut [i32]], first_row: usize, n: usize) {
    for (offset, c_row) in band.iter_mut().enumerate() {
        let a_row = a[first_row + offset];
        for j in 0..n {
            let mut sum = 0i32;
            for p in 0..n {
                sum = sum.wrapping_add(a_row[p].wrapping_mul(b[p][j]));
            }
            c_row[j] = sum;
        }
    }
}
