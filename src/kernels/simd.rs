//! AVX2 kernel and the row update it is built on.
//!
//! The row update `c += a * b` is the only vectorised piece. It is picked
//! once per call from what the CPU supports, then reused for every row.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use libc::c_int;

use super::{dim, rows, rows_mut};

/// `c[j] += a * b[j]` over the common length of `c` and `b`.
pub type RowUpdate = fn(&mut [i32], i32, &[i32]);

/// Picks the fastest row update for this CPU (AVX2 > scalar).
pub fn select_row_update() -> RowUpdate {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return row_update_avx2_detected;
        }
    }
    row_update_scalar
}

pub fn row_update_scalar(c: &mut [i32], a: i32, b: &[i32]) {
    for (c_j, &b_j) in c.iter_mut().zip(b) {
        *c_j = c_j.wrapping_add(a.wrapping_mul(b_j));
    }
}

#[cfg(target_arch = "x86_64")]
fn row_update_avx2_detected(c: &mut [i32], a: i32, b: &[i32]) {
    // SAFETY: only handed out by `select_row_update` after AVX2 detection.
    unsafe { row_update_avx2(c, a, b) }
}

/// 8 lanes at a time: broadcast `a`, multiply the low 32 bits, add into C.
/// Lanes left over after the last full vector go through the scalar path.
///
/// # Safety
///
/// Caller must ensure the CPU supports AVX2.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn row_update_avx2(c: &mut [i32], a: i32, b: &[i32]) {
    let len = c.len().min(b.len());
    let main = (len / 8) * 8;

    let a_vec = _mm256_set1_epi32(a);
    for j in (0..main).step_by(8) {
        let b_vec = _mm256_loadu_si256(b.as_ptr().add(j) as *const __m256i);
        let c_vec = _mm256_loadu_si256(c.as_ptr().add(j) as *const __m256i);
        let prod = _mm256_mullo_epi32(a_vec, b_vec);
        _mm256_storeu_si256(c.as_mut_ptr().add(j) as *mut __m256i, _mm256_add_epi32(c_vec, prod));
    }

    row_update_scalar(&mut c[main..len], a, &b[main..len]);
}

/// C = A × B using i-k-j order and vectorised row updates.
///
/// For each row of A, every element `A[i][p]` is broadcast and multiplied
/// into row `p` of B, accumulating into row `i` of C. Both B and C are read
/// sequentially, which is what makes the 8-lane update pay off.
///
/// # Safety
///
/// Same contract as `matrixmultiply_basic`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn matrixmultiply_simd(
    n: c_int,
    a: *mut *mut c_int,
    b: *mut *mut c_int,
    c: *mut *mut c_int,
) {
    let Some(n) = dim(n) else { return };
    // SAFETY: upheld by the caller.
    let (a, b, mut c) = unsafe { (rows(a, n), rows(b, n), rows_mut(c, n)) };

    let update = select_row_update();

    for (c_row, a_row) in c.iter_mut().zip(&a) {
        c_row.fill(0);
        for (p, &a_ip) in a_row.iter().enumerate() {
            update(&mut c_row[..], a_ip, b[p]);
        }
    }
}
