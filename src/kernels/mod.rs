//! In-tree kernel units.
//!
//! Each kernel is exported with the external calling convention, so it is
//! called exactly like a kernel loaded from a shared library:
//! `matrixmultiply_<variant>(size, A, B, C)` where every matrix is a table of
//! `size` row pointers. The kernel overwrites C with A × B.
//!
//! Available kernels:
//! - `basic`: i-j-k triple loop
//! - `multithread`: rows split across threads
//! - `blocked`: cache blocking with a size-adaptive block edge
//! - `simd`: AVX2 8-lane row updates, scalar fallback
//! - `optimized`: threads + blocking + SIMD row updates
//!
//! All arithmetic wraps, so every kernel is bit-identical to `basic`.

pub mod basic;
pub mod blocked;
pub mod multithread;
pub mod optimized;
pub mod simd;
pub mod unit_abi;

use std::fmt;
use std::slice;

use libc::c_int;
use serde::{Deserialize, Serialize};

/// Entry point shape shared by every kernel: `(int, int**, int**, int**) -> void`.
///
/// `C-unwind` lets a Rust panic inside a kernel reach the invoker, which
/// turns it into a kernel execution error.
pub type KernelFn = unsafe extern "C-unwind" fn(c_int, *mut *mut c_int, *mut *mut c_int, *mut *mut c_int);

/// `create_matrix(size) -> int**`
pub type CreateMatrixFn = unsafe extern "C-unwind" fn(c_int) -> *mut *mut c_int;

/// `free_matrix(matrix, size)`
pub type FreeMatrixFn = unsafe extern "C-unwind" fn(*mut *mut c_int, c_int);

/// `init_test_matrices(size, A, B)`
pub type InitMatricesFn = unsafe extern "C-unwind" fn(c_int, *mut *mut c_int, *mut *mut c_int);

/// Named optimisation profile a kernel unit is built with.
///
/// The flag sets are what the external build step passes to the C compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationProfile {
    Basic,
    Multithread,
    Blocked,
    Simd,
    Optimized,
}

impl OptimizationProfile {
    pub const ALL: [OptimizationProfile; 5] = [
        OptimizationProfile::Basic,
        OptimizationProfile::Multithread,
        OptimizationProfile::Blocked,
        OptimizationProfile::Simd,
        OptimizationProfile::Optimized,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OptimizationProfile::Basic => "basic",
            OptimizationProfile::Multithread => "multithread",
            OptimizationProfile::Blocked => "blocked",
            OptimizationProfile::Simd => "simd",
            OptimizationProfile::Optimized => "optimized",
        }
    }

    pub fn compiler_flags(self) -> &'static [&'static str] {
        match self {
            OptimizationProfile::Basic => &["-O2"],
            OptimizationProfile::Multithread => &["-O2", "-fopenmp"],
            OptimizationProfile::Blocked => &["-O2", "-march=native"],
            OptimizationProfile::Simd => &["-O2", "-march=native", "-mavx2"],
            OptimizationProfile::Optimized => &["-O2", "-march=native", "-mavx2", "-fopenmp"],
        }
    }
}

impl fmt::Display for OptimizationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A kernel compiled into this crate.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinKernel {
    pub name: &'static str,
    pub symbol: &'static str,
    pub description: &'static str,
    pub profile: OptimizationProfile,
    pub entry: KernelFn,
}

pub const BUILTIN_KERNELS: [BuiltinKernel; 5] = [
    BuiltinKernel {
        name: "basic",
        symbol: "matrixmultiply_basic",
        description: "i-j-k triple loop",
        profile: OptimizationProfile::Basic,
        entry: basic::matrixmultiply_basic,
    },
    BuiltinKernel {
        name: "multithread",
        symbol: "matrixmultiply_multithread",
        description: "row bands across threads",
        profile: OptimizationProfile::Multithread,
        entry: multithread::matrixmultiply_multithread,
    },
    BuiltinKernel {
        name: "blocked",
        symbol: "matrixmultiply_blocked_adaptive",
        description: "cache-blocked, adaptive block edge",
        profile: OptimizationProfile::Blocked,
        entry: blocked::matrixmultiply_blocked_adaptive,
    },
    BuiltinKernel {
        name: "simd",
        symbol: "matrixmultiply_simd",
        description: "AVX2 row updates",
        profile: OptimizationProfile::Simd,
        entry: simd::matrixmultiply_simd,
    },
    BuiltinKernel {
        name: "optimized",
        symbol: "matrixmultiply_ultimate",
        description: "threads + blocking + AVX2",
        profile: OptimizationProfile::Optimized,
        entry: optimized::matrixmultiply_ultimate,
    },
];

pub fn builtin(name: &str) -> Option<&'static BuiltinKernel> {
    BUILTIN_KERNELS.iter().find(|k| k.name == name)
}

/// Converts the C-side size, `None` for non-positive values.
pub(crate) fn dim(n: c_int) -> Option<usize> {
    usize::try_from(n).ok().filter(|&n| n > 0)
}

/// Borrows every row of an external matrix.
///
/// # Safety
///
/// `table` must point to `n` row pointers, each to `n` readable `c_int`s,
/// valid and unmodified for `'a`.
pub(crate) unsafe fn rows<'a>(table: *mut *mut c_int, n: usize) -> Vec<&'a [i32]> {
    (0..n)
        .map(|i| unsafe { slice::from_raw_parts(*table.add(i), n) })
        .collect()
}

/// Mutably borrows every row of an external matrix.
///
/// # Safety
///
/// As [`rows`], and no other reference to any row may exist for `'a`.
pub(crate) unsafe fn rows_mut<'a>(table: *mut *mut c_int, n: usize) -> Vec<&'a mut [i32]> {
    (0..n)
        .map(|i| unsafe { slice::from_raw_parts_mut(*table.add(i), n) })
        .collect()
}

/// Thread count for a row-banded kernel.
///
/// Small problems are not worth the spawn cost:
/// - < 100M operations: 1 thread
/// - < 300M operations: 2 threads
/// - Otherwise: up to `max_threads`
///
/// Never more than one thread per 64 rows.
pub(crate) fn choose_thread_count(n: usize, max_threads: usize) -> usize {
    let flops = 2.0 * (n as f64).powi(3);

    const SINGLE_THREAD_THRESHOLD: f64 = 100_000_000.0;
    const TWO_THREAD_THRESHOLD: f64 = 300_000_000.0;

    let optimal_threads = if flops < SINGLE_THREAD_THRESHOLD {
        1
    } else if flops < TWO_THREAD_THRESHOLD {
        2
    } else {
        max_threads
    };

    let threads_by_rows = (n / 64).max(1);

    optimal_threads.min(threads_by_rows).min(max_threads).max(1)
}

/// Hardware threads, capped at `cap`.
pub(crate) fn available_threads(cap: usize) -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(cap)
}
