//! Kernel invoker: marshal in, call, marshal out, release.

use std::panic::{self, AssertUnwindSafe};

use libc::c_int;
use tracing::debug;

use crate::bridge::{self, ExternalMatrix};
use crate::error::{BenchError, KernelFault, Result};
use crate::matrix::Matrix;
use crate::registry::KernelDescriptor;

/// Computes `a × b` with the kernel behind `descriptor`.
///
/// Inputs are checked before anything is allocated: `size == 0` is
/// [`BenchError::InvalidDimension`], and an input that is not
/// `size`×`size` is [`BenchError::DimensionMismatch`]. The three external
/// buffers are owned handles, so they are released on every exit path,
/// including when the kernel faults. The returned matrix does not refer to
/// any external memory.
pub fn invoke(descriptor: &KernelDescriptor, a: &Matrix, b: &Matrix, size: usize) -> Result<Matrix> {
    if size == 0 {
        return Err(BenchError::InvalidDimension { size });
    }
    let n = c_int::try_from(size).map_err(|_| BenchError::InvalidDimension { size })?;
    check_shape("A", a, size)?;
    check_shape("B", b, size)?;

    let allocator = descriptor.allocator();
    let ext_a = bridge::to_external(a, size, allocator)?;
    let ext_b = bridge::to_external(b, size, allocator)?;
    let ext_c = ExternalMatrix::zeroed(allocator, size)?;
    debug!(kernel = descriptor.name(), size, "marshaled inputs");

    let entry = descriptor.entry_point();
    let (pa, pb, pc) = (ext_a.as_raw(), ext_b.as_raw(), ext_c.as_raw());
    // SAFETY: the registry checked that `entry` takes
    // `(int, int**, int**, int**)`, and all three tables are live, distinct
    // and `size`×`size` for the whole call.
    let call = panic::catch_unwind(AssertUnwindSafe(|| unsafe { entry(n, pa, pb, pc) }));
    if let Err(payload) = call {
        return Err(BenchError::KernelExecution {
            name: descriptor.name().to_string(),
            source: KernelFault::from_panic(payload),
        });
    }

    let c = bridge::to_native(&ext_c, size)?;

    bridge::release(ext_c);
    bridge::release(ext_b);
    bridge::release(ext_a);

    Ok(c)
}

fn check_shape(operand: &'static str, m: &Matrix, size: usize) -> Result<()> {
    if m.is_square(size) {
        return Ok(());
    }
    Err(BenchError::DimensionMismatch {
        operand,
        rows: m.rows(),
        cols: m.cols(),
        size,
    })
}
