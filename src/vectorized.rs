//! In-process reference points that skip the kernel boundary.
//!
//! - `ndarray`: `Array2::dot`, the vectorised-library baseline
//! - `native`: a plain triple loop over host rows
//!
//! Both work on host memory directly; no external buffers are involved.

use std::num::Wrapping;

use ndarray::Array2;

use crate::error::{BenchError, Result};
use crate::matrix::Matrix;
use crate::matrix::naive_ijk::matmul_naive_ijk;
use crate::timing::{TimingResult, time};

pub const NDARRAY: &str = "ndarray";
pub const NATIVE: &str = "native";

/// Elements are wrapped so overflow behaves like the kernels' 32-bit `int`.
pub fn to_array(m: &Matrix) -> Array2<Wrapping<i32>> {
    let n = m.rows();
    Array2::from_shape_fn((n, m.cols()), |(i, j)| Wrapping(m.get(i, j)))
}

pub fn from_array(arr: &Array2<Wrapping<i32>>) -> Matrix {
    Matrix::from_rows(
        arr.outer_iter()
            .map(|row| row.iter().map(|w| w.0).collect())
            .collect(),
    )
}

/// Times `Array2::dot`. Conversion to `Array2` happens before the clock starts.
pub fn measure_ndarray(a: &Matrix, b: &Matrix, size: usize) -> Result<(TimingResult, Matrix)> {
    check_inputs(a, b, size)?;
    let (a, b) = (to_array(a), to_array(b));

    let (product, elapsed) = time(|| a.dot(&b));

    let result = TimingResult::new(NDARRAY, elapsed, size, "ndarray Array2::dot");
    Ok((result, from_array(&product)))
}

/// Times the plain triple loop on host rows.
pub fn measure_native(a: &Matrix, b: &Matrix, size: usize) -> Result<(TimingResult, Matrix)> {
    check_inputs(a, b, size)?;
    let mut c = Matrix::zeros(size).into_rows();

    let ((), elapsed) = time(|| matmul_naive_ijk(a.as_rows(), b.as_rows(), &mut c, size));

    let result = TimingResult::new(NATIVE, elapsed, size, "host triple loop, no marshaling");
    Ok((result, Matrix::from_rows(c)))
}

fn check_inputs(a: &Matrix, b: &Matrix, size: usize) -> Result<()> {
    if size == 0 {
        return Err(BenchError::InvalidDimension { size });
    }
    for (operand, m) in [("A", a), ("B", b)] {
        if !m.is_square(size) {
            return Err(BenchError::DimensionMismatch {
                operand,
                rows: m.rows(),
                cols: m.cols(),
                size,
            });
        }
    }
    Ok(())
}
