//! Native (host-owned) matrix representation.
//!
//! A [`Matrix`] is an N×N grid of `i32` stored as one `Vec` per row, the
//! same row-of-rows shape the external form uses, so marshaling is a
//! straight row-by-row copy in both directions.

pub mod naive_ijk;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Matrix {
    rows: Vec<Vec<i32>>,
}

impl Matrix {
    /// An `n`×`n` matrix of zeros.
    pub fn zeros(n: usize) -> Self {
        Self {
            rows: vec![vec![0; n]; n],
        }
    }

    /// Wraps existing rows. Rows are not required to be equal length;
    /// shape is checked where a square matrix is needed.
    pub fn from_rows(rows: Vec<Vec<i32>>) -> Self {
        Self { rows }
    }

    /// Builds an `n`×`n` matrix from a function of `(row, col)`.
    pub fn from_fn(n: usize, f: impl Fn(usize, usize) -> i32) -> Self {
        let rows = (0..n).map(|i| (0..n).map(|j| f(i, j)).collect()).collect();
        Self { rows }
    }

    /// The standard benchmark inputs: `A[i][j] = i + j`, `B[i][j] = i*j + 1`.
    pub fn test_pair(n: usize) -> (Matrix, Matrix) {
        let a = Matrix::from_fn(n, |i, j| (i as i32).wrapping_add(j as i32));
        let b = Matrix::from_fn(n, |i, j| (i as i32).wrapping_mul(j as i32).wrapping_add(1));
        (a, b)
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Length of the first row whose length differs from `rows()`, or
    /// `rows()` when every row is that long.
    pub fn cols(&self) -> usize {
        let n = self.rows.len();
        self.rows
            .iter()
            .map(Vec::len)
            .find(|&len| len != n)
            .unwrap_or(n)
    }

    pub fn is_square(&self, n: usize) -> bool {
        self.rows.len() == n && self.rows.iter().all(|row| row.len() == n)
    }

    pub fn row(&self, i: usize) -> &[i32] {
        &self.rows[i]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [i32] {
        &mut self.rows[i]
    }

    pub fn get(&self, i: usize, j: usize) -> i32 {
        self.rows[i][j]
    }

    pub fn as_rows(&self) -> &[Vec<i32>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<i32>> {
        self.rows
    }

    /// Direct triple-loop product, the reference every kernel must match.
    ///
    /// # Panics
    ///
    /// Panics if either matrix is not `n`×`n` with `n = self.rows()`.
    pub fn multiply_reference(&self, other: &Matrix) -> Matrix {
        let n = self.rows();
        assert!(self.is_square(n), "A: expected {}x{}", n, n);
        assert!(other.is_square(n), "B: expected {}x{}", n, n);

        let mut c = Matrix::zeros(n);
        naive_ijk::matmul_naive_ijk(&self.rows, &other.rows, &mut c.rows, n);
        c
    }
}
