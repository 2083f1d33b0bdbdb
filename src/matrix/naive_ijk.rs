/// Naive matrix multiplication using i-j-k loop order.
///
/// This is the textbook triple loop. The innermost loop walks B down a
/// column, so it touches a different row on every iteration. Use this as a
/// correctness reference, not for performance.
///
/// Arithmetic wraps on overflow, matching 32-bit C `int` on the targets the
/// kernels run on.
///
/// # Arguments
///
/// * `a` - Matrix A (n × n), one `Vec` per row
/// * `b` - Matrix B (n × n), one `Vec` per row
/// * `c` - Matrix C (n × n), overwritten with A * B
/// * `n` - Dimension of all three matrices
pub fn matmul_naive_ijk(a: &[Vec<i32>], b: &[Vec<i32>], c: &mut [Vec<i32>], n: usize) {
    for i in 0..n {
        for j in 0..n {
            let mut sum = 0i32;
            for p in 0..n {
                sum = sum.wrapping_add(a[i][p].wrapping_mul(b[p][j]));
            }
            c[i][j] = sum;
        }
    }
}
