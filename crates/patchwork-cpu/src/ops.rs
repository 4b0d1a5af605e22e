// Host math on typed slices
//
// Everything here computes in f64 and rounds once on store, so F16 and BF16
// buffers get the same arithmetic as F32/F64 ones. Partitioned variants take
// a row range so the driver can hand disjoint rows to rayon workers.

use patchwork_core::WithDType;

/// y = alpha * x + beta * y over `x.len()` elements.
pub fn axpby<T: WithDType>(alpha: f64, x: &[T], beta: f64, y: &mut [T]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi = T::from_f64(alpha * xi.to_f64() + beta * yi.to_f64());
    }
}

/// y = alpha * x + y
pub fn axpy<T: WithDType>(alpha: f64, x: &[T], y: &mut [T]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi = T::from_f64(alpha * xi.to_f64() + yi.to_f64());
    }
}

pub fn scale<T: WithDType>(alpha: f64, x: &mut [T]) {
    for v in x.iter_mut() {
        *v = T::from_f64(alpha * v.to_f64());
    }
}

pub fn fill<T: WithDType>(value: f64, x: &mut [T]) {
    x.fill(T::from_f64(value));
}

pub fn store<T: WithDType>(values: &[f64], x: &mut [T]) {
    for (dst, &v) in x.iter_mut().zip(values) {
        *dst = T::from_f64(v);
    }
}

/// Compute rows `row0..row0 + c_rows.len()/n` of a row-major GEMM:
/// c = alpha * a[m x k] * b[k x n] + beta * c.
///
/// With `beta == 0` the old contents of `c` are not read, so NaN garbage in
/// a fresh buffer does not leak into the result.
#[allow(clippy::too_many_arguments)]
pub fn gemm_rows<T: WithDType>(
    a: &[T],
    b: &[T],
    c_rows: &mut [T],
    row0: usize,
    n: usize,
    k: usize,
    alpha: f64,
    beta: f64,
) {
    let mut acc = vec![0.0f64; n];
    for (i, c_row) in c_rows.chunks_mut(n).enumerate() {
        acc.fill(0.0);
        let a_row = &a[(row0 + i) * k..][..k];
        for (p, a_ip) in a_row.iter().enumerate() {
            let a_ip = a_ip.to_f64();
            let b_row = &b[p * n..][..n];
            for (acc_j, b_pj) in acc.iter_mut().zip(b_row) {
                *acc_j += a_ip * b_pj.to_f64();
            }
        }
        for (cj, &sum) in c_row.iter_mut().zip(&acc) {
            let prev = if beta == 0.0 { 0.0 } else { beta * cj.to_f64() };
            *cj = T::from_f64(alpha * sum + prev);
        }
    }
}
