//! Norms and comparisons used to check factorizations.

use flashmat_core::{Obj, Scalar};

use crate::types::Uplo;

/// Frobenius norm over the scalar extent of `a`.
pub fn norm_frob<T: Scalar>(a: &Obj<T>) -> f64 {
    a.to_col_major()
        .iter()
        .map(|x| x.real_f64() * x.real_f64())
        .sum::<f64>()
        .sqrt()
}

/// Largest absolute elementwise difference; `f64::INFINITY` when the shapes
/// differ.
pub fn max_abs_diff<T: Scalar>(a: &Obj<T>, b: &Obj<T>) -> f64 {
    if (a.scalar_length(), a.scalar_width()) != (b.scalar_length(), b.scalar_width()) {
        return f64::INFINITY;
    }
    a.to_col_major()
        .iter()
        .zip(b.to_col_major())
        .map(|(x, y)| (x.real_f64() - y.real_f64()).abs())
        .fold(0.0, f64::max)
}

/// Flat copy of the `uplo` triangle of `a`, zero elsewhere. With `unit`, the
/// diagonal reads as one.
pub fn triangle<T: Scalar>(a: &Obj<T>, uplo: Uplo, unit: bool) -> Obj<T> {
    let (m, n) = (a.scalar_length(), a.scalar_width());
    let data = a.to_col_major();
    Obj::from_fn(m, n, |i, j| {
        if i == j && unit {
            T::one()
        } else if uplo.contains(i, j) {
            data[i + j * m]
        } else {
            T::zero()
        }
    })
}

/// Flat product `A B` computed directly, for reference results.
pub fn matmul<T: Scalar>(a: &Obj<T>, b: &Obj<T>) -> Obj<T> {
    let (m, k, n) = (a.scalar_length(), a.scalar_width(), b.scalar_width());
    let (da, db) = (a.to_col_major(), b.to_col_major());
    Obj::from_fn(m, n, |i, j| {
        (0..k).fold(T::zero(), |s, p| s + da[i + p * m] * db[p + j * k])
    })
}

/// Flat transpose.
pub fn transpose<T: Scalar>(a: &Obj<T>) -> Obj<T> {
    let m = a.scalar_length();
    let data = a.to_col_major();
    Obj::from_fn(a.scalar_width(), m, |i, j| data[j + i * m])
}
