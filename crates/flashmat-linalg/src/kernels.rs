//! Reference leaf kernels.
//!
//! Straightforward loops over [`ScalarView`]s. They are what a queued task
//! runs once the scheduler hands it a worker, and what flat trees call at
//! their leaves. Numerics are plain textbook loops, not tuned code.

use flashmat_core::{KernelError, Scalar, ScalarView};

use crate::types::{ApplySide, Diag, Trans, Uplo};

fn apply_trans<'a, T: Scalar>(v: &ScalarView<'a, T>, trans: Trans) -> ScalarView<'a, T> {
    match trans {
        Trans::NoTranspose => *v,
        Trans::Transpose => v.transposed(),
    }
}

fn mismatch(what: &str, expected: (usize, usize), actual: (usize, usize)) -> KernelError {
    KernelError::DimensionMismatch(format!(
        "{}: expected {}x{}, got {}x{}",
        what, expected.0, expected.1, actual.0, actual.1
    ))
}

/// `C := alpha C`, on the triangle `uplo` if given.
pub fn scal<T: Scalar>(uplo: Option<Uplo>, alpha: T, c: &ScalarView<'_, T>) {
    for j in 0..c.width() {
        for i in 0..c.length() {
            if uplo.is_some_and(|u| !u.contains(i, j)) {
                continue;
            }
            // alpha = 0 clears NaN and Inf as well.
            let v = if alpha == T::zero() {
                T::zero()
            } else {
                alpha * c.get(i, j)
            };
            c.set(i, j, v);
        }
    }
}

/// `C := alpha op(A) op(B) + beta C`.
pub fn gemm<T: Scalar>(
    transa: Trans,
    transb: Trans,
    alpha: T,
    a: &ScalarView<'_, T>,
    b: &ScalarView<'_, T>,
    beta: T,
    c: &ScalarView<'_, T>,
) -> Result<(), KernelError> {
    let a = apply_trans(a, transa);
    let b = apply_trans(b, transb);
    let (m, n, k) = (c.length(), c.width(), a.width());
    if a.length() != m {
        return Err(mismatch("gemm op(A)", (m, k), (a.length(), k)));
    }
    if b.length() != k || b.width() != n {
        return Err(mismatch("gemm op(B)", (k, n), (b.length(), b.width())));
    }
    for j in 0..n {
        for i in 0..m {
            let mut acc = T::zero();
            for p in 0..k {
                acc += a.get(i, p) * b.get(p, j);
            }
            let old = if beta == T::zero() {
                T::zero()
            } else {
                beta * c.get(i, j)
            };
            c.set(i, j, alpha * acc + old);
        }
    }
    Ok(())
}

/// `C := alpha op(A) op(A)^T + beta C` on the triangle `uplo` of `C`.
pub fn syrk<T: Scalar>(
    uplo: Uplo,
    trans: Trans,
    alpha: T,
    a: &ScalarView<'_, T>,
    beta: T,
    c: &ScalarView<'_, T>,
) -> Result<(), KernelError> {
    let a = apply_trans(a, trans);
    let n = c.length();
    if c.width() != n {
        return Err(KernelError::DimensionMismatch(format!(
            "syrk C must be square, got {}x{}",
            n,
            c.width()
        )));
    }
    if a.length() != n {
        return Err(mismatch("syrk op(A)", (n, a.width()), (a.length(), a.width())));
    }
    for j in 0..n {
        for i in 0..n {
            if !uplo.contains(i, j) {
                continue;
            }
            let mut acc = T::zero();
            for p in 0..a.width() {
                acc += a.get(i, p) * a.get(j, p);
            }
            let old = if beta == T::zero() {
                T::zero()
            } else {
                beta * c.get(i, j)
            };
            c.set(i, j, alpha * acc + old);
        }
    }
    Ok(())
}

/// Triangular solve: `B := alpha op(A)^-1 B` from the left, or
/// `B := alpha B op(A)^-1` from the right.
///
/// A zero on a non-unit diagonal is reported before `B` is touched.
#[allow(clippy::too_many_arguments)]
pub fn trsm<T: Scalar>(
    side: ApplySide,
    uplo: Uplo,
    trans: Trans,
    diag: Diag,
    alpha: T,
    a: &ScalarView<'_, T>,
    b: &ScalarView<'_, T>,
) -> Result<(), KernelError> {
    // Both sides reduce to a left solve M X = alpha B': from the right,
    // X op(A) = alpha B is op(A)^T X^T = alpha B^T.
    let op_lower = (uplo == Uplo::Lower) != (trans == Trans::Transpose);
    let (m, x, lower) = match side {
        ApplySide::Left => (apply_trans(a, trans), *b, op_lower),
        ApplySide::Right => (apply_trans(a, trans.flip()), b.transposed(), !op_lower),
    };
    let n = m.length();
    if m.width() != n {
        return Err(KernelError::DimensionMismatch(format!(
            "trsm A must be square, got {}x{}",
            n,
            m.width()
        )));
    }
    if x.length() != n {
        return Err(mismatch("trsm B", (n, x.width()), (x.length(), x.width())));
    }
    if diag == Diag::NonUnit {
        if let Some(i) = (0..n).find(|&i| m.get(i, i) == T::zero()) {
            return Err(KernelError::Singular { index: i });
        }
    }
    if alpha != T::one() {
        scal(None, alpha, &x);
    }
    let solve_row = |i: usize, col: usize, others: &mut dyn Iterator<Item = usize>| {
        let mut s = x.get(i, col);
        for p in others {
            s -= m.get(i, p) * x.get(p, col);
        }
        if diag == Diag::NonUnit {
            s /= m.get(i, i);
        }
        x.set(i, col, s);
    };
    for col in 0..x.width() {
        if lower {
            for i in 0..n {
                solve_row(i, col, &mut (0..i));
            }
        } else {
            for i in (0..n).rev() {
                solve_row(i, col, &mut (i + 1..n));
            }
        }
    }
    Ok(())
}

/// Cholesky factorization in place: `A = L L^T` overwriting the lower
/// triangle, or `A = U^T U` overwriting the upper one. The other triangle
/// is not referenced.
pub fn chol<T: Scalar>(uplo: Uplo, a: &ScalarView<'_, T>) -> Result<(), KernelError> {
    let n = a.length();
    if a.width() != n {
        return Err(KernelError::DimensionMismatch(format!(
            "chol A must be square, got {}x{}",
            n,
            a.width()
        )));
    }
    // The upper factor of A is the lower factor of A^T.
    let l = match uplo {
        Uplo::Lower => *a,
        Uplo::Upper => a.transposed(),
    };
    for j in 0..n {
        let mut d = l.get(j, j);
        for p in 0..j {
            d -= l.get(j, p) * l.get(j, p);
        }
        if d <= T::zero() || d.is_nan() {
            return Err(KernelError::NotPositiveDefinite {
                index: j,
                value: d.real_f64(),
            });
        }
        let ljj = d.sqrt();
        l.set(j, j, ljj);
        for i in j + 1..n {
            let mut s = l.get(i, j);
            for p in 0..j {
                s -= l.get(i, p) * l.get(j, p);
            }
            l.set(i, j, s / ljj);
        }
    }
    Ok(())
}

/// LU factorization without pivoting in place: unit lower `L` below the
/// diagonal, `U` on and above it.
pub fn lu_nopiv<T: Scalar>(a: &ScalarView<'_, T>) -> Result<(), KernelError> {
    let (m, n) = (a.length(), a.width());
    for k in 0..m.min(n) {
        let pivot = a.get(k, k);
        if pivot == T::zero() {
            return Err(KernelError::Singular { index: k });
        }
        for i in k + 1..m {
            a.set(i, k, a.get(i, k) / pivot);
        }
        for j in k + 1..n {
            let akj = a.get(k, j);
            for i in k + 1..m {
                a.set(i, j, a.get(i, j) - a.get(i, k) * akj);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use flashmat_core::Obj;

    fn obj(m: usize, n: usize, rows: &[&[f64]]) -> Obj<f64> {
        Obj::from_fn(m, n, |i, j| rows[i][j])
    }

    #[test]
    fn test_gemm_with_transposes() {
        let a = obj(2, 3, &[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        let b = obj(2, 2, &[&[1.0, 0.0], &[0.0, 2.0]]);
        let c = Obj::<f64>::create(3, 2);
        c.fill(1.0);
        // C = 2 * A^T * B + 1 * C
        gemm(
            Trans::Transpose,
            Trans::NoTranspose,
            2.0,
            &a.scalar_view().unwrap(),
            &b.scalar_view().unwrap(),
            1.0,
            &c.scalar_view().unwrap(),
        )
        .unwrap();
        assert_eq!(c.to_col_major(), vec![3.0, 5.0, 7.0, 17.0, 21.0, 25.0]);
    }

    #[test]
    fn test_gemm_rejects_bad_shapes() {
        let a = Obj::<f64>::create(2, 3);
        let c = Obj::<f64>::create(2, 2);
        let err = gemm(
            Trans::NoTranspose,
            Trans::NoTranspose,
            1.0,
            &a.scalar_view().unwrap(),
            &a.scalar_view().unwrap(),
            0.0,
            &c.scalar_view().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::DimensionMismatch(_)));
    }

    #[test]
    fn test_syrk_touches_one_triangle() {
        let a = obj(2, 1, &[&[1.0], &[2.0]]);
        let c = Obj::<f64>::create(2, 2);
        c.fill(9.0);
        syrk(
            Uplo::Lower,
            Trans::NoTranspose,
            1.0,
            &a.scalar_view().unwrap(),
            0.0,
            &c.scalar_view().unwrap(),
        )
        .unwrap();
        assert_eq!(c.to_col_major(), vec![1.0, 2.0, 9.0, 4.0]);
    }

    #[test]
    fn test_trsm_all_sides_and_transposes() {
        let a = obj(2, 2, &[&[2.0, 0.0], &[1.0, 4.0]]);
        let full = |trans: Trans| match trans {
            Trans::NoTranspose => [[2.0, 0.0], [1.0, 4.0]],
            Trans::Transpose => [[2.0, 1.0], [0.0, 4.0]],
        };
        for side in [ApplySide::Left, ApplySide::Right] {
            for trans in [Trans::NoTranspose, Trans::Transpose] {
                let b = obj(2, 2, &[&[1.0, 2.0], &[3.0, 4.0]]);
                trsm(
                    side,
                    Uplo::Lower,
                    trans,
                    Diag::NonUnit,
                    2.0,
                    &a.scalar_view().unwrap(),
                    &b.scalar_view().unwrap(),
                )
                .unwrap();
                let m = full(trans);
                let x = |i, j| b.get(i, j).unwrap();
                for i in 0..2 {
                    for j in 0..2 {
                        let prod: f64 = match side {
                            ApplySide::Left => (0..2).map(|p| m[i][p] * x(p, j)).sum(),
                            ApplySide::Right => (0..2).map(|p| x(i, p) * m[p][j]).sum(),
                        };
                        let rhs = [[1.0, 2.0], [3.0, 4.0]][i][j] * 2.0;
                        assert_relative_eq!(prod, rhs, epsilon = 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn test_trsm_reports_zero_diagonal_before_writing() {
        let a = obj(2, 2, &[&[1.0, 0.0], &[1.0, 0.0]]);
        let b = obj(2, 1, &[&[5.0], &[6.0]]);
        let err = trsm(
            ApplySide::Left,
            Uplo::Lower,
            Trans::NoTranspose,
            Diag::NonUnit,
            3.0,
            &a.scalar_view().unwrap(),
            &b.scalar_view().unwrap(),
        )
        .unwrap_err();
        assert_eq!(err, KernelError::Singular { index: 1 });
        assert_eq!(b.to_col_major(), vec![5.0, 6.0]);
    }

    #[test]
    fn test_chol_lower_and_upper() {
        let spd = [&[4.0, 2.0][..], &[2.0, 5.0][..]];
        let a = obj(2, 2, &spd);
        chol(Uplo::Lower, &a.scalar_view().unwrap()).unwrap();
        assert_eq!(a.to_col_major(), vec![2.0, 1.0, 2.0, 2.0]);

        let a = obj(2, 2, &spd);
        chol(Uplo::Upper, &a.scalar_view().unwrap()).unwrap();
        assert_eq!(a.to_col_major(), vec![2.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_chol_rejects_indefinite() {
        let a = obj(2, 2, &[&[1.0, 2.0], &[2.0, 1.0]]);
        let err = chol(Uplo::Lower, &a.scalar_view().unwrap()).unwrap_err();
        assert!(matches!(err, KernelError::NotPositiveDefinite { index: 1, .. }));
    }

    #[test]
    fn test_lu_nopiv_factors_and_detects_zero_pivot() {
        let a = obj(2, 2, &[&[2.0, 1.0], &[4.0, 5.0]]);
        lu_nopiv(&a.scalar_view().unwrap()).unwrap();
        assert_eq!(a.to_col_major(), vec![2.0, 2.0, 1.0, 3.0]);

        let s = obj(2, 2, &[&[0.0, 1.0], &[1.0, 0.0]]);
        assert_eq!(
            lu_nopiv(&s.scalar_view().unwrap()).unwrap_err(),
            KernelError::Singular { index: 0 }
        );
    }
}
