//! Random test matrices.

use flashmat_core::{Obj, Scalar};
use rand::Rng;

/// `m x n` flat matrix with entries uniform in `[-1, 1)`.
pub fn random_matrix<T: Scalar, R: Rng + ?Sized>(rng: &mut R, m: usize, n: usize) -> Obj<T> {
    Obj::from_fn(m, n, |_, _| T::from_f64(rng.random_range(-1.0..1.0)))
}

/// Symmetric positive definite `n x n` matrix `B B^T + n I`.
pub fn random_spd_matrix<T: Scalar, R: Rng + ?Sized>(rng: &mut R, n: usize) -> Obj<T> {
    let b: Vec<f64> = (0..n * n).map(|_| rng.random_range(-1.0..1.0)).collect();
    Obj::from_fn(n, n, |i, j| {
        let mut s: f64 = (0..n).map(|k| b[i + k * n] * b[j + k * n]).sum();
        if i == j {
            s += n as f64;
        }
        T::from_f64(s)
    })
}

/// `m x n` matrix whose diagonal dominates its row, so that LU without
/// pivoting never meets a small pivot.
pub fn random_diag_dominant<T: Scalar, R: Rng + ?Sized>(rng: &mut R, m: usize, n: usize) -> Obj<T> {
    let dominance = m.max(n) as f64;
    Obj::from_fn(m, n, |i, j| {
        let x = rng.random_range(-1.0..1.0);
        T::from_f64(if i == j { x + dominance } else { x })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_random_matrix_is_reproducible() {
        let a: Obj<f64> = random_matrix(&mut ChaCha8Rng::seed_from_u64(7), 5, 3);
        let b: Obj<f64> = random_matrix(&mut ChaCha8Rng::seed_from_u64(7), 5, 3);
        assert_eq!(a.to_col_major(), b.to_col_major());
        assert!(a.to_col_major().iter().all(|x| (-1.0..1.0).contains(x)));
    }

    #[test]
    fn test_spd_is_symmetric_with_heavy_diagonal() {
        let n = 6;
        let a: Obj<f64> = random_spd_matrix(&mut ChaCha8Rng::seed_from_u64(1), n);
        for i in 0..n {
            assert!(a.get(i, i).unwrap() >= n as f64);
            for j in 0..n {
                assert_eq!(a.get(i, j).unwrap(), a.get(j, i).unwrap());
            }
        }
    }
}
