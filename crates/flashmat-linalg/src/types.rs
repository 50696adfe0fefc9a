//! Option enums shared by the operations and their kernels.

/// Whether an operand is used as is or transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Trans {
    /// `op(A) = A`.
    #[default]
    NoTranspose,
    /// `op(A) = A^T`.
    Transpose,
}

impl Trans {
    /// The other option.
    pub fn flip(self) -> Self {
        match self {
            Trans::NoTranspose => Trans::Transpose,
            Trans::Transpose => Trans::NoTranspose,
        }
    }

    /// Short name recorded with queued tasks.
    pub fn name(self) -> &'static str {
        match self {
            Trans::NoTranspose => "n",
            Trans::Transpose => "t",
        }
    }
}

/// Which triangle of a square operand is referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uplo {
    /// Lower triangle, diagonal included.
    Lower,
    /// Upper triangle, diagonal included.
    Upper,
}

impl Uplo {
    /// Short name recorded with queued tasks.
    pub fn name(self) -> &'static str {
        match self {
            Uplo::Lower => "lower",
            Uplo::Upper => "upper",
        }
    }

    /// Check if element `(i, j)` lies in this triangle.
    #[inline]
    pub fn contains(self, i: usize, j: usize) -> bool {
        match self {
            Uplo::Lower => i >= j,
            Uplo::Upper => i <= j,
        }
    }
}

/// Side from which a triangular matrix is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplySide {
    /// `op(A) X = alpha B`.
    Left,
    /// `X op(A) = alpha B`.
    Right,
}

impl ApplySide {
    /// Short name recorded with queued tasks.
    pub fn name(self) -> &'static str {
        match self {
            ApplySide::Left => "left",
            ApplySide::Right => "right",
        }
    }
}

/// Whether a triangular matrix has an implicit unit diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Diag {
    /// The stored diagonal is used.
    #[default]
    NonUnit,
    /// The diagonal is taken as all ones and never read.
    Unit,
}

impl Diag {
    /// Short name recorded with queued tasks.
    pub fn name(self) -> &'static str {
        match self {
            Diag::NonUnit => "nonunit",
            Diag::Unit => "unit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_membership() {
        assert!(Uplo::Lower.contains(2, 1));
        assert!(!Uplo::Lower.contains(1, 2));
        assert!(Uplo::Upper.contains(1, 1));
        assert_eq!(Trans::Transpose.flip(), Trans::NoTranspose);
    }
}
