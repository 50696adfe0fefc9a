// Re-export everything from core
pub use flashmat_core::*;

// Re-export everything from supermatrix
pub use flashmat_supermatrix::*;

// Re-export everything from linalg (when enabled)
#[cfg(feature = "linalg")]
pub use flashmat_linalg::*;
