#![warn(missing_docs)]
//! Blocked dense linear algebra over flat and hierarchical matrices
//!
//! Each operation is a Partition / Repartition loop whose shape is chosen by
//! a control tree. On hierarchical matrices the leaves become SuperMatrix
//! tasks when the queue is enabled:
//! - `cntl`: control trees, blocksize policies and the default tree sets
//! - `ops`: `scal`, `gemm`, `syrk`, `trsm`, `chol` and `lu_nopiv`
//! - `kernels`: reference leaf kernels on scalar blocks
//! - `random`, `util`: test matrices, norms and reference products
//!
//! # Example
//!
//! ```
//! use flashmat_core::hier;
//! use flashmat_linalg::{chol, random::random_spd_matrix, Uplo};
//! use flashmat_supermatrix::{QueueConfig, Supermatrix};
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(0);
//! let flat = random_spd_matrix::<f64, _>(&mut rng, 32);
//! let a = hier::create_hier_copy_of(&flat, &[8]).unwrap();
//!
//! let sm = Supermatrix::new(QueueConfig::default().with_num_threads(2)).unwrap();
//! sm.enable();
//! chol(&sm, Uplo::Lower, &a).unwrap();
//! assert_eq!(sm.num_tasks(), 0);
//! ```

pub mod cntl;
pub mod error;
pub mod kernels;
pub mod ops;
pub mod random;
pub mod types;
pub mod util;

// Re-export main types
pub use cntl::{Blocksize, Cntl, CntlBuilder, CntlError, CntlSet, Dim, MatrixType, Op, Variant};
pub use error::{LinalgError, Result};
pub use ops::chol::{chol, chol_with};
pub use ops::gemm::{gemm, gemm_with};
pub use ops::lu::{lu_nopiv, lu_nopiv_with};
pub use ops::scal::{scal, scal_with, scalr};
pub use ops::syrk::{syrk, syrk_with};
pub use ops::trsm::{trsm, trsm_with};
pub use types::{ApplySide, Diag, Trans, Uplo};
