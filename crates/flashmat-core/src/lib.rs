#![warn(missing_docs)]
//! Hierarchical matrix handles and the partition protocol
//!
//! This crate provides the data structures that blocked dense linear
//! algebra is written against:
//! - `Obj`: a view over a flat or hierarchical (matrix-of-matrices) handle
//! - `hier`: construction of hierarchical matrices and flat/hierarchical copies
//! - `partition`: the Partition / Repartition / Continue-with protocol
//! - `tensor`: N-dimensional views with a multi-mode partition protocol
//!
//! # Example
//!
//! ```
//! use flashmat_core::{hier, part_2x1, determine_blocksize, Obj, Side};
//!
//! let flat = Obj::<f64>::from_fn(10, 10, |i, j| if i == j { 2.0 } else { 0.0 });
//! let h = hier::create_hier_copy_of(&flat, &[4]).unwrap();
//! assert_eq!((h.length(), h.width()), (3, 3));
//!
//! // Sweep the block rows of `h` one at a time.
//! let mut p = part_2x1(&h, 0, Side::Top).unwrap();
//! let mut iterations = 0;
//! while p.top.length() < h.length() {
//!     let b = determine_blocksize(p.bottom.length(), 1);
//!     let r = p.repart(b, Side::Bottom).unwrap();
//!     iterations += 1;
//!     p = r.cont_with(Side::Top).unwrap();
//! }
//! assert_eq!(iterations, 3);
//! ```

pub mod buffer;
pub mod error;
pub mod grid;
pub mod hier;
pub mod obj;
pub mod partition;
pub mod scalar;
pub mod tensor;

// Re-export main types
pub use buffer::{BlockId, Buffer, BufferId};
pub use error::{FlashError, KernelError, Result};
pub use grid::BlockGrid;
pub use obj::{BlockKey, ElemKind, Obj, Region, ScalarView};
pub use partition::{
    determine_blocksize, merge_1x2, merge_2x1, merge_2x2, part_1x2, part_2x1, part_2x2, Part1x2,
    Part2x1, Part2x2, Quadrant, Repart1x3, Repart3x1, Repart3x3, Side,
};
pub use scalar::{Datatype, Scalar};
pub use tensor::{merge_mode, Direction, Part1x2Mode, Part2k, Repart1x3Mode, Repart3k, TensorView};
