//! Error type for the linear-algebra operations.

use flashmat_core::{FlashError, KernelError};
use flashmat_supermatrix::QueueError;
use thiserror::Error;

use crate::cntl::{CntlError, MatrixType, Op, Variant};

/// Result type for flashmat-linalg operations.
pub type Result<T> = std::result::Result<T, LinalgError>;

/// Errors from a linear-algebra call.
///
/// Shape and control-tree errors are raised before any task is queued.
/// Kernel failures of queued tasks arrive as [`QueueError::TaskFailed`]
/// once the queue has run.
#[derive(Error, Debug)]
pub enum LinalgError {
    /// Bad operand shape or partition.
    #[error(transparent)]
    Flash(#[from] FlashError),

    /// Queue failure, including failed tasks.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A kernel run inline failed.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// Malformed control tree.
    #[error(transparent)]
    Cntl(#[from] CntlError),

    /// The tree names a variant that cannot run on this operand.
    #[error("{op}: {variant} cannot run on a {matrix_type:?} tree over this operand")]
    UnsupportedVariant {
        /// Operation
        op: Op,
        /// Variant of the tree node
        variant: Variant,
        /// Matrix type of the tree node
        matrix_type: MatrixType,
    },
}

impl LinalgError {
    /// Kernel errors carried by this error, whether the kernel ran inline
    /// or as a queued task.
    pub fn kernel_errors(&self) -> Vec<&KernelError> {
        match self {
            LinalgError::Kernel(e) => vec![e],
            LinalgError::Queue(q) => q.kernel_errors(),
            _ => Vec::new(),
        }
    }
}
