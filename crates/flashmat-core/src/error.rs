//! Error types for matrix handles and the partition protocol.

use thiserror::Error;

/// Result type for flashmat-core operations.
pub type Result<T> = std::result::Result<T, FlashError>;

/// Errors raised at the API boundary before any work is done.
///
/// All of these describe caller bugs (bad dimensions, mismatched views,
/// a malformed partition loop); none of them are recoverable at runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    /// Two operands have incompatible shapes.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },

    /// A square-only operation received a rectangular matrix.
    #[error("Matrix must be square, got {m}x{n}")]
    NotSquare {
        /// Number of rows
        m: usize,
        /// Number of columns
        n: usize,
    },

    /// A blocksize of zero was supplied.
    #[error("Invalid blocksize {0}: blocksizes must be positive")]
    InvalidBlocksize(usize),

    /// Repartition asked for more than the source side holds.
    #[error("Requested {requested} from a side of extent {available}")]
    ExceedsRemaining {
        /// Requested extent
        requested: usize,
        /// Extent left on the source side
        available: usize,
    },

    /// Views handed to a merge or continue-with are not adjacent pieces of
    /// the same object.
    #[error("Views are not adjacent: {reason}")]
    NotAdjacent {
        /// Which check failed
        reason: String,
    },

    /// A side or quadrant that makes no sense for the partition shape.
    #[error("Side {side} is not valid for a {shape} partition")]
    InvalidSide {
        /// Offending side, as text
        side: String,
        /// Partition shape, e.g. "2x1"
        shape: &'static str,
    },

    /// A hierarchical view was expected to hold exactly one block.
    #[error("Expected a 1x1 block view, got {m}x{n}")]
    NotSingleBlock {
        /// Rows of the view (in blocks)
        m: usize,
        /// Columns of the view (in blocks)
        n: usize,
    },

    /// An operation needed scalar elements and got nested blocks, or the
    /// other way around.
    #[error("Element kind mismatch: expected {expected}, got {actual}")]
    ElemKindMismatch {
        /// Expected element kind
        expected: &'static str,
        /// Element kind found
        actual: &'static str,
    },

    /// Tensor mode index out of range or repeated.
    #[error("Invalid mode {mode} for a tensor of order {order}")]
    InvalidMode {
        /// Offending mode
        mode: usize,
        /// Tensor order
        order: usize,
    },

    /// Element or block index outside a view.
    #[error("Index {index:?} out of bounds for shape {shape:?}")]
    IndexOutOfBounds {
        /// Requested index
        index: Vec<usize>,
        /// Shape of the view
        shape: Vec<usize>,
    },

    /// Buffer length does not match the requested shape.
    #[error("Buffer of length {len} cannot hold shape {shape:?}")]
    BufferLength {
        /// Supplied length
        len: usize,
        /// Requested shape
        shape: Vec<usize>,
    },
}

/// Error code returned by a leaf kernel.
///
/// Kernel errors indicate a logic or dimension bug, or a numerically
/// singular input; the runtime never retries them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    /// Zero pivot met during a factorization without pivoting.
    #[error("Singular matrix: zero pivot at index {index}")]
    Singular {
        /// Index of the offending pivot
        index: usize,
    },

    /// Non-positive diagonal met during Cholesky.
    #[error("Matrix is not positive definite: diagonal {index} is {value}")]
    NotPositiveDefinite {
        /// Index of the offending diagonal entry
        index: usize,
        /// Value under the square root
        value: f64,
    },

    /// Operand dimensions do not agree.
    #[error("Kernel dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Operand does not hold scalar elements.
    #[error(transparent)]
    Operand(#[from] FlashError),

    /// The kernel panicked; the message is preserved.
    #[error("Kernel panicked: {0}")]
    Panicked(String),

    /// Accelerator transfer failed.
    #[error("Device transfer failed: {0}")]
    Device(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FlashError::ExceedsRemaining {
            requested: 4,
            available: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains('4'));
        assert!(msg.contains('3'));

        let err = KernelError::NotPositiveDefinite {
            index: 2,
            value: -1.0,
        };
        assert!(format!("{}", err).contains("diagonal 2"));
    }

    #[test]
    fn test_kernel_error_from_flash_error() {
        let err: KernelError = FlashError::InvalidBlocksize(0).into();
        assert!(matches!(err, KernelError::Operand(FlashError::InvalidBlocksize(0))));
    }
}
