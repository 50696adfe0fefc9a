//! Operations over flat and hierarchical matrices.
//!
//! Every operation has a public entry point (`chol`, `chol_with`, ...) that
//! checks shapes and runs the algorithm inside
//! [`Supermatrix::run_scoped`], so a queue that is enabled gets drained when
//! the outermost call returns. The `*_internal` functions walk the control
//! tree:
//! - a hierarchical `Subproblem` node over nested blocks unwraps one level
//!   and recurses with its sub-tree;
//! - a hierarchical node over scalar blocks submits the leaf kernel as a task;
//! - a blocked node runs its partition loop;
//! - a flat leaf node runs the kernel inline.

pub mod chol;
pub mod gemm;
pub mod lu;
pub mod scal;
pub mod syrk;
pub mod trsm;

use flashmat_core::{part_1x2, part_2x1, ElemKind, Obj, Part1x2, Part2x1, Scalar, Side};
use flashmat_supermatrix::{Supermatrix, TaskSpec};
use tracing::trace;

use crate::cntl::{Cntl, MatrixType, Op, Variant};
use crate::error::{LinalgError, Result};
use crate::types::Trans;

/// What one control-tree node asks for, given the operand it drives.
pub(crate) enum Route<'c> {
    /// Unwrap the 1x1 block views and recurse with this tree.
    Recurse(&'c Cntl),
    /// Run the kernel; through the queue if `queued`.
    Leaf { queued: bool },
    /// Run the numbered blocked variant.
    Blocked(u8),
}

pub(crate) fn route<'c, T: Scalar>(op: Op, cntl: &'c Cntl, driver: &Obj<T>) -> Result<Route<'c>> {
    if cntl.op() != op {
        return Err(crate::cntl::CntlError::SubtreeOpMismatch {
            slot: op,
            actual: cntl.op(),
        }
        .into());
    }
    match (cntl.matrix_type(), driver.elem_kind(), cntl.variant()) {
        (MatrixType::Hierarchical, ElemKind::Matrix, Variant::Subproblem) => {
            Ok(Route::Recurse(cntl.sub(op)?))
        }
        (MatrixType::Hierarchical, ElemKind::Scalar, _) => Ok(Route::Leaf { queued: true }),
        (_, _, Variant::Blocked(n)) => Ok(Route::Blocked(n)),
        (MatrixType::Flat, ElemKind::Scalar, v) if v.is_leaf() => Ok(Route::Leaf { queued: false }),
        _ => Err(unsupported(cntl)),
    }
}

pub(crate) fn unsupported(cntl: &Cntl) -> LinalgError {
    LinalgError::UnsupportedVariant {
        op: cntl.op(),
        variant: cntl.variant(),
        matrix_type: cntl.matrix_type(),
    }
}

/// Queue a leaf task, or run it on the spot.
pub(crate) fn dispatch_leaf(ctx: &Supermatrix, queued: bool, spec: TaskSpec) -> Result<()> {
    if queued {
        // Safety: every leaf declares each block its kernel reads or writes.
        unsafe { ctx.push(spec) }.map_err(LinalgError::from)
    } else {
        trace!(name = spec.name(), "inline leaf");
        spec.run_now().map_err(LinalgError::from)
    }
}

/// Rows of `op(a)`, in elements or blocks.
pub(crate) fn op_length<T: Scalar>(a: &Obj<T>, trans: Trans) -> usize {
    match trans {
        Trans::NoTranspose => a.length(),
        Trans::Transpose => a.width(),
    }
}

/// Columns of `op(a)`, in elements or blocks.
pub(crate) fn op_width<T: Scalar>(a: &Obj<T>, trans: Trans) -> usize {
    match trans {
        Trans::NoTranspose => a.width(),
        Trans::Transpose => a.length(),
    }
}

/// Scalar shape of `op(a)`.
pub(crate) fn op_scalar_shape<T: Scalar>(a: &Obj<T>, trans: Trans) -> (usize, usize) {
    match trans {
        Trans::NoTranspose => (a.scalar_length(), a.scalar_width()),
        Trans::Transpose => (a.scalar_width(), a.scalar_length()),
    }
}

/// The `m x n` block of `op(a)` at `(i, j)`, as a view of `a`.
pub(crate) fn op_block<T: Scalar>(
    a: &Obj<T>,
    trans: Trans,
    (i, j): (usize, usize),
    (m, n): (usize, usize),
) -> Result<Obj<T>> {
    let view = match trans {
        Trans::NoTranspose => a.view(i, j, m, n),
        Trans::Transpose => a.view(j, i, n, m),
    };
    view.map_err(LinalgError::from)
}

/// Rows `[i, i + b)` of `op(a)`.
pub(crate) fn op_rows<T: Scalar>(a: &Obj<T>, trans: Trans, i: usize, b: usize) -> Result<Obj<T>> {
    op_block(a, trans, (i, 0), (b, op_width(a, trans)))
}

/// Columns `[j, j + b)` of `op(a)`.
pub(crate) fn op_cols<T: Scalar>(a: &Obj<T>, trans: Trans, j: usize, b: usize) -> Result<Obj<T>> {
    op_block(a, trans, (0, j), (op_length(a, trans), b))
}

/// A 2x1 or 1x2 partition swept one panel at a time.
///
/// Forward sweeps start at the top (left) edge, backward ones at the
/// bottom (right) edge. The swept part only grows through `repart` and
/// `cont_with`, so panels are always views of the partitioned operand.
pub(crate) struct Sweep<T> {
    part: SweepPart<T>,
    forward: bool,
}

enum SweepPart<T> {
    Rows(Part2x1<T>),
    Cols(Part1x2<T>),
}

/// One step of a [`Sweep`].
pub(crate) struct Step<T> {
    /// Everything swept before this step.
    pub(crate) done: Obj<T>,
    /// The panel taken by this step.
    pub(crate) panel: Obj<T>,
    /// The sweep with `panel` folded into the swept part.
    pub(crate) next: Sweep<T>,
}

impl<T: Scalar> Sweep<T> {
    /// Sweep the rows of `a`.
    pub(crate) fn rows(a: &Obj<T>, forward: bool) -> Result<Self> {
        let side = if forward { Side::Top } else { Side::Bottom };
        Ok(Self {
            part: SweepPart::Rows(part_2x1(a, 0, side)?),
            forward,
        })
    }

    /// Sweep the columns of `a`.
    pub(crate) fn cols(a: &Obj<T>, forward: bool) -> Result<Self> {
        let side = if forward { Side::Left } else { Side::Right };
        Ok(Self {
            part: SweepPart::Cols(part_1x2(a, 0, side)?),
            forward,
        })
    }

    /// Sweep the rows of `op(a)` from the top.
    pub(crate) fn op_rows(a: &Obj<T>, trans: Trans) -> Result<Self> {
        match trans {
            Trans::NoTranspose => Self::rows(a, true),
            Trans::Transpose => Self::cols(a, true),
        }
    }

    /// Sweep the columns of `op(a)` from the left.
    pub(crate) fn op_cols(a: &Obj<T>, trans: Trans) -> Result<Self> {
        match trans {
            Trans::NoTranspose => Self::cols(a, true),
            Trans::Transpose => Self::rows(a, true),
        }
    }

    /// Rows or columns not swept yet.
    pub(crate) fn remaining(&self) -> usize {
        match (&self.part, self.forward) {
            (SweepPart::Rows(p), true) => p.bottom.length(),
            (SweepPart::Rows(p), false) => p.top.length(),
            (SweepPart::Cols(p), true) => p.right.width(),
            (SweepPart::Cols(p), false) => p.left.width(),
        }
    }

    /// Take the next `b` rows or columns.
    pub(crate) fn step(&self, b: usize) -> Result<Step<T>> {
        let forward = self.forward;
        match &self.part {
            SweepPart::Rows(p) => {
                let (grow, fold) = if forward {
                    (Side::Bottom, Side::Top)
                } else {
                    (Side::Top, Side::Bottom)
                };
                let r = p.repart(b, grow)?;
                let next = Sweep {
                    part: SweepPart::Rows(r.cont_with(fold)?),
                    forward,
                };
                let done = if forward { r.a0 } else { r.a2 };
                Ok(Step {
                    done,
                    panel: r.a1,
                    next,
                })
            }
            SweepPart::Cols(p) => {
                let (grow, fold) = if forward {
                    (Side::Right, Side::Left)
                } else {
                    (Side::Left, Side::Right)
                };
                let r = p.repart(b, grow)?;
                let next = Sweep {
                    part: SweepPart::Cols(r.cont_with(fold)?),
                    forward,
                };
                let done = if forward { r.a0 } else { r.a2 };
                Ok(Step {
                    done,
                    panel: r.a1,
                    next,
                })
            }
        }
    }
}

pub(crate) fn check_square<T: Scalar>(a: &Obj<T>) -> Result<()> {
    let (m, n) = (a.scalar_length(), a.scalar_width());
    if m != n {
        return Err(flashmat_core::FlashError::NotSquare { m, n }.into());
    }
    Ok(())
}

pub(crate) fn check_shape(expected: (usize, usize), actual: (usize, usize)) -> Result<()> {
    if expected != actual {
        return Err(flashmat_core::FlashError::ShapeMismatch {
            expected: vec![expected.0, expected.1],
            actual: vec![actual.0, actual.1],
        }
        .into());
    }
    Ok(())
}
