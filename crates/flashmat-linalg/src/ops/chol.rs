//! Cholesky factorization `A = L L^T` or `A = U^T U`, in place.

use flashmat_core::{determine_blocksize, part_2x2, Obj, Quadrant, Scalar};
use flashmat_supermatrix::{Supermatrix, TaskParam, TaskSpec};
use tracing::debug;

use super::syrk::syrk_internal;
use super::trsm::trsm_internal;
use super::{check_square, dispatch_leaf, route, unsupported, Route};
use crate::cntl::{Cntl, CntlSet, Dim, Op};
use crate::error::Result;
use crate::kernels;
use crate::types::{ApplySide, Diag, Trans, Uplo};

/// Factor the `uplo` triangle of `a` with the default trees.
///
/// The other triangle is neither read nor written.
pub fn chol<T: Scalar>(ctx: &Supermatrix, uplo: Uplo, a: &Obj<T>) -> Result<()> {
    let cntl = CntlSet::for_obj(a);
    chol_with(ctx, uplo, a, &cntl.chol)
}

/// Factor with an explicit control tree.
///
/// # Errors
/// `NotSquare` before anything runs. A non-positive pivot surfaces as
/// `NotPositiveDefinite` from the failing kernel: directly when the queue is
/// disabled, inside `QueueError::TaskFailed` when it is enabled.
pub fn chol_with<T: Scalar>(ctx: &Supermatrix, uplo: Uplo, a: &Obj<T>, cntl: &Cntl) -> Result<()> {
    check_square(a)?;
    debug!(n = a.scalar_length(), uplo = uplo.name(), "chol");
    ctx.run_scoped(|| chol_internal(ctx, uplo, a, cntl))
}

pub(crate) fn chol_internal<T: Scalar>(
    ctx: &Supermatrix,
    uplo: Uplo,
    a: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    if a.is_empty() {
        return Ok(());
    }
    match route(Op::Chol, cntl, a)? {
        Route::Recurse(sub) => chol_internal(ctx, uplo, &a.single_block()?, sub),
        Route::Leaf { queued } => {
            let ta = a.clone();
            let n = a.length() as f64;
            let spec = TaskSpec::new(Op::Chol.name(), move || {
                kernels::chol(uplo, &ta.scalar_view()?)
            })
            .with_cost(n * n * n / 3.0)
            .param("uplo", TaskParam::Flag(uplo.name()))
            .output(a);
            dispatch_leaf(ctx, queued, spec)
        }
        Route::Blocked(3) => chol_blk_var3(ctx, uplo, a, cntl),
        Route::Blocked(_) => Err(unsupported(cntl)),
    }
}

/// Right-looking: factor the diagonal block, solve the panel below (or
/// beside) it, then downdate the trailing matrix.
fn chol_blk_var3<T: Scalar>(ctx: &Supermatrix, uplo: Uplo, a: &Obj<T>, cntl: &Cntl) -> Result<()> {
    let sub_chol = cntl.sub(Op::Chol)?;
    let sub_trsm = cntl.sub(Op::Trsm)?;
    let sub_syrk = cntl.sub(Op::Syrk)?;
    let bs = cntl.blocksize_for(Dim::M)?;
    let one = T::one();

    let mut p = part_2x2(a, 0, 0, Quadrant::TL)?;
    while p.tl.length() < a.length() {
        let b = determine_blocksize(p.br.length(), bs);
        let r = p.repart(b, b, Quadrant::BR)?;

        chol_internal(ctx, uplo, &r.a11, sub_chol)?;
        match uplo {
            Uplo::Lower => {
                trsm_internal(
                    ctx,
                    ApplySide::Right,
                    Uplo::Lower,
                    Trans::Transpose,
                    Diag::NonUnit,
                    one,
                    &r.a11,
                    &r.a21,
                    sub_trsm,
                )?;
                syrk_internal(
                    ctx,
                    Uplo::Lower,
                    Trans::NoTranspose,
                    -one,
                    &r.a21,
                    one,
                    &r.a22,
                    sub_syrk,
                )?;
            }
            Uplo::Upper => {
                trsm_internal(
                    ctx,
                    ApplySide::Left,
                    Uplo::Upper,
                    Trans::Transpose,
                    Diag::NonUnit,
                    one,
                    &r.a11,
                    &r.a12,
                    sub_trsm,
                )?;
                syrk_internal(
                    ctx,
                    Uplo::Upper,
                    Trans::Transpose,
                    -one,
                    &r.a12,
                    one,
                    &r.a22,
                    sub_syrk,
                )?;
            }
        }

        p = r.cont_with(Quadrant::TL)?;
    }
    Ok(())
}
