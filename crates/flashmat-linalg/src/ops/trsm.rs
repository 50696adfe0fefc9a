//! Triangular solve with multiple right-hand sides.
//!
//! Left: `B := alpha op(A)^-1 B`. Right: `B := alpha B op(A)^-1`.

use flashmat_core::{determine_blocksize, part_1x2, part_2x1, part_2x2, Obj, Quadrant, Scalar, Side};
use flashmat_supermatrix::{Supermatrix, TaskParam, TaskSpec};
use tracing::debug;

use super::gemm::gemm_internal;
use super::{check_square, dispatch_leaf, route, unsupported, Route, Sweep};
use crate::cntl::{Cntl, CntlSet, Dim, Op};
use crate::error::Result;
use crate::kernels;
use crate::types::{ApplySide, Diag, Trans, Uplo};

/// Triangular solve with the default trees for `b`.
#[allow(clippy::too_many_arguments)]
pub fn trsm<T: Scalar>(
    ctx: &Supermatrix,
    side: ApplySide,
    uplo: Uplo,
    trans: Trans,
    diag: Diag,
    alpha: T,
    a: &Obj<T>,
    b: &Obj<T>,
) -> Result<()> {
    let cntl = CntlSet::for_obj(b);
    trsm_with(ctx, side, uplo, trans, diag, alpha, a, b, &cntl.trsm)
}

/// Triangular solve with an explicit control tree.
///
/// # Errors
/// `NotSquare` if `a` is not square, `ShapeMismatch` if `b` does not
/// conform to `a` on `side`. A zero on the diagonal of a non-unit `a`
/// surfaces as a kernel failure.
#[allow(clippy::too_many_arguments)]
pub fn trsm_with<T: Scalar>(
    ctx: &Supermatrix,
    side: ApplySide,
    uplo: Uplo,
    trans: Trans,
    diag: Diag,
    alpha: T,
    a: &Obj<T>,
    b: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    check_square(a)?;
    let t = a.scalar_length();
    let (m, n) = (b.scalar_length(), b.scalar_width());
    let conforming = match side {
        ApplySide::Left => m == t,
        ApplySide::Right => n == t,
    };
    if !conforming {
        return Err(flashmat_core::FlashError::ShapeMismatch {
            expected: vec![t, t],
            actual: vec![m, n],
        }
        .into());
    }
    debug!(m, n, side = side.name(), uplo = uplo.name(), "trsm");
    ctx.run_scoped(|| trsm_internal(ctx, side, uplo, trans, diag, alpha, a, b, cntl))
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn trsm_internal<T: Scalar>(
    ctx: &Supermatrix,
    side: ApplySide,
    uplo: Uplo,
    trans: Trans,
    diag: Diag,
    alpha: T,
    a: &Obj<T>,
    b: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    if b.is_empty() {
        return Ok(());
    }
    match route(Op::Trsm, cntl, b)? {
        Route::Recurse(sub) => trsm_internal(
            ctx,
            side,
            uplo,
            trans,
            diag,
            alpha,
            &a.single_block()?,
            &b.single_block()?,
            sub,
        ),
        Route::Leaf { queued } => {
            let (ta, tb) = (a.clone(), b.clone());
            let t = a.length();
            let spec = TaskSpec::new(Op::Trsm.name(), move || {
                kernels::trsm(
                    side,
                    uplo,
                    trans,
                    diag,
                    alpha,
                    &ta.scalar_view()?,
                    &tb.scalar_view()?,
                )
            })
            .with_cost((t * t * b.length().max(b.width())) as f64)
            .param("side", TaskParam::Flag(side.name()))
            .param("uplo", TaskParam::Flag(uplo.name()))
            .param("trans", TaskParam::Flag(trans.name()))
            .param("diag", TaskParam::Flag(diag.name()))
            .param("alpha", TaskParam::Float(alpha.real_f64()))
            .input(a)
            .output(b);
            dispatch_leaf(ctx, queued, spec)
        }
        Route::Blocked(1) => trsm_blk_var1(ctx, side, uplo, trans, diag, alpha, a, b, cntl),
        Route::Blocked(2) => trsm_blk_var2(ctx, side, uplo, trans, diag, alpha, a, b, cntl),
        Route::Blocked(_) => Err(unsupported(cntl)),
    }
}

/// Sweep the triangular dimension: update the next panel of `B` with the
/// panels already solved, then solve it against the diagonal block.
#[allow(clippy::too_many_arguments)]
fn trsm_blk_var1<T: Scalar>(
    ctx: &Supermatrix,
    side: ApplySide,
    uplo: Uplo,
    trans: Trans,
    diag: Diag,
    alpha: T,
    a: &Obj<T>,
    b: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    let sub_trsm = cntl.sub(Op::Trsm)?;
    let sub_gemm = cntl.sub(Op::Gemm)?;
    let bs = cntl.blocksize_for(Dim::K)?;
    // op(A) is lower triangular when exactly one of these holds.
    let lower = (uplo == Uplo::Lower) != (trans == Trans::Transpose);
    let forward = match side {
        ApplySide::Left => lower,
        ApplySide::Right => !lower,
    };
    let (from, toward) = if forward {
        (Quadrant::TL, Quadrant::BR)
    } else {
        (Quadrant::BR, Quadrant::TL)
    };

    let mut pa = part_2x2(a, 0, 0, from)?;
    let mut pb = match side {
        ApplySide::Left => Sweep::rows(b, forward)?,
        ApplySide::Right => Sweep::cols(b, forward)?,
    };
    while pb.remaining() > 0 {
        let tb = determine_blocksize(pb.remaining(), bs);
        let r = pa.repart(tb, tb, toward)?;
        let sb = pb.step(tb)?;
        // Stored block of A holding the part of op(A) that couples the
        // diagonal block to the panels already solved.
        let coupling = match (side, forward, trans) {
            (ApplySide::Left, true, Trans::NoTranspose)
            | (ApplySide::Right, true, Trans::Transpose) => &r.a10,
            (ApplySide::Left, true, Trans::Transpose)
            | (ApplySide::Right, true, Trans::NoTranspose) => &r.a01,
            (ApplySide::Left, false, Trans::NoTranspose)
            | (ApplySide::Right, false, Trans::Transpose) => &r.a12,
            (ApplySide::Left, false, Trans::Transpose)
            | (ApplySide::Right, false, Trans::NoTranspose) => &r.a21,
        };
        match side {
            ApplySide::Left => gemm_internal(
                ctx,
                trans,
                Trans::NoTranspose,
                -T::one(),
                coupling,
                &sb.done,
                alpha,
                &sb.panel,
                sub_gemm,
            )?,
            ApplySide::Right => gemm_internal(
                ctx,
                Trans::NoTranspose,
                trans,
                -T::one(),
                &sb.done,
                coupling,
                alpha,
                &sb.panel,
                sub_gemm,
            )?,
        }
        trsm_internal(ctx, side, uplo, trans, diag, T::one(), &r.a11, &sb.panel, sub_trsm)?;
        pa = r.cont_with(from)?;
        pb = sb.next;
    }
    Ok(())
}

/// Split `B` along the dimension the triangle does not touch; the panels
/// are independent solves.
#[allow(clippy::too_many_arguments)]
fn trsm_blk_var2<T: Scalar>(
    ctx: &Supermatrix,
    side: ApplySide,
    uplo: Uplo,
    trans: Trans,
    diag: Diag,
    alpha: T,
    a: &Obj<T>,
    b: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    let sub = cntl.sub(Op::Trsm)?;
    match side {
        ApplySide::Left => {
            let bs = cntl.blocksize_for(Dim::N)?;
            let mut p = part_1x2(b, 0, Side::Left)?;
            while p.left.width() < b.width() {
                let nb = determine_blocksize(p.right.width(), bs);
                let r = p.repart(nb, Side::Right)?;
                trsm_internal(ctx, side, uplo, trans, diag, alpha, a, &r.a1, sub)?;
                p = r.cont_with(Side::Left)?;
            }
        }
        ApplySide::Right => {
            let bs = cntl.blocksize_for(Dim::M)?;
            let mut p = part_2x1(b, 0, Side::Top)?;
            while p.top.length() < b.length() {
                let mb = determine_blocksize(p.bottom.length(), bs);
                let r = p.repart(mb, Side::Bottom)?;
                trsm_internal(ctx, side, uplo, trans, diag, alpha, a, &r.a1, sub)?;
                p = r.cont_with(Side::Top)?;
            }
        }
    }
    Ok(())
}
