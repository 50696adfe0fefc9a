//! LU factorization without pivoting, `A = L U` in place.
//!
//! `L` is unit lower triangular and stored below the diagonal; `U` takes
//! the diagonal and everything above it.

use flashmat_core::{determine_blocksize, part_2x2, Obj, Quadrant, Scalar};
use flashmat_supermatrix::{Supermatrix, TaskSpec};
use tracing::debug;

use super::gemm::gemm_internal;
use super::trsm::trsm_internal;
use super::{dispatch_leaf, route, unsupported, Route};
use crate::cntl::{Cntl, CntlSet, Dim, Op};
use crate::error::Result;
use crate::kernels;
use crate::types::{ApplySide, Diag, Trans, Uplo};

/// Factor `a` with the default trees.
pub fn lu_nopiv<T: Scalar>(ctx: &Supermatrix, a: &Obj<T>) -> Result<()> {
    let cntl = CntlSet::for_obj(a);
    lu_nopiv_with(ctx, a, &cntl.lu_nopiv)
}

/// Factor with an explicit control tree.
///
/// A zero pivot fails the kernel that meets it with `Singular`.
pub fn lu_nopiv_with<T: Scalar>(ctx: &Supermatrix, a: &Obj<T>, cntl: &Cntl) -> Result<()> {
    debug!(m = a.scalar_length(), n = a.scalar_width(), "lu_nopiv");
    ctx.run_scoped(|| lu_internal(ctx, a, cntl))
}

pub(crate) fn lu_internal<T: Scalar>(ctx: &Supermatrix, a: &Obj<T>, cntl: &Cntl) -> Result<()> {
    if a.is_empty() {
        return Ok(());
    }
    match route(Op::LuNopiv, cntl, a)? {
        Route::Recurse(sub) => lu_internal(ctx, &a.single_block()?, sub),
        Route::Leaf { queued } => {
            let ta = a.clone();
            let (m, n) = (a.length(), a.width());
            let k = m.min(n);
            let spec = TaskSpec::new(Op::LuNopiv.name(), move || {
                kernels::lu_nopiv(&ta.scalar_view()?)
            })
            .with_cost((m * n * k) as f64 - ((m + n) * k * k) as f64 / 2.0 + (k * k * k) as f64 / 3.0)
            .output(a);
            dispatch_leaf(ctx, queued, spec)
        }
        Route::Blocked(5) => lu_blk_var5(ctx, a, cntl),
        Route::Blocked(_) => Err(unsupported(cntl)),
    }
}

/// Right-looking: factor the diagonal block, solve for the `U` row panel and
/// the `L` column panel, then update the trailing matrix.
fn lu_blk_var5<T: Scalar>(ctx: &Supermatrix, a: &Obj<T>, cntl: &Cntl) -> Result<()> {
    let sub_lu = cntl.sub(Op::LuNopiv)?;
    let sub_trsm = cntl.sub(Op::Trsm)?;
    let sub_gemm = cntl.sub(Op::Gemm)?;
    let bs = cntl.blocksize_for(Dim::M)?;
    let one = T::one();

    let mut p = part_2x2(a, 0, 0, Quadrant::TL)?;
    while p.tl.length() < a.length() && p.tl.width() < a.width() {
        let b = determine_blocksize(p.br.length().min(p.br.width()), bs);
        let r = p.repart(b, b, Quadrant::BR)?;

        lu_internal(ctx, &r.a11, sub_lu)?;
        trsm_internal(
            ctx,
            ApplySide::Left,
            Uplo::Lower,
            Trans::NoTranspose,
            Diag::Unit,
            one,
            &r.a11,
            &r.a12,
            sub_trsm,
        )?;
        trsm_internal(
            ctx,
            ApplySide::Right,
            Uplo::Upper,
            Trans::NoTranspose,
            Diag::NonUnit,
            one,
            &r.a11,
            &r.a21,
            sub_trsm,
        )?;
        gemm_internal(
            ctx,
            Trans::NoTranspose,
            Trans::NoTranspose,
            -one,
            &r.a21,
            &r.a12,
            one,
            &r.a22,
            sub_gemm,
        )?;

        p = r.cont_with(Quadrant::TL)?;
    }
    Ok(())
}
