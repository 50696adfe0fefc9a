//! `C := alpha C`, on the whole matrix or on one triangle.

use flashmat_core::{determine_blocksize, part_1x2, part_2x1, Obj, Scalar, Side};
use flashmat_supermatrix::{Supermatrix, TaskParam, TaskSpec};
use tracing::debug;

use super::{check_square, dispatch_leaf, route, unsupported, Route};
use crate::cntl::{Cntl, CntlSet, Dim, Op};
use crate::error::Result;
use crate::kernels;
use crate::types::Uplo;

/// Scale every element of `c` by `alpha`.
pub fn scal<T: Scalar>(ctx: &Supermatrix, alpha: T, c: &Obj<T>) -> Result<()> {
    scal_with(ctx, None, alpha, c, &CntlSet::for_obj(c).scal)
}

/// Scale the `uplo` triangle of the square matrix `c` by `alpha`.
pub fn scalr<T: Scalar>(ctx: &Supermatrix, uplo: Uplo, alpha: T, c: &Obj<T>) -> Result<()> {
    scal_with(ctx, Some(uplo), alpha, c, &CntlSet::for_obj(c).scal)
}

/// Scale `c`, or its `uplo` triangle, with an explicit control tree.
pub fn scal_with<T: Scalar>(
    ctx: &Supermatrix,
    uplo: Option<Uplo>,
    alpha: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    if uplo.is_some() {
        check_square(c)?;
    }
    debug!(m = c.scalar_length(), n = c.scalar_width(), "scal");
    ctx.run_scoped(|| scal_internal(ctx, uplo, alpha, c, cntl))
}

pub(crate) fn scal_internal<T: Scalar>(
    ctx: &Supermatrix,
    uplo: Option<Uplo>,
    alpha: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    if c.is_empty() {
        return Ok(());
    }
    match route(Op::Scal, cntl, c)? {
        Route::Recurse(sub) => scal_internal(ctx, uplo, alpha, &c.single_block()?, sub),
        Route::Leaf { queued } => {
            let target = c.clone();
            let mut spec = TaskSpec::new(Op::Scal.name(), move || {
                kernels::scal(uplo, alpha, &target.scalar_view()?);
                Ok(())
            })
            .with_cost((c.length() * c.width()) as f64)
            .param("alpha", TaskParam::Float(alpha.real_f64()));
            if let Some(u) = uplo {
                spec = spec.param("uplo", TaskParam::Flag(u.name()));
            }
            dispatch_leaf(ctx, queued, spec.output(c))
        }
        Route::Blocked(1) => scal_blk_var1(ctx, uplo, alpha, c, cntl),
        Route::Blocked(2) => scal_blk_var2(ctx, uplo, alpha, c, cntl),
        Route::Blocked(_) => Err(unsupported(cntl)),
    }
}

/// Sweep row panels top to bottom.
fn scal_blk_var1<T: Scalar>(
    ctx: &Supermatrix,
    uplo: Option<Uplo>,
    alpha: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    let sub = cntl.sub(Op::Scal)?;
    let bs = cntl.blocksize_for(Dim::M)?;
    let n = c.width();
    let mut p = part_2x1(c, 0, Side::Top)?;
    while p.top.length() < c.length() {
        let b = determine_blocksize(p.bottom.length(), bs);
        let r = p.repart(b, Side::Bottom)?;
        let i = r.a0.length();
        match uplo {
            None => scal_internal(ctx, None, alpha, &r.a1, sub)?,
            Some(Uplo::Lower) => {
                scal_internal(ctx, None, alpha, &r.a1.view(0, 0, b, i)?, sub)?;
                scal_internal(ctx, uplo, alpha, &r.a1.view(0, i, b, b)?, sub)?;
            }
            Some(Uplo::Upper) => {
                scal_internal(ctx, uplo, alpha, &r.a1.view(0, i, b, b)?, sub)?;
                scal_internal(ctx, None, alpha, &r.a1.view(0, i + b, b, n - i - b)?, sub)?;
            }
        }
        p = r.cont_with(Side::Top)?;
    }
    Ok(())
}

/// Sweep column panels left to right.
fn scal_blk_var2<T: Scalar>(
    ctx: &Supermatrix,
    uplo: Option<Uplo>,
    alpha: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    let sub = cntl.sub(Op::Scal)?;
    let bs = cntl.blocksize_for(Dim::N)?;
    let m = c.length();
    let mut p = part_1x2(c, 0, Side::Left)?;
    while p.left.width() < c.width() {
        let b = determine_blocksize(p.right.width(), bs);
        let r = p.repart(b, Side::Right)?;
        let j = r.a0.width();
        match uplo {
            None => scal_internal(ctx, None, alpha, &r.a1, sub)?,
            Some(Uplo::Lower) => {
                scal_internal(ctx, uplo, alpha, &r.a1.view(j, 0, b, b)?, sub)?;
                scal_internal(ctx, None, alpha, &r.a1.view(j + b, 0, m - j - b, b)?, sub)?;
            }
            Some(Uplo::Upper) => {
                scal_internal(ctx, None, alpha, &r.a1.view(0, 0, j, b)?, sub)?;
                scal_internal(ctx, uplo, alpha, &r.a1.view(j, 0, b, b)?, sub)?;
            }
        }
        p = r.cont_with(Side::Left)?;
    }
    Ok(())
}
