//! Symmetric rank-k update: `C := alpha op(A) op(A)^T + beta C` on one
//! triangle of `C`.

use flashmat_core::{determine_blocksize, part_2x2, Obj, Quadrant, Scalar};
use flashmat_supermatrix::{Supermatrix, TaskParam, TaskSpec};
use tracing::debug;

use super::gemm::gemm_internal;
use super::scal::scal_internal;
use super::{
    check_shape, check_square, dispatch_leaf, op_rows, op_scalar_shape, op_width, route,
    unsupported, Route, Sweep,
};
use crate::cntl::{Cntl, CntlSet, Dim, Op};
use crate::error::Result;
use crate::kernels;
use crate::types::{Trans, Uplo};

/// Rank-k update of the `uplo` triangle of `c` with the default trees.
#[allow(clippy::too_many_arguments)]
pub fn syrk<T: Scalar>(
    ctx: &Supermatrix,
    uplo: Uplo,
    trans: Trans,
    alpha: T,
    a: &Obj<T>,
    beta: T,
    c: &Obj<T>,
) -> Result<()> {
    let cntl = CntlSet::for_obj(c);
    syrk_with(ctx, uplo, trans, alpha, a, beta, c, &cntl.syrk)
}

/// Rank-k update with an explicit control tree.
#[allow(clippy::too_many_arguments)]
pub fn syrk_with<T: Scalar>(
    ctx: &Supermatrix,
    uplo: Uplo,
    trans: Trans,
    alpha: T,
    a: &Obj<T>,
    beta: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    check_square(c)?;
    let n = c.scalar_length();
    let (an, k) = op_scalar_shape(a, trans);
    check_shape((n, k), (an, k))?;
    debug!(n, k, uplo = uplo.name(), "syrk");
    ctx.run_scoped(|| syrk_internal(ctx, uplo, trans, alpha, a, beta, c, cntl))
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn syrk_internal<T: Scalar>(
    ctx: &Supermatrix,
    uplo: Uplo,
    trans: Trans,
    alpha: T,
    a: &Obj<T>,
    beta: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    if c.is_empty() {
        return Ok(());
    }
    match route(Op::Syrk, cntl, c)? {
        Route::Recurse(sub) => syrk_internal(
            ctx,
            uplo,
            trans,
            alpha,
            &a.single_block()?,
            beta,
            &c.single_block()?,
            sub,
        ),
        Route::Leaf { queued } => {
            let (ta, tc) = (a.clone(), c.clone());
            let n = c.length();
            let spec = TaskSpec::new(Op::Syrk.name(), move || {
                kernels::syrk(uplo, trans, alpha, &ta.scalar_view()?, beta, &tc.scalar_view()?)
            })
            .with_cost((n * n * op_width(a, trans)) as f64)
            .param("uplo", TaskParam::Flag(uplo.name()))
            .param("trans", TaskParam::Flag(trans.name()))
            .param("alpha", TaskParam::Float(alpha.real_f64()))
            .param("beta", TaskParam::Float(beta.real_f64()))
            .input(a)
            .output(c);
            dispatch_leaf(ctx, queued, spec)
        }
        Route::Blocked(2) => syrk_blk_var2(ctx, uplo, trans, alpha, a, beta, c, cntl),
        Route::Blocked(5) => syrk_blk_var5(ctx, uplo, trans, alpha, a, beta, c, cntl),
        Route::Blocked(_) => Err(unsupported(cntl)),
    }
}

/// Sweep the diagonal of `C`: a rank-k update of each diagonal block and a
/// `gemm` for the panel beside it.
#[allow(clippy::too_many_arguments)]
fn syrk_blk_var2<T: Scalar>(
    ctx: &Supermatrix,
    uplo: Uplo,
    trans: Trans,
    alpha: T,
    a: &Obj<T>,
    beta: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    let sub_syrk = cntl.sub(Op::Syrk)?;
    let sub_gemm = cntl.sub(Op::Gemm)?;
    let bs = cntl.blocksize_for(Dim::M)?;
    let n = c.length();
    let mut p = part_2x2(c, 0, 0, Quadrant::TL)?;
    while p.tl.length() < n {
        let b = determine_blocksize(p.br.length(), bs);
        let r = p.repart(b, b, Quadrant::BR)?;
        let i = r.a00.length();
        let a1 = op_rows(a, trans, i, b)?;
        let a2 = op_rows(a, trans, i + b, n - i - b)?;
        syrk_internal(ctx, uplo, trans, alpha, &a1, beta, &r.a11, sub_syrk)?;
        match uplo {
            Uplo::Lower => gemm_internal(
                ctx,
                trans,
                trans.flip(),
                alpha,
                &a2,
                &a1,
                beta,
                &r.a21,
                sub_gemm,
            )?,
            Uplo::Upper => gemm_internal(
                ctx,
                trans,
                trans.flip(),
                alpha,
                &a1,
                &a2,
                beta,
                &r.a12,
                sub_gemm,
            )?,
        }
        p = r.cont_with(Quadrant::TL)?;
    }
    Ok(())
}

/// Rank-k updates along the inner dimension; `beta` applies to the first
/// one only.
#[allow(clippy::too_many_arguments)]
fn syrk_blk_var5<T: Scalar>(
    ctx: &Supermatrix,
    uplo: Uplo,
    trans: Trans,
    alpha: T,
    a: &Obj<T>,
    beta: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    let sub = cntl.sub(Op::Syrk)?;
    let k = op_width(a, trans);
    if k == 0 {
        if beta != T::one() {
            scal_internal(ctx, Some(uplo), beta, c, cntl.sub(Op::Scal)?)?;
        }
        return Ok(());
    }
    let bs = cntl.blocksize_for(Dim::K)?;
    let mut beta = beta;
    let mut pa = Sweep::op_cols(a, trans)?;
    while pa.remaining() > 0 {
        let kb = determine_blocksize(pa.remaining(), bs);
        let sa = pa.step(kb)?;
        syrk_internal(ctx, uplo, trans, alpha, &sa.panel, beta, c, sub)?;
        beta = T::one();
        pa = sa.next;
    }
    Ok(())
}
