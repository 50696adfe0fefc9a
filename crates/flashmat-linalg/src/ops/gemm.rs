//! General matrix-matrix multiply: `C := alpha op(A) op(B) + beta C`.

use flashmat_core::{determine_blocksize, part_1x2, part_2x1, Obj, Scalar, Side};
use flashmat_supermatrix::{Supermatrix, TaskParam, TaskSpec};
use tracing::debug;

use super::scal::scal_internal;
use super::{
    check_shape, dispatch_leaf, op_cols, op_rows, op_scalar_shape, op_width, route, unsupported,
    Route, Sweep,
};
use crate::cntl::{Cntl, CntlSet, Dim, Op};
use crate::error::Result;
use crate::kernels;
use crate::types::Trans;

/// `C := alpha op(A) op(B) + beta C` with the default trees for `c`.
#[allow(clippy::too_many_arguments)]
pub fn gemm<T: Scalar>(
    ctx: &Supermatrix,
    transa: Trans,
    transb: Trans,
    alpha: T,
    a: &Obj<T>,
    b: &Obj<T>,
    beta: T,
    c: &Obj<T>,
) -> Result<()> {
    let cntl = CntlSet::for_obj(c);
    gemm_with(ctx, transa, transb, alpha, a, b, beta, c, &cntl.gemm)
}

/// `C := alpha op(A) op(B) + beta C` with an explicit control tree.
///
/// # Errors
/// `ShapeMismatch` if `op(A)` is not `m x k`, or `op(B)` not `k x n`, for
/// `C` of shape `m x n`. Nothing is queued in that case.
#[allow(clippy::too_many_arguments)]
pub fn gemm_with<T: Scalar>(
    ctx: &Supermatrix,
    transa: Trans,
    transb: Trans,
    alpha: T,
    a: &Obj<T>,
    b: &Obj<T>,
    beta: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    let (m, n) = (c.scalar_length(), c.scalar_width());
    let (am, k) = op_scalar_shape(a, transa);
    check_shape((m, k), (am, k))?;
    check_shape((k, n), op_scalar_shape(b, transb))?;
    debug!(m, n, k, "gemm");
    ctx.run_scoped(|| gemm_internal(ctx, transa, transb, alpha, a, b, beta, c, cntl))
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn gemm_internal<T: Scalar>(
    ctx: &Supermatrix,
    transa: Trans,
    transb: Trans,
    alpha: T,
    a: &Obj<T>,
    b: &Obj<T>,
    beta: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    if c.is_empty() {
        return Ok(());
    }
    match route(Op::Gemm, cntl, c)? {
        Route::Recurse(sub) => gemm_internal(
            ctx,
            transa,
            transb,
            alpha,
            &a.single_block()?,
            &b.single_block()?,
            beta,
            &c.single_block()?,
            sub,
        ),
        Route::Leaf { queued } => {
            let (ta, tb, tc) = (a.clone(), b.clone(), c.clone());
            let k = op_width(a, transa);
            let spec = TaskSpec::new(Op::Gemm.name(), move || {
                kernels::gemm(
                    transa,
                    transb,
                    alpha,
                    &ta.scalar_view()?,
                    &tb.scalar_view()?,
                    beta,
                    &tc.scalar_view()?,
                )
            })
            .with_cost(2.0 * (c.length() * c.width() * k) as f64)
            .param("transa", TaskParam::Flag(transa.name()))
            .param("transb", TaskParam::Flag(transb.name()))
            .param("alpha", TaskParam::Float(alpha.real_f64()))
            .param("beta", TaskParam::Float(beta.real_f64()))
            .input(a)
            .input(b)
            .output(c);
            dispatch_leaf(ctx, queued, spec)
        }
        Route::Blocked(1) => gemm_blk_var1(ctx, transa, transb, alpha, a, b, beta, c, cntl),
        Route::Blocked(3) => gemm_blk_var3(ctx, transa, transb, alpha, a, b, beta, c, cntl),
        Route::Blocked(5) => gemm_blk_var5(ctx, transa, transb, alpha, a, b, beta, c, cntl),
        Route::Blocked(_) => Err(unsupported(cntl)),
    }
}

/// Row panels of `C` against row panels of `op(A)`.
#[allow(clippy::too_many_arguments)]
fn gemm_blk_var1<T: Scalar>(
    ctx: &Supermatrix,
    transa: Trans,
    transb: Trans,
    alpha: T,
    a: &Obj<T>,
    b: &Obj<T>,
    beta: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    let sub = cntl.sub(Op::Gemm)?;
    let bs = cntl.blocksize_for(Dim::M)?;
    let mut p = part_2x1(c, 0, Side::Top)?;
    while p.top.length() < c.length() {
        let mb = determine_blocksize(p.bottom.length(), bs);
        let r = p.repart(mb, Side::Bottom)?;
        let a1 = op_rows(a, transa, r.a0.length(), mb)?;
        gemm_internal(ctx, transa, transb, alpha, &a1, b, beta, &r.a1, sub)?;
        p = r.cont_with(Side::Top)?;
    }
    Ok(())
}

/// Column panels of `C` against column panels of `op(B)`.
#[allow(clippy::too_many_arguments)]
fn gemm_blk_var3<T: Scalar>(
    ctx: &Supermatrix,
    transa: Trans,
    transb: Trans,
    alpha: T,
    a: &Obj<T>,
    b: &Obj<T>,
    beta: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    let sub = cntl.sub(Op::Gemm)?;
    let bs = cntl.blocksize_for(Dim::N)?;
    let mut p = part_1x2(c, 0, Side::Left)?;
    while p.left.width() < c.width() {
        let nb = determine_blocksize(p.right.width(), bs);
        let r = p.repart(nb, Side::Right)?;
        let b1 = op_cols(b, transb, r.a0.width(), nb)?;
        gemm_internal(ctx, transa, transb, alpha, a, &b1, beta, &r.a1, sub)?;
        p = r.cont_with(Side::Left)?;
    }
    Ok(())
}

/// Rank-k updates along the inner dimension; `beta` applies to the first
/// one only.
#[allow(clippy::too_many_arguments)]
fn gemm_blk_var5<T: Scalar>(
    ctx: &Supermatrix,
    transa: Trans,
    transb: Trans,
    alpha: T,
    a: &Obj<T>,
    b: &Obj<T>,
    beta: T,
    c: &Obj<T>,
    cntl: &Cntl,
) -> Result<()> {
    let sub = cntl.sub(Op::Gemm)?;
    let k = op_width(a, transa);
    if k == 0 {
        if beta != T::one() {
            scal_internal(ctx, None, beta, c, cntl.sub(Op::Scal)?)?;
        }
        return Ok(());
    }
    let bs = cntl.blocksize_for(Dim::K)?;
    let mut beta = beta;
    let mut pa = Sweep::op_cols(a, transa)?;
    let mut pb = Sweep::op_rows(b, transb)?;
    while pa.remaining() > 0 {
        let kb = determine_blocksize(pa.remaining(), bs);
        let sa = pa.step(kb)?;
        let sb = pb.step(kb)?;
        gemm_internal(ctx, transa, transb, alpha, &sa.panel, &sb.panel, beta, c, sub)?;
        beta = T::one();
        pa = sa.next;
        pb = sb.next;
    }
    Ok(())
}
