//! Control trees.
//!
//! A [`Cntl`] node tells an operation which algorithmic variant to run at
//! one level, with which blocksize, and which trees to hand to the
//! sub-operations that variant calls. Nodes are immutable once built and
//! shared through `Arc`, so one tree serves every call.
//!
//! The sub-trees a variant needs are fixed by [`Op::required_subops`];
//! [`CntlBuilder::build`] refuses a node that lacks one of them.

use std::fmt;
use std::sync::{Arc, LazyLock};

use flashmat_core::{FlashError, Obj, Scalar};
use thiserror::Error;

/// Blocksize used by [`CntlSet::flat_default`] when none is given.
pub const DEFAULT_FLAT_BLOCKSIZE: usize = 128;

/// Ratio between the inner and outer blocksize of the default flat trees.
pub const DEFAULT_INNER_RATIO: f64 = 0.25;

/// Operations that can be driven by a control tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `C := alpha C`.
    Scal,
    /// `C := alpha op(A) op(B) + beta C`.
    Gemm,
    /// `C := alpha op(A) op(A)^T + beta C` on one triangle.
    Syrk,
    /// Triangular solve with multiple right-hand sides.
    Trsm,
    /// Cholesky factorization.
    Chol,
    /// LU factorization without pivoting.
    LuNopiv,
}

impl Op {
    /// Sub-trees a node of this operation needs for `variant`, or `None` if
    /// the variant is not implemented.
    pub fn required_subops(self, variant: Variant) -> Option<&'static [Op]> {
        use Op::*;
        match (self, variant) {
            (_, Variant::Subproblem) => Some(match self {
                Scal => &[Scal],
                Gemm => &[Gemm],
                Syrk => &[Syrk],
                Trsm => &[Trsm],
                Chol => &[Chol],
                LuNopiv => &[LuNopiv],
            }),
            (_, v) if v.is_leaf() => Some(&[]),
            (Scal, Variant::Blocked(1 | 2)) => Some(&[Scal]),
            (Gemm, Variant::Blocked(1 | 3)) => Some(&[Gemm]),
            (Gemm, Variant::Blocked(5)) => Some(&[Gemm, Scal]),
            (Syrk, Variant::Blocked(2)) => Some(&[Syrk, Gemm]),
            (Syrk, Variant::Blocked(5)) => Some(&[Syrk, Scal]),
            (Trsm, Variant::Blocked(1)) => Some(&[Trsm, Gemm]),
            (Trsm, Variant::Blocked(2)) => Some(&[Trsm]),
            (Chol, Variant::Blocked(3)) => Some(&[Chol, Syrk, Trsm]),
            (LuNopiv, Variant::Blocked(5)) => Some(&[LuNopiv, Trsm, Gemm]),
            _ => None,
        }
    }

    /// Lower-case name, also used as the task name.
    pub fn name(self) -> &'static str {
        match self {
            Op::Scal => "scal",
            Op::Gemm => "gemm",
            Op::Syrk => "syrk",
            Op::Trsm => "trsm",
            Op::Chol => "chol",
            Op::LuNopiv => "lu_nopiv",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage the tree is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixType {
    /// Plain matrices; leaves run their kernel inline.
    Flat,
    /// Matrices of blocks; scalar leaves become tasks.
    Hierarchical,
}

/// Algorithmic variant of one control-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Unwrap a 1x1 block view one level and recurse.
    Subproblem,
    /// Hand the whole operand to an external blocked kernel.
    BlockedExtern,
    /// Hand the whole operand to an external unblocked kernel.
    UnblockedExtern,
    /// Numbered unblocked variant.
    Unblocked(u8),
    /// Numbered optimized unblocked variant.
    UnbOpt(u8),
    /// Numbered blocked variant.
    Blocked(u8),
}

impl Variant {
    /// Check if the variant runs a kernel rather than looping.
    pub fn is_leaf(self) -> bool {
        matches!(
            self,
            Variant::BlockedExtern
                | Variant::UnblockedExtern
                | Variant::Unblocked(_)
                | Variant::UnbOpt(_)
        )
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Subproblem => write!(f, "subproblem"),
            Variant::BlockedExtern => write!(f, "blocked extern"),
            Variant::UnblockedExtern => write!(f, "unblocked extern"),
            Variant::Unblocked(n) => write!(f, "unblocked var{}", n),
            Variant::UnbOpt(n) => write!(f, "unb-opt var{}", n),
            Variant::Blocked(n) => write!(f, "blocked var{}", n),
        }
    }
}

/// Dimension a blocksize applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    /// Rows of the output.
    M,
    /// Columns of the output.
    N,
    /// Inner (summed) dimension.
    K,
}

/// Blocksize policy of a blocked node.
///
/// For hierarchical trees the blocksize counts blocks, for flat trees
/// elements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Blocksize {
    /// One blocksize for every dimension.
    Fixed(usize),
    /// One blocksize per dimension.
    PerDim {
        /// Blocksize along rows.
        m: usize,
        /// Blocksize along columns.
        n: usize,
        /// Blocksize along the inner dimension.
        k: usize,
    },
    /// `max(min, floor(base * ratio))`, an inner blocksize derived from an
    /// outer one.
    Scaled {
        /// Outer blocksize.
        base: usize,
        /// Inner-to-outer ratio.
        ratio: f64,
        /// Lower bound.
        min: usize,
    },
}

impl Blocksize {
    /// Blocksize along `dim`.
    pub fn for_dim(&self, dim: Dim) -> usize {
        match *self {
            Blocksize::Fixed(b) => b,
            Blocksize::PerDim { m, n, k } => match dim {
                Dim::M => m,
                Dim::N => n,
                Dim::K => k,
            },
            Blocksize::Scaled { base, ratio, min } => {
                ((base as f64 * ratio).floor() as usize).max(min)
            }
        }
    }
}

/// Errors raised while building or walking a control tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CntlError {
    /// A variant needs a sub-tree the node does not have.
    #[error("{op} ({variant}) needs a {sub} sub-tree")]
    MissingSubtree {
        /// Operation of the node
        op: Op,
        /// Variant of the node
        variant: Variant,
        /// Missing sub-operation
        sub: Op,
    },

    /// A blocked variant has no blocksize.
    #[error("{op} ({variant}) needs a blocksize")]
    MissingBlocksize {
        /// Operation of the node
        op: Op,
        /// Variant of the node
        variant: Variant,
    },

    /// The operation has no such variant for the matrix type.
    #[error("{op} has no {variant} variant for {matrix_type:?} matrices")]
    UnsupportedVariant {
        /// Operation of the node
        op: Op,
        /// Requested variant
        variant: Variant,
        /// Matrix type of the node
        matrix_type: MatrixType,
    },

    /// A sub-tree was attached to the slot of another operation.
    #[error("sub-tree for {slot} is a {actual} tree")]
    SubtreeOpMismatch {
        /// Slot the tree was attached to
        slot: Op,
        /// Operation of the attached tree
        actual: Op,
    },
}

/// One control-tree node.
#[derive(Debug, Clone)]
pub struct Cntl {
    op: Op,
    matrix_type: MatrixType,
    variant: Variant,
    blocksize: Option<Blocksize>,
    subs: Vec<(Op, Arc<Cntl>)>,
}

impl Cntl {
    /// Start building a node for `op`.
    pub fn builder(op: Op) -> CntlBuilder {
        CntlBuilder {
            op,
            matrix_type: MatrixType::Flat,
            variant: Variant::UnblockedExtern,
            blocksize: None,
            subs: Vec::new(),
        }
    }

    /// A leaf node running the kernel of `op`.
    pub fn leaf(op: Op, matrix_type: MatrixType) -> Arc<Cntl> {
        Self::node(op, matrix_type, Variant::UnblockedExtern, None, &[])
    }

    fn node(
        op: Op,
        matrix_type: MatrixType,
        variant: Variant,
        blocksize: Option<Blocksize>,
        subs: &[(Op, &Arc<Cntl>)],
    ) -> Arc<Cntl> {
        Arc::new(Cntl {
            op,
            matrix_type,
            variant,
            blocksize,
            subs: subs.iter().map(|&(op, c)| (op, Arc::clone(c))).collect(),
        })
    }

    fn check(&self) -> Result<(), CntlError> {
        let unsupported = CntlError::UnsupportedVariant {
            op: self.op,
            variant: self.variant,
            matrix_type: self.matrix_type,
        };
        if self.variant == Variant::Subproblem && self.matrix_type == MatrixType::Flat {
            return Err(unsupported);
        }
        let required = self.op.required_subops(self.variant).ok_or(unsupported)?;
        if matches!(self.variant, Variant::Blocked(_)) && self.blocksize.is_none() {
            return Err(CntlError::MissingBlocksize {
                op: self.op,
                variant: self.variant,
            });
        }
        if let Some((slot, cntl)) = self.subs.iter().find(|(slot, c)| c.op != *slot) {
            return Err(CntlError::SubtreeOpMismatch {
                slot: *slot,
                actual: cntl.op,
            });
        }
        for &sub in required {
            self.sub(sub)?;
        }
        Ok(())
    }

    /// Check this node and every node below it.
    pub fn validate(&self) -> Result<(), CntlError> {
        self.check()?;
        self.subs.iter().try_for_each(|(_, c)| c.validate())
    }

    /// Operation of the node.
    pub fn op(&self) -> Op {
        self.op
    }

    /// Matrix type of the node.
    pub fn matrix_type(&self) -> MatrixType {
        self.matrix_type
    }

    /// Variant of the node.
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Blocksize policy, if any.
    pub fn blocksize(&self) -> Option<Blocksize> {
        self.blocksize
    }

    /// Blocksize along `dim`; zero is rejected.
    pub fn blocksize_for(&self, dim: Dim) -> Result<usize, crate::LinalgError> {
        let b = self
            .blocksize
            .ok_or(CntlError::MissingBlocksize {
                op: self.op,
                variant: self.variant,
            })?
            .for_dim(dim);
        if b == 0 {
            return Err(FlashError::InvalidBlocksize(0).into());
        }
        Ok(b)
    }

    /// Sub-tree for `op`.
    pub fn sub(&self, op: Op) -> Result<&Cntl, CntlError> {
        self.subs
            .iter()
            .find(|(slot, _)| *slot == op)
            .map(|(_, c)| c.as_ref())
            .ok_or(CntlError::MissingSubtree {
                op: self.op,
                variant: self.variant,
                sub: op,
            })
    }
}

/// Builder for [`Cntl`].
#[derive(Debug, Clone)]
pub struct CntlBuilder {
    op: Op,
    matrix_type: MatrixType,
    variant: Variant,
    blocksize: Option<Blocksize>,
    subs: Vec<(Op, Arc<Cntl>)>,
}

impl CntlBuilder {
    /// Set the matrix type (default: flat).
    pub fn matrix_type(mut self, matrix_type: MatrixType) -> Self {
        self.matrix_type = matrix_type;
        self
    }

    /// Set the variant (default: unblocked extern).
    pub fn variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    /// Set the blocksize policy.
    pub fn blocksize(mut self, blocksize: Blocksize) -> Self {
        self.blocksize = Some(blocksize);
        self
    }

    /// Attach the sub-tree used for calls to `op`. A later call for the
    /// same `op` replaces the earlier one.
    pub fn sub(mut self, op: Op, cntl: Arc<Cntl>) -> Self {
        self.subs.retain(|(slot, _)| *slot != op);
        self.subs.push((op, cntl));
        self
    }

    /// Validate and freeze the node.
    pub fn build(self) -> Result<Arc<Cntl>, CntlError> {
        let cntl = Cntl {
            op: self.op,
            matrix_type: self.matrix_type,
            variant: self.variant,
            blocksize: self.blocksize,
            subs: self.subs,
        };
        cntl.check()?;
        Ok(Arc::new(cntl))
    }
}

/// One control tree per operation.
#[derive(Debug, Clone)]
pub struct CntlSet {
    /// Tree for `scal`.
    pub scal: Arc<Cntl>,
    /// Tree for `gemm`.
    pub gemm: Arc<Cntl>,
    /// Tree for `syrk`.
    pub syrk: Arc<Cntl>,
    /// Tree for `trsm`.
    pub trsm: Arc<Cntl>,
    /// Tree for `chol`.
    pub chol: Arc<Cntl>,
    /// Tree for `lu_nopiv`.
    pub lu_nopiv: Arc<Cntl>,
}

static FLASH_DEFAULT: LazyLock<Arc<CntlSet>> =
    LazyLock::new(|| Arc::new(CntlSet::build_flash(1)));

static FLAT_DEFAULT: LazyLock<Arc<CntlSet>> =
    LazyLock::new(|| Arc::new(CntlSet::build_flat(DEFAULT_FLAT_BLOCKSIZE)));

impl CntlSet {
    /// Trees for hierarchical matrices of depth 1, built once.
    pub fn flash_default() -> Arc<CntlSet> {
        Arc::clone(&FLASH_DEFAULT)
    }

    /// Trees for hierarchical matrices nested `depth` levels deep. Every
    /// level sweeps one block at a time.
    pub fn flash(depth: usize) -> Arc<CntlSet> {
        if depth == 1 {
            Self::flash_default()
        } else {
            Arc::new(Self::build_flash(depth))
        }
    }

    /// Trees for flat matrices with outer blocksize `nb`. The
    /// factorizations run a second blocked level with blocksize
    /// `nb * DEFAULT_INNER_RATIO` before reaching the kernels.
    pub fn flat_default(nb: usize) -> Arc<CntlSet> {
        if nb == DEFAULT_FLAT_BLOCKSIZE {
            Arc::clone(&FLAT_DEFAULT)
        } else {
            Arc::new(Self::build_flat(nb))
        }
    }

    /// Trees matching the nesting depth of `obj`.
    pub fn for_obj<T: Scalar>(obj: &Obj<T>) -> Arc<CntlSet> {
        match obj.depth() {
            0 => Self::flat_default(DEFAULT_FLAT_BLOCKSIZE),
            d => Self::flash(d),
        }
    }

    fn build_flat(nb: usize) -> CntlSet {
        let leaf = |op| Cntl::leaf(op, MatrixType::Flat);
        let (trsm, syrk) = (leaf(Op::Trsm), leaf(Op::Syrk));
        let (gemm, scal) = (leaf(Op::Gemm), leaf(Op::Scal));
        let inner = Blocksize::Scaled {
            base: nb,
            ratio: DEFAULT_INNER_RATIO,
            min: 1,
        };
        let blocked = |op, bs, diag: &Arc<Cntl>, rest: [(Op, &Arc<Cntl>); 2]| {
            let variant = match op {
                Op::Chol => Variant::Blocked(3),
                _ => Variant::Blocked(5),
            };
            let subs = [(op, diag), rest[0], rest[1]];
            Cntl::node(op, MatrixType::Flat, variant, Some(bs), &subs)
        };
        let chol_rest = [(Op::Syrk, &syrk), (Op::Trsm, &trsm)];
        let chol_inner = blocked(Op::Chol, inner, &leaf(Op::Chol), chol_rest);
        let chol = blocked(Op::Chol, Blocksize::Fixed(nb), &chol_inner, chol_rest);
        let lu_rest = [(Op::Trsm, &trsm), (Op::Gemm, &gemm)];
        let lu_inner = blocked(Op::LuNopiv, inner, &leaf(Op::LuNopiv), lu_rest);
        let lu_nopiv = blocked(Op::LuNopiv, Blocksize::Fixed(nb), &lu_inner, lu_rest);
        CntlSet {
            scal,
            gemm,
            syrk,
            trsm,
            chol,
            lu_nopiv,
        }
    }

    fn build_flash(depth: usize) -> CntlSet {
        let mut below = Self::flash_leaves();
        for _ in 0..depth.max(1) {
            below = Self::flash_level(&below);
        }
        below
    }

    fn flash_leaves() -> CntlSet {
        let leaf = |op| Cntl::leaf(op, MatrixType::Hierarchical);
        CntlSet {
            scal: leaf(Op::Scal),
            gemm: leaf(Op::Gemm),
            syrk: leaf(Op::Syrk),
            trsm: leaf(Op::Trsm),
            chol: leaf(Op::Chol),
            lu_nopiv: leaf(Op::LuNopiv),
        }
    }

    /// Blocked trees for one hierarchy level on top of the trees in `below`.
    fn flash_level(below: &CntlSet) -> CntlSet {
        let node = |op: Op, variant: Variant, subs: &[(Op, &Arc<Cntl>)]| -> Arc<Cntl> {
            let blocksize = match variant {
                Variant::Subproblem => None,
                _ => Some(Blocksize::Fixed(1)),
            };
            Cntl::node(op, MatrixType::Hierarchical, variant, blocksize, subs)
        };
        let subproblem = |op: Op, tree: &Arc<Cntl>| node(op, Variant::Subproblem, &[(op, tree)]);

        let scal_sub = subproblem(Op::Scal, &below.scal);
        let scal_cols = node(Op::Scal, Variant::Blocked(2), &[(Op::Scal, &scal_sub)]);
        let scal = node(Op::Scal, Variant::Blocked(1), &[(Op::Scal, &scal_cols)]);

        let gemm_sub = subproblem(Op::Gemm, &below.gemm);
        let gemm_k = node(
            Op::Gemm,
            Variant::Blocked(5),
            &[(Op::Gemm, &gemm_sub), (Op::Scal, &scal)],
        );
        let gemm_cols = node(Op::Gemm, Variant::Blocked(3), &[(Op::Gemm, &gemm_k)]);
        let gemm = node(Op::Gemm, Variant::Blocked(1), &[(Op::Gemm, &gemm_cols)]);

        let syrk_sub = subproblem(Op::Syrk, &below.syrk);
        let syrk_k = node(
            Op::Syrk,
            Variant::Blocked(5),
            &[(Op::Syrk, &syrk_sub), (Op::Scal, &scal)],
        );
        let syrk = node(
            Op::Syrk,
            Variant::Blocked(2),
            &[(Op::Syrk, &syrk_k), (Op::Gemm, &gemm)],
        );

        let trsm_sub = subproblem(Op::Trsm, &below.trsm);
        let trsm_tri = node(
            Op::Trsm,
            Variant::Blocked(1),
            &[(Op::Trsm, &trsm_sub), (Op::Gemm, &gemm)],
        );
        let trsm = node(Op::Trsm, Variant::Blocked(2), &[(Op::Trsm, &trsm_tri)]);

        let chol_sub = subproblem(Op::Chol, &below.chol);
        let chol = node(
            Op::Chol,
            Variant::Blocked(3),
            &[(Op::Chol, &chol_sub), (Op::Syrk, &syrk), (Op::Trsm, &trsm)],
        );

        let lu_sub = subproblem(Op::LuNopiv, &below.lu_nopiv);
        let lu_nopiv = node(
            Op::LuNopiv,
            Variant::Blocked(5),
            &[(Op::LuNopiv, &lu_sub), (Op::Trsm, &trsm), (Op::Gemm, &gemm)],
        );

        CntlSet {
            scal,
            gemm,
            syrk,
            trsm,
            chol,
            lu_nopiv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_rejects_missing_subtree() {
        let err = Cntl::builder(Op::Chol)
            .variant(Variant::Blocked(3))
            .blocksize(Blocksize::Fixed(4))
            .sub(Op::Chol, Cntl::leaf(Op::Chol, MatrixType::Flat))
            .sub(Op::Trsm, Cntl::leaf(Op::Trsm, MatrixType::Flat))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            CntlError::MissingSubtree {
                op: Op::Chol,
                variant: Variant::Blocked(3),
                sub: Op::Syrk,
            }
        );
    }

    #[test]
    fn test_build_rejects_missing_blocksize() {
        let err = Cntl::builder(Op::Scal)
            .variant(Variant::Blocked(1))
            .sub(Op::Scal, Cntl::leaf(Op::Scal, MatrixType::Flat))
            .build()
            .unwrap_err();
        assert!(matches!(err, CntlError::MissingBlocksize { op: Op::Scal, .. }));
    }

    #[test]
    fn test_build_rejects_unknown_variant_and_flat_subproblem() {
        let err = Cntl::builder(Op::Chol)
            .variant(Variant::Blocked(9))
            .blocksize(Blocksize::Fixed(4))
            .build()
            .unwrap_err();
        assert!(matches!(err, CntlError::UnsupportedVariant { .. }));

        let err = Cntl::builder(Op::Gemm)
            .variant(Variant::Subproblem)
            .sub(Op::Gemm, Cntl::leaf(Op::Gemm, MatrixType::Flat))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            CntlError::UnsupportedVariant {
                matrix_type: MatrixType::Flat,
                ..
            }
        ));
    }

    #[test]
    fn test_build_rejects_mismatched_subtree() {
        let err = Cntl::builder(Op::Trsm)
            .variant(Variant::Blocked(2))
            .blocksize(Blocksize::Fixed(2))
            .sub(Op::Trsm, Cntl::leaf(Op::Gemm, MatrixType::Flat))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            CntlError::SubtreeOpMismatch {
                slot: Op::Trsm,
                actual: Op::Gemm,
            }
        );
    }

    #[test]
    fn test_blocksize_policies() {
        assert_eq!(Blocksize::Fixed(8).for_dim(Dim::K), 8);
        let per = Blocksize::PerDim { m: 1, n: 2, k: 3 };
        assert_eq!(per.for_dim(Dim::N), 2);
        let scaled = Blocksize::Scaled {
            base: 128,
            ratio: 0.25,
            min: 1,
        };
        assert_eq!(scaled.for_dim(Dim::M), 32);
        let tiny = Blocksize::Scaled {
            base: 2,
            ratio: 0.25,
            min: 1,
        };
        assert_eq!(tiny.for_dim(Dim::M), 1);
    }

    #[test]
    fn test_default_trees_are_shared_and_complete() {
        let a = CntlSet::flash_default();
        let b = CntlSet::flash_default();
        assert!(Arc::ptr_eq(&a.chol, &b.chol));
        assert_eq!(a.chol.variant(), Variant::Blocked(3));
        let sub = a.chol.sub(Op::Chol).unwrap();
        assert_eq!(sub.variant(), Variant::Subproblem);
        assert!(sub.sub(Op::Chol).unwrap().variant().is_leaf());

        let deep = CntlSet::flash(2);
        let inner = deep.chol.sub(Op::Chol).unwrap().sub(Op::Chol).unwrap();
        assert_eq!(inner.variant(), Variant::Blocked(3));

        let flat = CntlSet::flat_default(64);
        assert_eq!(flat.chol.blocksize_for(Dim::M).unwrap(), 64);
        assert_eq!(flat.chol.sub(Op::Chol).unwrap().blocksize_for(Dim::M).unwrap(), 16);
        assert!(flat.gemm.variant().is_leaf());

        for set in [a, deep, flat] {
            for tree in [&set.scal, &set.gemm, &set.syrk, &set.trsm, &set.chol, &set.lu_nopiv] {
                tree.validate().unwrap();
            }
        }
    }
}
