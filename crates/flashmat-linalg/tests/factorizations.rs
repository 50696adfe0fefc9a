use anyhow::Result;
use flashmat_core::{hier, KernelError, Obj};
use flashmat_linalg::random::{random_diag_dominant, random_spd_matrix};
use flashmat_linalg::util::{matmul, norm_frob, transpose, triangle};
use flashmat_linalg::{
    chol, chol_with, lu_nopiv, lu_nopiv_with, Blocksize, Cntl, CntlError, CntlSet, LinalgError,
    MatrixType, Op, Uplo, Variant,
};
use flashmat_supermatrix::{QueueConfig, QueueError, Supermatrix};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn queue(threads: usize) -> Supermatrix {
    let sm = Supermatrix::new(QueueConfig::default().with_num_threads(threads)).unwrap();
    sm.enable();
    sm
}

/// `||A - L L^T|| / ||A||` for the lower factor, `||A - U^T U|| / ||A||` for
/// the upper one.
fn chol_residual(a: &Obj<f64>, factored: &Obj<f64>, uplo: Uplo) -> f64 {
    let f = triangle(factored, uplo, false);
    let product = match uplo {
        Uplo::Lower => matmul(&f, &transpose(&f)),
        Uplo::Upper => matmul(&transpose(&f), &f),
    };
    let diff = Obj::from_fn(a.length(), a.width(), |i, j| {
        a.get(i, j).unwrap() - product.get(i, j).unwrap()
    });
    norm_frob(&diff) / norm_frob(a)
}

fn lu_residual(a: &Obj<f64>, factored: &Obj<f64>) -> f64 {
    let l = triangle(factored, Uplo::Lower, true);
    let u = triangle(factored, Uplo::Upper, false);
    let product = matmul(&l, &u);
    let diff = Obj::from_fn(a.length(), a.width(), |i, j| {
        a.get(i, j).unwrap() - product.get(i, j).unwrap()
    });
    norm_frob(&diff) / norm_frob(a)
}

fn count(sm: &Supermatrix, name: &str) -> usize {
    let stats = sm.last_stats().unwrap();
    stats.records.iter().filter(|r| r.name == name).count()
}

#[test]
fn test_hier_chol_task_graph_and_residual() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let a = random_spd_matrix::<f64, _>(&mut rng, 256);
    let h = hier::create_hier_copy_of(&a, &[64])?;
    assert_eq!((h.length(), h.width()), (4, 4));

    let sm = queue(4);
    chol(&sm, Uplo::Lower, &h)?;

    assert_eq!(sm.num_tasks(), 0);
    let stats = sm.last_stats().unwrap();
    assert_eq!(stats.records.len(), 20);
    assert_eq!(count(&sm, "chol"), 4);
    assert_eq!(count(&sm, "trsm"), 6);
    assert_eq!(count(&sm, "syrk"), 6);
    assert_eq!(count(&sm, "gemm"), 4);
    assert_eq!(stats.tasks_per_worker.iter().sum::<usize>(), 20);

    let factored = hier::flatten(&h)?;
    assert!(chol_residual(&a, &factored, Uplo::Lower) < 1e-10);
    Ok(())
}

#[test]
fn test_chol_queue_on_and_off_agree_bitwise() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let a = random_spd_matrix::<f64, _>(&mut rng, 50);

    for uplo in [Uplo::Lower, Uplo::Upper] {
        let inline = hier::create_hier_copy_of(&a, &[8])?;
        let sm = Supermatrix::new(QueueConfig::default())?;
        chol(&sm, uplo, &inline)?;
        assert!(sm.last_stats().is_none());

        let queued = hier::create_hier_copy_of(&a, &[8])?;
        let config = QueueConfig::default()
            .with_num_threads(3)
            .with_sorting(true)
            .with_work_stealing(true);
        let sm = Supermatrix::new(config)?;
        sm.enable();
        chol(&sm, uplo, &queued)?;

        assert_eq!(inline.to_col_major(), queued.to_col_major());
        assert!(chol_residual(&a, &hier::flatten(&queued)?, uplo) < 1e-12);
    }
    Ok(())
}

#[test]
fn test_chol_leaves_other_triangle_alone() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let a = random_spd_matrix::<f64, _>(&mut rng, 20);
    let h = hier::create_hier_copy_of(&a, &[6])?;
    chol(&queue(2), Uplo::Lower, &h)?;
    for j in 0..20 {
        for i in 0..j {
            assert_eq!(h.get(i, j)?, a.get(i, j)?);
        }
    }
    Ok(())
}

#[test]
fn test_flat_blocked_chol() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let a = random_spd_matrix::<f64, _>(&mut rng, 150);
    let sm = Supermatrix::new(QueueConfig::default())?;
    for uplo in [Uplo::Lower, Uplo::Upper] {
        let f = hier::flatten(&a)?;
        chol_with(&sm, uplo, &f, &CntlSet::flat_default(64).chol)?;
        assert!(chol_residual(&a, &f, uplo) < 1e-12);
    }
    Ok(())
}

#[test]
fn test_two_level_hier_chol() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(8);
    let a = random_spd_matrix::<f64, _>(&mut rng, 48);
    let h = hier::create_hier_copy_of(&a, &[16, 4])?;
    assert_eq!(h.depth(), 2);

    let sm = queue(4);
    chol(&sm, Uplo::Lower, &h)?;
    // Tasks are created for the 4x4 leaves, never for the 16x16 blocks.
    assert_eq!(count(&sm, "chol"), 12);
    assert!(chol_residual(&a, &hier::flatten(&h)?, Uplo::Lower) < 1e-12);
    Ok(())
}

#[test]
fn test_custom_flat_tree() -> Result<()> {
    let leaf = |op| Cntl::leaf(op, MatrixType::Flat);
    let tree = Cntl::builder(Op::Chol)
        .variant(Variant::Blocked(3))
        .blocksize(Blocksize::Fixed(7))
        .sub(Op::Chol, leaf(Op::Chol))
        .sub(Op::Trsm, leaf(Op::Trsm))
        .sub(Op::Syrk, leaf(Op::Syrk))
        .build()?;

    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let a = random_spd_matrix::<f64, _>(&mut rng, 30);
    let f = hier::flatten(&a)?;
    chol_with(&Supermatrix::new(QueueConfig::default())?, Uplo::Lower, &f, &tree)?;
    assert!(chol_residual(&a, &f, Uplo::Lower) < 1e-12);
    Ok(())
}

#[test]
fn test_chol_errors_before_queueing() -> Result<()> {
    let sm = queue(2);
    let rect = hier::create::<f64>(8, 6, &[2])?;
    let err = chol(&sm, Uplo::Lower, &rect).unwrap_err();
    assert!(matches!(err, LinalgError::Flash(_)));
    assert!(sm.last_stats().is_none());

    let square = hier::create::<f64>(8, 8, &[2])?;
    let gemm_tree = CntlSet::flash_default().gemm.clone();
    let err = chol_with(&sm, Uplo::Lower, &square, &gemm_tree).unwrap_err();
    assert!(matches!(
        err,
        LinalgError::Cntl(CntlError::SubtreeOpMismatch {
            slot: Op::Chol,
            actual: Op::Gemm
        })
    ));
    assert_eq!(sm.num_tasks(), 0);
    Ok(())
}

#[test]
fn test_chol_not_positive_definite() -> Result<()> {
    let a = Obj::from_fn(6, 6, |i, j| if i == j { -1.0 } else { 0.0 });
    let h = hier::create_hier_copy_of(&a, &[3])?;
    let err = chol(&queue(2), Uplo::Lower, &h).unwrap_err();
    let kernel_errors = err.kernel_errors();
    assert!(!kernel_errors.is_empty());
    assert!(matches!(
        kernel_errors[0],
        KernelError::NotPositiveDefinite { index: 0, .. }
    ));
    Ok(())
}

#[test]
fn test_hier_lu_task_graph_and_residual() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let a = random_diag_dominant::<f64, _>(&mut rng, 24, 24);
    let h = hier::create_hier_copy_of(&a, &[8])?;

    let sm = queue(3);
    lu_nopiv(&sm, &h)?;
    assert_eq!(count(&sm, "lu_nopiv"), 3);
    assert_eq!(count(&sm, "trsm"), 6);
    assert_eq!(count(&sm, "gemm"), 5);
    assert!(lu_residual(&a, &hier::flatten(&h)?) < 1e-12);
    Ok(())
}

#[test]
fn test_flat_blocked_lu() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(21);
    let a = random_diag_dominant::<f64, _>(&mut rng, 70, 70);
    let f = hier::flatten(&a)?;
    let sm = Supermatrix::new(QueueConfig::default())?;
    lu_nopiv_with(&sm, &f, &CntlSet::flat_default(32).lu_nopiv)?;
    assert!(lu_residual(&a, &f) < 1e-12);
    Ok(())
}

#[test]
fn test_lu_singular_leaf_reports_failed_task() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    let a = random_diag_dominant::<f64, _>(&mut rng, 8, 8);
    a.set(0, 0, 0.0)?;

    let h = hier::create_hier_copy_of(&a, &[2])?;
    let sm = queue(2);
    match lu_nopiv(&sm, &h).unwrap_err() {
        LinalgError::Queue(QueueError::TaskFailed(failures)) => {
            assert_eq!(failures[0].name, "lu_nopiv");
            assert_eq!(failures[0].error, KernelError::Singular { index: 0 });
        }
        other => panic!("unexpected error: {other}"),
    }
    // Every task still ran.
    assert_eq!(sm.num_tasks(), 0);
    assert_eq!(count(&sm, "lu_nopiv"), 4);

    let h = hier::create_hier_copy_of(&a, &[2])?;
    let inline = Supermatrix::new(QueueConfig::default())?;
    let err = lu_nopiv(&inline, &h).unwrap_err();
    assert!(matches!(err, LinalgError::Queue(QueueError::Kernel { ref name, .. }) if name == "lu_nopiv"));
    assert_eq!(err.kernel_errors(), vec![&KernelError::Singular { index: 0 }]);
    Ok(())
}
