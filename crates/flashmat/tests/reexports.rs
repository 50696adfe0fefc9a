use anyhow::Result;
use flashmat::random::random_spd_matrix;
use flashmat::{chol, hier, QueueConfig, Supermatrix, Uplo};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[test]
fn test_chol_through_umbrella() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let a = random_spd_matrix::<f64, _>(&mut rng, 12);
    let h = hier::create_hier_copy_of(&a, &[4])?;

    let sm = Supermatrix::new(QueueConfig::default().with_num_threads(2))?;
    sm.enable();
    chol(&sm, Uplo::Lower, &h)?;
    assert_eq!(sm.last_stats().map(|s| s.records.len()), Some(10));
    Ok(())
}
