//! End-to-end pipeline tests: connectome construction, Laplacian derivation,
//! integration, and staging on an 83-region network with the bundled atlas.

use ndarray::Array1;
use tauspread_connectome::{synthetic, BraakAtlas, Connectome, DESIKAN_NODES};
use tauspread_models::{BaselineParams, Model};
use tauspread_solve::StepPolicy;
use tauspread_staging::{activation_analysis, Aggregate};
use tauspread_sweep::{run_all_variants, run_with_staging, RunSpec, SeedSpec};

/// 83-region network with mildly heterogeneous region volumes.
fn brain_network() -> Connectome {
    let volumes = Array1::from_shape_fn(DESIKAN_NODES, |i| 1.0 + 0.2 * (i as f64 * 0.37).sin());
    synthetic::random_connectome(DESIKAN_NODES, 0.3, 11)
        .unwrap()
        .with_volumes(volumes)
        .unwrap()
}

// ============================================================================
// Entorhinal Seeding Through Staging
// ============================================================================

#[test]
fn test_entorhinal_seed_activates_stage_one_first() {
    let connectome = brain_network();
    let atlas = BraakAtlas::desikan_83();
    let spec = RunSpec::new(
        Model::Baseline(BaselineParams::growth_dominated()),
        SeedSpec::entorhinal(),
    )
    .with_horizon(60.0)
    .with_step(StepPolicy::fixed(0.1));

    let staged = run_with_staging(&connectome, &spec, &atlas, Aggregate::Mean, 0.15).unwrap();

    // concentrations stay within the biologically valid band
    for &u in staged.trajectory.concentrations() {
        assert!((-1e-9..=1.0 + 1e-9).contains(&u));
    }

    // the seeded stage activates, and earlier than every other reached stage
    let stage_one = staged.crossings[0].expect("stage I never activated");
    for (stage, crossing) in staged.crossings.iter().enumerate().skip(1) {
        if let Some(t) = crossing {
            assert!(
                stage_one <= *t,
                "stage {stage} activated at {t}, before the seeded stage at {stage_one}"
            );
        }
    }
}

#[test]
fn test_stage_activation_reports_plausible_global_load() {
    let connectome = brain_network();
    let atlas = BraakAtlas::desikan_83();
    let spec = RunSpec::new(
        Model::Baseline(BaselineParams::growth_dominated()),
        SeedSpec::entorhinal(),
    )
    .with_horizon(60.0)
    .with_step(StepPolicy::fixed(0.1));

    let trajectory = tauspread_sweep::run(&connectome, &spec).unwrap();
    // Braak V activation against the normalized whole-brain load
    let activation = activation_analysis(&trajectory, &atlas, 4, 0.15, Aggregate::Mean).unwrap();
    assert_eq!(activation.label, "Braak stage V");
    assert!(activation.time > 0.0 && activation.time < 60.0);
    assert!(activation.global_load > 0.0 && activation.global_load <= 1.0);
}

#[test]
fn test_crossing_times_monotone_in_threshold_on_simulated_run() {
    let connectome = brain_network();
    let atlas = BraakAtlas::desikan_83();
    let spec = RunSpec::new(
        Model::Baseline(BaselineParams::growth_dominated()),
        SeedSpec::entorhinal(),
    )
    .with_horizon(60.0)
    .with_step(StepPolicy::fixed(0.1));

    let staged = run_with_staging(&connectome, &spec, &atlas, Aggregate::Mean, 0.15).unwrap();
    let mut previous = 0.0;
    for theta in [0.1, 0.2, 0.4, 0.6, 0.8] {
        let t = staged
            .curves
            .crossing_time(0, theta)
            .expect("seeded stage saturates within the horizon");
        assert!(t >= previous, "crossing moved earlier at theta = {theta}");
        previous = t;
    }
}

// ============================================================================
// Four-Variant Comparison
// ============================================================================

#[test]
fn test_variant_comparison_stays_bounded_and_ordered() {
    let connectome = brain_network();
    let results = run_all_variants(
        &connectome,
        &SeedSpec::entorhinal(),
        30.0,
        StepPolicy::fixed(0.1),
    )
    .unwrap();
    assert_eq!(results.len(), 4);

    let baseline_totals = results[0].1.total_concentration();
    for (model, trajectory) in &results {
        for &u in trajectory.concentrations() {
            assert!(
                (-1e-9..=1.0 + 1e-9).contains(&u),
                "{} left [0, 1]",
                model.name()
            );
        }
        // clearance removes mass and damage slows recruitment, so the
        // baseline bounds every other variant's total load
        if !matches!(model, Model::Baseline(_)) {
            let totals = trajectory.total_concentration();
            for (k, &total) in totals.iter().enumerate() {
                assert!(
                    total <= baseline_totals[k] + 1e-6,
                    "{} exceeded baseline load at sample {k}",
                    model.name()
                );
            }
        }
    }

    // damage fields exist exactly for the damage variants, start at zero,
    // and stay monotone
    for (model, trajectory) in &results {
        match trajectory.damage() {
            Some(damage) => {
                assert!(model.has_damage());
                assert!(damage.row(0).iter().all(|&d| d == 0.0));
                for node in 0..damage.ncols() {
                    for k in 1..damage.nrows() {
                        assert!(damage[[k, node]] >= damage[[k - 1, node]] - 1e-12);
                    }
                }
            }
            None => assert!(!model.has_damage()),
        }
    }
}
