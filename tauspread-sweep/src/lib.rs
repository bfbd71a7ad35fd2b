//! # tauspread-sweep
//!
//! Run contexts and parallel sweeps over the model family.
//!
//! A [`RunSpec`] bundles everything one simulation run needs: the model
//! variant, the seeding, the horizon, the step policy, and the solver
//! options. [`run`] executes a single spec end to end; the sweep entry
//! points fan specs out across worker threads with rayon.
//!
//! Runs are embarrassingly parallel: each worker builds its own evaluator
//! (and with it a private copy of the weight matrix and scratch buffers), so
//! there is no shared mutable state and no locking. An unreached staging
//! threshold inside a sweep surfaces as `None`, never as an abort.

use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tauspread_connectome::{BraakAtlas, Connectome, ConnectomeError, Normalization};
use tauspread_models::{
    BaselineParams, ClearanceParams, ExponentialDamageParams, LinearDamageParams, Model,
    ModelError, ModelEvaluator,
};
use tauspread_solve::{integrate, SolveError, SolverOptions, StepPolicy, Trajectory};
use tauspread_staging::{biomarker_curve, Aggregate, StageCurves, StagingError};

// ============================================================================
// Error Types
// ============================================================================

/// Errors in sweep orchestration
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("seed region {node} out of range for a {nodes}-region network")]
    SeedOutOfRange { node: usize, nodes: usize },
    #[error("seed magnitude must be finite and non-negative, got {0}")]
    InvalidSeedMagnitude(f64),
    #[error("the seeding study requires a fixed step so all runs share one sample grid")]
    FixedStepRequired,
    #[error("stage group '{0}' has no member regions")]
    EmptyStageGroup(String),
    #[error(transparent)]
    Connectome(#[from] ConnectomeError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Solve(#[from] SolveError),
    #[error(transparent)]
    Staging(#[from] StagingError),
}

/// Result type for sweep operations
pub type SweepResult<T> = Result<T, SweepError>;

// ============================================================================
// Seeding
// ============================================================================

/// Where the pathology starts and how much of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedSpec {
    /// Regions seeded with the initial concentration
    pub nodes: Vec<usize>,
    /// Initial concentration added at each seed region
    pub magnitude: f64,
}

impl SeedSpec {
    /// Seed a single region.
    pub fn single(node: usize) -> Self {
        Self {
            nodes: vec![node],
            magnitude: 0.05,
        }
    }

    /// Seed several regions at once.
    pub fn regions(nodes: Vec<usize>) -> Self {
        Self {
            nodes,
            magnitude: 0.05,
        }
    }

    /// The bilateral entorhinal seed of the bundled 83-region atlas, where
    /// tau pathology canonically begins.
    pub fn entorhinal() -> Self {
        Self {
            nodes: vec![26, 67],
            magnitude: 0.05,
        }
    }

    pub fn with_magnitude(mut self, magnitude: f64) -> Self {
        self.magnitude = magnitude;
        self
    }

    /// Expand into a length-N initial concentration vector.
    pub fn initial_concentrations(&self, nodes: usize) -> SweepResult<Array1<f64>> {
        if !self.magnitude.is_finite() || self.magnitude < 0.0 {
            return Err(SweepError::InvalidSeedMagnitude(self.magnitude));
        }
        let mut u0 = Array1::zeros(nodes);
        for &node in &self.nodes {
            if node >= nodes {
                return Err(SweepError::SeedOutOfRange { node, nodes });
            }
            u0[node] += self.magnitude;
        }
        Ok(u0)
    }
}

// ============================================================================
// Run Spec
// ============================================================================

/// Everything one simulation run needs, owned by value so a sweep can ship
/// specs to worker threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    pub model: Model,
    pub seed: SeedSpec,
    /// Simulated horizon in years
    pub horizon: f64,
    pub step: StepPolicy,
    pub normalization: Normalization,
    pub options: SolverOptions,
}

impl RunSpec {
    pub fn new(model: Model, seed: SeedSpec) -> Self {
        Self {
            model,
            seed,
            horizon: 80.0,
            step: StepPolicy::fixed(0.1),
            normalization: Normalization::None,
            options: SolverOptions::default(),
        }
    }

    pub fn with_horizon(mut self, horizon: f64) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_step(mut self, step: StepPolicy) -> Self {
        self.step = step;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_options(mut self, options: SolverOptions) -> Self {
        self.options = options;
        self
    }
}

/// Execute one run end to end: derive the operator, integrate, return the
/// trajectory.
pub fn run(connectome: &Connectome, spec: &RunSpec) -> SweepResult<Trajectory> {
    let u0 = spec.seed.initial_concentrations(connectome.node_count())?;
    let mut evaluator =
        ModelEvaluator::with_normalization(spec.model, connectome, spec.normalization);
    let y0 = evaluator.initial_state(&u0)?;
    let trajectory = integrate(&mut evaluator, &y0, spec.horizon, spec.step, &spec.options)?;
    Ok(trajectory)
}

// ============================================================================
// Staged Runs
// ============================================================================

/// A run together with its staging post-processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedRun {
    pub model: Model,
    pub trajectory: Trajectory,
    pub curves: StageCurves,
    /// Per-stage threshold crossing times; `None` marks stages not reached
    /// within the horizon.
    pub crossings: Vec<Option<f64>>,
}

/// Run one spec and classify the result against an atlas in one go.
pub fn run_with_staging(
    connectome: &Connectome,
    spec: &RunSpec,
    atlas: &BraakAtlas,
    aggregate: Aggregate,
    theta: f64,
) -> SweepResult<StagedRun> {
    let trajectory = run(connectome, spec)?;
    let curves = StageCurves::from_trajectory(&trajectory, atlas, aggregate)?;
    let crossings = curves.crossing_times(theta)?;
    Ok(StagedRun {
        model: spec.model,
        trajectory,
        curves,
        crossings,
    })
}

// ============================================================================
// Parallel Sweeps
// ============================================================================

/// Run many specs in parallel, one worker-owned evaluator per run.
///
/// The first failing run aborts the sweep with its error; results arrive in
/// spec order regardless of completion order.
pub fn compare_models(connectome: &Connectome, specs: &[RunSpec]) -> SweepResult<Vec<Trajectory>> {
    specs
        .par_iter()
        .map(|spec| run(connectome, spec))
        .collect()
}

/// Run the four model variants under their default parameters and a shared
/// seed, horizon, and step policy.
pub fn run_all_variants(
    connectome: &Connectome,
    seed: &SeedSpec,
    horizon: f64,
    step: StepPolicy,
) -> SweepResult<Vec<(Model, Trajectory)>> {
    let models = [
        Model::Baseline(BaselineParams::default()),
        Model::Clearance(ClearanceParams::default()),
        Model::LinearDamage(LinearDamageParams::default()),
        Model::ExponentialDamage(ExponentialDamageParams::default()),
    ];
    let specs: Vec<RunSpec> = models
        .iter()
        .map(|&model| {
            RunSpec::new(model, seed.clone())
                .with_horizon(horizon)
                .with_step(step)
        })
        .collect();
    let trajectories = compare_models(connectome, &specs)?;
    Ok(models.into_iter().zip(trajectories).collect())
}

// ============================================================================
// Seeding Timescale Study
// ============================================================================

/// Mean biomarker curve per stage when seeding starts inside that stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedingCurve {
    pub label: String,
    /// Normalized whole-brain load, averaged over the stage's member seeds
    pub mean_biomarker: Array1<f64>,
}

/// Output of [`seeding_timescales`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedingStudy {
    pub times: Vec<f64>,
    pub stages: Vec<SeedingCurve>,
}

/// For every stage group, seed each member region on its own, run the model,
/// and average the resulting biomarker curves.
///
/// This reproduces the timescale comparison across seeding regions: early
/// stage seeds produce visibly slower global dynamics than late-stage seeds.
/// All runs reuse `base` except for the seed, and must share a fixed step so
/// their sample grids line up.
pub fn seeding_timescales(
    connectome: &Connectome,
    atlas: &BraakAtlas,
    base: &RunSpec,
) -> SweepResult<SeedingStudy> {
    if !matches!(base.step, StepPolicy::Fixed { .. }) {
        return Err(SweepError::FixedStepRequired);
    }
    if atlas.node_count() != connectome.node_count() {
        return Err(ConnectomeError::ShapeMismatch {
            context: "atlas",
            expected: connectome.node_count(),
            got: atlas.node_count(),
        }
        .into());
    }

    let mut times = Vec::new();
    let mut stages = Vec::new();
    for group in atlas.groups() {
        if group.nodes.is_empty() {
            return Err(SweepError::EmptyStageGroup(group.label.clone()));
        }
        let runs: SweepResult<Vec<(Vec<f64>, Array1<f64>)>> = group
            .nodes
            .par_iter()
            .map(|&node| {
                let mut spec = base.clone();
                spec.seed = SeedSpec::single(node).with_magnitude(base.seed.magnitude);
                let trajectory = run(connectome, &spec)?;
                let biomarker = biomarker_curve(&trajectory)?;
                Ok((trajectory.times().to_vec(), biomarker))
            })
            .collect();
        let runs = runs?;

        let mut mean = Array1::zeros(runs[0].1.len());
        for (_, curve) in &runs {
            mean += curve;
        }
        mean /= runs.len() as f64;

        if times.is_empty() {
            times = runs[0].0.clone();
        }
        stages.push(SeedingCurve {
            label: group.label.clone(),
            mean_biomarker: mean,
        });
    }
    Ok(SeedingStudy { times, stages })
}

// ============================================================================
// Tests
// ============================================================================
