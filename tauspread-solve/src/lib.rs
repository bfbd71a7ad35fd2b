//! # tauspread-solve
//!
//! Explicit time integration for the FKPP model family.
//!
//! This crate provides:
//! - [`integrate`]: classic RK4 with either a fixed step or adaptive
//!   step-doubling control
//! - [`Trajectory`]: the dense (t, u(t)[, d(t)]) history of a run
//! - fail-fast stability validation of fixed steps against the spectral
//!   estimate of the diffusion operator
//! - divergence detection with the failure time and last valid state
//!   surfaced to the caller
//!
//! Damage-coupled models get their Laplacian rebuilt once per accepted step
//! through [`RightHandSide::prepare_step`]; the operator is frozen across the
//! four RK stages (and across the trial steps of the adaptive controller).

use ndarray::{s, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tauspread_models::{ModelError, RightHandSide};

/// Real-axis stability boundary of classic RK4.
///
/// An explicit step h is stable on the diffusion part only while
/// h * rho * lambda_max stays inside this interval.
pub const RK4_STABILITY_LIMIT: f64 = 2.785;

// ============================================================================
// Error Types
// ============================================================================

/// State snapshot surfaced when a run aborts mid-integration.
#[derive(Debug, Clone)]
pub struct LastValid {
    /// Time of the last accepted sample
    pub t: f64,
    pub concentrations: Array1<f64>,
    pub damage: Option<Array1<f64>>,
}

/// Errors during integration
#[derive(Error, Debug)]
pub enum SolveError {
    #[error(
        "divergence detected at t = {t}: component {component} is {value} (sanity bound {bound})"
    )]
    DivergenceDetected {
        t: f64,
        component: usize,
        value: f64,
        bound: f64,
        last_valid: LastValid,
    },
    #[error("model evaluation failed at t = {t}: {source}")]
    ModelFailure {
        t: f64,
        source: ModelError,
        last_valid: LastValid,
    },
    #[error("fixed step {h} exceeds the explicit stability limit {limit} for this operator")]
    UnstableStepSize { h: f64, limit: f64 },
    #[error("step size must be positive and finite, got {0}")]
    InvalidStepSize(f64),
    #[error("tolerance must be positive and finite, got {0}")]
    InvalidTolerance(f64),
    #[error("time horizon must be positive and finite, got {0}")]
    InvalidHorizon(f64),
    #[error("adaptive step fell below h_min = {h_min} at t = {t}")]
    StepUnderflow { t: f64, h_min: f64 },
    #[error("initial state length {got} does not match model dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Result type for integration
pub type SolveResult<T> = Result<T, SolveError>;

// ============================================================================
// Step Policy and Options
// ============================================================================

/// How the integrator chooses its step size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StepPolicy {
    /// March with a constant step h (validated against the operator
    /// stiffness unless disabled in [`SolverOptions`]).
    Fixed { h: f64 },
    /// Step-doubling error control: accept when the full-step vs two-half-step
    /// discrepancy is within tolerance, rescale h otherwise.
    Adaptive {
        rel_tol: f64,
        abs_tol: f64,
        h_init: f64,
        h_min: f64,
        h_max: f64,
    },
}

impl StepPolicy {
    pub fn fixed(h: f64) -> Self {
        StepPolicy::Fixed { h }
    }

    /// Adaptive policy with the given relative tolerance and conventional
    /// defaults for the remaining knobs.
    pub fn adaptive(rel_tol: f64) -> Self {
        StepPolicy::Adaptive {
            rel_tol,
            abs_tol: 1e-9,
            h_init: 0.01,
            h_min: 1e-10,
            h_max: 1.0,
        }
    }
}

/// Integration options beyond the step policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Concentrations above this are treated as divergence. Carrying
    /// capacity is 1, so anything well above it means the scheme blew up.
    pub divergence_bound: f64,
    /// Validate fixed steps against the stiffness estimate before running.
    pub validate_stability: bool,
    /// Record every k-th accepted step (the initial and final samples are
    /// always recorded).
    pub record_every: usize,
    /// Keep a copy of the (reweighted) Laplacian at each recorded sample.
    /// Only meaningful for the damage variants.
    pub record_laplacians: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            divergence_bound: 10.0,
            validate_stability: true,
            record_every: 1,
            record_laplacians: false,
        }
    }
}

impl SolverOptions {
    pub fn with_divergence_bound(mut self, bound: f64) -> Self {
        self.divergence_bound = bound;
        self
    }

    pub fn with_stability_validation(mut self, enabled: bool) -> Self {
        self.validate_stability = enabled;
        self
    }

    pub fn with_record_every(mut self, every: usize) -> Self {
        self.record_every = every.max(1);
        self
    }

    pub fn with_laplacian_recording(mut self, enabled: bool) -> Self {
        self.record_laplacians = enabled;
        self
    }
}

// ============================================================================
// Trajectory
// ============================================================================

/// Dense history of one simulation run. Read-only once produced.
///
/// Rows are samples, columns are regions, mirroring the (time, region)
/// layout the staging classifier consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    times: Vec<f64>,
    concentrations: Array2<f64>,
    damage: Option<Array2<f64>>,
    laplacians: Option<Vec<Array2<f64>>>,
}

impl Trajectory {
    /// Assemble a trajectory from pre-computed samples.
    ///
    /// Row k of `concentrations` (and `damage`) belongs to `times[k]`.
    pub fn from_parts(
        times: Vec<f64>,
        concentrations: Array2<f64>,
        damage: Option<Array2<f64>>,
    ) -> SolveResult<Self> {
        if concentrations.nrows() != times.len() {
            return Err(SolveError::DimensionMismatch {
                expected: times.len(),
                got: concentrations.nrows(),
            });
        }
        if let Some(d) = &damage {
            if d.dim() != concentrations.dim() {
                return Err(SolveError::DimensionMismatch {
                    expected: concentrations.nrows(),
                    got: d.nrows(),
                });
            }
        }
        Ok(Self {
            times,
            concentrations,
            damage,
            laplacians: None,
        })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Number of regions.
    pub fn node_count(&self) -> usize {
        self.concentrations.ncols()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Sample-by-region concentration matrix.
    pub fn concentrations(&self) -> &Array2<f64> {
        &self.concentrations
    }

    /// Sample-by-region damage matrix, for damage-variant runs.
    pub fn damage(&self) -> Option<&Array2<f64>> {
        self.damage.as_ref()
    }

    /// Recorded Laplacian history, when requested.
    pub fn laplacians(&self) -> Option<&[Array2<f64>]> {
        self.laplacians.as_deref()
    }

    /// Concentration vector of sample `k`.
    pub fn sample(&self, k: usize) -> ArrayView1<'_, f64> {
        self.concentrations.row(k)
    }

    /// Concentration time series of region `node`.
    pub fn node_curve(&self, node: usize) -> ArrayView1<'_, f64> {
        self.concentrations.column(node)
    }

    /// Total concentration over all regions, per sample.
    pub fn total_concentration(&self) -> Array1<f64> {
        self.concentrations.sum_axis(ndarray::Axis(1))
    }

    pub fn final_time(&self) -> f64 {
        *self.times.last().unwrap_or(&0.0)
    }

    pub fn final_concentrations(&self) -> ArrayView1<'_, f64> {
        self.concentrations.row(self.len() - 1)
    }
}

/// Accumulates accepted samples while the run is in flight.
struct Recorder {
    nodes: usize,
    has_damage: bool,
    times: Vec<f64>,
    concentrations: Vec<f64>,
    damage: Vec<f64>,
    laplacians: Option<Vec<Array2<f64>>>,
}

impl Recorder {
    fn new(nodes: usize, has_damage: bool, record_laplacians: bool) -> Self {
        Self {
            nodes,
            has_damage,
            times: Vec::new(),
            concentrations: Vec::new(),
            damage: Vec::new(),
            laplacians: record_laplacians.then(Vec::new),
        }
    }

    fn push(&mut self, t: f64, y: &Array1<f64>, operator: Option<&Array2<f64>>) {
        self.times.push(t);
        self.concentrations
            .extend(y.slice(s![..self.nodes]).iter());
        if self.has_damage {
            self.damage.extend(y.slice(s![self.nodes..]).iter());
        }
        if let (Some(history), Some(op)) = (self.laplacians.as_mut(), operator) {
            history.push(op.clone());
        }
    }

    fn into_trajectory(self) -> Trajectory {
        let samples = self.times.len();
        let mut concentrations = Array2::zeros((samples, self.nodes));
        for (k, chunk) in self.concentrations.chunks_exact(self.nodes).enumerate() {
            concentrations.row_mut(k).assign(&ArrayView1::from(chunk));
        }
        let damage = self.has_damage.then(|| {
            let mut damage = Array2::zeros((samples, self.nodes));
            for (k, chunk) in self.damage.chunks_exact(self.nodes).enumerate() {
                damage.row_mut(k).assign(&ArrayView1::from(chunk));
            }
            damage
        });
        let laplacians = self.laplacians.filter(|history| !history.is_empty());
        Trajectory {
            times: self.times,
            concentrations,
            damage,
            laplacians,
        }
    }
}

// ============================================================================
// Integrator
// ============================================================================

/// Stage buffers for RK4, allocated once per run.
struct Workspace {
    k1: Array1<f64>,
    k2: Array1<f64>,
    k3: Array1<f64>,
    k4: Array1<f64>,
    stage: Array1<f64>,
}

impl Workspace {
    fn new(dim: usize) -> Self {
        Self {
            k1: Array1::zeros(dim),
            k2: Array1::zeros(dim),
            k3: Array1::zeros(dim),
            k4: Array1::zeros(dim),
            stage: Array1::zeros(dim),
        }
    }
}

/// One classic RK4 step from (t, y) with step h, written into `out`.
fn rk4_step<R: RightHandSide>(
    rhs: &mut R,
    t: f64,
    y: &Array1<f64>,
    h: f64,
    ws: &mut Workspace,
    out: &mut Array1<f64>,
) -> Result<(), ModelError> {
    let dim = y.len();
    rhs.eval(t, y.view(), &mut ws.k1)?;
    for i in 0..dim {
        ws.stage[i] = y[i] + 0.5 * h * ws.k1[i];
    }
    rhs.eval(t + 0.5 * h, ws.stage.view(), &mut ws.k2)?;
    for i in 0..dim {
        ws.stage[i] = y[i] + 0.5 * h * ws.k2[i];
    }
    rhs.eval(t + 0.5 * h, ws.stage.view(), &mut ws.k3)?;
    for i in 0..dim {
        ws.stage[i] = y[i] + h * ws.k3[i];
    }
    rhs.eval(t + h, ws.stage.view(), &mut ws.k4)?;
    for i in 0..dim {
        out[i] = y[i] + h / 6.0 * (ws.k1[i] + 2.0 * ws.k2[i] + 2.0 * ws.k3[i] + ws.k4[i]);
    }
    Ok(())
}

fn snapshot(t: f64, y: &Array1<f64>, nodes: usize) -> LastValid {
    LastValid {
        t,
        concentrations: y.slice(s![..nodes]).to_owned(),
        damage: (y.len() > nodes).then(|| y.slice(s![nodes..]).to_owned()),
    }
}

/// First component that is non-finite or, within the concentration block,
/// above the sanity bound.
fn divergent_component(y: &Array1<f64>, nodes: usize, bound: f64) -> Option<(usize, f64)> {
    for (i, &v) in y.iter().enumerate() {
        if !v.is_finite() {
            return Some((i, v));
        }
    }
    for i in 0..nodes {
        if y[i].abs() > bound {
            return Some((i, y[i]));
        }
    }
    None
}

/// Advance a model from `y0` over [0, horizon], producing a dense trajectory.
///
/// Fails fast on invalid inputs; aborts with the failure time and last valid
/// state when the run diverges or the model reports a non-finite derivative.
pub fn integrate<R: RightHandSide>(
    rhs: &mut R,
    y0: &Array1<f64>,
    horizon: f64,
    policy: StepPolicy,
    options: &SolverOptions,
) -> SolveResult<Trajectory> {
    if !horizon.is_finite() || horizon <= 0.0 {
        return Err(SolveError::InvalidHorizon(horizon));
    }
    let dim = rhs.dim();
    let nodes = rhs.node_count();
    if y0.len() != dim {
        return Err(SolveError::DimensionMismatch {
            expected: dim,
            got: y0.len(),
        });
    }

    match policy {
        StepPolicy::Fixed { h } => {
            if !h.is_finite() || h <= 0.0 {
                return Err(SolveError::InvalidStepSize(h));
            }
            if options.validate_stability {
                if let Some(stiffness) = rhs.stiffness_estimate() {
                    if stiffness > 0.0 {
                        let limit = RK4_STABILITY_LIMIT / stiffness;
                        if h > limit {
                            return Err(SolveError::UnstableStepSize { h, limit });
                        }
                    }
                }
            }
            integrate_fixed(rhs, y0, horizon, h, options, nodes, dim)
        }
        StepPolicy::Adaptive {
            rel_tol,
            abs_tol,
            h_init,
            h_min,
            h_max,
        } => {
            for tol in [rel_tol, abs_tol] {
                if !tol.is_finite() || tol <= 0.0 {
                    return Err(SolveError::InvalidTolerance(tol));
                }
            }
            for h in [h_init, h_min, h_max] {
                if !h.is_finite() || h <= 0.0 {
                    return Err(SolveError::InvalidStepSize(h));
                }
            }
            integrate_adaptive(
                rhs, y0, horizon, rel_tol, abs_tol, h_init, h_min, h_max, options, nodes, dim,
            )
        }
    }
}

fn prepare<R: RightHandSide>(
    rhs: &mut R,
    t: f64,
    y: &Array1<f64>,
    nodes: usize,
) -> SolveResult<()> {
    rhs.prepare_step(y.view()).map_err(|source| SolveError::ModelFailure {
        t,
        source,
        last_valid: snapshot(t, y, nodes),
    })
}

#[allow(clippy::too_many_arguments)]
fn integrate_fixed<R: RightHandSide>(
    rhs: &mut R,
    y0: &Array1<f64>,
    horizon: f64,
    h: f64,
    options: &SolverOptions,
    nodes: usize,
    dim: usize,
) -> SolveResult<Trajectory> {
    let mut ws = Workspace::new(dim);
    let mut y = y0.clone();
    let mut y_next = Array1::zeros(dim);
    let mut recorder = Recorder::new(nodes, dim > nodes, options.record_laplacians);

    prepare(rhs, 0.0, &y, nodes)?;
    recorder.push(0.0, &y, rhs.operator());

    let mut t = 0.0;
    let mut accepted = 0usize;
    let tiny = horizon * 1e-12;
    while horizon - t > tiny {
        let h_step = h.min(horizon - t);
        prepare(rhs, t, &y, nodes)?;
        rk4_step(rhs, t, &y, h_step, &mut ws, &mut y_next).map_err(|source| {
            SolveError::ModelFailure {
                t,
                source,
                last_valid: snapshot(t, &y, nodes),
            }
        })?;
        if let Some((component, value)) =
            divergent_component(&y_next, nodes, options.divergence_bound)
        {
            return Err(SolveError::DivergenceDetected {
                t: t + h_step,
                component,
                value,
                bound: options.divergence_bound,
                last_valid: snapshot(t, &y, nodes),
            });
        }
        t += h_step;
        y.assign(&y_next);
        accepted += 1;
        if accepted % options.record_every == 0 || horizon - t <= tiny {
            recorder.push(t, &y, rhs.operator());
        }
    }
    Ok(recorder.into_trajectory())
}

#[allow(clippy::too_many_arguments)]
fn integrate_adaptive<R: RightHandSide>(
    rhs: &mut R,
    y0: &Array1<f64>,
    horizon: f64,
    rel_tol: f64,
    abs_tol: f64,
    h_init: f64,
    h_min: f64,
    h_max: f64,
    options: &SolverOptions,
    nodes: usize,
    dim: usize,
) -> SolveResult<Trajectory> {
    let mut ws = Workspace::new(dim);
    let mut y = y0.clone();
    let mut y_full = Array1::zeros(dim);
    let mut y_half = Array1::zeros(dim);
    let mut y_next = Array1::zeros(dim);
    let mut recorder = Recorder::new(nodes, dim > nodes, options.record_laplacians);

    prepare(rhs, 0.0, &y, nodes)?;
    recorder.push(0.0, &y, rhs.operator());

    let mut t = 0.0;
    let mut h = h_init.min(horizon).clamp(h_min, h_max);
    let mut accepted = 0usize;
    let tiny = horizon * 1e-12;
    while horizon - t > tiny {
        let h_step = h.min(horizon - t);
        prepare(rhs, t, &y, nodes)?;

        let wrap = |source, y_ref: &Array1<f64>| SolveError::ModelFailure {
            t,
            source,
            last_valid: snapshot(t, y_ref, nodes),
        };
        rk4_step(rhs, t, &y, h_step, &mut ws, &mut y_full)
            .map_err(|e| wrap(e, &y))?;
        rk4_step(rhs, t, &y, 0.5 * h_step, &mut ws, &mut y_half)
            .map_err(|e| wrap(e, &y))?;
        rk4_step(rhs, t + 0.5 * h_step, &y_half, 0.5 * h_step, &mut ws, &mut y_next)
            .map_err(|e| wrap(e, &y))?;

        let mut err: f64 = 0.0;
        for i in 0..dim {
            let scale = abs_tol + rel_tol * y_next[i].abs().max(y[i].abs());
            err = err.max((y_next[i] - y_full[i]).abs() / scale);
        }

        if err <= 1.0 {
            if let Some((component, value)) =
                divergent_component(&y_next, nodes, options.divergence_bound)
            {
                return Err(SolveError::DivergenceDetected {
                    t: t + h_step,
                    component,
                    value,
                    bound: options.divergence_bound,
                    last_valid: snapshot(t, &y, nodes),
                });
            }
            t += h_step;
            y.assign(&y_next);
            accepted += 1;
            if accepted % options.record_every == 0 || horizon - t <= tiny {
                recorder.push(t, &y, rhs.operator());
            }
        }

        let factor = (0.9 * err.powf(-0.2)).clamp(0.2, 5.0);
        h = (h_step * factor).clamp(h_min, h_max);
        if err > 1.0 && h_step * factor < h_min {
            return Err(SolveError::StepUnderflow { t, h_min });
        }
    }
    Ok(recorder.into_trajectory())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tauspread_connectome::synthetic;
    use tauspread_models::{
        BaselineParams, ClearanceParams, ExponentialDamageParams, LinearDamageParams, Model,
        ModelEvaluator,
    };

    fn logistic(u0: f64, alpha: f64, t: f64) -> f64 {
        u0 / (u0 + (1.0 - u0) * (-alpha * t).exp())
    }

    #[test]
    fn test_zero_diffusion_matches_logistic_closed_form() {
        let model = Model::Baseline(BaselineParams::new(0.0, 1.0));
        let mut evaluator = ModelEvaluator::new(model, &synthetic::path(3).unwrap());
        let y0 = array![0.1, 0.4, 0.9];
        let trajectory = integrate(
            &mut evaluator,
            &y0,
            5.0,
            StepPolicy::fixed(0.01),
            &SolverOptions::default(),
        )
        .unwrap();

        for (k, &t) in trajectory.times().iter().enumerate() {
            for node in 0..3 {
                let expected = logistic(y0[node], 1.0, t);
                let got = trajectory.concentrations()[[k, node]];
                assert!(
                    (got - expected).abs() < 1e-8,
                    "node {node} at t = {t}: {got} vs {expected}"
                );
            }
        }
    }

    #[test]
    fn test_three_node_scenario_stays_bounded() {
        // W = [[0,1,0],[1,0,1],[0,1,0]], seed u0 = [1,0,0]
        let model = Model::Baseline(BaselineParams::new(0.1, 1.0));
        let mut evaluator = ModelEvaluator::new(model, &synthetic::path(3).unwrap());
        let y0 = array![1.0, 0.0, 0.0];
        let trajectory = integrate(
            &mut evaluator,
            &y0,
            5.0,
            StepPolicy::fixed(0.01),
            &SolverOptions::default(),
        )
        .unwrap();

        assert_eq!(trajectory.len(), 501);
        let totals = trajectory.total_concentration();
        for k in 0..trajectory.len() {
            for node in 0..3 {
                let u = trajectory.concentrations()[[k, node]];
                assert!(
                    (-1e-9..=1.0 + 1e-9).contains(&u),
                    "u out of [0, 1] at sample {k}"
                );
            }
            if k > 0 {
                assert!(totals[k] >= totals[k - 1] - 1e-9, "total decreased at {k}");
            }
        }
        // saturation: every region approaches carrying capacity
        assert!(trajectory.final_concentrations().iter().all(|&u| u > 0.9));
    }

    #[test]
    fn test_adaptive_matches_closed_form() {
        let model = Model::Baseline(BaselineParams::new(0.0, 1.0));
        let mut evaluator = ModelEvaluator::new(model, &synthetic::path(2).unwrap());
        let y0 = array![0.1, 0.5];
        let trajectory = integrate(
            &mut evaluator,
            &y0,
            5.0,
            StepPolicy::adaptive(1e-8),
            &SolverOptions::default(),
        )
        .unwrap();

        let t_end = trajectory.final_time();
        assert!((t_end - 5.0).abs() < 1e-9);
        for node in 0..2 {
            let expected = logistic(y0[node], 1.0, t_end);
            let got = trajectory.final_concentrations()[node];
            assert!((got - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_clearance_decay_and_growth_regimes() {
        let connectome = synthetic::path(3).unwrap();
        let y0 = array![0.2, 0.0, 0.0];
        let policy = StepPolicy::fixed(0.01);

        // gamma > alpha: clearance wins, everything decays toward zero
        let decay = Model::Clearance(ClearanceParams::new(0.05, 0.5, 1.5));
        let mut evaluator = ModelEvaluator::new(decay, &connectome);
        let trajectory =
            integrate(&mut evaluator, &y0, 40.0, policy, &SolverOptions::default()).unwrap();
        assert!(trajectory
            .final_concentrations()
            .iter()
            .all(|&u| u < 1e-3));

        // alpha > gamma: growth wins, the seed region passes half capacity
        let growth = Model::Clearance(ClearanceParams::new(0.05, 1.5, 0.5));
        let mut evaluator = ModelEvaluator::new(growth, &connectome);
        let trajectory =
            integrate(&mut evaluator, &y0, 40.0, policy, &SolverOptions::default()).unwrap();
        assert!(trajectory.final_concentrations()[0] > 0.5);
    }

    #[test]
    fn test_damage_is_monotone_for_both_variants() {
        let connectome = synthetic::star(5).unwrap();
        let y0 = {
            let mut u = Array1::zeros(5);
            u[0] = 0.3;
            u
        };
        for model in [
            Model::LinearDamage(LinearDamageParams::new(0.05, 1.0, 0.8)),
            Model::ExponentialDamage(ExponentialDamageParams::new(0.05, 1.0, 0.8, 1.0)),
        ] {
            let mut evaluator = ModelEvaluator::new(model, &connectome);
            let y0 = evaluator.initial_state(&y0).unwrap();
            let trajectory = integrate(
                &mut evaluator,
                &y0,
                20.0,
                StepPolicy::fixed(0.01),
                &SolverOptions::default(),
            )
            .unwrap();
            let damage = trajectory.damage().unwrap();
            for node in 0..5 {
                for k in 1..trajectory.len() {
                    assert!(
                        damage[[k, node]] >= damage[[k - 1, node]] - 1e-12,
                        "{} damage decreased at node {node}, sample {k}",
                        model.name()
                    );
                }
            }
        }
    }

    #[test]
    fn test_exponential_damage_with_zero_beta_reduces_to_baseline() {
        let connectome = synthetic::star(5).unwrap();
        let mut u0 = Array1::zeros(5);
        u0[0] = 0.2;
        let policy = StepPolicy::fixed(0.01);

        let base = Model::Baseline(BaselineParams::new(0.1, 1.2));
        let mut base_eval = ModelEvaluator::new(base, &connectome);
        let base_traj =
            integrate(&mut base_eval, &u0, 10.0, policy, &SolverOptions::default()).unwrap();

        let damped = Model::ExponentialDamage(ExponentialDamageParams::new(0.1, 1.2, 0.0, 3.0));
        let mut damped_eval = ModelEvaluator::new(damped, &connectome);
        let y0 = damped_eval.initial_state(&u0).unwrap();
        let damped_traj =
            integrate(&mut damped_eval, &y0, 10.0, policy, &SolverOptions::default()).unwrap();

        assert_eq!(base_traj.len(), damped_traj.len());
        for k in 0..base_traj.len() {
            for node in 0..5 {
                let diff = (base_traj.concentrations()[[k, node]]
                    - damped_traj.concentrations()[[k, node]])
                .abs();
                assert!(diff < 1e-12, "trajectories differ at sample {k}");
            }
            // damage never accrues
            assert!(damped_traj.damage().unwrap().row(k).iter().all(|&d| d == 0.0));
        }
    }

    #[test]
    fn test_unstable_fixed_step_rejected_up_front() {
        let model = Model::Baseline(BaselineParams::new(10.0, 0.0));
        let mut evaluator = ModelEvaluator::new(model, &synthetic::star(8).unwrap());
        let y0 = {
            let mut u = Array1::zeros(8);
            u[0] = 1.0;
            u
        };
        let result = integrate(
            &mut evaluator,
            &y0,
            10.0,
            StepPolicy::fixed(1.0),
            &SolverOptions::default(),
        );
        assert!(matches!(result, Err(SolveError::UnstableStepSize { .. })));
    }

    #[test]
    fn test_divergence_detected_when_validation_disabled() {
        let model = Model::Baseline(BaselineParams::new(10.0, 0.0));
        let mut evaluator = ModelEvaluator::new(model, &synthetic::star(8).unwrap());
        let y0 = {
            let mut u = Array1::zeros(8);
            u[0] = 1.0;
            u
        };
        let options = SolverOptions::default().with_stability_validation(false);
        let result = integrate(&mut evaluator, &y0, 10.0, StepPolicy::fixed(1.0), &options);
        match result {
            Err(SolveError::DivergenceDetected { t, last_valid, .. }) => {
                assert!(t > 0.0 && t < 10.0);
                assert!(last_valid.t < t);
                assert_eq!(last_valid.concentrations.len(), 8);
                assert!(last_valid.concentrations.iter().all(|u| u.is_finite()));
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn test_model_failure_surfaces_last_valid_state() {
        let model = Model::Baseline(BaselineParams::new(0.0, f64::NAN));
        let mut evaluator = ModelEvaluator::new(model, &synthetic::path(3).unwrap());
        let y0 = array![0.5, 0.0, 0.0];
        let result = integrate(
            &mut evaluator,
            &y0,
            1.0,
            StepPolicy::fixed(0.1),
            &SolverOptions::default(),
        );
        match result {
            Err(SolveError::ModelFailure { t, last_valid, .. }) => {
                assert_eq!(t, 0.0);
                assert_eq!(last_valid.concentrations, array![0.5, 0.0, 0.0]);
            }
            other => panic!("expected model failure, got {other:?}"),
        }
    }

    #[test]
    fn test_record_every_thins_samples() {
        let model = Model::Baseline(BaselineParams::new(0.0, 1.0));
        let mut evaluator = ModelEvaluator::new(model, &synthetic::path(2).unwrap());
        let y0 = array![0.1, 0.1];
        let options = SolverOptions::default().with_record_every(10);
        let trajectory =
            integrate(&mut evaluator, &y0, 1.0, StepPolicy::fixed(0.01), &options).unwrap();
        // initial sample plus every 10th of 100 steps
        assert_eq!(trajectory.len(), 11);
        assert!((trajectory.final_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_laplacian_history_recording() {
        let model = Model::LinearDamage(LinearDamageParams::new(0.1, 1.0, 1.0));
        let mut evaluator = ModelEvaluator::new(model, &synthetic::path(3).unwrap());
        let y0 = evaluator.initial_state(&array![0.5, 0.0, 0.0]).unwrap();
        let options = SolverOptions::default()
            .with_record_every(50)
            .with_laplacian_recording(true);
        let trajectory =
            integrate(&mut evaluator, &y0, 5.0, StepPolicy::fixed(0.01), &options).unwrap();

        let history = trajectory.laplacians().unwrap();
        assert_eq!(history.len(), trajectory.len());
        // damage accrues, so later operators have strictly weaker coupling
        let first = &history[0];
        let last = &history[history.len() - 1];
        assert!(last[[0, 1]].abs() < first[[0, 1]].abs());
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let model = Model::Baseline(BaselineParams::default());
        let mut evaluator = ModelEvaluator::new(model, &synthetic::path(3).unwrap());
        let y0 = array![0.1, 0.0, 0.0];

        let bad_horizon = integrate(
            &mut evaluator,
            &y0,
            -1.0,
            StepPolicy::fixed(0.01),
            &SolverOptions::default(),
        );
        assert!(matches!(bad_horizon, Err(SolveError::InvalidHorizon(_))));

        let bad_step = integrate(
            &mut evaluator,
            &y0,
            1.0,
            StepPolicy::fixed(0.0),
            &SolverOptions::default(),
        );
        assert!(matches!(bad_step, Err(SolveError::InvalidStepSize(_))));

        let bad_dim = integrate(
            &mut evaluator,
            &Array1::zeros(5),
            1.0,
            StepPolicy::fixed(0.01),
            &SolverOptions::default(),
        );
        assert!(matches!(bad_dim, Err(SolveError::DimensionMismatch { .. })));
    }
}
