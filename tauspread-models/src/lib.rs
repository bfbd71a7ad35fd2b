//! # tauspread-models
//!
//! The Fisher-Kolmogorov (FKPP) model family for protein spread on a brain
//! network.
//!
//! Four closely related dynamical systems, one closed sum type:
//! - [`Model::Baseline`]: diffusion plus logistic growth
//! - [`Model::Clearance`]: baseline plus a linear clearance sink
//! - [`Model::LinearDamage`]: baseline coupled to a damage field that
//!   linearly degrades connectivity
//! - [`Model::ExponentialDamage`]: baseline coupled to a damage field that
//!   exponentially degrades connectivity
//!
//! A [`ModelEvaluator`] binds a model to a connectome and exposes the
//! right-hand side of the resulting ODE system through the [`RightHandSide`]
//! trait consumed by the integrator. Damage variants rebuild their Laplacian
//! from the pristine weights once per step; the state they see is a flat
//! vector of N concentrations followed by N damage values.

use ndarray::linalg::general_mat_vec_mul;
use ndarray::{s, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tauspread_connectome::{
    spectral_radius, Connectome, ConnectomeError, LaplacianBuilder, Normalization, ReweightRule,
};

// ============================================================================
// Error Types
// ============================================================================

/// Errors during model evaluation
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("non-finite derivative at t = {t}, component {component}: {value}")]
    NumericalInstability {
        t: f64,
        component: usize,
        value: f64,
    },
    #[error(transparent)]
    Connectome(#[from] ConnectomeError),
}

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

// ============================================================================
// Parameter Sets
// ============================================================================

/// Baseline FKPP: du/dt = -rho L u / v + alpha u (1 - u)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineParams {
    /// Effective diffusion coefficient
    pub rho: f64,
    /// Logistic growth rate
    pub alpha: f64,
}

impl Default for BaselineParams {
    fn default() -> Self {
        Self {
            rho: 0.01,
            alpha: 2.1,
        }
    }
}

impl BaselineParams {
    pub fn new(rho: f64, alpha: f64) -> Self {
        Self { rho, alpha }
    }

    /// Growth-dominated regime, rho/alpha << 1.
    pub fn growth_dominated() -> Self {
        Self {
            rho: 0.01,
            alpha: 2.1,
        }
    }

    /// Diffusion-dominated regime, rho/alpha >> 1.
    pub fn diffusion_dominated() -> Self {
        Self {
            rho: 3.0,
            alpha: 0.6,
        }
    }
}

/// Clearance-coupled FKPP: baseline plus a -gamma u sink.
///
/// The qualitative behavior splits on gamma vs alpha: clearance-dominated
/// decay when gamma > alpha, growth-dominated progression when alpha > gamma.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClearanceParams {
    pub rho: f64,
    pub alpha: f64,
    /// Clearance rate
    pub gamma: f64,
}

impl Default for ClearanceParams {
    fn default() -> Self {
        Self {
            rho: 0.01,
            alpha: 2.1,
            gamma: 0.5,
        }
    }
}

impl ClearanceParams {
    pub fn new(rho: f64, alpha: f64, gamma: f64) -> Self {
        Self { rho, alpha, gamma }
    }
}

/// Linear-damage FKPP: damage accrues as dd/dt = beta u (1 - d) and scales
/// each edge weight by clamp(1 - mean endpoint damage, 0, 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearDamageParams {
    pub rho: f64,
    pub alpha: f64,
    /// Damage accrual rate
    pub beta: f64,
}

impl Default for LinearDamageParams {
    fn default() -> Self {
        Self {
            rho: 0.01,
            alpha: 2.1,
            beta: 1.0,
        }
    }
}

impl LinearDamageParams {
    pub fn new(rho: f64, alpha: f64, beta: f64) -> Self {
        Self { rho, alpha, beta }
    }
}

/// Exponential-damage FKPP: damage accrues as dd/dt = beta u exp(-d) and
/// scales each edge weight by exp(-decay * mean endpoint damage).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialDamageParams {
    pub rho: f64,
    pub alpha: f64,
    /// Damage accrual rate
    pub beta: f64,
    /// Connectivity decay constant
    pub decay: f64,
}

impl Default for ExponentialDamageParams {
    fn default() -> Self {
        Self {
            rho: 0.01,
            alpha: 2.1,
            beta: 1.0,
            decay: 1.0,
        }
    }
}

impl ExponentialDamageParams {
    pub fn new(rho: f64, alpha: f64, beta: f64, decay: f64) -> Self {
        Self {
            rho,
            alpha,
            beta,
            decay,
        }
    }
}

// ============================================================================
// Model Family
// ============================================================================

/// The closed family of model variants, each carrying its parameter payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Model {
    Baseline(BaselineParams),
    Clearance(ClearanceParams),
    LinearDamage(LinearDamageParams),
    ExponentialDamage(ExponentialDamageParams),
}

impl Model {
    pub fn name(&self) -> &'static str {
        match self {
            Model::Baseline(_) => "baseline",
            Model::Clearance(_) => "clearance",
            Model::LinearDamage(_) => "linear-damage",
            Model::ExponentialDamage(_) => "exponential-damage",
        }
    }

    /// Whether this variant carries a companion damage field.
    pub fn has_damage(&self) -> bool {
        matches!(self, Model::LinearDamage(_) | Model::ExponentialDamage(_))
    }

    /// Diffusion coefficient rho.
    pub fn diffusion(&self) -> f64 {
        match self {
            Model::Baseline(p) => p.rho,
            Model::Clearance(p) => p.rho,
            Model::LinearDamage(p) => p.rho,
            Model::ExponentialDamage(p) => p.rho,
        }
    }

    /// Logistic growth rate alpha.
    pub fn growth(&self) -> f64 {
        match self {
            Model::Baseline(p) => p.alpha,
            Model::Clearance(p) => p.alpha,
            Model::LinearDamage(p) => p.alpha,
            Model::ExponentialDamage(p) => p.alpha,
        }
    }

    /// Flat state length for a network of `nodes` regions.
    pub fn dim(&self, nodes: usize) -> usize {
        if self.has_damage() {
            2 * nodes
        } else {
            nodes
        }
    }

    fn reweight_rule(&self) -> Option<ReweightRule> {
        match self {
            Model::Baseline(_) | Model::Clearance(_) => None,
            Model::LinearDamage(_) => Some(ReweightRule::Linear),
            Model::ExponentialDamage(p) => Some(ReweightRule::Exponential { decay: p.decay }),
        }
    }
}

// ============================================================================
// Right-Hand-Side Capability
// ============================================================================

/// The single capability the integrator needs from a model.
pub trait RightHandSide {
    /// Flat state length.
    fn dim(&self) -> usize;

    /// Concentration vector length (the leading block of the flat state).
    fn node_count(&self) -> usize;

    /// Called once per accepted step, before any stage evaluation. Damage
    /// variants rebuild their diffusion operator here; the operator is then
    /// frozen across the stages of the step.
    fn prepare_step(&mut self, y: ArrayView1<f64>) -> ModelResult<()> {
        let _ = y;
        Ok(())
    }

    /// Write dy/dt for state `y` at time `t` into `dy`.
    fn eval(&mut self, t: f64, y: ArrayView1<f64>, dy: &mut Array1<f64>) -> ModelResult<()>;

    /// Estimated largest eigenvalue of the stiff (diffusion) part, used to
    /// validate explicit step sizes. None when unknown.
    fn stiffness_estimate(&self) -> Option<f64> {
        None
    }

    /// The current diffusion operator, for history recording.
    fn operator(&self) -> Option<&Array2<f64>> {
        None
    }
}

// ============================================================================
// Model Evaluator
// ============================================================================

/// Binds a model variant to a connectome and owns all per-run scratch state.
///
/// Every simulation run gets its own evaluator; nothing here is shared, so
/// parameter sweeps can run one evaluator per worker without locking.
#[derive(Debug, Clone)]
pub struct ModelEvaluator {
    model: Model,
    nodes: usize,
    builder: LaplacianBuilder,
    laplacian: Array2<f64>,
    inv_volumes: Array1<f64>,
    flux: Array1<f64>,
    stiffness: f64,
}

impl ModelEvaluator {
    pub fn new(model: Model, connectome: &Connectome) -> Self {
        Self::with_normalization(model, connectome, Normalization::None)
    }

    pub fn with_normalization(
        model: Model,
        connectome: &Connectome,
        normalization: Normalization,
    ) -> Self {
        let nodes = connectome.node_count();
        let builder = LaplacianBuilder::new(connectome).with_normalization(normalization);
        let laplacian = builder.build();
        let inv_volumes = match connectome.volumes() {
            Some(volumes) => volumes.mapv(f64::recip),
            None => Array1::ones(nodes),
        };

        // Stiffness of the effective operator rho V^-1 L. Damage reweighting
        // only shrinks edge weights, so the pristine estimate bounds the
        // whole run.
        let mut effective = laplacian.clone();
        for (i, mut row) in effective.outer_iter_mut().enumerate() {
            row *= inv_volumes[i];
        }
        let stiffness = model.diffusion() * spectral_radius(&effective, 100);

        Self {
            model,
            nodes,
            builder,
            laplacian,
            inv_volumes,
            flux: Array1::zeros(nodes),
            stiffness,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Pack an initial concentration vector into the flat state, with damage
    /// starting at zero for the damage variants.
    pub fn initial_state(&self, u0: &Array1<f64>) -> ModelResult<Array1<f64>> {
        if u0.len() != self.nodes {
            return Err(ConnectomeError::ShapeMismatch {
                context: "initial concentration",
                expected: self.nodes,
                got: u0.len(),
            }
            .into());
        }
        let mut y0 = Array1::zeros(self.model.dim(self.nodes));
        y0.slice_mut(s![..self.nodes]).assign(u0);
        Ok(y0)
    }

    /// Concentration block of a flat state.
    pub fn concentrations<'a>(&self, y: &'a Array1<f64>) -> ArrayView1<'a, f64> {
        y.slice(s![..self.nodes])
    }

    /// Damage block of a flat state, for the damage variants.
    pub fn damage<'a>(&self, y: &'a Array1<f64>) -> Option<ArrayView1<'a, f64>> {
        self.model.has_damage().then(|| y.slice(s![self.nodes..]))
    }
}

impl RightHandSide for ModelEvaluator {
    fn dim(&self) -> usize {
        self.model.dim(self.nodes)
    }

    fn node_count(&self) -> usize {
        self.nodes
    }

    fn prepare_step(&mut self, y: ArrayView1<f64>) -> ModelResult<()> {
        if let Some(rule) = self.model.reweight_rule() {
            let damage = y.slice(s![self.nodes..]);
            self.builder
                .reweighted_into(damage, rule, &mut self.laplacian)?;
        }
        Ok(())
    }

    fn eval(&mut self, t: f64, y: ArrayView1<f64>, dy: &mut Array1<f64>) -> ModelResult<()> {
        let n = self.nodes;
        let u = y.slice(s![..n]);
        general_mat_vec_mul(1.0, &self.laplacian, &u, 0.0, &mut self.flux);

        match self.model {
            Model::Baseline(p) => {
                for i in 0..n {
                    let ui = u[i];
                    dy[i] = -p.rho * self.flux[i] * self.inv_volumes[i]
                        + p.alpha * ui * (1.0 - ui);
                }
            }
            Model::Clearance(p) => {
                for i in 0..n {
                    let ui = u[i];
                    dy[i] = -p.rho * self.flux[i] * self.inv_volumes[i]
                        + p.alpha * ui * (1.0 - ui)
                        - p.gamma * ui;
                }
            }
            Model::LinearDamage(p) => {
                let d = y.slice(s![n..]);
                for i in 0..n {
                    let ui = u[i];
                    dy[i] = -p.rho * self.flux[i] * self.inv_volumes[i]
                        + p.alpha * ui * (1.0 - ui);
                    // damage is irreversible: both factors floor at zero
                    dy[n + i] = p.beta * ui.max(0.0) * (1.0 - d[i]).max(0.0);
                }
            }
            Model::ExponentialDamage(p) => {
                let d = y.slice(s![n..]);
                for i in 0..n {
                    let ui = u[i];
                    dy[i] = -p.rho * self.flux[i] * self.inv_volumes[i]
                        + p.alpha * ui * (1.0 - ui);
                    dy[n + i] = p.beta * ui.max(0.0) * (-d[i]).exp();
                }
            }
        }

        for (component, &value) in dy.iter().enumerate() {
            if !value.is_finite() {
                return Err(ModelError::NumericalInstability {
                    t,
                    component,
                    value,
                });
            }
        }
        Ok(())
    }

    fn stiffness_estimate(&self) -> Option<f64> {
        Some(self.stiffness)
    }

    fn operator(&self) -> Option<&Array2<f64>> {
        Some(&self.laplacian)
    }
}

// ============================================================================
// Tests
// ============================================================================
