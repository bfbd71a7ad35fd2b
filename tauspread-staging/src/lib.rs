//! # tauspread-staging
//!
//! Clinical staging of simulated trajectories.
//!
//! This crate provides:
//! - [`StageCurves`]: per-Braak-stage aggregate activation over time,
//!   computed in one pass over the trajectory
//! - threshold-crossing times with linear interpolation between samples
//! - [`biomarker_curve`]: the normalized whole-brain load curve
//! - [`activation_analysis`]: when a stage activates and how much total
//!   load the brain carries at that moment
//!
//! An unreached threshold is an expected outcome in clearance-dominated
//! regimes. The single-stage query reports it as a typed error; the batch
//! query maps it to `None` so a multi-run comparison never aborts on it.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tauspread_connectome::BraakAtlas;
use tauspread_solve::Trajectory;

// ============================================================================
// Error Types
// ============================================================================

/// Errors in staging queries
#[derive(Error, Debug)]
pub enum StagingError {
    /// Expected for some parameter regimes: the stage was simply not reached
    /// within the simulated horizon.
    #[error("aggregate activation of '{stage}' never crosses {theta} within the horizon")]
    ThresholdNeverReached { stage: String, theta: f64 },
    #[error("threshold must lie strictly between 0 and 1, got {0}")]
    InvalidThreshold(f64),
    #[error("atlas covers {atlas} regions but the trajectory has {trajectory}")]
    NodeCountMismatch { atlas: usize, trajectory: usize },
    #[error("stage index {0} out of range")]
    StageOutOfRange(usize),
    #[error("stage group '{0}' has no member regions")]
    EmptyStage(String),
    #[error("trajectory has no samples")]
    EmptyTrajectory,
}

/// Result type for staging operations
pub type StagingResult<T> = Result<T, StagingError>;

// ============================================================================
// Aggregates
// ============================================================================

/// How region concentrations combine into one value per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Aggregate {
    /// Mean concentration across the stage's regions
    #[default]
    Mean,
    /// Peak concentration across the stage's regions
    Max,
}

impl Aggregate {
    fn apply(&self, values: impl Iterator<Item = f64>) -> f64 {
        match self {
            Aggregate::Mean => {
                let mut sum = 0.0;
                let mut count = 0usize;
                for v in values {
                    sum += v;
                    count += 1;
                }
                sum / count as f64
            }
            Aggregate::Max => values.fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

// ============================================================================
// Stage Curves
// ============================================================================

/// Per-stage aggregate activation curves for one trajectory.
///
/// Built in a single pass over the trajectory; all subsequent threshold
/// queries work on the reduced sample-by-stage matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCurves {
    labels: Vec<String>,
    times: Vec<f64>,
    curves: Array2<f64>,
    aggregate: Aggregate,
}

impl StageCurves {
    pub fn from_trajectory(
        trajectory: &Trajectory,
        atlas: &BraakAtlas,
        aggregate: Aggregate,
    ) -> StagingResult<Self> {
        if trajectory.is_empty() {
            return Err(StagingError::EmptyTrajectory);
        }
        if atlas.node_count() != trajectory.node_count() {
            return Err(StagingError::NodeCountMismatch {
                atlas: atlas.node_count(),
                trajectory: trajectory.node_count(),
            });
        }
        for group in atlas.groups() {
            if group.nodes.is_empty() {
                return Err(StagingError::EmptyStage(group.label.clone()));
            }
        }

        let samples = trajectory.len();
        let stages = atlas.stage_count();
        let mut curves = Array2::zeros((samples, stages));
        for (k, row) in trajectory.concentrations().outer_iter().enumerate() {
            for (s, group) in atlas.groups().iter().enumerate() {
                curves[[k, s]] = aggregate.apply(group.nodes.iter().map(|&node| row[node]));
            }
        }

        Ok(Self {
            labels: atlas.groups().iter().map(|g| g.label.clone()).collect(),
            times: trajectory.times().to_vec(),
            curves,
            aggregate,
        })
    }

    pub fn stage_count(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    /// Sample-by-stage activation matrix.
    pub fn curves(&self) -> &Array2<f64> {
        &self.curves
    }

    /// Activation curve of one stage.
    pub fn curve(&self, stage: usize) -> Option<ArrayView1<'_, f64>> {
        (stage < self.stage_count()).then(|| self.curves.column(stage))
    }

    /// First time the stage's aggregate activation crosses `theta`, with
    /// linear interpolation between the bracketing samples.
    pub fn crossing_time(&self, stage: usize, theta: f64) -> StagingResult<f64> {
        if !(0.0..1.0).contains(&theta) || theta == 0.0 {
            return Err(StagingError::InvalidThreshold(theta));
        }
        let curve = self
            .curve(stage)
            .ok_or(StagingError::StageOutOfRange(stage))?;

        if curve[0] >= theta {
            return Ok(self.times[0]);
        }
        for k in 1..curve.len() {
            if curve[k] >= theta {
                let (t0, t1) = (self.times[k - 1], self.times[k]);
                let (c0, c1) = (curve[k - 1], curve[k]);
                return Ok(t0 + (theta - c0) * (t1 - t0) / (c1 - c0));
            }
        }
        Err(StagingError::ThresholdNeverReached {
            stage: self.labels[stage].clone(),
            theta,
        })
    }

    /// Crossing times of every stage; `None` marks stages that never reach
    /// `theta` within the horizon.
    pub fn crossing_times(&self, theta: f64) -> StagingResult<Vec<Option<f64>>> {
        if !(0.0..1.0).contains(&theta) || theta == 0.0 {
            return Err(StagingError::InvalidThreshold(theta));
        }
        Ok((0..self.stage_count())
            .map(|stage| self.crossing_time(stage, theta).ok())
            .collect())
    }
}

// ============================================================================
// Biomarker Curve
// ============================================================================

/// Whole-brain load over time, normalized to its peak.
///
/// Mirrors the clinical biomarker curves that stage activation times are
/// compared against. All-zero trajectories yield an all-zero curve.
pub fn biomarker_curve(trajectory: &Trajectory) -> StagingResult<Array1<f64>> {
    if trajectory.is_empty() {
        return Err(StagingError::EmptyTrajectory);
    }
    let totals = trajectory.concentrations().sum_axis(Axis(1));
    let peak = totals.iter().fold(0.0f64, |a, &b| a.max(b));
    if peak > 0.0 {
        Ok(totals / peak)
    } else {
        Ok(totals)
    }
}

/// Linear interpolation of a sampled curve at time `t`, clamped to the ends.
pub fn interpolate(times: &[f64], values: ArrayView1<'_, f64>, t: f64) -> f64 {
    if times.is_empty() {
        return 0.0;
    }
    if t <= times[0] {
        return values[0];
    }
    if let Some(&last) = times.last() {
        if t >= last {
            return values[values.len() - 1];
        }
    }
    let k = times.partition_point(|&sample| sample < t);
    let (t0, t1) = (times[k - 1], times[k]);
    if t1 <= t0 {
        return values[k];
    }
    let w = (t - t0) / (t1 - t0);
    values[k - 1] * (1.0 - w) + values[k] * w
}

// ============================================================================
// Activation Analysis
// ============================================================================

/// When a stage activates, and the global load carried at that moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageActivation {
    pub stage: usize,
    pub label: String,
    /// First time the stage's aggregate crosses the threshold
    pub time: f64,
    /// Normalized whole-brain load at that time
    pub global_load: f64,
}

/// Activation time of `stage` at threshold `theta`, paired with the
/// normalized total load at that time.
pub fn activation_analysis(
    trajectory: &Trajectory,
    atlas: &BraakAtlas,
    stage: usize,
    theta: f64,
    aggregate: Aggregate,
) -> StagingResult<StageActivation> {
    let curves = StageCurves::from_trajectory(trajectory, atlas, aggregate)?;
    let time = curves.crossing_time(stage, theta)?;
    let biomarker = biomarker_curve(trajectory)?;
    let global_load = interpolate(trajectory.times(), biomarker.view(), time);
    Ok(StageActivation {
        stage,
        label: curves.labels()[stage].clone(),
        time,
        global_load,
    })
}

// ============================================================================
// Tests
// ============================================================================
