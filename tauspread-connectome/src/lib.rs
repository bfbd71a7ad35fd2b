//! # tauspread-connectome
//!
//! Structural brain network data model for reaction-diffusion simulations.
//!
//! This crate provides:
//! - [`Connectome`]: a validated, immutable connectivity matrix with optional
//!   per-region volumes
//! - [`LaplacianBuilder`]: graph Laplacian construction (L = D - W) with
//!   normalization modes and damage reweighting
//! - [`BraakAtlas`]: ordered partition of regions into clinical stage groups
//! - [`synthetic`]: star, path, and seeded random network fixtures
//!
//! The connectivity matrix is never mutated after construction. Damage
//! reweighting always derives a fresh operator from the pristine weights, so
//! concurrent runs can each own a builder without interference.

use ndarray::{Array1, Array2, Axis};
use petgraph::algo::connected_components;
use petgraph::graph::UnGraph;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod braak;
mod laplacian;
pub mod synthetic;

pub use braak::{BraakAtlas, StageGroup, DESIKAN_NODES};
pub use laplacian::{spectral_radius, LaplacianBuilder, Normalization, ReweightRule};

// ============================================================================
// Error Types
// ============================================================================

/// Errors in connectome construction and Laplacian derivation
#[derive(Error, Debug)]
pub enum ConnectomeError {
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid weight at ({row}, {col}): {value} (weights must be finite and non-negative)")]
    InvalidWeight { row: usize, col: usize, value: f64 },
    #[error("invalid volume for region {node}: {value} (volumes must be finite and positive)")]
    InvalidVolume { node: usize, value: f64 },
    #[error("invalid damage for region {node}: {value} (damage must be finite and non-negative)")]
    InvalidDamage { node: usize, value: f64 },
    #[error("region {node} assigned to both '{first}' and '{second}'")]
    OverlappingStages {
        node: usize,
        first: String,
        second: String,
    },
    #[error("stage group '{label}' references region {node}, but the atlas covers {nodes} regions")]
    NodeOutOfRange {
        label: String,
        node: usize,
        nodes: usize,
    },
}

/// Result type for connectome operations
pub type ConnectomeResult<T> = Result<T, ConnectomeError>;

// ============================================================================
// Connectome
// ============================================================================

/// A validated structural connectivity matrix over N brain regions.
///
/// Entry (i, j) is the connection strength between regions i and j. The
/// matrix must be square with finite, non-negative entries; it may be
/// asymmetric for per-hemisphere variants. Optional per-region volumes scale
/// the diffusion term downstream so that total mass is conserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connectome {
    weights: Array2<f64>,
    volumes: Option<Array1<f64>>,
}

impl Connectome {
    /// Validate and wrap a raw connectivity matrix.
    pub fn new(weights: Array2<f64>) -> ConnectomeResult<Self> {
        if weights.nrows() != weights.ncols() {
            return Err(ConnectomeError::ShapeMismatch {
                context: "connectivity matrix",
                expected: weights.nrows(),
                got: weights.ncols(),
            });
        }
        for ((row, col), &value) in weights.indexed_iter() {
            if !value.is_finite() || value < 0.0 {
                return Err(ConnectomeError::InvalidWeight { row, col, value });
            }
        }
        Ok(Self {
            weights,
            volumes: None,
        })
    }

    /// Attach per-region volumes (enables mass-conserving diffusion).
    pub fn with_volumes(mut self, volumes: Array1<f64>) -> ConnectomeResult<Self> {
        if volumes.len() != self.node_count() {
            return Err(ConnectomeError::ShapeMismatch {
                context: "volume vector",
                expected: self.node_count(),
                got: volumes.len(),
            });
        }
        for (node, &value) in volumes.iter().enumerate() {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConnectomeError::InvalidVolume { node, value });
            }
        }
        self.volumes = Some(volumes);
        Ok(self)
    }

    /// Number of regions (N).
    pub fn node_count(&self) -> usize {
        self.weights.nrows()
    }

    /// The connectivity matrix.
    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    /// Per-region volumes, if attached.
    pub fn volumes(&self) -> Option<&Array1<f64>> {
        self.volumes.as_ref()
    }

    /// Weighted degree of each region (row sums of W).
    pub fn degree(&self) -> Array1<f64> {
        self.weights.sum_axis(Axis(1))
    }

    /// Whether the connectivity matrix is symmetric within tolerance.
    pub fn is_symmetric(&self, tol: f64) -> bool {
        let n = self.node_count();
        for i in 0..n {
            for j in (i + 1)..n {
                if (self.weights[[i, j]] - self.weights[[j, i]]).abs() > tol {
                    return false;
                }
            }
        }
        true
    }

    /// Structural view as an undirected petgraph graph.
    ///
    /// Asymmetric matrices are symmetrized by taking the larger of the two
    /// directed weights. Node payloads are the region indices.
    pub fn to_graph(&self) -> UnGraph<usize, f64> {
        let n = self.node_count();
        let mut graph = UnGraph::with_capacity(n, n * 2);
        let indices: Vec<_> = (0..n).map(|i| graph.add_node(i)).collect();
        for i in 0..n {
            for j in (i + 1)..n {
                let weight = self.weights[[i, j]].max(self.weights[[j, i]]);
                if weight > 0.0 {
                    graph.add_edge(indices[i], indices[j], weight);
                }
            }
        }
        graph
    }

    /// Whether every region is reachable from every other region.
    ///
    /// Disconnected components never exchange protein by diffusion; callers
    /// seeding a single component may want to check this up front.
    pub fn is_connected(&self) -> bool {
        self.node_count() == 0 || connected_components(&self.to_graph()) == 1
    }

    /// Graph Laplacian L = D - W of the pristine weights.
    pub fn laplacian(&self, normalization: Normalization) -> Array2<f64> {
        LaplacianBuilder::new(self)
            .with_normalization(normalization)
            .build()
    }
}

// ============================================================================
// Tests
// ============================================================================
