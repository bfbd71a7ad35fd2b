//! Synthetic network fixtures for tests, benches, and seeding studies.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Connectome, ConnectomeResult};

/// Star network: region 0 is the hub, all others are leaves with unit edges.
///
/// The star Laplacian has eigenvalues {0, 1, ..., 1, n}, which makes it a
/// convenient worst case for explicit step-size stability.
pub fn star(n: usize) -> ConnectomeResult<Connectome> {
    let mut weights = Array2::zeros((n, n));
    for leaf in 1..n {
        weights[[0, leaf]] = 1.0;
        weights[[leaf, 0]] = 1.0;
    }
    Connectome::new(weights)
}

/// Path network: a chain of unit edges.
pub fn path(n: usize) -> ConnectomeResult<Connectome> {
    let mut weights = Array2::zeros((n, n));
    for i in 1..n {
        weights[[i - 1, i]] = 1.0;
        weights[[i, i - 1]] = 1.0;
    }
    Connectome::new(weights)
}

/// Seeded random symmetric network.
///
/// Each unordered pair gets an edge with probability `density`; edge weights
/// are uniform in [0.2, 1.0] so the graph never contains near-zero edges.
/// Deterministic for a fixed seed.
pub fn random_connectome(n: usize, density: f64, seed: u64) -> ConnectomeResult<Connectome> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut weights = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            if rng.gen::<f64>() < density {
                let w = 0.2 + 0.8 * rng.gen::<f64>();
                weights[[i, j]] = w;
                weights[[j, i]] = w;
            }
        }
    }
    Connectome::new(weights)
}
