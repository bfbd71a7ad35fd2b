//! Braak stage groupings of brain regions.
//!
//! A [`BraakAtlas`] is a fixed, ordered partition of region indices into
//! named stage groups. It is static reference data: staging never derives
//! group membership from a simulation.

use serde::{Deserialize, Serialize};

use crate::{ConnectomeError, ConnectomeResult};

/// Region count of the bundled 83-region parcellation.
pub const DESIKAN_NODES: usize = 83;

// Bundled atlas membership, zero-based region indices.
const STAGE_I: &[usize] = &[26, 67];
const STAGE_II: &[usize] = &[39, 80];
const STAGE_III: &[usize] = &[23, 24, 25, 40, 64, 65, 66, 81];
const STAGE_IV: &[usize] = &[
    11, 12, 13, 14, 27, 28, 29, 33, 52, 53, 54, 55, 68, 69, 70, 74,
];
const STAGE_VI: &[usize] = &[9, 10, 15, 20, 21, 50, 51, 56, 61, 62];
const REST_OF_BRAIN: &[usize] = &[34, 35, 36, 37, 38, 75, 76, 77, 78, 79];

// ============================================================================
// Stage Groups
// ============================================================================

/// A named group of region indices belonging to one clinical stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageGroup {
    pub label: String,
    pub nodes: Vec<usize>,
}

impl StageGroup {
    pub fn new(label: impl Into<String>, nodes: Vec<usize>) -> Self {
        Self {
            label: label.into(),
            nodes,
        }
    }
}

/// Ordered partition of N regions into clinical stage groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BraakAtlas {
    groups: Vec<StageGroup>,
    nodes: usize,
}

impl BraakAtlas {
    /// Validate an ordered list of stage groups over `nodes` regions.
    ///
    /// Groups must be disjoint and reference in-range region indices. They
    /// need not cover every region; uncovered regions simply belong to no
    /// stage.
    pub fn new(groups: Vec<StageGroup>, nodes: usize) -> ConnectomeResult<Self> {
        let mut owner: Vec<Option<usize>> = vec![None; nodes];
        for (stage, group) in groups.iter().enumerate() {
            for &node in &group.nodes {
                if node >= nodes {
                    return Err(ConnectomeError::NodeOutOfRange {
                        label: group.label.clone(),
                        node,
                        nodes,
                    });
                }
                if let Some(first) = owner[node] {
                    return Err(ConnectomeError::OverlappingStages {
                        node,
                        first: groups[first].label.clone(),
                        second: group.label.clone(),
                    });
                }
                owner[node] = Some(stage);
            }
        }
        Ok(Self { groups, nodes })
    }

    /// The 83-region parcellation used throughout the tau literature:
    /// stages I through VI plus a rest-of-brain group. Stage V is the
    /// complement of the explicitly tabulated groups.
    pub fn desikan_83() -> Self {
        let mut assigned = [false; DESIKAN_NODES];
        for &node in STAGE_I
            .iter()
            .chain(STAGE_II)
            .chain(STAGE_III)
            .chain(STAGE_IV)
            .chain(STAGE_VI)
            .chain(REST_OF_BRAIN)
        {
            assigned[node] = true;
        }
        let stage_v: Vec<usize> = (0..DESIKAN_NODES).filter(|&i| !assigned[i]).collect();

        let groups = vec![
            StageGroup::new("Braak stage I", STAGE_I.to_vec()),
            StageGroup::new("Braak stage II", STAGE_II.to_vec()),
            StageGroup::new("Braak stage III", STAGE_III.to_vec()),
            StageGroup::new("Braak stage IV", STAGE_IV.to_vec()),
            StageGroup::new("Braak stage V", stage_v),
            StageGroup::new("Braak stage VI", STAGE_VI.to_vec()),
            StageGroup::new("Rest of brain", REST_OF_BRAIN.to_vec()),
        ];
        Self {
            groups,
            nodes: DESIKAN_NODES,
        }
    }

    /// Number of regions the atlas covers.
    pub fn node_count(&self) -> usize {
        self.nodes
    }

    /// Number of stage groups, in clinical order.
    pub fn stage_count(&self) -> usize {
        self.groups.len()
    }

    /// All stage groups in clinical order.
    pub fn groups(&self) -> &[StageGroup] {
        &self.groups
    }

    /// A stage group by position.
    pub fn group(&self, stage: usize) -> Option<&StageGroup> {
        self.groups.get(stage)
    }

    /// Label of a stage group by position.
    pub fn label(&self, stage: usize) -> Option<&str> {
        self.groups.get(stage).map(|g| g.label.as_str())
    }

    /// Which stage a region belongs to, if any.
    pub fn stage_of(&self, node: usize) -> Option<usize> {
        self.groups
            .iter()
            .position(|group| group.nodes.contains(&node))
    }

    /// Whether every region is assigned to some stage.
    pub fn is_complete(&self) -> bool {
        let covered: usize = self.groups.iter().map(|g| g.nodes.len()).sum();
        covered == self.nodes
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desikan_is_complete_partition() {
        let atlas = BraakAtlas::desikan_83();
        assert_eq!(atlas.node_count(), DESIKAN_NODES);
        assert_eq!(atlas.stage_count(), 7);
        assert!(atlas.is_complete());
        for node in 0..DESIKAN_NODES {
            assert!(atlas.stage_of(node).is_some(), "region {node} unassigned");
        }
    }

    #[test]
    fn test_desikan_seed_regions_are_stage_one() {
        let atlas = BraakAtlas::desikan_83();
        // entorhinal cortex, both hemispheres
        assert_eq!(atlas.stage_of(26), Some(0));
        assert_eq!(atlas.stage_of(67), Some(0));
        assert_eq!(atlas.label(0), Some("Braak stage I"));
    }

    #[test]
    fn test_desikan_stage_five_is_complement() {
        let atlas = BraakAtlas::desikan_83();
        let stage_v = atlas.group(4).unwrap();
        assert!(!stage_v.nodes.is_empty());
        for &node in &stage_v.nodes {
            assert_eq!(atlas.stage_of(node), Some(4));
        }
        let covered: usize = atlas.groups().iter().map(|g| g.nodes.len()).sum();
        assert_eq!(covered, DESIKAN_NODES);
    }

    #[test]
    fn test_rejects_out_of_range_node() {
        let groups = vec![StageGroup::new("stage", vec![0, 5])];
        assert!(matches!(
            BraakAtlas::new(groups, 4),
            Err(ConnectomeError::NodeOutOfRange { node: 5, .. })
        ));
    }

    #[test]
    fn test_rejects_overlapping_groups() {
        let groups = vec![
            StageGroup::new("early", vec![0, 1]),
            StageGroup::new("late", vec![1, 2]),
        ];
        assert!(matches!(
            BraakAtlas::new(groups, 4),
            Err(ConnectomeError::OverlappingStages { node: 1, .. })
        ));
    }

    #[test]
    fn test_partial_atlas_allowed() {
        let groups = vec![StageGroup::new("seed", vec![0])];
        let atlas = BraakAtlas::new(groups, 4).unwrap();
        assert!(!atlas.is_complete());
        assert_eq!(atlas.stage_of(3), None);
    }
}
