//! Group types for the distribution hierarchy.
//!
//! A topology is a tree of groups. Internal groups split the redundancy of a
//! bucket across their subgroups; leaf groups hold the configured nodes.
//!
//! Groups live in an arena owned by [`Topology`](crate::Topology) and refer
//! to their children by [`GroupId`].

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::redundancy::RedundancyDistributor;

/// Handle of a group inside its topology arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub(crate) u32);

impl GroupId {
    /// Position of the group in the arena.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A node listed in a leaf group.
///
/// Identity and ordering use the index only; the retired flag is carried
/// along for callers but plays no part in comparisons.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfiguredNode {
    /// Node index, shared by the node's distributor and storage node.
    pub index: u16,
    /// Whether the node is being retired.
    pub retired: bool,
}

impl ConfiguredNode {
    /// Create an active node.
    #[must_use]
    pub fn new(index: u16) -> Self {
        Self { index, retired: false }
    }

    /// Create a retired node.
    #[must_use]
    pub fn retired(index: u16) -> Self {
        Self { index, retired: true }
    }
}

impl PartialEq for ConfiguredNode {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for ConfiguredNode {}

impl Hash for ConfiguredNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl PartialOrd for ConfiguredNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConfiguredNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl From<u16> for ConfiguredNode {
    fn from(index: u16) -> Self {
        Self::new(index)
    }
}

/// What a group contains.
#[derive(Debug, Clone)]
pub enum GroupKind {
    /// A group of nodes, sorted by index.
    Leaf {
        /// Configured nodes.
        nodes: Vec<ConfiguredNode>,
    },
    /// A group of subgroups.
    Internal {
        /// Redundancy split across the children.
        distributor: RedundancyDistributor,
        /// Children keyed by their index among siblings.
        children: BTreeMap<u16, GroupId>,
    },
}

/// A group in the distribution hierarchy.
#[derive(Debug, Clone)]
pub struct Group {
    pub(crate) index: u16,
    pub(crate) name: String,
    pub(crate) capacity: f64,
    pub(crate) distribution_hash: u32,
    pub(crate) kind: GroupKind,
}

impl Group {
    /// Index among siblings.
    #[must_use]
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relative weight of this group against its siblings.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Hash mixed into the seed when scoring this group's children.
    #[must_use]
    pub fn distribution_hash(&self) -> u32 {
        self.distribution_hash
    }

    /// Leaf or internal contents.
    #[must_use]
    pub fn kind(&self) -> &GroupKind {
        &self.kind
    }

    /// Returns true for a group of nodes.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, GroupKind::Leaf { .. })
    }

    /// Configured nodes of a leaf group; empty for internal groups.
    #[must_use]
    pub fn nodes(&self) -> &[ConfiguredNode] {
        match &self.kind {
            GroupKind::Leaf { nodes } => nodes,
            GroupKind::Internal { .. } => &[],
        }
    }

    /// Child group ids in ascending index order; empty for leaf groups.
    pub fn children(&self) -> impl Iterator<Item = GroupId> + '_ {
        let children = match &self.kind {
            GroupKind::Internal { children, .. } => Some(children.values().copied()),
            GroupKind::Leaf { .. } => None,
        };
        children.into_iter().flatten()
    }

    /// Redundancy split of an internal group.
    #[must_use]
    pub fn redundancy_distributor(&self) -> Option<&RedundancyDistributor> {
        match &self.kind {
            GroupKind::Internal { distributor, .. } => Some(distributor),
            GroupKind::Leaf { .. } => None,
        }
    }
}
