//! Ideal state computation.
//!
//! Given a bucket and a cluster state, [`Distribution`] walks the topology
//! top-down. At each internal group the children are scored with a random
//! sequence seeded from the bucket and the group hash; the best scoring
//! children receive the redundancy split of the group. Inside the resolved
//! leaf groups the nodes are scored the same way with a second seed, skipping
//! nodes that are not in the requested up-states or whose ideal disk is down.

use std::collections::BTreeMap;

use idealstate_core::{
    BucketId, ClusterState, DistributionConfig, NodeState, NodeType, State, UpStates,
};
use thiserror::Error;
use tracing::trace;

use crate::group::{GroupId, GroupKind};
use crate::hash::{disk_seed, distributor_seed, group_seed, storage_seed};
use crate::random::RandomSequence;
use crate::redundancy::RedundancyError;
use crate::topology::{Topology, TopologyError};

const CAPACITY_EPSILON: f64 = 1e-7;

/// Errors that can occur during a placement query.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlacementError {
    /// The bucket is too coarse for the cluster's distribution bits.
    #[error(
        "cannot get ideal state for {bucket}: bucket uses {used_bits} bits, \
         cluster state uses {distribution_bits} distribution bits"
    )]
    TooFewBucketBits {
        /// Offending bucket.
        bucket: BucketId,
        /// Bits used by the bucket.
        used_bits: u32,
        /// Distribution bits of the cluster state.
        distribution_bits: u32,
    },

    /// Requested redundancy has no precomputed split.
    #[error(transparent)]
    Redundancy(#[from] RedundancyError),

    /// Every candidate distributor group was skipped.
    #[error("no distributors available in cluster state version {version}")]
    NoDistributorsAvailable {
        /// Cluster state version.
        version: u32,
    },

    /// No distributor in the chosen group is in the requested states.
    #[error("no distributor in states '{up_states}' in cluster state version {version}")]
    NoDistributorInUpStates {
        /// Requested up-states.
        up_states: UpStates,
        /// Cluster state version.
        version: u32,
    },

    /// The node reports no disks.
    #[error("disk count of storage node {node} is unknown")]
    DiskCountUnknown {
        /// Node index.
        node: u16,
    },
}

impl PlacementError {
    /// The query itself was invalid; a newer cluster state will not help.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::TooFewBucketBits { .. } | Self::Redundancy(_))
    }

    /// No candidate was available; a newer cluster state may resolve it.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::NoDistributorsAvailable { .. } | Self::NoDistributorInUpStates { .. })
    }
}

/// Result type for placement queries.
pub type Result<T> = std::result::Result<T, PlacementError>;

/// Placement engine over an immutable topology.
///
/// Queries are pure functions of their arguments, so a `Distribution` can be
/// shared between threads freely.
#[derive(Debug, Clone)]
pub struct Distribution {
    topology: Topology,
    storage_up_states: UpStates,
    distributor_up_states: UpStates,
}

impl Distribution {
    /// Create an engine with the default up-states.
    #[must_use]
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            storage_up_states: UpStates::default(),
            distributor_up_states: UpStates::default(),
        }
    }

    /// Replace the default up-states.
    #[must_use]
    pub fn with_up_states(mut self, storage: UpStates, distributor: UpStates) -> Self {
        self.storage_up_states = storage;
        self.distributor_up_states = distributor;
        self
    }

    /// Build the topology and default up-states from configuration.
    pub fn from_config(config: &DistributionConfig) -> std::result::Result<Self, ConfigError> {
        let topology = Topology::from_config(config)?;
        let storage = config.storage_up_states()?;
        let distributor = config.distributor_up_states()?;
        Ok(Self::new(topology).with_up_states(storage, distributor))
    }

    /// The topology this engine places over.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Default up-states for storage placement.
    #[must_use]
    pub fn storage_up_states(&self) -> UpStates {
        self.storage_up_states
    }

    /// Default up-states for distributor ownership.
    #[must_use]
    pub fn distributor_up_states(&self) -> UpStates {
        self.distributor_up_states
    }

    /// Storage nodes that should hold `bucket`, using the topology redundancy.
    pub fn ideal_storage_nodes(
        &self,
        state: &ClusterState,
        bucket: BucketId,
        up_states: UpStates,
    ) -> Result<Vec<u16>> {
        self.ideal_storage_nodes_with_redundancy(state, bucket, self.topology.redundancy(), up_states)
    }

    /// Storage nodes that should hold `bucket` at the given redundancy.
    ///
    /// Nodes come grouped by leaf group in visiting order; within a group the
    /// best scoring node comes first.
    pub fn ideal_storage_nodes_with_redundancy(
        &self,
        state: &ClusterState,
        bucket: BucketId,
        redundancy: u16,
        up_states: UpStates,
    ) -> Result<Vec<u16>> {
        check_bucket(state, bucket)?;
        self.check_redundancy(redundancy)?;
        let groups = self.storage_groups(state, bucket, redundancy)?;
        let seed = storage_seed(bucket, state);

        let mut result = Vec::with_capacity(usize::from(redundancy));
        for (leaf, group_redundancy) in groups {
            let mut best = TopScores::new(usize::from(group_redundancy));
            let mut random = RandomSequence::new(seed);
            let mut position: u32 = 0;

            for node in self.topology.get(leaf).nodes() {
                let node_state = state.node_state(NodeType::Storage, node.index);
                if !up_states.contains(node_state.state) {
                    continue;
                }
                if node_state.is_any_disk_down() {
                    let disk = self.ideal_disk(node_state, node.index, bucket)?;
                    if node_state.disk_state(disk).map_or(true, |d| d.state != State::Up) {
                        continue;
                    }
                }

                let target = u32::from(node.index);
                if target < position {
                    trace!(node = node.index, position, "Rewinding storage sequence");
                    random.reseed(seed);
                    position = 0;
                }
                random.skip(target - position);
                let score = adjust_for_capacity(random.next_f64(), node_state.capacity);
                position = target + 1;
                best.offer(score, node.index);
            }

            result.extend(best.into_items().map(|(_, node)| node));
        }
        Ok(result)
    }

    /// Leaf groups receiving replicas of `bucket`, with each group's share.
    pub fn ideal_storage_groups(
        &self,
        state: &ClusterState,
        bucket: BucketId,
        redundancy: u16,
    ) -> Result<Vec<(GroupId, u16)>> {
        check_bucket(state, bucket)?;
        self.check_redundancy(redundancy)?;
        self.storage_groups(state, bucket, redundancy)
    }

    /// Leaf group whose distributors compete for ownership of `bucket`.
    pub fn ideal_distributor_group(&self, state: &ClusterState, bucket: BucketId) -> Result<GroupId> {
        check_bucket(state, bucket)?;

        let mut current = self.topology.root();
        let mut redundancy = self.topology.redundancy();
        loop {
            let group = self.topology.get(current);
            let GroupKind::Internal { distributor, children } = group.kind() else {
                return Ok(current);
            };
            let shares = distributor.redundancy_array(redundancy)?;
            let seed = group_seed(bucket, state, group.distribution_hash());

            let mut ranked = self.score_children(children, seed);
            ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

            let chosen = ranked.into_iter().map(|(_, child)| child).find(|&child| {
                if !self.topology.auto_ownership_transfer() {
                    return true;
                }
                let down = self.topology.all_distributors_down(child, state);
                if down {
                    trace!(group = %self.topology.path(child), "Skipping group with all distributors down");
                }
                !down
            });

            current = chosen
                .ok_or(PlacementError::NoDistributorsAvailable { version: state.version() })?;
            redundancy = shares[0];
        }
    }

    /// Distributor that should own `bucket`.
    pub fn ideal_distributor_node(
        &self,
        state: &ClusterState,
        bucket: BucketId,
        up_states: UpStates,
    ) -> Result<u16> {
        let leaf = self.ideal_distributor_group(state, bucket)?;
        let seed = distributor_seed(bucket, state);

        let mut random = RandomSequence::new(seed);
        let mut position: u32 = 0;
        let mut best: Option<(f64, u16)> = None;

        for node in self.topology.get(leaf).nodes() {
            let node_state = state.node_state(NodeType::Distributor, node.index);
            if !up_states.contains(node_state.state) {
                continue;
            }

            let target = u32::from(node.index);
            if target < position {
                trace!(node = node.index, position, "Rewinding distributor sequence");
                random.reseed(seed);
                position = 0;
            }
            random.skip(target - position);
            let score = adjust_for_capacity(random.next_f64(), node_state.capacity);
            position = target + 1;

            if score > best.map_or(0.0, |(s, _)| s) {
                best = Some((score, node.index));
            }
        }

        best.map(|(_, node)| node).ok_or(PlacementError::NoDistributorInUpStates {
            up_states,
            version: state.version(),
        })
    }

    /// Disk on `node` that should hold `bucket`.
    pub fn ideal_disk(&self, node_state: &NodeState, node: u16, bucket: BucketId) -> Result<usize> {
        ideal_disk(node_state, node, bucket)
    }

    /// Overrides must stay within the topology redundancy, also when the
    /// root is a leaf and no partition spec is consulted.
    fn check_redundancy(&self, redundancy: u16) -> Result<()> {
        let max = self.topology.redundancy();
        if redundancy == 0 || redundancy > max {
            return Err(RedundancyError::OutOfRange { redundancy, max }.into());
        }
        Ok(())
    }

    fn storage_groups(
        &self,
        state: &ClusterState,
        bucket: BucketId,
        redundancy: u16,
    ) -> Result<Vec<(GroupId, u16)>> {
        let mut result = Vec::new();
        self.collect_storage_groups(state, bucket, self.topology.root(), redundancy, &mut result)?;
        Ok(result)
    }

    fn collect_storage_groups(
        &self,
        state: &ClusterState,
        bucket: BucketId,
        id: GroupId,
        redundancy: u16,
        result: &mut Vec<(GroupId, u16)>,
    ) -> Result<()> {
        let group = self.topology.get(id);
        let GroupKind::Internal { distributor, children } = group.kind() else {
            result.push((id, redundancy));
            return Ok(());
        };

        let shares = distributor.redundancy_array(redundancy)?;
        let seed = group_seed(bucket, state, group.distribution_hash());

        let mut best = TopScores::new(shares.len());
        for (score, child) in self.score_children(children, seed) {
            best.offer(score, child);
        }
        for (rank, child) in best.into_items() {
            self.collect_storage_groups(state, bucket, child, shares[rank], result)?;
        }
        Ok(())
    }

    /// Scores children in index order, drawing one value per index so that
    /// sparse indexes keep their place in the sequence.
    fn score_children(&self, children: &BTreeMap<u16, GroupId>, seed: u32) -> Vec<(f64, GroupId)> {
        let mut random = RandomSequence::new(seed);
        let mut position: u32 = 0;
        children
            .iter()
            .map(|(&index, &child)| {
                let target = u32::from(index);
                random.skip(target - position);
                position = target + 1;
                let score = random.next_f64();
                (adjust_for_capacity(score, self.topology.get(child).capacity()), child)
            })
            .collect()
    }
}

/// Errors from building a [`Distribution`] out of configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Group tree is invalid.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Up-states could not be parsed.
    #[error(transparent)]
    UpStates(#[from] idealstate_core::Error),
}

/// Disk on `node` that should hold `bucket`.
///
/// Pure function of its arguments; nodes with one disk always use disk 0.
pub fn ideal_disk(node_state: &NodeState, node: u16, bucket: BucketId) -> Result<usize> {
    match node_state.disk_count() {
        0 => Err(PlacementError::DiskCountUnknown { node }),
        1 => Ok(0),
        _ => {
            let mut random = RandomSequence::new(disk_seed(bucket, node));
            let mut best_score = 0.0;
            let mut best_disk = 0;
            for (disk, disk_state) in node_state.disks.iter().enumerate() {
                let score = adjust_for_capacity(random.next_f64(), disk_state.capacity);
                if score > best_score {
                    best_score = score;
                    best_disk = disk;
                }
            }
            Ok(best_disk)
        }
    }
}

fn check_bucket(state: &ClusterState, bucket: BucketId) -> Result<()> {
    let distribution_bits = state.distribution_bit_count();
    if bucket.used_bits() < distribution_bits {
        return Err(PlacementError::TooFewBucketBits {
            bucket,
            used_bits: bucket.used_bits(),
            distribution_bits,
        });
    }
    Ok(())
}

fn adjust_for_capacity(score: f64, capacity: f64) -> f64 {
    if (capacity - 1.0).abs() > CAPACITY_EPSILON {
        score.powf(1.0 / capacity)
    } else {
        score
    }
}

/// Fixed-size buffer of the best scores seen, best first.
///
/// Equal scores keep arrival order, and an entry must beat the current worst
/// to get in.
struct TopScores<T> {
    entries: Vec<(f64, Option<T>)>,
}

impl<T: Copy> TopScores<T> {
    fn new(size: usize) -> Self {
        Self { entries: vec![(0.0, None); size] }
    }

    fn offer(&mut self, score: f64, item: T) {
        let Some(&(worst, _)) = self.entries.last() else {
            return;
        };
        if score <= worst {
            return;
        }
        let position =
            self.entries.iter().position(|&(s, _)| s < score).unwrap_or(self.entries.len() - 1);
        self.entries.insert(position, (score, Some(item)));
        self.entries.pop();
    }

    /// Filled entries with their rank.
    fn into_items(self) -> impl Iterator<Item = (usize, T)> {
        self.entries.into_iter().enumerate().filter_map(|(rank, (_, item))| item.map(|i| (rank, i)))
    }
}
