//! Distribution topology.
//!
//! The topology is the immutable group tree plus the cluster-wide redundancy.
//! It is assembled once through [`TopologyBuilder`] (or from configuration),
//! validated, and hashed top-down. A running system swaps in a new topology
//! instead of editing a live one.

use std::collections::{BTreeMap, HashMap, HashSet};

use idealstate_core::config::ROOT_GROUP_INDEX;
use idealstate_core::{ClusterState, DistributionConfig, GroupConfig, NodeType, UpStates};
use thiserror::Error;
use tracing::debug;

use crate::group::{ConfiguredNode, Group, GroupId, GroupKind};
use crate::hash::{group_hash, ROOT_GROUP_SEED};
use crate::redundancy::{RedundancyDistributor, RedundancyError};

/// Partition spec used by [`Topology::two_groups`].
pub const TWO_GROUP_PARTITIONS: &str = "1|*";

/// Errors that can occur when building a topology.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyError {
    /// Partition spec could not be parsed.
    #[error("invalid partitions for group '{group}': {source}")]
    Partitions {
        /// Group name.
        group: String,
        /// Parse failure.
        #[source]
        source: RedundancyError,
    },

    /// Leaf group without nodes.
    #[error("leaf group '{0}' has no nodes")]
    EmptyLeaf(String),

    /// Internal group without subgroups.
    #[error("group '{0}' has no subgroups")]
    EmptyInternal(String),

    /// Two siblings share an index.
    #[error("group '{parent}' already has a subgroup with index {index}")]
    DuplicateChild {
        /// Parent group name.
        parent: String,
        /// Conflicting index.
        index: u16,
    },

    /// Group already has a parent.
    #[error("group '{0}' is already attached to a parent")]
    AlreadyAttached(String),

    /// Subgroups can only be added to internal groups.
    #[error("cannot add subgroups to leaf group '{0}'")]
    AttachToLeaf(String),

    /// Attaching would make a group its own ancestor.
    #[error("attaching '{child}' under '{parent}' would create a cycle")]
    Cycle {
        /// Parent group name.
        parent: String,
        /// Child group name.
        child: String,
    },

    /// Group id was not created by this builder.
    #[error("unknown group {0}")]
    UnknownGroup(GroupId),

    /// Group was created but never attached below the root.
    #[error("group '{0}' is not reachable from the root")]
    Unattached(String),

    /// A node index appears in more than one place.
    #[error("node {0} is listed more than once")]
    DuplicateNode(u16),

    /// Capacity must be a positive finite number.
    #[error("group '{group}' has invalid capacity {capacity}")]
    InvalidCapacity {
        /// Group name.
        group: String,
        /// Rejected capacity.
        capacity: f64,
    },

    /// Redundancy must be at least one.
    #[error("redundancy must be at least 1")]
    ZeroRedundancy,

    /// An internal group cannot split the topology redundancy.
    #[error("group '{group}' supports redundancy up to {max}, topology needs {redundancy}")]
    RedundancyTooHigh {
        /// Group name.
        group: String,
        /// Topology redundancy.
        redundancy: u16,
        /// Largest redundancy the group supports.
        max: u16,
    },

    /// Dotted group index could not be parsed.
    #[error("malformed group index '{0}'")]
    InvalidGroupIndex(String),

    /// Group list is structurally invalid.
    #[error("invalid group configuration: {0}")]
    Config(String),
}

/// Assembles a group tree.
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    groups: Vec<Group>,
    parents: HashMap<GroupId, GroupId>,
}

impl TopologyBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group of nodes. Nodes are sorted by index.
    pub fn leaf_group(
        &mut self,
        index: u16,
        name: impl Into<String>,
        nodes: impl IntoIterator<Item = ConfiguredNode>,
        capacity: f64,
    ) -> Result<GroupId, TopologyError> {
        let name = name.into();
        check_capacity(&name, capacity)?;

        let mut nodes: Vec<ConfiguredNode> = nodes.into_iter().collect();
        if nodes.is_empty() {
            return Err(TopologyError::EmptyLeaf(name));
        }
        nodes.sort();
        if let Some(pair) = nodes.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(TopologyError::DuplicateNode(pair[0].index));
        }

        Ok(self.push(Group {
            index,
            name,
            capacity,
            distribution_hash: 0,
            kind: GroupKind::Leaf { nodes },
        }))
    }

    /// Add a group of subgroups splitting redundancy by `partitions`.
    pub fn internal_group(
        &mut self,
        index: u16,
        name: impl Into<String>,
        partitions: &str,
        max_redundancy: u16,
        capacity: f64,
    ) -> Result<GroupId, TopologyError> {
        let name = name.into();
        check_capacity(&name, capacity)?;

        let distributor = match RedundancyDistributor::new(partitions, max_redundancy) {
            Ok(distributor) => distributor,
            Err(source) => return Err(TopologyError::Partitions { group: name, source }),
        };

        Ok(self.push(Group {
            index,
            name,
            capacity,
            distribution_hash: 0,
            kind: GroupKind::Internal { distributor, children: BTreeMap::new() },
        }))
    }

    /// Attach `child` below `parent`.
    pub fn add_child(&mut self, parent: GroupId, child: GroupId) -> Result<(), TopologyError> {
        let child_group = self.get(child)?;
        let child_index = child_group.index;
        let child_name = child_group.name.clone();
        self.get(parent)?;

        if self.parents.contains_key(&child) {
            return Err(TopologyError::AlreadyAttached(child_name));
        }

        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                let parent = self.groups[parent.index()].name.clone();
                return Err(TopologyError::Cycle { parent, child: child_name });
            }
            cursor = self.parents.get(&id).copied();
        }

        let parent_group = &mut self.groups[parent.index()];
        match &mut parent_group.kind {
            GroupKind::Leaf { .. } => {
                return Err(TopologyError::AttachToLeaf(parent_group.name.clone()));
            }
            GroupKind::Internal { children, .. } => {
                if children.contains_key(&child_index) {
                    return Err(TopologyError::DuplicateChild {
                        parent: parent_group.name.clone(),
                        index: child_index,
                    });
                }
                children.insert(child_index, child);
            }
        }

        self.parents.insert(child, parent);
        Ok(())
    }

    /// Validate the tree under `root` and compute group hashes.
    pub fn build(
        self,
        root: GroupId,
        redundancy: u16,
        auto_ownership_transfer: bool,
    ) -> Result<Topology, TopologyError> {
        let root_index = self.get(root)?.index;
        if redundancy == 0 {
            return Err(TopologyError::ZeroRedundancy);
        }

        let mut hashes: Vec<Option<u32>> = vec![None; self.groups.len()];
        let mut node_owners = BTreeMap::new();
        let mut leaves = 0usize;
        let mut pending = vec![(root, group_hash(ROOT_GROUP_SEED, root_index))];

        while let Some((id, hash)) = pending.pop() {
            hashes[id.index()] = Some(hash);
            let group = &self.groups[id.index()];
            match &group.kind {
                GroupKind::Leaf { nodes } => {
                    leaves += 1;
                    for node in nodes {
                        if node_owners.insert(node.index, id).is_some() {
                            return Err(TopologyError::DuplicateNode(node.index));
                        }
                    }
                }
                GroupKind::Internal { distributor, children } => {
                    if children.is_empty() {
                        return Err(TopologyError::EmptyInternal(group.name.clone()));
                    }
                    if distributor.max_redundancy() < redundancy {
                        return Err(TopologyError::RedundancyTooHigh {
                            group: group.name.clone(),
                            redundancy,
                            max: distributor.max_redundancy(),
                        });
                    }
                    for (&index, &child) in children {
                        pending.push((child, group_hash(hash, index)));
                    }
                }
            }
        }

        let mut groups = self.groups;
        for (group, hash) in groups.iter_mut().zip(hashes) {
            match hash {
                Some(hash) => group.distribution_hash = hash,
                None => return Err(TopologyError::Unattached(group.name.clone())),
            }
        }

        debug!(
            groups = groups.len(),
            leaves,
            nodes = node_owners.len(),
            redundancy,
            auto_ownership_transfer,
            "Built distribution topology"
        );

        Ok(Topology {
            groups,
            parents: self.parents,
            root,
            redundancy,
            auto_ownership_transfer,
            node_owners,
        })
    }

    fn push(&mut self, group: Group) -> GroupId {
        let id = GroupId(self.groups.len() as u32);
        self.groups.push(group);
        id
    }

    fn get(&self, id: GroupId) -> Result<&Group, TopologyError> {
        self.groups.get(id.index()).ok_or(TopologyError::UnknownGroup(id))
    }
}

fn check_capacity(group: &str, capacity: f64) -> Result<(), TopologyError> {
    if capacity.is_finite() && capacity > 0.0 {
        Ok(())
    } else {
        Err(TopologyError::InvalidCapacity { group: group.to_string(), capacity })
    }
}

/// Immutable group tree with the cluster-wide redundancy settings.
#[derive(Debug, Clone)]
pub struct Topology {
    groups: Vec<Group>,
    /// Child to parent, used only for path printing.
    parents: HashMap<GroupId, GroupId>,
    root: GroupId,
    redundancy: u16,
    auto_ownership_transfer: bool,
    node_owners: BTreeMap<u16, GroupId>,
}

impl Topology {
    /// Start building a topology.
    #[must_use]
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::new()
    }

    /// Single leaf group holding nodes `0..node_count`.
    pub fn flat(redundancy: u16, node_count: u16) -> Result<Self, TopologyError> {
        let mut builder = Self::builder();
        let root = builder.leaf_group(0, "root", (0..node_count).map(ConfiguredNode::new), 1.0)?;
        builder.build(root, redundancy, false)
    }

    /// Two leaf groups splitting nodes `0..node_count` in half, with one
    /// replica in one group and the rest in the other.
    pub fn two_groups(redundancy: u16, node_count: u16) -> Result<Self, TopologyError> {
        let half = node_count.div_ceil(2);
        let mut builder = Self::builder();
        let root = builder.internal_group(0, "root", TWO_GROUP_PARTITIONS, redundancy, 1.0)?;
        let first = builder.leaf_group(0, "group0", (0..half).map(ConfiguredNode::new), 1.0)?;
        let second =
            builder.leaf_group(1, "group1", (half..node_count).map(ConfiguredNode::new), 1.0)?;
        builder.add_child(root, first)?;
        builder.add_child(root, second)?;
        builder.build(root, redundancy, false)
    }

    /// Build from a flat group list.
    ///
    /// The root group has index `"invalid"`; every other group's index is its
    /// dotted path from the root (`"0"`, `"0.1"`, ...). Groups with subgroups
    /// need partitions and no nodes.
    pub fn from_config(config: &DistributionConfig) -> Result<Self, TopologyError> {
        let mut root_config = None;
        let mut by_path: BTreeMap<Vec<u16>, &GroupConfig> = BTreeMap::new();
        for group in &config.groups {
            if group.index == ROOT_GROUP_INDEX {
                if root_config.replace(group).is_some() {
                    return Err(TopologyError::Config("more than one root group".into()));
                }
                continue;
            }
            let path = parse_group_path(&group.index)?;
            if by_path.insert(path, group).is_some() {
                return Err(TopologyError::Config(format!(
                    "group index '{}' is used more than once",
                    group.index
                )));
            }
        }
        let root_config = root_config.ok_or_else(|| {
            TopologyError::Config(format!("no root group with index '{ROOT_GROUP_INDEX}'"))
        })?;

        let parent_paths: HashSet<&[u16]> =
            by_path.keys().map(|path| &path[..path.len() - 1]).collect();

        let root_path: &[u16] = &[];
        let mut builder = Self::builder();
        let mut ids: HashMap<&[u16], GroupId> = HashMap::new();
        let root = add_config_group(
            &mut builder,
            0,
            root_config,
            parent_paths.contains(root_path),
            config.redundancy,
        )?;
        ids.insert(root_path, root);

        // Parents sort before their children.
        for (path, group) in &by_path {
            let (&index, parent_path) = path
                .split_last()
                .ok_or_else(|| TopologyError::InvalidGroupIndex(group.index.clone()))?;
            let parent = *ids.get(parent_path).ok_or_else(|| {
                TopologyError::Config(format!("group '{}' has no parent group", group.index))
            })?;
            let id = add_config_group(
                &mut builder,
                index,
                group,
                parent_paths.contains(path.as_slice()),
                config.redundancy,
            )?;
            builder.add_child(parent, id)?;
            ids.insert(path.as_slice(), id);
        }

        builder.build(
            root,
            config.redundancy,
            config.distributor_auto_ownership_transfer_on_whole_group_down,
        )
    }

    /// Root group id.
    #[must_use]
    pub fn root(&self) -> GroupId {
        self.root
    }

    /// Root group.
    #[must_use]
    pub fn root_group(&self) -> &Group {
        self.get(self.root)
    }

    /// Look up a group.
    #[must_use]
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id.index())
    }

    /// All groups, root first for trees built top-down.
    pub fn groups(&self) -> impl Iterator<Item = (GroupId, &Group)> {
        self.groups.iter().enumerate().map(|(i, group)| (GroupId(i as u32), group))
    }

    /// Parent of a group; `None` for the root.
    #[must_use]
    pub fn parent(&self, id: GroupId) -> Option<GroupId> {
        self.parents.get(&id).copied()
    }

    /// Target number of replicas per bucket.
    #[must_use]
    pub fn redundancy(&self) -> u16 {
        self.redundancy
    }

    /// Whether distributor group selection skips groups with every
    /// distributor down.
    #[must_use]
    pub fn auto_ownership_transfer(&self) -> bool {
        self.auto_ownership_transfer
    }

    /// Number of configured nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_owners.len()
    }

    /// Leaf group listing `node`.
    #[must_use]
    pub fn find_group_owning(&self, node: u16) -> Option<GroupId> {
        self.node_owners.get(&node).copied()
    }

    /// Returns true if every distributor under `id` is neither up nor
    /// initializing. The caller's up-states play no part here.
    #[must_use]
    pub fn all_distributors_down(&self, id: GroupId, state: &ClusterState) -> bool {
        let Some(group) = self.group(id) else {
            return true;
        };
        match &group.kind {
            GroupKind::Leaf { nodes } => nodes.iter().all(|node| {
                !UpStates::UP_OR_INITIALIZING
                    .contains(state.node_state(NodeType::Distributor, node.index).state)
            }),
            GroupKind::Internal { children, .. } => {
                children.values().all(|&child| self.all_distributors_down(child, state))
            }
        }
    }

    /// Slash-separated names from the root, like `/root/rack0`.
    #[must_use]
    pub fn path(&self, id: GroupId) -> String {
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.group(current) {
                Some(group) => names.push(group.name.as_str()),
                None => break,
            }
            cursor = self.parent(current);
        }
        names.iter().rev().fold(String::new(), |mut path, name| {
            path.push('/');
            path.push_str(name);
            path
        })
    }

    pub(crate) fn get(&self, id: GroupId) -> &Group {
        &self.groups[id.index()]
    }
}

fn add_config_group(
    builder: &mut TopologyBuilder,
    index: u16,
    config: &GroupConfig,
    has_children: bool,
    redundancy: u16,
) -> Result<GroupId, TopologyError> {
    if !has_children {
        let nodes = config.nodes.iter().map(|n| ConfiguredNode { index: n.index, retired: n.retired });
        return builder.leaf_group(index, config.name.as_str(), nodes, config.capacity);
    }
    if !config.nodes.is_empty() {
        return Err(TopologyError::Config(format!(
            "group '{}' has both nodes and subgroups",
            config.name
        )));
    }
    let partitions = config.partitions.as_deref().ok_or_else(|| {
        TopologyError::Config(format!("group '{}' has subgroups but no partitions", config.name))
    })?;
    builder.internal_group(index, config.name.as_str(), partitions, redundancy, config.capacity)
}

fn parse_group_path(index: &str) -> Result<Vec<u16>, TopologyError> {
    index
        .split('.')
        .map(|part| part.trim().parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| TopologyError::InvalidGroupIndex(index.to_string()))
}
