// Copyright 2024 The Idealstate Authors
// SPDX-License-Identifier: Apache-2.0

//! Cluster state snapshots.
//!
//! A [`ClusterState`] tells the placement functions which nodes are available
//! at a given state version. It is immutable once built, either through
//! [`ClusterStateBuilder`] or by parsing the compact text form:
//!
//! ```text
//! version:12 bits:16 distributor:10 .3.s:d storage:10 .4.s:m .5.c:2 .6.d:4 .6.d.1.s:d
//! ```
//!
//! Node tokens (`.I.key:value`) apply to the node type named most recently.
//! Nodes below the node count without a token are up; nodes at or above the
//! node count are down.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{NodeType, State};

/// Distribution bit count used when a state string does not name one.
pub const DEFAULT_DISTRIBUTION_BITS: u32 = 16;

/// Largest distribution bit count a cluster state may use.
pub const MAX_DISTRIBUTION_BITS: u32 = 32;

/// Largest node count of one node type: every `u16` index.
pub const MAX_NODE_COUNT: u32 = 1 << 16;

static DEFAULT_UP: NodeState = NodeState {
    state: State::Up,
    capacity: 1.0,
    reliability: 1,
    disks: Vec::new(),
    description: None,
};

static DEFAULT_DOWN: NodeState = NodeState {
    state: State::Down,
    capacity: 1.0,
    reliability: 1,
    disks: Vec::new(),
    description: None,
};

/// State of a single disk on a storage node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskState {
    /// Disk availability.
    pub state: State,
    /// Relative weight of the disk when picking an ideal disk.
    pub capacity: f64,
}

impl DiskState {
    /// Creates a disk state with unit capacity.
    #[must_use]
    pub fn new(state: State) -> Self {
        Self { state, capacity: 1.0 }
    }

    /// Sets the disk capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    fn is_default(&self) -> bool {
        self.state == State::Up && self.capacity == 1.0
    }
}

impl Default for DiskState {
    fn default() -> Self {
        Self::new(State::Up)
    }
}

/// State of a node as reported by the cluster state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// Node availability.
    pub state: State,
    /// Relative weight of the node when scoring placement candidates.
    pub capacity: f64,
    /// Reported reliability. Carried for completeness, unused by placement.
    pub reliability: u16,
    /// Per-disk states. Empty when the disk layout is unknown.
    pub disks: Vec<DiskState>,
    /// Free-form description, usually why a node is not up.
    pub description: Option<String>,
}

impl NodeState {
    /// Creates a node state with unit capacity and no disks.
    #[must_use]
    pub fn new(state: State) -> Self {
        Self { state, ..DEFAULT_UP.clone() }
    }

    /// Sets the node capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Gives the node `count` disks, all up.
    #[must_use]
    pub fn with_disks(mut self, count: usize) -> Self {
        self.disks = vec![DiskState::default(); count];
        self
    }

    /// Replaces the state of one disk, growing the disk list if needed.
    #[must_use]
    pub fn with_disk_state(mut self, disk: usize, state: DiskState) -> Self {
        if self.disks.len() <= disk {
            self.disks.resize(disk + 1, DiskState::default());
        }
        self.disks[disk] = state;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns the number of disks on this node.
    #[must_use]
    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }

    /// Returns the state of a disk, if the node has that many disks.
    #[must_use]
    pub fn disk_state(&self, disk: usize) -> Option<&DiskState> {
        self.disks.get(disk)
    }

    /// Returns true if any disk on this node is not up.
    #[must_use]
    pub fn is_any_disk_down(&self) -> bool {
        self.disks.iter().any(|d| d.state != State::Up)
    }

    fn is_default(&self) -> bool {
        self.state == State::Up
            && self.capacity == 1.0
            && self.reliability == 1
            && self.disks.is_empty()
            && self.description.is_none()
    }
}

impl Default for NodeState {
    fn default() -> Self {
        DEFAULT_UP.clone()
    }
}

/// Node count and explicit node states for one node type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct NodeSet {
    count: u32,
    states: BTreeMap<u16, NodeState>,
}

impl NodeSet {
    fn get(&self, index: u16) -> &NodeState {
        if u32::from(index) >= self.count {
            return &DEFAULT_DOWN;
        }
        self.states.get(&index).unwrap_or(&DEFAULT_UP)
    }

    fn set(&mut self, index: u16, state: NodeState) {
        if u32::from(index) >= self.count {
            self.count = u32::from(index) + 1;
        }
        if state.is_default() {
            self.states.remove(&index);
        } else {
            self.states.insert(index, state);
        }
    }
}

/// Immutable snapshot of the cluster state at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    version: u32,
    distribution_bits: u32,
    cluster: State,
    distributors: NodeSet,
    storage: NodeSet,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            version: 0,
            distribution_bits: DEFAULT_DISTRIBUTION_BITS,
            cluster: State::Up,
            distributors: NodeSet::default(),
            storage: NodeSet::default(),
        }
    }
}

impl ClusterState {
    /// Starts building a cluster state.
    #[must_use]
    pub fn builder() -> ClusterStateBuilder {
        ClusterStateBuilder::default()
    }

    /// Starts building a new cluster state from this one.
    #[must_use]
    pub fn to_builder(&self) -> ClusterStateBuilder {
        ClusterStateBuilder { state: self.clone() }
    }

    /// Returns the state version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Returns how many low bits of a bucket id the cluster distributes on.
    #[must_use]
    pub const fn distribution_bit_count(&self) -> u32 {
        self.distribution_bits
    }

    /// Returns the state of the cluster as a whole.
    #[must_use]
    pub const fn cluster_state(&self) -> State {
        self.cluster
    }

    /// Returns the number of nodes of the given type.
    #[must_use]
    pub fn node_count(&self, node_type: NodeType) -> u32 {
        self.nodes(node_type).count
    }

    /// Returns the state of a node.
    ///
    /// Nodes beyond the node count are reported down.
    #[must_use]
    pub fn node_state(&self, node_type: NodeType, index: u16) -> &NodeState {
        self.nodes(node_type).get(index)
    }

    fn nodes(&self, node_type: NodeType) -> &NodeSet {
        match node_type {
            NodeType::Distributor => &self.distributors,
            NodeType::Storage => &self.storage,
        }
    }

    fn nodes_mut(&mut self, node_type: NodeType) -> &mut NodeSet {
        match node_type {
            NodeType::Distributor => &mut self.distributors,
            NodeType::Storage => &mut self.storage,
        }
    }
}

/// Builder for [`ClusterState`].
#[derive(Debug, Clone, Default)]
pub struct ClusterStateBuilder {
    state: ClusterState,
}

impl ClusterStateBuilder {
    /// Sets the state version.
    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.state.version = version;
        self
    }

    /// Sets the distribution bit count, capped at [`MAX_DISTRIBUTION_BITS`].
    #[must_use]
    pub fn distribution_bits(mut self, bits: u32) -> Self {
        self.state.distribution_bits = bits.min(MAX_DISTRIBUTION_BITS);
        self
    }

    /// Sets the state of the cluster as a whole.
    #[must_use]
    pub fn cluster(mut self, state: State) -> Self {
        self.state.cluster = state;
        self
    }

    /// Sets the number of nodes of a type. Explicit states at or above the
    /// new count are dropped.
    #[must_use]
    pub fn nodes(mut self, node_type: NodeType, count: u16) -> Self {
        let set = self.state.nodes_mut(node_type);
        set.count = u32::from(count);
        set.states.retain(|&index, _| index < count);
        self
    }

    /// Sets the same node count for both distributors and storage nodes.
    #[must_use]
    pub fn all_nodes(self, count: u16) -> Self {
        self.nodes(NodeType::Distributor, count).nodes(NodeType::Storage, count)
    }

    /// Sets the state of one node, growing the node count if needed.
    #[must_use]
    pub fn node_state(mut self, node_type: NodeType, index: u16, state: NodeState) -> Self {
        self.state.nodes_mut(node_type).set(index, state);
        self
    }

    /// Shorthand for [`Self::node_state`] with only the availability changed.
    #[must_use]
    pub fn node(self, node_type: NodeType, index: u16, state: State) -> Self {
        self.node_state(node_type, index, NodeState::new(state))
    }

    /// Finishes the snapshot.
    #[must_use]
    pub fn build(self) -> ClusterState {
        self.state
    }
}

impl FromStr for ClusterState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut state = ClusterState::default();
        let mut current: Option<NodeType> = None;

        for token in s.split_whitespace() {
            let (key, value) = token
                .split_once(':')
                .ok_or_else(|| Error::invalid_state(token, "expected key:value"))?;

            if let Some(node_key) = key.strip_prefix('.') {
                let node_type = current
                    .ok_or_else(|| Error::invalid_state(token, "node token before node type"))?;
                apply_node_token(&mut state, node_type, token, node_key, value)?;
                continue;
            }

            match key {
                "version" => state.version = parse_number(token, value)?,
                "bits" => {
                    let bits: u32 = parse_number(token, value)?;
                    if bits > MAX_DISTRIBUTION_BITS {
                        return Err(Error::invalid_state(
                            token,
                            format!("distribution bits must be at most {MAX_DISTRIBUTION_BITS}"),
                        ));
                    }
                    state.distribution_bits = bits;
                }
                "cluster" => state.cluster = parse_state(token, value)?,
                "distributor" | "storage" => {
                    let node_type = if key == "distributor" {
                        NodeType::Distributor
                    } else {
                        NodeType::Storage
                    };
                    let count: u32 = parse_number(token, value)?;
                    if count > MAX_NODE_COUNT {
                        return Err(Error::invalid_state(
                            token,
                            format!("node count must be at most {MAX_NODE_COUNT}"),
                        ));
                    }
                    state.nodes_mut(node_type).count = count;
                    current = Some(node_type);
                }
                _ => return Err(Error::invalid_state(token, "unknown key")),
            }
        }

        Ok(state)
    }
}

fn apply_node_token(
    state: &mut ClusterState,
    node_type: NodeType,
    token: &str,
    node_key: &str,
    value: &str,
) -> Result<()> {
    let (index, field) = node_key
        .split_once('.')
        .ok_or_else(|| Error::invalid_state(token, "expected .index.key"))?;
    let index: u16 = parse_number(token, index)?;
    let set = state.nodes_mut(node_type);
    if u32::from(index) >= set.count {
        return Err(Error::invalid_state(
            token,
            format!("node index {index} is not below the {node_type} count {}", set.count),
        ));
    }

    let mut node = set.get(index).clone();
    match field {
        "s" => node.state = parse_state(token, value)?,
        "c" => node.capacity = parse_capacity(token, value)?,
        "r" => node.reliability = parse_number(token, value)?,
        "m" => node.description = Some(value.replace("\\x20", " ")),
        "d" => {
            let count: usize = parse_number(token, value)?;
            node.disks.resize(count, DiskState::default());
        }
        disk_field => {
            let rest = disk_field
                .strip_prefix("d.")
                .ok_or_else(|| Error::invalid_state(token, "unknown node key"))?;
            let (disk, key) = rest
                .split_once('.')
                .ok_or_else(|| Error::invalid_state(token, "expected d.index.key"))?;
            let disk: usize = parse_number(token, disk)?;
            let disk_state = node
                .disks
                .get_mut(disk)
                .ok_or_else(|| Error::invalid_state(token, "disk index beyond disk count"))?;
            match key {
                "s" => disk_state.state = parse_state(token, value)?,
                "c" => disk_state.capacity = parse_capacity(token, value)?,
                _ => return Err(Error::invalid_state(token, "unknown disk key")),
            }
        }
    }
    set.set(index, node);
    Ok(())
}

fn parse_number<T: FromStr>(token: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::invalid_state(token, format!("'{value}' is not a number")))
}

fn parse_capacity(token: &str, value: &str) -> Result<f64> {
    let capacity: f64 = value
        .parse()
        .map_err(|_| Error::invalid_state(token, format!("'{value}' is not a capacity")))?;
    if !(capacity.is_finite() && capacity > 0.0) {
        return Err(Error::invalid_state(token, "capacity must be positive"));
    }
    Ok(capacity)
}

fn parse_state(token: &str, value: &str) -> Result<State> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => {
            State::from_char(c).ok_or_else(|| Error::invalid_state(token, "unknown state"))
        }
        _ => Err(Error::invalid_state(token, "state must be a single character")),
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.version != 0 {
            parts.push(format!("version:{}", self.version));
        }
        if self.cluster != State::Up {
            parts.push(format!("cluster:{}", self.cluster.as_char()));
        }
        if self.distribution_bits != DEFAULT_DISTRIBUTION_BITS {
            parts.push(format!("bits:{}", self.distribution_bits));
        }
        for node_type in [NodeType::Distributor, NodeType::Storage] {
            let set = self.nodes(node_type);
            if set.count == 0 {
                continue;
            }
            parts.push(format!("{node_type}:{}", set.count));
            for (index, node) in &set.states {
                if node.state != State::Up {
                    parts.push(format!(".{index}.s:{}", node.state.as_char()));
                }
                if node.capacity != 1.0 {
                    parts.push(format!(".{index}.c:{}", node.capacity));
                }
                if node.reliability != 1 {
                    parts.push(format!(".{index}.r:{}", node.reliability));
                }
                if !node.disks.is_empty() {
                    parts.push(format!(".{index}.d:{}", node.disks.len()));
                }
                for (disk, disk_state) in node.disks.iter().enumerate() {
                    if disk_state.is_default() {
                        continue;
                    }
                    if disk_state.state != State::Up {
                        parts.push(format!(".{index}.d.{disk}.s:{}", disk_state.state.as_char()));
                    }
                    if disk_state.capacity != 1.0 {
                        parts.push(format!(".{index}.d.{disk}.c:{}", disk_state.capacity));
                    }
                }
                if let Some(description) = &node.description {
                    parts.push(format!(".{index}.m:{}", description.replace(' ', "\\x20")));
                }
            }
        }
        f.write_str(&parts.join(" "))
    }
}
