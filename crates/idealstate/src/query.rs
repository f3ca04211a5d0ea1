//! Placement queries behind the command line.

use std::fmt;

use anyhow::{Context, Result};
use idealstate_core::{BucketId, ClusterState, Config, NodeType, State, UpStates};
use idealstate_placement::{Distribution, GroupKind, Topology};
use serde::Serialize;
use tracing::debug;

use crate::cli::{Layout, QueryArgs, TopologyArgs};

/// Everything a placement query runs against.
pub struct Inputs {
    pub distribution: Distribution,
    pub state: ClusterState,
    pub bucket: BucketId,
    pub up_states: Option<UpStates>,
}

impl Inputs {
    /// Resolve the topology and cluster state for a query.
    pub fn prepare(args: &QueryArgs, config: &Config) -> Result<Self> {
        let distribution = load_distribution(&args.topology, config)?;
        let state = match &args.state {
            Some(state) => state.clone(),
            None => all_up(distribution.topology()),
        };
        debug!(state = %state, bucket = %args.bucket, "Prepared placement query");
        Ok(Self { distribution, state, bucket: args.bucket, up_states: args.up_states })
    }
}

/// Build the engine from the configured group list, or from a built-in layout
/// when the configuration has none.
pub fn load_distribution(args: &TopologyArgs, config: &Config) -> Result<Distribution> {
    if !config.distribution.groups.is_empty() {
        return Distribution::from_config(&config.distribution)
            .context("Invalid distribution configuration");
    }

    let topology = match args.layout {
        Layout::Flat => Topology::flat(args.redundancy, args.nodes),
        Layout::TwoGroups => Topology::two_groups(args.redundancy, args.nodes),
    }
    .context("Invalid built-in layout")?;
    let storage = config.distribution.storage_up_states()?;
    let distributor = config.distribution.distributor_up_states()?;
    Ok(Distribution::new(topology).with_up_states(storage, distributor))
}

/// Cluster state with every configured node up.
fn all_up(topology: &Topology) -> ClusterState {
    let highest = topology.groups().flat_map(|(_, group)| group.nodes()).map(|node| node.index).max();
    match highest {
        Some(index) => ClusterState::builder()
            .node(NodeType::Distributor, index, State::Up)
            .node(NodeType::Storage, index, State::Up)
            .build(),
        None => ClusterState::builder().build(),
    }
}

/// A leaf group with its share of the replicas.
#[derive(Debug, Serialize)]
pub struct GroupShare {
    pub path: String,
    pub redundancy: u16,
}

/// Result of the storage command.
#[derive(Debug, Serialize)]
pub struct StorageReport {
    pub bucket: String,
    pub version: u32,
    pub redundancy: u16,
    pub groups: Vec<GroupShare>,
    pub nodes: Vec<u16>,
}

impl fmt::Display for StorageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} (state version {}, redundancy {})", self.bucket, self.version, self.redundancy)?;
        for group in &self.groups {
            writeln!(f, "  group {} gets {}", group.path, group.redundancy)?;
        }
        write!(f, "  storage nodes: {}", join(&self.nodes))
    }
}

/// Result of the distributor command.
#[derive(Debug, Serialize)]
pub struct DistributorReport {
    pub bucket: String,
    pub version: u32,
    pub group: String,
    pub node: u16,
}

impl fmt::Display for DistributorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} (state version {})", self.bucket, self.version)?;
        writeln!(f, "  group {}", self.group)?;
        write!(f, "  distributor: {}", self.node)
    }
}

/// Result of the disk command.
#[derive(Debug, Serialize)]
pub struct DiskReport {
    pub bucket: String,
    pub node: u16,
    pub disk: usize,
    pub disk_count: usize,
    pub disk_up: bool,
}

impl fmt::Display for DiskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.disk_up { "up" } else { "down" };
        write!(
            f,
            "{} on storage node {}: disk {} of {} ({status})",
            self.bucket, self.node, self.disk, self.disk_count
        )
    }
}

/// One line of the group tree.
#[derive(Debug, Serialize)]
pub struct GroupLine {
    pub path: String,
    pub capacity: f64,
    pub distribution_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitions: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<u16>,
}

/// Result of the groups command.
#[derive(Debug, Serialize)]
pub struct GroupsReport {
    pub redundancy: u16,
    pub groups: Vec<GroupLine>,
}

impl fmt::Display for GroupsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "redundancy {}", self.redundancy)?;
        for group in &self.groups {
            write!(f, "\n  {} capacity {} hash {}", group.path, group.capacity, group.distribution_hash)?;
            if let Some(partitions) = &group.partitions {
                write!(f, " partitions {partitions}")?;
            }
            if !group.nodes.is_empty() {
                write!(f, " nodes {}", join(&group.nodes))?;
            }
        }
        Ok(())
    }
}

/// Storage nodes for the bucket.
pub fn storage(inputs: &Inputs, replicas: Option<u16>) -> Result<StorageReport> {
    let distribution = &inputs.distribution;
    let redundancy = replicas.unwrap_or_else(|| distribution.topology().redundancy());
    let up_states = inputs.up_states.unwrap_or_else(|| distribution.storage_up_states());

    let groups = distribution
        .ideal_storage_groups(&inputs.state, inputs.bucket, redundancy)?
        .into_iter()
        .map(|(id, redundancy)| GroupShare { path: distribution.topology().path(id), redundancy })
        .collect();
    let nodes = distribution.ideal_storage_nodes_with_redundancy(
        &inputs.state,
        inputs.bucket,
        redundancy,
        up_states,
    )?;

    Ok(StorageReport {
        bucket: inputs.bucket.to_string(),
        version: inputs.state.version(),
        redundancy,
        groups,
        nodes,
    })
}

/// Owning distributor for the bucket.
pub fn distributor(inputs: &Inputs) -> Result<DistributorReport> {
    let distribution = &inputs.distribution;
    let up_states = inputs.up_states.unwrap_or_else(|| distribution.distributor_up_states());

    let group = distribution.ideal_distributor_group(&inputs.state, inputs.bucket)?;
    let node = distribution.ideal_distributor_node(&inputs.state, inputs.bucket, up_states)?;

    Ok(DistributorReport {
        bucket: inputs.bucket.to_string(),
        version: inputs.state.version(),
        group: distribution.topology().path(group),
        node,
    })
}

/// Ideal disk of one storage node for the bucket.
pub fn disk(inputs: &Inputs, node: u16) -> Result<DiskReport> {
    let node_state = inputs.state.node_state(NodeType::Storage, node);
    let disk = inputs.distribution.ideal_disk(node_state, node, inputs.bucket)?;
    let disk_up = node_state.disk_state(disk).is_some_and(|d| d.state == State::Up);

    Ok(DiskReport {
        bucket: inputs.bucket.to_string(),
        node,
        disk,
        disk_count: node_state.disk_count(),
        disk_up,
    })
}

/// The group tree of a distribution.
pub fn groups(distribution: &Distribution) -> GroupsReport {
    let topology = distribution.topology();
    let groups = topology
        .groups()
        .map(|(id, group)| GroupLine {
            path: topology.path(id),
            capacity: group.capacity(),
            distribution_hash: format!("{:#010x}", group.distribution_hash()),
            partitions: match group.kind() {
                GroupKind::Internal { distributor, .. } => Some(distributor.spec().to_string()),
                GroupKind::Leaf { .. } => None,
            },
            nodes: group.nodes().iter().map(|node| node.index).collect(),
        })
        .collect();
    GroupsReport { redundancy: topology.redundancy(), groups }
}

fn join(nodes: &[u16]) -> String {
    nodes.iter().map(u16::to_string).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Commands};

    fn query(args: &[&str]) -> QueryArgs {
        let mut argv = vec!["idealstate", "distributor"];
        argv.extend_from_slice(args);
        match Cli::parse_from(argv).command {
            Commands::Distributor(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_storage_report() {
        let args = query(&["--bucket", "16:1"]);
        let inputs = Inputs::prepare(&args, &Config::default()).unwrap();
        assert_eq!(inputs.state.node_count(NodeType::Storage), 10);

        let report = storage(&inputs, None).unwrap();
        assert_eq!(report.nodes, vec![3, 5]);
        assert_eq!(report.redundancy, 2);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].path, "/root");
        assert!(report.to_string().ends_with("storage nodes: 3 5"));

        let narrower = storage(&inputs, Some(1)).unwrap();
        assert_eq!(narrower.nodes, vec![3]);
        assert!(storage(&inputs, Some(3)).is_err());

        let args = query(&["--bucket", "16:1", "--redundancy", "3"]);
        let inputs = Inputs::prepare(&args, &Config::default()).unwrap();
        assert_eq!(storage(&inputs, None).unwrap().nodes, vec![3, 5, 7]);
    }

    #[test]
    fn test_distributor_report_with_state() {
        let args = query(&["--bucket", "16:1", "--state", "version:9 distributor:10 .3.s:d storage:10"]);
        let inputs = Inputs::prepare(&args, &Config::default()).unwrap();
        let report = distributor(&inputs).unwrap();
        assert_eq!(report.node, 5);
        assert_eq!(report.version, 9);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["node"], 5);
        assert_eq!(json["group"], "/root");
    }

    #[test]
    fn test_disk_report() {
        let args = query(&["--bucket", "16:1", "--state", "storage:10 .3.d:4 .3.d.2.s:d"]);
        let inputs = Inputs::prepare(&args, &Config::default()).unwrap();
        let report = disk(&inputs, 3).unwrap();
        assert_eq!(report.disk, 2);
        assert_eq!(report.disk_count, 4);
        assert!(!report.disk_up);

        assert!(disk(&inputs, 4).is_err());
    }

    #[test]
    fn test_groups_report_from_config() {
        let config = Config::parse(
            r#"
[distribution]
redundancy = 2

[[distribution.groups]]
name = "cluster"
partitions = "1|*"

[[distribution.groups]]
index = "0"
name = "a"
nodes = [{ index = 0 }, { index = 1 }]

[[distribution.groups]]
index = "1"
name = "b"
nodes = [{ index = 2 }, { index = 3 }]
"#,
        )
        .unwrap();
        let args = query(&["--bucket", "16:1"]);
        let distribution = load_distribution(&args.topology, &config).unwrap();
        let report = groups(&distribution);
        assert_eq!(report.groups.len(), 3);
        assert_eq!(report.groups[0].path, "/cluster");
        assert_eq!(report.groups[0].partitions.as_deref(), Some("1|*"));
        assert_eq!(report.groups[2].nodes, vec![2, 3]);

        let inputs = Inputs::prepare(&args, &config).unwrap();
        assert_eq!(inputs.state.node_count(NodeType::Distributor), 4);
        let report = storage(&inputs, None).unwrap();
        assert_eq!(report.nodes.len(), 2);
        assert_eq!(report.groups.len(), 2);
    }

    #[test]
    fn test_precondition_error_surfaces() {
        let args = query(&["--bucket", "8:1"]);
        let inputs = Inputs::prepare(&args, &Config::default()).unwrap();
        let err = storage(&inputs, None).unwrap_err();
        assert!(err.to_string().contains("8 bits"));
    }
}
