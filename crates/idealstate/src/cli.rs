//! Command line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use idealstate_core::{BucketId, ClusterState, UpStates};

/// idealstate: compute where a bucket belongs in a storage cluster.
#[derive(Parser)]
#[command(name = "idealstate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show the storage nodes that should hold a bucket.
    Storage(StorageArgs),
    /// Show the distributor that should own a bucket.
    Distributor(QueryArgs),
    /// Show the disk a storage node should keep a bucket on.
    Disk(DiskArgs),
    /// Print the group tree.
    Groups(GroupsArgs),
    /// Print version information.
    Version,
}

/// Where the group tree comes from.
#[derive(Args)]
pub struct TopologyArgs {
    /// Path to a configuration file with a group list.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Built-in layout, used when the configuration has no groups.
    #[arg(long, value_enum, default_value = "flat")]
    pub layout: Layout,

    /// Node count of the built-in layout.
    #[arg(short, long, default_value = "10")]
    pub nodes: u16,

    /// Redundancy of the built-in layout.
    #[arg(short, long, default_value = "2")]
    pub redundancy: u16,
}

/// Arguments shared by the placement queries.
#[derive(Args)]
pub struct QueryArgs {
    /// Bucket, as a raw hex id (0x4000000000001234) or bits:id (16:0x1234).
    #[arg(short, long)]
    pub bucket: BucketId,

    /// Cluster state string. Defaults to every configured node up.
    #[arg(short, long)]
    pub state: Option<ClusterState>,

    /// Eligible node states, e.g. "ui". Defaults to the configured up-states.
    #[arg(short, long)]
    pub up_states: Option<UpStates>,

    /// Topology source.
    #[command(flatten)]
    pub topology: TopologyArgs,

    /// Output format (text, json).
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the storage command.
#[derive(Args)]
pub struct StorageArgs {
    /// Query arguments.
    #[command(flatten)]
    pub query: QueryArgs,

    /// Place this many replicas, at most the topology redundancy.
    #[arg(long)]
    pub replicas: Option<u16>,
}

/// Arguments for the disk command.
#[derive(Args)]
pub struct DiskArgs {
    /// Query arguments.
    #[command(flatten)]
    pub query: QueryArgs,

    /// Storage node index.
    #[arg(long)]
    pub node: u16,
}

/// Arguments for the groups command.
#[derive(Args)]
pub struct GroupsArgs {
    /// Topology source.
    #[command(flatten)]
    pub topology: TopologyArgs,

    /// Output format (text, json).
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Built-in topology layouts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Layout {
    /// One group with every node.
    #[default]
    Flat,
    /// Two groups, one replica in one and the rest in the other.
    TwoGroups,
}

/// Output format for CLI commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
