//! Configuration management for idealstate.
//!
//! The distribution section follows the flat group-list layout used by
//! storage cluster configuration: every group names its position in the
//! tree with a dotted index path (`"0"`, `"0.1"`, ...), and the root group
//! uses the index `"invalid"`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::UpStates;

/// Index used by the root group in a group list.
pub const ROOT_GROUP_INDEX: &str = "invalid";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Distribution (topology) configuration.
    pub distribution: DistributionConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(crate::Error::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed.
    pub fn parse(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

/// Topology and placement settings for one content cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Target number of replicas per bucket.
    pub redundancy: u16,
    /// Skip groups whose distributors are all down when picking the
    /// distributor group for a bucket.
    pub distributor_auto_ownership_transfer_on_whole_group_down: bool,
    /// States eligible for storage placement when the caller gives none.
    pub storage_up_states: String,
    /// States eligible for distributor ownership when the caller gives none.
    pub distributor_up_states: String,
    /// The group tree as a flat list.
    pub groups: Vec<GroupConfig>,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            redundancy: 2,
            distributor_auto_ownership_transfer_on_whole_group_down: false,
            storage_up_states: UpStates::STORAGE_DEFAULT.to_string(),
            distributor_up_states: UpStates::DISTRIBUTOR_DEFAULT.to_string(),
            groups: Vec::new(),
        }
    }
}

impl DistributionConfig {
    /// Parses the configured storage up-states.
    ///
    /// # Errors
    ///
    /// Returns an error if the string contains an unknown state character.
    pub fn storage_up_states(&self) -> crate::Result<UpStates> {
        self.storage_up_states.parse()
    }

    /// Parses the configured distributor up-states.
    ///
    /// # Errors
    ///
    /// Returns an error if the string contains an unknown state character.
    pub fn distributor_up_states(&self) -> crate::Result<UpStates> {
        self.distributor_up_states.parse()
    }
}

/// One group in the flat group list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Dotted index path from the root, or [`ROOT_GROUP_INDEX`].
    pub index: String,
    /// Group name, unique among siblings.
    pub name: String,
    /// Relative weight of the group.
    pub capacity: f64,
    /// Partition spec (`"1|*"`) for groups with subgroups.
    pub partitions: Option<String>,
    /// Nodes of a leaf group.
    pub nodes: Vec<NodeConfig>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            index: ROOT_GROUP_INDEX.to_string(),
            name: String::new(),
            capacity: 1.0,
            partitions: None,
            nodes: Vec::new(),
        }
    }
}

/// A configured node inside a leaf group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node index, shared by the node's distributor and storage node.
    pub index: u16,
    /// Whether the node is being retired.
    #[serde(default)]
    pub retired: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn".to_string(), format: LogFormat::Pretty }
    }
}
