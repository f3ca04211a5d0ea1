//! Ideal state placement for bucket-based storage clusters.
//!
//! This crate computes, for any bucket, which storage nodes should hold its
//! replicas and which distributor should own it. Every node in the cluster
//! computes the same answer from the same topology and cluster state, with no
//! coordination.
//!
//! # Overview
//!
//! The placement function:
//! - Walks a tree of groups, splitting redundancy across subgroups by a
//!   partition spec such as `"1|*"`
//! - Scores candidates with a reproducible random sequence seeded from the
//!   bucket, weighted by capacity
//! - Skips nodes outside the requested up-states, and nodes whose ideal disk
//!   is down
//! - Optionally moves distributor ownership away from groups whose
//!   distributors are all down
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 Topology                      │
//! ├───────────────────────────────────────────────┤
//! │            root  "1|*"   (internal)           │
//! │           ┌──────┴──────┐                     │
//! │        group0         group1     (leaves)     │
//! │       nodes 0,1,2    nodes 3,4,5              │
//! └───────────────────────────────────────────────┘
//!   bucket ─► group seed ─► best groups ─► storage seed ─► best nodes
//! ```
//!
//! # Usage
//!
//! ```
//! use idealstate_core::{BucketId, ClusterState, UpStates};
//! use idealstate_placement::{Distribution, Topology};
//!
//! let topology = Topology::two_groups(2, 6).unwrap();
//! let distribution = Distribution::new(topology);
//!
//! let state: ClusterState = "version:3 distributor:6 storage:6 .1.s:d".parse().unwrap();
//! let bucket = BucketId::new(16, 0x1234);
//!
//! let nodes = distribution.ideal_storage_nodes(&state, bucket, UpStates::default()).unwrap();
//! assert_eq!(nodes.len(), 2);
//! assert!(!nodes.contains(&1));
//!
//! let owner = distribution.ideal_distributor_node(&state, bucket, UpStates::default()).unwrap();
//! assert!(owner < 6);
//! ```

#![warn(missing_docs)]

pub mod distribution;
pub mod group;
pub mod handle;
pub mod hash;
pub mod random;
pub mod redundancy;
pub mod topology;

pub use distribution::{ideal_disk, ConfigError, Distribution, PlacementError};
pub use group::{ConfiguredNode, Group, GroupId, GroupKind};
pub use handle::DistributionHandle;
pub use random::RandomSequence;
pub use redundancy::{RedundancyDistributor, RedundancyError};
pub use topology::{Topology, TopologyBuilder, TopologyError};
