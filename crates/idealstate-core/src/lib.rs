//! Core types and utilities for idealstate.
//!
//! This crate provides the building blocks shared by the placement engine
//! and its callers:
//! - Bucket ids, node types, node states and up-state filters
//! - Immutable cluster state snapshots and their compact text form
//! - Configuration management
//! - Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod state;
pub mod types;

pub use config::{Config, DistributionConfig, GroupConfig, LogFormat, LoggingConfig, NodeConfig};
pub use error::{Error, Result};
pub use state::{ClusterState, ClusterStateBuilder, DiskState, NodeState};
pub use types::{BucketId, NodeType, State, UpStates};
