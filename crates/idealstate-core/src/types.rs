// Copyright 2024 The Idealstate Authors
// SPDX-License-Identifier: Apache-2.0

//! Common types used throughout idealstate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of high bits in a raw bucket id that store the used-bits count.
pub const COUNT_BITS: u32 = 6;

/// Largest number of id bits a bucket can use.
pub const MAX_USED_BITS: u32 = 64 - COUNT_BITS;

const ID_MASK: u64 = (1 << MAX_USED_BITS) - 1;

/// Identifier of a bucket: a prefix of the document key space.
///
/// The top [`COUNT_BITS`] bits of the raw value hold how many of the lower
/// bits are significant; the remaining bits hold the id itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketId(u64);

impl BucketId {
    /// Creates a bucket using `used_bits` bits of `id`.
    ///
    /// Bits of `id` above `used_bits` are cleared. `used_bits` is capped at
    /// [`MAX_USED_BITS`].
    #[must_use]
    pub const fn new(used_bits: u32, id: u64) -> Self {
        let used = if used_bits > MAX_USED_BITS { MAX_USED_BITS } else { used_bits };
        let id_mask = if used == 0 { 0 } else { u64::MAX >> (64 - used) };
        Self(((used as u64) << MAX_USED_BITS) | (id & id_mask))
    }

    /// Wraps a raw 64-bit bucket id, including its count bits.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit id, including the count bits.
    #[must_use]
    pub const fn raw_id(&self) -> u64 {
        self.0
    }

    /// Returns how many bits of the id are in use.
    #[must_use]
    pub const fn used_bits(&self) -> u32 {
        (self.0 >> MAX_USED_BITS) as u32
    }

    /// Returns the id with the count bits cleared.
    #[must_use]
    pub const fn id_without_count_bits(&self) -> u64 {
        self.0 & ID_MASK
    }

    /// Returns the used prefix of the id, with every unused bit cleared.
    #[must_use]
    pub const fn stripped(&self) -> u64 {
        let used = self.used_bits();
        if used == 0 {
            0
        } else {
            self.0 & (u64::MAX >> (64 - used)) & ID_MASK
        }
    }
}

impl fmt::Debug for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketId({:#018x})", self.0)
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketId({:#018x})", self.0)
    }
}

impl FromStr for BucketId {
    type Err = Error;

    /// Parses either a raw hex id (`0x4000000000001234`) or a
    /// `bits:id` pair (`16:0x1234`, `16:4660`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some((bits, id)) = s.split_once(':') {
            let bits: u32 =
                bits.parse().map_err(|_| Error::invalid_bucket(s, "used bits is not a number"))?;
            if bits > MAX_USED_BITS {
                return Err(Error::invalid_bucket(
                    s,
                    format!("used bits must be at most {MAX_USED_BITS}"),
                ));
            }
            return Ok(Self::new(bits, parse_u64(id).ok_or_else(|| bad_id(s))?));
        }
        if s.starts_with("0x") || s.starts_with("0X") {
            return Ok(Self::from_raw(parse_u64(s).ok_or_else(|| bad_id(s))?));
        }
        Err(Error::invalid_bucket(s, "expected a raw hex id or a 'bits:id' pair"))
    }
}

fn parse_u64(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn bad_id(s: &str) -> Error {
    Error::invalid_bucket(s, "id is not a valid 64-bit number")
}

/// The two kinds of nodes the placement functions select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Distributor nodes own and coordinate buckets.
    Distributor,
    /// Storage nodes hold bucket replicas.
    Storage,
}

impl NodeType {
    /// Returns the name used in cluster state strings.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Distributor => "distributor",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a node or disk as reported by the cluster state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Available for traffic.
    #[default]
    Up,
    /// Unavailable.
    Down,
    /// Temporarily unavailable; replicas should stay where they are.
    Maintenance,
    /// Being phased out; keeps serving but should lose its data.
    Retired,
    /// Starting up, listing its buckets.
    Initializing,
    /// Shutting down.
    Stopping,
}

impl State {
    const ALL: [Self; 6] = [
        Self::Up,
        Self::Down,
        Self::Maintenance,
        Self::Retired,
        Self::Initializing,
        Self::Stopping,
    ];

    /// Returns the single character used for this state in state strings.
    #[must_use]
    pub const fn as_char(&self) -> char {
        match self {
            Self::Up => 'u',
            Self::Down => 'd',
            Self::Maintenance => 'm',
            Self::Retired => 'r',
            Self::Initializing => 'i',
            Self::Stopping => 's',
        }
    }

    /// Parses a state from its single-character form.
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_char() == c)
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Up => "Up",
            Self::Down => "Down",
            Self::Maintenance => "Maintenance",
            Self::Retired => "Retired",
            Self::Initializing => "Initializing",
            Self::Stopping => "Stopping",
        };
        f.write_str(name)
    }
}

/// A set of node states considered eligible for placement.
///
/// Written as a string of state characters, e.g. `"uim"` for
/// Up, Initializing and Maintenance.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpStates(u8);

impl UpStates {
    /// Default filter for storage node placement.
    pub const STORAGE_DEFAULT: &'static str = "uim";
    /// Default filter for distributor ownership.
    pub const DISTRIBUTOR_DEFAULT: &'static str = "uim";

    /// Up and Initializing: the filter used when deciding whether every
    /// distributor in a group is down.
    pub const UP_OR_INITIALIZING: Self = Self(State::Up.bit() | State::Initializing.bit());

    /// Creates a filter from an explicit list of states.
    #[must_use]
    pub fn from_states(states: &[State]) -> Self {
        Self(states.iter().fold(0, |acc, s| acc | s.bit()))
    }

    /// Returns true if `state` is part of this filter.
    #[must_use]
    pub const fn contains(&self, state: State) -> bool {
        self.0 & state.bit() != 0
    }

    /// Returns true if no state is accepted.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Default for UpStates {
    fn default() -> Self {
        Self::from_states(&[State::Up, State::Initializing, State::Maintenance])
    }
}

impl FromStr for UpStates {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.chars().try_fold(Self(0), |acc, c| {
            State::from_char(c).map(|state| Self(acc.0 | state.bit())).ok_or(Error::InvalidUpStates(c))
        })
    }
}

impl fmt::Display for UpStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for state in State::ALL {
            if self.contains(state) {
                write!(f, "{}", state.as_char())?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for UpStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpStates(\"{self}\")")
    }
}
