//! Redundancy split across the children of a group.
//!
//! A partition spec such as `"2|3|*"` describes how the replicas of a bucket
//! are spread over the subgroups of an internal group. Fixed tokens give a
//! slot an exact share; `*` tokens split whatever is left evenly. The split is
//! precomputed for every redundancy up to a maximum so that placement queries
//! only do a lookup.

use thiserror::Error;

/// Largest value accepted for a fixed partition token.
pub const MAX_PARTITION_TOKEN: u16 = 255;

/// Errors from parsing a partition spec or looking up a split.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedundancyError {
    /// The spec has no tokens.
    #[error("empty partition spec")]
    Empty,

    /// A token is neither `*` nor an integer in `1..=255`.
    #[error("invalid token '{token}' at index {index} in partition spec '{spec}'")]
    InvalidToken {
        /// The full spec.
        spec: String,
        /// Position of the offending token.
        index: usize,
        /// The offending token.
        token: String,
    },

    /// A fixed token follows a `*` token.
    #[error("fixed token at index {index} follows '*' in partition spec '{spec}'")]
    AsteriskNotLast {
        /// The full spec.
        spec: String,
        /// Position of the offending token.
        index: usize,
    },

    /// The requested redundancy has no precomputed split.
    #[error("redundancy {redundancy} out of range 1..={max}")]
    OutOfRange {
        /// Requested redundancy.
        redundancy: u16,
        /// Largest precomputed redundancy.
        max: u16,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Fixed(u16),
    Wildcard,
}

/// Precomputed per-child replica counts for an internal group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedundancyDistributor {
    spec: String,
    /// `arrays[r - 1]` is the split for redundancy `r`.
    arrays: Vec<Vec<u16>>,
}

impl RedundancyDistributor {
    /// Parses `spec` and precomputes splits for `1..=max_redundancy`.
    pub fn new(spec: &str, max_redundancy: u16) -> Result<Self, RedundancyError> {
        let slots = parse_spec(spec)?;
        let arrays = (1..=max_redundancy).map(|r| split(&slots, r)).collect();
        Ok(Self { spec: spec.to_string(), arrays })
    }

    /// Returns the replica counts for redundancy `r`, sorted descending.
    pub fn redundancy_array(&self, redundancy: u16) -> Result<&[u16], RedundancyError> {
        if redundancy == 0 {
            return Err(self.out_of_range(redundancy));
        }
        self.arrays
            .get(usize::from(redundancy) - 1)
            .map(Vec::as_slice)
            .ok_or_else(|| self.out_of_range(redundancy))
    }

    /// Largest redundancy with a precomputed split.
    #[must_use]
    pub fn max_redundancy(&self) -> u16 {
        self.arrays.len() as u16
    }

    /// The partition spec this distributor was built from.
    #[must_use]
    pub fn spec(&self) -> &str {
        &self.spec
    }

    fn out_of_range(&self, redundancy: u16) -> RedundancyError {
        RedundancyError::OutOfRange { redundancy, max: self.max_redundancy() }
    }
}

fn parse_spec(spec: &str) -> Result<Vec<Slot>, RedundancyError> {
    if spec.trim().is_empty() {
        return Err(RedundancyError::Empty);
    }

    let mut slots = Vec::new();
    let mut seen_wildcard = false;
    for (index, token) in spec.split('|').enumerate() {
        let token = token.trim();
        if token == "*" {
            seen_wildcard = true;
            slots.push(Slot::Wildcard);
            continue;
        }
        let value = token
            .parse::<u16>()
            .ok()
            .filter(|v| (1..=MAX_PARTITION_TOKEN).contains(v))
            .ok_or_else(|| RedundancyError::InvalidToken {
                spec: spec.to_string(),
                index,
                token: token.to_string(),
            })?;
        if seen_wildcard {
            return Err(RedundancyError::AsteriskNotLast { spec: spec.to_string(), index });
        }
        slots.push(Slot::Fixed(value));
    }
    Ok(slots)
}

fn split(slots: &[Slot], redundancy: u16) -> Vec<u16> {
    let mut remaining = redundancy;
    let mut values = Vec::with_capacity(slots.len());
    let mut wildcards: u16 = 0;

    for slot in slots {
        match *slot {
            Slot::Fixed(fixed) => {
                let value = remaining.min(fixed);
                remaining -= value;
                values.push(value);
            }
            Slot::Wildcard => wildcards += 1,
        }
    }

    if wildcards > 0 {
        let base = remaining / wildcards;
        let extra = remaining % wildcards;
        values.extend((0..wildcards).map(|i| base + u16::from(i < extra)));
    } else if remaining > 0 {
        // Every slot is fixed and full; spread the rest over all of them.
        let count = values.len() as u16;
        let base = remaining / count;
        let extra = remaining % count;
        for (i, value) in values.iter_mut().enumerate() {
            *value += base + u16::from((i as u16) < extra);
        }
    }

    values.retain(|&v| v > 0);
    values.sort_unstable_by(|a, b| b.cmp(a));
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wildcards_split_evenly() {
        let dist = RedundancyDistributor::new("*|*", 5).unwrap();
        assert_eq!(dist.redundancy_array(1).unwrap(), &[1]);
        assert_eq!(dist.redundancy_array(2).unwrap(), &[1, 1]);
        assert_eq!(dist.redundancy_array(3).unwrap(), &[2, 1]);
        assert_eq!(dist.redundancy_array(4).unwrap(), &[2, 2]);
        assert_eq!(dist.redundancy_array(5).unwrap(), &[3, 2]);
    }

    #[test]
    fn test_fixed_then_wildcards() {
        let dist = RedundancyDistributor::new("2|3|*", 8).unwrap();
        assert_eq!(dist.redundancy_array(1).unwrap(), &[1]);
        assert_eq!(dist.redundancy_array(3).unwrap(), &[2, 1]);
        assert_eq!(dist.redundancy_array(5).unwrap(), &[3, 2]);
        assert_eq!(dist.redundancy_array(8).unwrap(), &[3, 3, 2]);
    }

    #[test]
    fn test_one_and_rest() {
        let dist = RedundancyDistributor::new("1|*", 4).unwrap();
        assert_eq!(dist.redundancy_array(1).unwrap(), &[1]);
        assert_eq!(dist.redundancy_array(2).unwrap(), &[1, 1]);
        assert_eq!(dist.redundancy_array(4).unwrap(), &[3, 1]);
    }

    #[test]
    fn test_fixed_only_spreads_leftover() {
        let dist = RedundancyDistributor::new("1|1", 5).unwrap();
        assert_eq!(dist.redundancy_array(2).unwrap(), &[1, 1]);
        assert_eq!(dist.redundancy_array(3).unwrap(), &[2, 1]);
        assert_eq!(dist.redundancy_array(5).unwrap(), &[3, 2]);
    }

    #[test]
    fn test_out_of_range() {
        let dist = RedundancyDistributor::new("*", 3).unwrap();
        assert_eq!(dist.max_redundancy(), 3);
        assert_eq!(
            dist.redundancy_array(0),
            Err(RedundancyError::OutOfRange { redundancy: 0, max: 3 })
        );
        assert_eq!(
            dist.redundancy_array(4),
            Err(RedundancyError::OutOfRange { redundancy: 4, max: 3 })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(RedundancyDistributor::new("", 2), Err(RedundancyError::Empty));
        assert_eq!(
            RedundancyDistributor::new("*|2", 2),
            Err(RedundancyError::AsteriskNotLast { spec: "*|2".into(), index: 1 })
        );
        assert!(matches!(
            RedundancyDistributor::new("1|0", 2),
            Err(RedundancyError::InvalidToken { index: 1, .. })
        ));
        assert!(matches!(
            RedundancyDistributor::new("256", 2),
            Err(RedundancyError::InvalidToken { index: 0, .. })
        ));
        assert!(matches!(
            RedundancyDistributor::new("1|x|*", 2),
            Err(RedundancyError::InvalidToken { index: 1, ref token, .. }) if token == "x"
        ));
    }

    fn spec_strategy() -> impl Strategy<Value = String> {
        (prop::collection::vec(1u16..=5, 0..4), 0usize..4)
            .prop_filter("at least one token", |(fixed, wild)| !fixed.is_empty() || *wild > 0)
            .prop_map(|(fixed, wild)| {
                let mut tokens: Vec<String> = fixed.iter().map(u16::to_string).collect();
                tokens.extend(std::iter::repeat("*".to_string()).take(wild));
                tokens.join("|")
            })
    }

    proptest! {
        #[test]
        fn prop_split_conserves_redundancy(spec in spec_strategy(), max in 1u16..20) {
            let dist = RedundancyDistributor::new(&spec, max).unwrap();
            for r in 1..=max {
                let array = dist.redundancy_array(r).unwrap();
                prop_assert_eq!(array.iter().sum::<u16>(), r);
            }
        }

        #[test]
        fn prop_split_is_descending_without_zeros(spec in spec_strategy(), max in 1u16..20) {
            let dist = RedundancyDistributor::new(&spec, max).unwrap();
            for r in 1..=max {
                let array = dist.redundancy_array(r).unwrap();
                prop_assert!(!array.is_empty());
                prop_assert!(array.iter().all(|&v| v > 0));
                prop_assert!(array.windows(2).all(|w| w[0] >= w[1]));
            }
        }
    }
}
