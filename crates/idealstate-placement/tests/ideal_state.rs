//! Integration tests for ideal state placement.
//!
//! Expected node lists are reference values: any change to them means nodes
//! running different builds would disagree on placement.

use idealstate_core::{BucketId, ClusterState, DiskState, NodeState, NodeType, State, UpStates};
use idealstate_placement::{
    ConfiguredNode, Distribution, PlacementError, Topology, TopologyBuilder,
};
use proptest::prelude::*;

fn flat(redundancy: u16, nodes: u16) -> Distribution {
    Distribution::new(Topology::flat(redundancy, nodes).unwrap())
}

fn nodes(indexes: &[u16]) -> Vec<ConfiguredNode> {
    indexes.iter().copied().map(ConfiguredNode::new).collect()
}

/// Two racks of three nodes under a `"1|*"` root.
fn two_racks(auto_transfer: bool, second_index: u16) -> Distribution {
    let mut builder = TopologyBuilder::new();
    let root = builder.internal_group(0, "root", "1|*", 2, 1.0).unwrap();
    let rack0 = builder.leaf_group(0, "rack0", nodes(&[0, 1, 2]), 1.0).unwrap();
    let rack1 = builder.leaf_group(second_index, "rack1", nodes(&[3, 4, 5]), 1.0).unwrap();
    builder.add_child(root, rack0).unwrap();
    builder.add_child(root, rack1).unwrap();
    Distribution::new(builder.build(root, 2, auto_transfer).unwrap())
}

fn up() -> UpStates {
    UpStates::default()
}

#[test]
fn test_bucket_one_node_preference() {
    let distribution = flat(2, 10);
    let bucket = BucketId::new(16, 1);
    let expected = [3, 5, 7, 6, 8, 0, 9, 2, 1, 4];

    let mut state = ClusterState::builder().all_nodes(10).build();
    let mut distributors = Vec::new();
    for _ in 0..10 {
        let owner = distribution.ideal_distributor_node(&state, bucket, up()).unwrap();
        distributors.push(owner);
        state = state.to_builder().node(NodeType::Distributor, owner, State::Down).build();
    }
    assert_eq!(distributors, expected);

    let err = distribution.ideal_distributor_node(&state, bucket, up()).unwrap_err();
    assert!(matches!(err, PlacementError::NoDistributorInUpStates { .. }));

    let mut state = ClusterState::builder().all_nodes(10).build();
    let mut storage = Vec::new();
    for _ in 0..10 {
        let nodes =
            distribution.ideal_storage_nodes_with_redundancy(&state, bucket, 1, up()).unwrap();
        storage.push(nodes[0]);
        state = state.to_builder().node(NodeType::Storage, nodes[0], State::Down).build();
    }
    assert_eq!(storage, expected);
}

#[test]
fn test_end_to_end_substitution() {
    let distribution = flat(2, 10);
    let bucket = BucketId::new(16, 1);
    let state: ClusterState = "distributor:10 storage:10".parse().unwrap();

    let nodes = distribution.ideal_storage_nodes(&state, bucket, up()).unwrap();
    assert_eq!(nodes, vec![3, 5]);

    let degraded: ClusterState = "distributor:10 storage:10 .3.s:d".parse().unwrap();
    let substituted = distribution.ideal_storage_nodes(&degraded, bucket, up()).unwrap();
    assert_eq!(substituted, vec![5, 7]);
    assert!(substituted.contains(&5));
    assert_eq!(substituted.iter().filter(|n| !nodes.contains(n)).count(), 1);
}

#[test]
fn test_up_state_filtering() {
    let distribution = flat(2, 10);
    let bucket = BucketId::new(16, 1);
    let state: ClusterState =
        "distributor:10 .3.s:m storage:10 .3.s:m .5.s:r".parse().unwrap();

    let strict: UpStates = "ui".parse().unwrap();
    let nodes = distribution.ideal_storage_nodes(&state, bucket, strict).unwrap();
    assert!(!nodes.contains(&3));
    assert!(!nodes.contains(&5));
    assert_eq!(nodes, vec![7, 6]);
    assert_ne!(distribution.ideal_distributor_node(&state, bucket, strict).unwrap(), 3);

    // Maintenance is eligible under the default filter.
    assert_eq!(distribution.ideal_storage_nodes(&state, bucket, up()).unwrap(), vec![3, 7]);
    assert_eq!(distribution.ideal_distributor_node(&state, bucket, up()).unwrap(), 3);
}

#[test]
fn test_disk_down_exclusion() {
    let distribution = flat(2, 10);
    let bucket = BucketId::new(16, 1);
    let with_disks = |node: NodeState| {
        let mut builder = ClusterState::builder().all_nodes(10);
        for index in 0..10 {
            builder = builder.node_state(NodeType::Storage, index, NodeState::new(State::Up).with_disks(4));
        }
        builder.node_state(NodeType::Storage, 3, node).build()
    };

    let healthy = with_disks(NodeState::new(State::Up).with_disks(4));
    assert_eq!(distribution.ideal_storage_nodes(&healthy, bucket, up()).unwrap(), vec![3, 5]);

    let ideal = distribution.ideal_disk(healthy.node_state(NodeType::Storage, 3), 3, bucket).unwrap();
    assert_eq!(ideal, 2);

    let ideal_down = with_disks(
        NodeState::new(State::Up).with_disks(4).with_disk_state(ideal, DiskState::new(State::Down)),
    );
    assert_eq!(distribution.ideal_storage_nodes(&ideal_down, bucket, up()).unwrap(), vec![5, 7]);

    let other_down = with_disks(
        NodeState::new(State::Up).with_disks(4).with_disk_state(3, DiskState::new(State::Down)),
    );
    assert_eq!(distribution.ideal_storage_nodes(&other_down, bucket, up()).unwrap(), vec![3, 5]);
}

#[test]
fn test_used_bits_precondition() {
    let distribution = flat(2, 10);
    let state: ClusterState = "bits:20 distributor:10 storage:10".parse().unwrap();

    for used_bits in [0, 1, 16, 19] {
        let bucket = BucketId::new(used_bits, 1);
        let err = distribution.ideal_storage_nodes(&state, bucket, up()).unwrap_err();
        assert_eq!(
            err,
            PlacementError::TooFewBucketBits { bucket, used_bits, distribution_bits: 20 }
        );
        assert!(distribution.ideal_distributor_node(&state, bucket, up()).is_err());
    }
    assert!(distribution.ideal_storage_nodes(&state, BucketId::new(20, 1), up()).is_ok());
}

#[test]
fn test_ownership_transfer_on_whole_group_down() {
    let bucket = BucketId::new(16, 1);
    let transfer = two_racks(true, 1);
    let no_transfer = two_racks(false, 1);

    let state = ClusterState::builder().version(5).all_nodes(6).build();
    let group = transfer.ideal_distributor_group(&state, bucket).unwrap();
    assert_eq!(transfer.topology().path(group), "/root/rack0");
    assert_eq!(transfer.ideal_distributor_node(&state, bucket, up()).unwrap(), 0);

    let rack0_down: ClusterState =
        "version:6 distributor:6 .0.s:d .1.s:d .2.s:m storage:6".parse().unwrap();
    assert_eq!(transfer.ideal_distributor_node(&rack0_down, bucket, up()).unwrap(), 3);

    // Without transfer the owner stays in rack0, where only maintenance is left.
    assert_eq!(no_transfer.ideal_distributor_node(&rack0_down, bucket, up()).unwrap(), 2);
    let strict: UpStates = "ui".parse().unwrap();
    assert_eq!(
        no_transfer.ideal_distributor_node(&rack0_down, bucket, strict).unwrap_err(),
        PlacementError::NoDistributorInUpStates { up_states: strict, version: 6 }
    );

    let all_down: ClusterState = "version:7 distributor:6 .0.s:d .1.s:d .2.s:d .3.s:d .4.s:d .5.s:d storage:6"
        .parse()
        .unwrap();
    let err = transfer.ideal_distributor_group(&all_down, bucket).unwrap_err();
    assert_eq!(err, PlacementError::NoDistributorsAvailable { version: 7 });
    assert!(err.is_unavailable());
}

#[test]
fn test_grouped_placement() {
    let distribution = two_racks(false, 1);
    let state = ClusterState::builder().all_nodes(6).build();

    let expected: [(u64, [u16; 2], u16); 5] =
        [(1, [0, 3], 0), (2, [2, 4], 2), (3, [5, 2], 5), (4, [5, 0], 5), (5, [4, 1], 4)];
    for (id, storage, owner) in expected {
        let bucket = BucketId::new(16, id);
        assert_eq!(distribution.ideal_storage_nodes(&state, bucket, up()).unwrap(), storage);
        assert_eq!(distribution.ideal_distributor_node(&state, bucket, up()).unwrap(), owner);

        let groups = distribution.ideal_storage_groups(&state, bucket, 2).unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|&(_, share)| share == 1));
    }
}

#[test]
fn test_sparse_group_indexes_fast_forward() {
    let distribution = two_racks(false, 5);
    let state = ClusterState::builder().all_nodes(6).build();

    let expected: [(u64, [u16; 2], u16); 3] = [(1, [3, 0], 3), (2, [2, 4], 2), (3, [5, 2], 5)];
    for (id, storage, owner) in expected {
        let bucket = BucketId::new(16, id);
        assert_eq!(distribution.ideal_storage_nodes(&state, bucket, up()).unwrap(), storage);
        assert_eq!(distribution.ideal_distributor_node(&state, bucket, up()).unwrap(), owner);
    }
}

#[test]
fn test_wide_buckets_fold_high_bits() {
    let distribution = flat(2, 10);
    let state = ClusterState::builder().all_nodes(10).build();

    let expected = [[0, 8], [3, 7], [4, 3], [9, 1]];
    for (high, nodes) in expected.iter().enumerate() {
        let bucket = BucketId::new(40, ((high as u64) << 32) | 0x1234);
        assert_eq!(&distribution.ideal_storage_nodes(&state, bucket, up()).unwrap(), nodes);
    }

    // Up to 33 bits the high part is ignored.
    let narrow = BucketId::new(33, (1 << 32) | 0x1234);
    assert_eq!(distribution.ideal_storage_nodes(&state, narrow, up()).unwrap(), vec![0, 8]);
    assert_eq!(
        distribution.ideal_storage_nodes(&state, BucketId::new(16, 0x1234), up()).unwrap(),
        vec![0, 8]
    );
}

#[test]
fn test_capacity_biases_selection() {
    let grouped = weighted_pair(3.0);
    let state = ClusterState::builder().all_nodes(6).build();

    let heavy_hits = (0..2000)
        .filter(|&id| {
            grouped.ideal_storage_nodes(&state, BucketId::new(16, id), up()).unwrap()[0] >= 3
        })
        .count();
    assert_eq!(heavy_hits, 1504);

    let pair = flat(1, 2);
    let state: ClusterState = "distributor:2 .1.c:3 storage:2 .1.c:3".parse().unwrap();
    let storage_hits = (0..2000)
        .filter(|&id| pair.ideal_storage_nodes(&state, BucketId::new(16, id), up()).unwrap()[0] == 1)
        .count();
    let distributor_hits = (0..2000)
        .filter(|&id| pair.ideal_distributor_node(&state, BucketId::new(16, id), up()).unwrap() == 1)
        .count();
    assert_eq!(storage_hits, 1497);
    assert_eq!(distributor_hits, 1497);
}

fn weighted_pair(heavy_capacity: f64) -> Distribution {
    let mut builder = TopologyBuilder::new();
    let root = builder.internal_group(0, "root", "*|*", 1, 1.0).unwrap();
    let light = builder.leaf_group(0, "light", nodes(&[0, 1, 2]), 1.0).unwrap();
    let heavy = builder.leaf_group(1, "heavy", nodes(&[3, 4, 5]), heavy_capacity).unwrap();
    builder.add_child(root, light).unwrap();
    builder.add_child(root, heavy).unwrap();
    Distribution::new(builder.build(root, 1, false).unwrap())
}

fn heavy_owners(distribution: &Distribution, state: &ClusterState) -> usize {
    (0..2000)
        .filter(|&id| {
            distribution.ideal_distributor_node(state, BucketId::new(16, id), up()).unwrap() >= 3
        })
        .count()
}

#[test]
fn test_group_capacity_biases_ownership() {
    let state = ClusterState::builder().all_nodes(6).build();
    assert_eq!(heavy_owners(&weighted_pair(1.0), &state), 994);
    assert_eq!(heavy_owners(&weighted_pair(3.0), &state), 1504);
    assert_eq!(heavy_owners(&weighted_pair(0.5), &state), 666);
}

#[test]
fn test_near_unit_group_capacity_is_unweighted() {
    let state = ClusterState::builder().all_nodes(6).build();
    let plain = weighted_pair(1.0);
    let nudged = weighted_pair(1.0 + 1e-9);
    for id in 0..500 {
        let bucket = BucketId::new(16, id);
        assert_eq!(
            plain.ideal_distributor_group(&state, bucket).unwrap(),
            nudged.ideal_distributor_group(&state, bucket).unwrap()
        );
        assert_eq!(
            plain.ideal_storage_nodes(&state, bucket, up()).unwrap(),
            nudged.ideal_storage_nodes(&state, bucket, up()).unwrap()
        );
    }
}

#[test]
fn test_uniform_spread() {
    let distribution = flat(2, 10);
    let state = ClusterState::builder().all_nodes(10).build();
    let mut counts = [0usize; 10];
    for id in 0..5000 {
        for node in distribution.ideal_storage_nodes(&state, BucketId::new(16, id), up()).unwrap() {
            counts[usize::from(node)] += 1;
        }
    }
    assert_eq!(counts, [975, 996, 993, 1000, 1008, 1006, 994, 1008, 1025, 995]);
}

proptest! {
    #[test]
    fn prop_placement_is_deterministic(id in any::<u64>(), used_bits in 16u32..=58, down in 0u16..10) {
        let bucket = BucketId::new(used_bits, id);
        let text = format!("version:4 distributor:10 storage:10 .{down}.s:d");
        let state: ClusterState = text.parse().unwrap();
        let reparsed: ClusterState = state.to_string().parse().unwrap();

        let first = two_racks_ten();
        let second = two_racks_ten();
        let nodes = first.ideal_storage_nodes(&state, bucket, up()).unwrap();
        prop_assert_eq!(&nodes, &second.ideal_storage_nodes(&reparsed, bucket, up()).unwrap());
        prop_assert_eq!(
            first.ideal_distributor_node(&state, bucket, up()).unwrap(),
            second.ideal_distributor_node(&reparsed, bucket, up()).unwrap()
        );

        prop_assert_eq!(nodes.len(), 3);
        prop_assert!(!nodes.contains(&down));
        let mut unique = nodes.clone();
        unique.sort_unstable();
        unique.dedup();
        prop_assert_eq!(unique.len(), nodes.len());
    }
}

fn two_racks_ten() -> Distribution {
    Distribution::new(Topology::two_groups(3, 10).unwrap())
}
