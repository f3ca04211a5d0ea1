//! Ideal state computation benchmarks.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use idealstate_core::{BucketId, ClusterState, UpStates};
use idealstate_placement::{Distribution, Topology};

const BUCKETS: u64 = 1024;

/// Topologies to compare, with their node counts.
fn topologies() -> Vec<(&'static str, u16, Distribution)> {
    vec![
        ("flat", 10, Distribution::new(Topology::flat(2, 10).unwrap())),
        ("flat", 100, Distribution::new(Topology::flat(3, 100).unwrap())),
        ("two_groups", 10, Distribution::new(Topology::two_groups(2, 10).unwrap())),
        ("two_groups", 100, Distribution::new(Topology::two_groups(3, 100).unwrap())),
    ]
}

fn bench_storage_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("ideal_storage_nodes");
    group.throughput(Throughput::Elements(BUCKETS));

    for (name, nodes, distribution) in topologies() {
        let state = ClusterState::builder().all_nodes(nodes).build();
        group.bench_with_input(BenchmarkId::new(name, nodes), &distribution, |b, distribution| {
            b.iter(|| {
                for id in 0..BUCKETS {
                    let bucket = BucketId::new(16, id);
                    black_box(
                        distribution.ideal_storage_nodes(&state, bucket, UpStates::default()).unwrap(),
                    );
                }
            });
        });
    }

    group.finish();
}

fn bench_distributor_node(c: &mut Criterion) {
    let mut group = c.benchmark_group("ideal_distributor_node");
    group.throughput(Throughput::Elements(BUCKETS));

    for (name, nodes, distribution) in topologies() {
        let state = ClusterState::builder().all_nodes(nodes).build();
        group.bench_with_input(BenchmarkId::new(name, nodes), &distribution, |b, distribution| {
            b.iter(|| {
                for id in 0..BUCKETS {
                    let bucket = BucketId::new(16, id);
                    black_box(
                        distribution.ideal_distributor_node(&state, bucket, UpStates::default()).unwrap(),
                    );
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_storage_nodes, bench_distributor_node);
criterion_main!(benches);
