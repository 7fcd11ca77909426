//! Benchmarks for capability resolution and address allocation

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ztnet_alloc::{allocate_address, lowest_free, validate_routes};
use ztnet_core::{IpAssignmentPool, Member, MemberId, Network, NetworkId, Route};
use ztnet_policy::{resolve_capabilities, validate_member, validate_network, CapabilityResolver};
use ztnet_test::{FuzzerConfig, PolicyFuzzer};

fn catalog() -> (Network, Vec<Member>) {
    let mut fuzzer = PolicyFuzzer::new(FuzzerConfig::heavy());
    let network = fuzzer.generate_network(0);
    let members = (0..100).map(|n| fuzzer.generate_member(&network, n)).collect();
    (network, members)
}

fn v4(n: u32) -> IpAddr {
    IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + n))
}

fn bench_resolve_capabilities(c: &mut Criterion) {
    let (network, members) = catalog();

    c.bench_function("resolve_capabilities", |b| {
        b.iter(|| black_box(resolve_capabilities(black_box(&members[0]), &network)))
    });
}

fn bench_resolve_hundred_members(c: &mut Criterion) {
    let (network, members) = catalog();
    let resolver = CapabilityResolver::new(&network);

    c.bench_function("resolve_hundred_members", |b| {
        b.iter(|| {
            for member in &members {
                black_box(resolver.resolve(member));
            }
        })
    });
}

fn bench_controller_tags(c: &mut Criterion) {
    let (network, members) = catalog();
    let resolver = CapabilityResolver::new(&network);

    c.bench_function("controller_tags", |b| {
        b.iter(|| black_box(resolver.controller_tags(black_box(&members[1]))))
    });
}

fn bench_validate(c: &mut Criterion) {
    let (network, members) = catalog();

    c.bench_function("validate_network", |b| {
        b.iter(|| black_box(validate_network(black_box(&network)).is_ok()))
    });
    c.bench_function("validate_member", |b| {
        b.iter(|| black_box(validate_member(black_box(&members[2]), &network).is_ok()))
    });
}

fn bench_lowest_free(c: &mut Criterion) {
    let pool = IpAssignmentPool::new(v4(1), v4(65534));
    // Dense prefix, so the walk covers every held address
    let held: BTreeSet<IpAddr> = (1..=1000).map(v4).collect();

    c.bench_function("lowest_free_1000_held", |b| {
        b.iter(|| black_box(lowest_free(black_box(&pool), black_box(&held))))
    });
}

fn bench_allocate_address(c: &mut Criterion) {
    let network = Network::new(NetworkId::new(0x8056_c2e2_1c00_0001), "bench")
        .with_pool(v4(1), v4(254))
        .with_pool(v4(256 + 1), v4(256 + 254));
    let member = Member::new(network.nwid, MemberId::new(0xaa_0000_0001));
    // First pool full
    let held: BTreeSet<IpAddr> = (1..=254).map(v4).collect();

    c.bench_function("allocate_address_second_pool", |b| {
        b.iter(|| black_box(allocate_address(&member, &network, black_box(&held))))
    });
}

fn bench_validate_routes(c: &mut Criterion) {
    let routes: Vec<Route> = (0..64u32)
        .filter_map(|n| format!("10.{}.0.0/16", n).parse().ok())
        .map(Route::lan)
        .collect();

    c.bench_function("validate_routes_64", |b| {
        b.iter(|| black_box(validate_routes(black_box(&routes)).is_ok()))
    });
}

criterion_group!(
    benches,
    bench_resolve_capabilities,
    bench_resolve_hundred_members,
    bench_controller_tags,
    bench_validate,
    bench_lowest_free,
    bench_allocate_address,
    bench_validate_routes,
);
criterion_main!(benches);
