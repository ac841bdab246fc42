//! Benchmarks for the lookups on the query hot path.
//!
//! Measures cache hits and misses and policy matching.

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::net::Ipv4Addr;

use idns::cache::RecordCache;
use idns::domain::DomainName;
use idns::policy::RoutingPolicy;

const ENTRIES: usize = 10_000;

fn filled_cache() -> RecordCache {
    let cache = RecordCache::new();
    let mut rng = rand::rng();
    for i in 0..ENTRIES {
        let addr = Ipv4Addr::from(rng.random::<u32>());
        cache.set(DomainName::new(&format!("host{i}.example.com")), vec![addr]);
    }
    cache
}

fn bench_cache(c: &mut Criterion) {
    let cache = filled_cache();
    let hit = DomainName::new("host4242.example.com");
    let miss = DomainName::new("absent.example.org");

    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));

    group.bench_function(BenchmarkId::new("get", "hit"), |b| {
        b.iter(|| cache.get(black_box(&hit)))
    });

    group.bench_function(BenchmarkId::new("get", "miss"), |b| {
        b.iter(|| cache.get(black_box(&miss)))
    });

    group.bench_function(BenchmarkId::new("set", "overwrite"), |b| {
        b.iter(|| cache.set(black_box(hit.clone()), vec![Ipv4Addr::new(10, 0, 0, 1)]))
    });

    group.finish();
}

fn bench_policy(c: &mut Criterion) {
    let names: Vec<String> = (0..ENTRIES).map(|i| format!("site{i}.example.com")).collect();
    let policy = RoutingPolicy::from_names(&names);

    let mut group = c.benchmark_group("policy");
    group.throughput(Throughput::Elements(1));

    group.bench_function(BenchmarkId::new("matches", "listed"), |b| {
        let name = DomainName::new("site77.example.com");
        b.iter(|| policy.matches(black_box(&name)))
    });

    group.bench_function(BenchmarkId::new("matches", "unlisted"), |b| {
        let name = DomainName::new("www.site77.example.com");
        b.iter(|| policy.matches(black_box(&name)))
    });

    // Normalization happens once per question before any lookup
    group.bench_function(BenchmarkId::new("domain_name", "new"), |b| {
        b.iter(|| DomainName::new(black_box("WWW.Example.COM")))
    });

    group.finish();
}

fn main() {
    let mut criterion = Criterion::default().configure_from_args();
    bench_cache(&mut criterion);
    bench_policy(&mut criterion);
    criterion.final_summary();
}
