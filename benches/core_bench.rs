//! Benchmarks for sigbuild change detection.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sigbuild::core::cache;
use sigbuild::core::config;
use sigbuild::core::planner;
use sigbuild::core::spec::{RegenerateReason, SpecDecision};
use sigbuild::core::types::{BuildFlags, Fingerprint};
use sigbuild::provenance::hasher;

fn bench_hash_bytes(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_bytes");
    for size in [256, 4096, 65536] {
        let input = vec![b'x'; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(hasher::hash_bytes(black_box(input))));
        });
    }
    group.finish();
}

fn bench_hash_file(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();

    let mut group = c.benchmark_group("hash_file");
    for size_kb in [1, 64, 1024] {
        let path = dir.path().join(format!("spec_{size_kb}k.json"));
        std::fs::write(&path, vec![0xABu8; size_kb * 1024]).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(size_kb), &path, |b, path| {
            b.iter(|| black_box(hasher::hash_file(black_box(path)).unwrap()));
        });
    }
    group.finish();
}

fn bench_config_parse(c: &mut Criterion) {
    c.bench_function("config_parse_and_validate", |b| {
        b.iter(|| {
            let config = config::parse_config(black_box(config::INIT_TEMPLATE)).unwrap();
            black_box(config::validate_config(&config));
        });
    });
}

fn bench_plan_and_skip(c: &mut Criterion) {
    let flags = BuildFlags::default();
    c.bench_function("plan_stages", |b| {
        b.iter(|| {
            black_box(planner::plan_stages(
                black_box(&flags),
                SpecDecision::Regenerate(RegenerateReason::SpecChanged),
            ))
        });
    });

    let fp = Fingerprint::from_hash("00".repeat(32));
    let record = cache::new_record(fp.clone(), fp.clone(), "/nonexistent/app".into());
    c.bench_function("should_skip_compile_miss", |b| {
        b.iter(|| {
            black_box(cache::should_skip_compile(
                Some(black_box(&record)),
                &fp,
                &fp,
                false,
            ))
        });
    });
}

criterion_group!(
    benches,
    bench_hash_bytes,
    bench_hash_file,
    bench_config_parse,
    bench_plan_and_skip,
);
criterion_main!(benches);
