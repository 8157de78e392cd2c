use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use featmatch::{DescriptorSet, Descriptors, MatcherKind, PairwiseMatcher};
use rand::prelude::*;

fn random_float(rng: &mut impl Rng, n: usize, dim: usize) -> DescriptorSet {
    let data = (0..n * dim).map(|_| rng.random_range(0f32..255.)).collect();
    Descriptors::from_vec(dim, data).unwrap().into()
}

fn random_binary(rng: &mut impl Rng, n: usize) -> DescriptorSet {
    let mut data = vec![0u8; n * 32];
    rng.fill_bytes(&mut data);
    Descriptors::from_vec(32, data).unwrap().into()
}

fn bench_float(c: &mut Criterion) {
    let mut group = c.benchmark_group("Float");
    group.sample_size(10);
    let mut rng = rand::rng();

    // 维度越低 k-d 树的剪枝越有效
    for dim in [8, 32, 128] {
        let a = random_float(&mut rng, 2000, dim);
        let b = random_float(&mut rng, 2000, dim);
        group.throughput(Throughput::Elements((a.len() * b.len()) as u64));
        for kind in [MatcherKind::BruteForce, MatcherKind::KdTree] {
            let matcher = PairwiseMatcher::new(kind, true);
            group.bench_with_input(BenchmarkId::new(kind.name(), dim), &dim, |bench, _| {
                bench.iter(|| matcher.compute(black_box(&a), black_box(&b)).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_binary(c: &mut Criterion) {
    let mut group = c.benchmark_group("Binary");
    group.sample_size(10);
    let mut rng = rand::rng();
    let a = random_binary(&mut rng, 2000);
    let b = random_binary(&mut rng, 2000);
    group.throughput(Throughput::Elements((a.len() * b.len()) as u64));
    for cross_check in [false, true] {
        let matcher = PairwiseMatcher::brute_force(cross_check);
        group.bench_with_input(
            BenchmarkId::new("BFMatcher", cross_check),
            &cross_check,
            |bench, _| bench.iter(|| matcher.compute(black_box(&a), black_box(&b)).unwrap()),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_float, bench_binary);
criterion_main!(benches);
