//! Benchmarks for Laplacian construction and damage reweighting.
//!
//! Reweighting runs once per integration step in the damage-coupled models,
//! so its constant factor dominates whole-run cost there.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array1, Array2};
use tauspread_connectome::{synthetic, LaplacianBuilder, ReweightRule};

fn bench_pristine_build(c: &mut Criterion) {
    let connectome = synthetic::random_connectome(83, 0.3, 11).unwrap();
    let builder = LaplacianBuilder::new(&connectome);

    c.bench_function("laplacian_build_83", |b| {
        b.iter(|| black_box(builder.build()))
    });
}

fn bench_reweight_hot_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("laplacian_reweight");
    for &n in &[83usize, 256] {
        let connectome = synthetic::random_connectome(n, 0.3, 11).unwrap();
        let mut builder = LaplacianBuilder::new(&connectome);
        let damage = Array1::from_shape_fn(n, |i| 0.5 * (i as f64) / (n as f64));
        let mut out = Array2::zeros((n, n));

        group.bench_with_input(BenchmarkId::new("linear", n), &n, |b, _| {
            b.iter(|| {
                builder
                    .reweighted_into(damage.view(), ReweightRule::Linear, &mut out)
                    .unwrap();
                black_box(&out);
            })
        });
        group.bench_with_input(BenchmarkId::new("exponential", n), &n, |b, _| {
            b.iter(|| {
                builder
                    .reweighted_into(
                        damage.view(),
                        ReweightRule::Exponential { decay: 1.0 },
                        &mut out,
                    )
                    .unwrap();
                black_box(&out);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pristine_build, bench_reweight_hot_path);
criterion_main!(benches);
