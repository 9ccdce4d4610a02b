//! Benchmarks for the in-process coloring algorithms
//!
//! Measures:
//! - Sequential first-fit coloring
//! - GM speculation with one task per vertex
//! - GM speculation with one task per chunk

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gmcolor_color::{color_parallel_gm, color_parallel_gm_chunked, color_sequential, default_threads};
use gmcolor_graph::{generate, Color, Graph};

fn random_graphs() -> Vec<(usize, Graph)> {
    [1_000usize, 10_000, 50_000]
        .iter()
        .map(|&n| (n, generate::random_seeded(n, 30.0, n as u64)))
        .collect()
}

fn budget(g: &Graph) -> Color {
    g.max_degree() as Color + 1
}

fn bench_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential");

    for (n, graph) in random_graphs() {
        let max = budget(&graph);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &graph, |b, g| {
            b.iter(|| {
                let mut g = g.clone();
                color_sequential(black_box(&mut g), max).unwrap();
            })
        });
    }
    group.finish();
}

fn bench_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_gm");
    let threads = default_threads();

    for (n, graph) in random_graphs() {
        let max = budget(&graph);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("per_vertex", n), &graph, |b, g| {
            b.iter(|| {
                let mut g = g.clone();
                color_parallel_gm(black_box(&mut g), max).unwrap();
            })
        });
        group.bench_with_input(BenchmarkId::new("chunked", n), &graph, |b, g| {
            b.iter(|| {
                let mut g = g.clone();
                color_parallel_gm_chunked(black_box(&mut g), max, threads).unwrap();
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sequential, bench_parallel);
criterion_main!(benches);
