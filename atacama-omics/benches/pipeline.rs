use criterion::{black_box, criterion_group, criterion_main, Criterion};
use atacama_omics::{
    build_knn_graph, cluster, fit_lsi, normalize, ClusterConfig, CommunityAlgorithm, CountMatrix,
    LsiConfig, NeighborsConfig, TfIdfConfig,
};

/// `n_cells` cells in four groups, each opening its own quarter of the
/// features with 1–4 reads and a few background reads elsewhere.
fn synthetic_counts(n_cells: usize, n_features: usize, seed: u64) -> CountMatrix {
    let mut state = seed;
    let mut next = || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    let quarter = n_features / 4;
    let rows: Vec<Vec<f64>> = (0..n_cells)
        .map(|i| {
            let group = i % 4;
            (0..n_features)
                .map(|j| {
                    let p = if j / quarter == group { 0.4 } else { 0.02 };
                    if next() < p {
                        1.0 + (next() * 4.0).floor()
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();
    CountMatrix::from_dense(
        &rows,
        (0..n_cells).map(|i| format!("cell{i}")).collect(),
        (0..n_features).map(|j| format!("peak{j}")).collect(),
    )
    .unwrap()
}

fn bench_tfidf(c: &mut Criterion) {
    let counts = synthetic_counts(1_000, 2_000, 1);
    let config = TfIdfConfig {
        drop_degenerate: true,
        ..Default::default()
    };
    c.bench_function("tfidf_1k_cells_2k_peaks", |b| {
        b.iter(|| normalize(black_box(&counts), &config))
    });
}

fn bench_lsi(c: &mut Criterion) {
    let counts = synthetic_counts(500, 2_000, 2);
    let norm = normalize(
        &counts,
        &TfIdfConfig {
            drop_degenerate: true,
            ..Default::default()
        },
    )
    .unwrap();
    let config = LsiConfig {
        n_components: 20,
        ..Default::default()
    };
    let mut group = c.benchmark_group("lsi");
    group.sample_size(10);
    group.bench_function("500_cells_20_components", |b| {
        b.iter(|| fit_lsi(black_box(&norm), &config))
    });
    group.finish();
}

fn bench_cluster(c: &mut Criterion) {
    let counts = synthetic_counts(600, 400, 3);
    let norm = normalize(
        &counts,
        &TfIdfConfig {
            drop_degenerate: true,
            ..Default::default()
        },
    )
    .unwrap();
    let embedding = fit_lsi(
        &norm,
        &LsiConfig {
            n_components: 10,
            ..Default::default()
        },
    )
    .unwrap()
    .embedding;
    let graph = build_knn_graph(&embedding, &NeighborsConfig::default()).unwrap();

    let mut group = c.benchmark_group("cluster");
    group.sample_size(10);
    for algorithm in [
        CommunityAlgorithm::Louvain,
        CommunityAlgorithm::Slm,
        CommunityAlgorithm::Leiden,
    ] {
        let config = ClusterConfig {
            algorithm,
            n_starts: 1,
            n_iterations: 2,
            ..Default::default()
        };
        group.bench_function(format!("{algorithm:?}_600_cells"), |b| {
            b.iter(|| cluster(black_box(&graph), &config))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tfidf, bench_lsi, bench_cluster);
criterion_main!(benches);
