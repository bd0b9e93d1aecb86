//! Single-cell clustering: kNN neighbor graphs over an embedding and
//! modularity-based community detection.

use std::collections::BTreeMap;

use atacama_core::{AtacamaError, Result, Scored, Summarizable, Xorshift64};
use atacama_ml::{knn_within, smooth_knn_distances, DistanceMetric, Neighbor};
use tracing::debug;

use crate::embedding::Embedding;
use crate::network::{optimize_modularity, CommunityAlgorithm, Graph};

// ── Neighbors ──────────────────────────────────────────────────────────────

/// How directed kNN edges are weighted and symmetrized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EdgeWeighting {
    /// UMAP-style smooth-kNN membership strengths, combined by fuzzy union.
    #[default]
    Fuzzy,
    /// `(k − rank) / k` for the 0-based neighbor rank, combined by maximum.
    Rank,
}

/// Configuration for kNN graph construction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NeighborsConfig {
    /// Number of nearest neighbors per cell.
    pub k: usize,
    /// Embedding dimensions to use, in order; `None` uses all of them.
    pub dims: Option<Vec<usize>>,
    pub metric: DistanceMetric,
    pub weighting: EdgeWeighting,
}

impl Default for NeighborsConfig {
    fn default() -> Self {
        Self {
            k: 20,
            dims: None,
            metric: DistanceMetric::Euclidean,
            weighting: EdgeWeighting::Fuzzy,
        }
    }
}

/// Undirected weighted kNN graph over cells.
///
/// Keeps both the directed neighbor lists (each of length
/// `min(k, n_cells − 1)`) and the symmetrized adjacency. The adjacency has
/// no self-loops and every directed edge appears in both directions.
#[derive(Debug, Clone)]
pub struct NeighborGraph {
    cell_ids: Vec<String>,
    k: usize,
    knn: Vec<Vec<Neighbor>>,
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl NeighborGraph {
    pub fn n_cells(&self) -> usize {
        self.cell_ids.len()
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    /// Effective neighbor count after clamping to `n_cells − 1`.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Directed neighbor list of `cell` before symmetrization, nearest first.
    pub fn out_neighbors(&self, cell: usize) -> &[Neighbor] {
        &self.knn[cell]
    }

    /// Symmetrized neighbors of `cell` with edge weights, sorted by index.
    pub fn neighbors(&self, cell: usize) -> &[(usize, f64)] {
        &self.adjacency[cell]
    }

    pub fn degree(&self, cell: usize) -> usize {
        self.adjacency[cell].len()
    }

    /// Edge weight between two cells, 0 when not connected.
    pub fn weight(&self, a: usize, b: usize) -> f64 {
        let row = &self.adjacency[a];
        row.binary_search_by(|&(j, _)| j.cmp(&b))
            .map_or(0.0, |pos| row[pos].1)
    }

    /// Number of undirected edges.
    pub fn n_edges(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }

    pub fn mean_degree(&self) -> f64 {
        if self.adjacency.is_empty() {
            return 0.0;
        }
        2.0 * self.n_edges() as f64 / self.n_cells() as f64
    }

    /// Number of connected components.
    pub fn connected_components(&self) -> usize {
        self.to_graph()
            .connected_components()
            .into_iter()
            .max()
            .map_or(0, |c| c + 1)
    }

    pub(crate) fn to_graph(&self) -> Graph {
        Graph::from_adjacency(self.adjacency.clone())
    }
}

impl Summarizable for NeighborGraph {
    fn summary(&self) -> String {
        format!(
            "NeighborGraph: {} cells, k = {}, {} edges",
            self.n_cells(),
            self.k,
            self.n_edges()
        )
    }
}

/// Build a symmetrized kNN graph over the selected embedding dimensions.
pub fn build_knn_graph(embedding: &Embedding, config: &NeighborsConfig) -> Result<NeighborGraph> {
    if config.k == 0 {
        return Err(AtacamaError::InvalidInput("k must be at least 1".into()));
    }
    let restricted = embedding.select_dims(config.dims.as_deref())?;
    let n = restricted.n_cells();
    if n < 2 {
        return Err(AtacamaError::InvalidInput(
            "need at least 2 cells for a neighbor graph".into(),
        ));
    }
    let k = config.k.min(n - 1);
    let rows = restricted.rows();
    let knn = knn_within(&rows, k, config.metric)?;

    let directed: Vec<Vec<f64>> = match config.weighting {
        EdgeWeighting::Fuzzy => {
            let (rhos, sigmas) = smooth_knn_distances(&knn, k);
            knn.iter()
                .enumerate()
                .map(|(i, list)| {
                    list.iter()
                        .map(|&(_, d)| (-(d - rhos[i]).max(0.0) / sigmas[i]).exp().max(1e-12))
                        .collect()
                })
                .collect()
        }
        EdgeWeighting::Rank => knn
            .iter()
            .map(|list| {
                (0..list.len())
                    .map(|r| (k - r) as f64 / k as f64)
                    .collect()
            })
            .collect(),
    };

    // (lower, upper) → (weight lower→upper, weight upper→lower)
    let mut pairs: BTreeMap<(usize, usize), (f64, f64)> = BTreeMap::new();
    for (i, list) in knn.iter().enumerate() {
        for (&(j, _), &w) in list.iter().zip(&directed[i]) {
            if i < j {
                pairs.entry((i, j)).or_insert((0.0, 0.0)).0 = w;
            } else {
                pairs.entry((j, i)).or_insert((0.0, 0.0)).1 = w;
            }
        }
    }

    let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for ((i, j), (a, b)) in pairs {
        let w = match config.weighting {
            EdgeWeighting::Fuzzy => a + b - a * b,
            EdgeWeighting::Rank => a.max(b),
        };
        adjacency[i].push((j, w));
        adjacency[j].push((i, w));
    }
    for row in &mut adjacency {
        row.sort_by_key(|&(j, _)| j);
    }

    let graph = NeighborGraph {
        cell_ids: restricted.cell_ids().to_vec(),
        k,
        knn,
        adjacency,
    };
    debug!(
        n_cells = n,
        k,
        n_dims = restricted.n_dims(),
        n_edges = graph.n_edges(),
        "built neighbor graph"
    );
    Ok(graph)
}

// ── Clustering ─────────────────────────────────────────────────────────────

/// Configuration for graph clustering.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusterConfig {
    pub algorithm: CommunityAlgorithm,
    /// Higher values give more, smaller clusters.
    pub resolution: f64,
    pub seed: u64,
    /// Independent random starts; the highest-modularity partition is kept.
    pub n_starts: usize,
    /// Optimization passes per start, each starting from the previous result.
    pub n_iterations: usize,
    /// Fail with `DisconnectedInput` when the graph is not connected.
    pub require_connected: bool,
    /// Temperature of the Leiden refinement step.
    pub leiden_randomness: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            algorithm: CommunityAlgorithm::Louvain,
            resolution: 0.8,
            seed: 0,
            n_starts: 10,
            n_iterations: 10,
            require_connected: false,
            leiden_randomness: 0.01,
        }
    }
}

/// Cluster label per cell.
///
/// Labels run `1..=n_clusters`, ordered by decreasing cluster size; equal
/// sizes are ordered by their lowest cell index.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterAssignment {
    cell_ids: Vec<String>,
    labels: Vec<usize>,
    n_clusters: usize,
    modularity: f64,
}

impl ClusterAssignment {
    /// Build from arbitrary group ids, relabelling to `1..=n` by size.
    pub fn from_groups(cell_ids: Vec<String>, groups: &[usize], modularity: f64) -> Result<Self> {
        if groups.len() != cell_ids.len() {
            return Err(AtacamaError::shape_mismatch(
                "cluster labels",
                cell_ids.len(),
                groups.len(),
            ));
        }
        // group → (size, first member)
        let mut stats: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
        for (i, &g) in groups.iter().enumerate() {
            stats.entry(g).or_insert((0, i)).0 += 1;
        }
        let mut order: Vec<(usize, usize, usize)> =
            stats.into_iter().map(|(g, (size, first))| (g, size, first)).collect();
        order.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        let relabel: BTreeMap<usize, usize> = order
            .iter()
            .enumerate()
            .map(|(rank, &(g, _, _))| (g, rank + 1))
            .collect();

        Ok(Self {
            labels: groups.iter().map(|g| relabel[g]).collect(),
            n_clusters: order.len(),
            cell_ids,
            modularity,
        })
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    /// 1-based label per cell.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn label(&self, cell: usize) -> usize {
        self.labels[cell]
    }

    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    pub fn modularity(&self) -> f64 {
        self.modularity
    }

    /// Cluster sizes, indexed by `label − 1`.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &l in &self.labels {
            sizes[l - 1] += 1;
        }
        sizes
    }

    /// Cell indices carrying `label`.
    pub fn members(&self, label: usize) -> Vec<usize> {
        (0..self.labels.len())
            .filter(|&i| self.labels[i] == label)
            .collect()
    }

    /// Labels shifted to start at 0, for partition metrics.
    pub fn zero_based(&self) -> Vec<usize> {
        self.labels.iter().map(|l| l - 1).collect()
    }

    pub fn to_map(&self) -> BTreeMap<String, usize> {
        self.cell_ids
            .iter()
            .cloned()
            .zip(self.labels.iter().copied())
            .collect()
    }
}

impl Scored for ClusterAssignment {
    fn score(&self) -> f64 {
        self.modularity
    }
}

impl Summarizable for ClusterAssignment {
    fn summary(&self) -> String {
        format!(
            "ClusterAssignment: {} cells in {} clusters (modularity {:.3})",
            self.labels.len(),
            self.n_clusters,
            self.modularity
        )
    }
}

/// Partition the graph into communities.
///
/// Isolated cells end up as singleton clusters unless
/// `config.require_connected` is set, in which case a disconnected graph is
/// rejected.
pub fn cluster(graph: &NeighborGraph, config: &ClusterConfig) -> Result<ClusterAssignment> {
    if !config.resolution.is_finite() || config.resolution <= 0.0 {
        return Err(AtacamaError::InvalidInput(format!(
            "resolution must be positive, got {}",
            config.resolution
        )));
    }
    if config.n_starts == 0 || config.n_iterations == 0 {
        return Err(AtacamaError::InvalidInput(
            "n_starts and n_iterations must be at least 1".into(),
        ));
    }
    if config.leiden_randomness.is_nan() || config.leiden_randomness <= 0.0 {
        return Err(AtacamaError::InvalidInput(
            "leiden_randomness must be positive".into(),
        ));
    }
    if graph.n_cells() == 0 {
        return Err(AtacamaError::EmptyInput("neighbor graph has no cells".into()));
    }

    let g = graph.to_graph();
    let components = g.connected_components().into_iter().max().map_or(0, |c| c + 1);
    if config.require_connected && components > 1 {
        return Err(AtacamaError::DisconnectedInput { components });
    }

    let mut best: Option<(Vec<usize>, f64)> = None;
    for start in 0..config.n_starts {
        let mut rng = Xorshift64::new(config.seed.wrapping_add(start as u64));
        let mut partition: Option<Vec<usize>> = None;
        for _ in 0..config.n_iterations {
            partition = Some(optimize_modularity(
                &g,
                config.algorithm,
                config.resolution,
                config.leiden_randomness,
                partition.as_deref(),
                &mut rng,
            ));
        }
        let Some(partition) = partition else { continue };
        let q = g.modularity(&partition, config.resolution);
        debug!(start, modularity = q, "community detection start finished");
        if best.as_ref().map_or(true, |(_, best_q)| q > *best_q + 1e-12) {
            best = Some((partition, q));
        }
    }

    let (partition, modularity) = best.unwrap_or_else(|| ((0..g.n_nodes()).collect(), 0.0));
    let assignment = ClusterAssignment::from_groups(graph.cell_ids.clone(), &partition, modularity)?;
    debug!(
        algorithm = ?config.algorithm,
        resolution = config.resolution,
        n_clusters = assignment.n_clusters(),
        components,
        modularity,
        "clustered neighbor graph"
    );
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight blobs of `a` and `b` cells far apart in 2-D.
    fn two_blobs(a: usize, b: usize) -> Embedding {
        let mut rng = Xorshift64::new(99);
        let mut values = Vec::new();
        for i in 0..(a + b) {
            let center = if i < a { 0.0 } else { 10.0 };
            values.push(center + rng.next_f64() * 0.5);
            values.push(center + rng.next_f64() * 0.5);
        }
        let ids = (0..(a + b)).map(|i| format!("c{i}")).collect();
        Embedding::new("lsi", ids, values, 2).unwrap()
    }

    fn config(k: usize) -> NeighborsConfig {
        NeighborsConfig {
            k,
            ..Default::default()
        }
    }

    #[test]
    fn graph_is_symmetric_without_self_loops() {
        for weighting in [EdgeWeighting::Fuzzy, EdgeWeighting::Rank] {
            let cfg = NeighborsConfig {
                k: 4,
                weighting,
                ..Default::default()
            };
            let g = build_knn_graph(&two_blobs(10, 10), &cfg).unwrap();
            for i in 0..g.n_cells() {
                assert_eq!(g.out_neighbors(i).len(), 4);
                assert!(g.degree(i) >= 4);
                for &(j, w) in g.neighbors(i) {
                    assert_ne!(i, j);
                    assert!(w > 0.0 && w <= 1.0);
                    assert_eq!(g.weight(j, i), w);
                }
            }
        }
    }

    #[test]
    fn k_clamped_to_cell_count() {
        let g = build_knn_graph(&two_blobs(2, 2), &config(10)).unwrap();
        assert_eq!(g.k(), 3);
        assert_eq!(g.n_edges(), 6);
        assert!((g.mean_degree() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn rank_weights_decrease() {
        let cfg = NeighborsConfig {
            k: 3,
            weighting: EdgeWeighting::Rank,
            ..Default::default()
        };
        let emb = Embedding::new(
            "x",
            (0..4).map(|i| format!("c{i}")).collect(),
            vec![0.0, 1.0, 3.0, 6.0],
            1,
        )
        .unwrap();
        let g = build_knn_graph(&emb, &cfg).unwrap();
        // Cell 0 ranks 1, 2, 3 at 0, 1, 2; cell 3 ranks 0 last.
        assert!((g.weight(0, 1) - 1.0).abs() < 1e-12);
        assert!((g.weight(0, 3) - 1.0 / 3.0).abs() < 1e-12);
        assert!(g.weight(0, 2) > g.weight(0, 3));
    }

    #[test]
    fn dims_restrict_distance() {
        // Dimension 0 separates {0,1} from {2,3}; dimension 1 pairs them the
        // other way round.
        let emb = Embedding::new(
            "x",
            (0..4).map(|i| format!("c{i}")).collect(),
            vec![0.0, 0.0, 0.1, 9.0, 9.0, 0.1, 9.1, 9.1],
            2,
        )
        .unwrap();
        let cfg = NeighborsConfig {
            k: 1,
            dims: Some(vec![1]),
            ..Default::default()
        };
        let g = build_knn_graph(&emb, &cfg).unwrap();
        assert_eq!(g.out_neighbors(0)[0].0, 2);

        let bad = NeighborsConfig {
            dims: Some(vec![5]),
            ..cfg
        };
        assert!(build_knn_graph(&emb, &bad).is_err());
    }

    #[test]
    fn clusters_two_blobs_with_every_algorithm() {
        let g = build_knn_graph(&two_blobs(12, 8), &config(5)).unwrap();
        assert_eq!(g.connected_components(), 2);
        for algorithm in [
            CommunityAlgorithm::Louvain,
            CommunityAlgorithm::Slm,
            CommunityAlgorithm::Leiden,
        ] {
            let cfg = ClusterConfig {
                algorithm,
                resolution: 0.1,
                seed: 1,
                ..Default::default()
            };
            let c = cluster(&g, &cfg).unwrap();
            assert_eq!(c.n_clusters(), 2, "{algorithm:?}");
            assert_eq!(c.sizes(), vec![12, 8]);
            assert!(c.labels()[..12].iter().all(|&l| l == 1));
            assert!(c.labels()[12..].iter().all(|&l| l == 2));
            assert!(c.score() > 0.0);
        }
    }

    #[test]
    fn clustering_is_deterministic() {
        let g = build_knn_graph(&two_blobs(15, 15), &config(6)).unwrap();
        for algorithm in [
            CommunityAlgorithm::Louvain,
            CommunityAlgorithm::Slm,
            CommunityAlgorithm::Leiden,
        ] {
            let cfg = ClusterConfig {
                algorithm,
                resolution: 2.0,
                seed: 17,
                ..Default::default()
            };
            assert_eq!(cluster(&g, &cfg).unwrap(), cluster(&g, &cfg).unwrap());
        }
    }

    #[test]
    fn require_connected_rejects_disconnected_graph() {
        let g = build_knn_graph(&two_blobs(6, 6), &config(3)).unwrap();
        let cfg = ClusterConfig {
            require_connected: true,
            ..Default::default()
        };
        assert!(matches!(
            cluster(&g, &cfg),
            Err(AtacamaError::DisconnectedInput { components: 2 })
        ));
    }

    #[test]
    fn invalid_resolution() {
        let g = build_knn_graph(&two_blobs(4, 4), &config(2)).unwrap();
        for resolution in [0.0, -1.0, f64::NAN] {
            let cfg = ClusterConfig {
                resolution,
                ..Default::default()
            };
            assert!(cluster(&g, &cfg).is_err());
        }
    }

    #[test]
    fn labels_ordered_by_size() {
        let ids: Vec<String> = (0..6).map(|i| format!("c{i}")).collect();
        let a = ClusterAssignment::from_groups(ids, &[7, 3, 3, 9, 3, 7], 0.0).unwrap();
        assert_eq!(a.labels(), &[2, 1, 1, 3, 1, 2]);
        assert_eq!(a.members(2), vec![0, 5]);
        assert_eq!(a.zero_based(), vec![1, 0, 0, 2, 0, 1]);
        assert_eq!(a.to_map()["c3"], 3);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn degree_matches_k(
            n in 3usize..25,
            k in 1usize..12,
            seed in 1u64..1000,
        ) {
            let mut rng = Xorshift64::new(seed);
            let values: Vec<f64> = (0..n * 3).map(|_| rng.next_f64()).collect();
            let ids = (0..n).map(|i| format!("c{i}")).collect();
            let emb = Embedding::new("x", ids, values, 3).unwrap();
            let g = build_knn_graph(&emb, &NeighborsConfig { k, ..Default::default() }).unwrap();
            let expected = k.min(n - 1);
            for i in 0..n {
                prop_assert_eq!(g.out_neighbors(i).len(), expected);
                prop_assert!(g.degree(i) >= expected);
            }
        }
    }
}
