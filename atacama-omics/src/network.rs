//! Weighted undirected graphs and modularity-based community detection.
//!
//! Three optimizers share one multi-level driver:
//!
//! - **Louvain**: local moving, then aggregation by community.
//! - **SLM** (smart local moving): local moving, then each community is split
//!   by local moving restricted to its own members, and the aggregate graph
//!   starts from the unsplit communities.
//! - **Leiden**: queue-based fast local moving, then a randomized refinement
//!   that only merges well-connected subsets, with aggregation on the
//!   refined partition.
//!
//! The graph is treated as a symmetric matrix `A` whose diagonal carries
//! aggregated self-loops. With strengths `k_i = Σ_j A_ij` and `2m = Σ_i k_i`,
//! modularity at resolution `γ` is
//! `Q = (1/2m) Σ_c [in_c − γ·tot_c² / 2m]`.

use std::collections::{BTreeMap, VecDeque};

use atacama_core::{AtacamaError, Result, Xorshift64};

const MAX_LEVELS: usize = 64;
const GAIN_EPS: f64 = 1e-12;

/// Community detection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommunityAlgorithm {
    Louvain,
    Slm,
    Leiden,
}

/// Undirected weighted graph with optional self-loops.
#[derive(Debug, Clone)]
pub struct Graph {
    /// Off-diagonal neighbors, sorted by index.
    adjacency: Vec<Vec<(usize, f64)>>,
    /// Diagonal entries `A_ii`.
    self_loops: Vec<f64>,
    strength: Vec<f64>,
    /// `2m`.
    total: f64,
}

impl Graph {
    /// Build from an undirected edge list. Parallel edges are summed.
    ///
    /// # Errors
    ///
    /// Out-of-range endpoints, self-loops, and negative or non-finite weights.
    pub fn from_edges(n_nodes: usize, edges: &[(usize, usize, f64)]) -> Result<Self> {
        let mut rows: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n_nodes];
        for &(i, j, w) in edges {
            if i >= n_nodes || j >= n_nodes {
                return Err(AtacamaError::InvalidInput(format!(
                    "edge ({i}, {j}) out of range for {n_nodes} nodes"
                )));
            }
            if i == j {
                return Err(AtacamaError::InvalidInput(format!("self-loop at node {i}")));
            }
            if !w.is_finite() || w < 0.0 {
                return Err(AtacamaError::InvalidInput(format!(
                    "edge ({i}, {j}) has invalid weight {w}"
                )));
            }
            *rows[i].entry(j).or_insert(0.0) += w;
            *rows[j].entry(i).or_insert(0.0) += w;
        }
        let adjacency = rows.into_iter().map(|r| r.into_iter().collect()).collect();
        Ok(Self::from_parts(adjacency, vec![0.0; n_nodes]))
    }

    /// Build from symmetric, index-sorted adjacency lists without diagonal
    /// entries.
    pub(crate) fn from_adjacency(adjacency: Vec<Vec<(usize, f64)>>) -> Self {
        let n = adjacency.len();
        Self::from_parts(adjacency, vec![0.0; n])
    }

    fn from_parts(adjacency: Vec<Vec<(usize, f64)>>, self_loops: Vec<f64>) -> Self {
        let strength: Vec<f64> = adjacency
            .iter()
            .zip(&self_loops)
            .map(|(row, &s)| s + row.iter().map(|&(_, w)| w).sum::<f64>())
            .collect();
        let total = strength.iter().sum();
        Self {
            adjacency,
            self_loops,
            strength,
            total,
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.adjacency.len()
    }

    /// Neighbors of `node` with edge weights, sorted by index.
    pub fn neighbors(&self, node: usize) -> &[(usize, f64)] {
        &self.adjacency[node]
    }

    /// Weighted degree `k_i`.
    pub fn strength(&self, node: usize) -> f64 {
        self.strength[node]
    }

    /// Total edge weight `m`.
    pub fn total_weight(&self) -> f64 {
        self.total / 2.0
    }

    /// Modularity of `partition` at the given resolution. 0 for an edgeless
    /// graph.
    pub fn modularity(&self, partition: &[usize], resolution: f64) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        let n_groups = partition.iter().max().map_or(0, |&c| c + 1);
        let mut inside = vec![0.0; n_groups];
        let mut tot = vec![0.0; n_groups];
        for i in 0..self.n_nodes() {
            let c = partition[i];
            tot[c] += self.strength[i];
            inside[c] += self.self_loops[i];
            for &(j, w) in &self.adjacency[i] {
                if partition[j] == c {
                    inside[c] += w;
                }
            }
        }
        inside
            .iter()
            .zip(&tot)
            .map(|(&a, &t)| a - resolution * t * t / self.total)
            .sum::<f64>()
            / self.total
    }

    /// Connected component of every node; components are numbered in order
    /// of their smallest node.
    pub fn connected_components(&self) -> Vec<usize> {
        let n = self.n_nodes();
        let mut component = vec![usize::MAX; n];
        let mut next = 0;
        let mut queue = VecDeque::new();
        for start in 0..n {
            if component[start] != usize::MAX {
                continue;
            }
            component[start] = next;
            queue.push_back(start);
            while let Some(v) = queue.pop_front() {
                for &(u, _) in &self.adjacency[v] {
                    if component[u] == usize::MAX {
                        component[u] = next;
                        queue.push_back(u);
                    }
                }
            }
            next += 1;
        }
        component
    }

    /// Collapse each group of `groups` (ids `0..n_groups`) into one node.
    fn aggregate(&self, groups: &[usize], n_groups: usize) -> Graph {
        let mut rows: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n_groups];
        let mut self_loops = vec![0.0; n_groups];
        for i in 0..self.n_nodes() {
            let gi = groups[i];
            self_loops[gi] += self.self_loops[i];
            for &(j, w) in &self.adjacency[i] {
                let gj = groups[j];
                if gi == gj {
                    self_loops[gi] += w;
                } else {
                    *rows[gi].entry(gj).or_insert(0.0) += w;
                }
            }
        }
        let adjacency = rows.into_iter().map(|r| r.into_iter().collect()).collect();
        Graph::from_parts(adjacency, self_loops)
    }
}

/// Relabel to `0..n` in order of first appearance; returns `n`.
fn renumber(partition: &mut [usize]) -> usize {
    let mut map = vec![usize::MAX; partition.len().max(1)];
    let mut next = 0;
    for c in partition.iter_mut() {
        if *c >= map.len() {
            map.resize(*c + 1, usize::MAX);
        }
        if map[*c] == usize::MAX {
            map[*c] = next;
            next += 1;
        }
        *c = map[*c];
    }
    next
}

/// Scratch space for summing edge weight per neighboring community.
struct NeighborWeights {
    weight: Vec<f64>,
    seen: Vec<bool>,
    touched: Vec<usize>,
}

impl NeighborWeights {
    fn new(n: usize) -> Self {
        Self {
            weight: vec![0.0; n],
            seen: vec![false; n],
            touched: Vec::new(),
        }
    }

    fn add(&mut self, c: usize, w: f64) {
        if !self.seen[c] {
            self.seen[c] = true;
            self.touched.push(c);
        }
        self.weight[c] += w;
    }

    fn clear(&mut self) {
        for &c in &self.touched {
            self.weight[c] = 0.0;
            self.seen[c] = false;
        }
        self.touched.clear();
    }
}

/// Repeated sweeps in random order, moving each node to the neighboring
/// community with the largest modularity gain, until no move improves.
///
/// With `constraint`, nodes only join communities of neighbors that share
/// their constraint group. Returns whether any node moved.
fn local_moving(
    g: &Graph,
    comm: &mut [usize],
    resolution: f64,
    constraint: Option<&[usize]>,
    rng: &mut Xorshift64,
) -> bool {
    let n = g.n_nodes();
    let mut tot = vec![0.0; n];
    for i in 0..n {
        tot[comm[i]] += g.strength[i];
    }
    let mut order: Vec<usize> = (0..n).collect();
    rng.shuffle(&mut order);
    let mut nw = NeighborWeights::new(n);
    let mut any = false;

    loop {
        let mut moved = false;
        for &i in &order {
            let ki = g.strength[i];
            let current = comm[i];
            for &(j, w) in &g.adjacency[i] {
                if constraint.is_some_and(|c| c[j] != c[i]) {
                    continue;
                }
                nw.add(comm[j], w);
            }
            tot[current] -= ki;

            let gain = |c: usize| nw.weight[c] - resolution * ki * tot[c] / g.total;
            let mut best = current;
            let mut best_gain = gain(current);
            for &c in &nw.touched {
                let gc = gain(c);
                if gc > best_gain + GAIN_EPS {
                    best = c;
                    best_gain = gc;
                }
            }

            tot[best] += ki;
            comm[i] = best;
            nw.clear();
            if best != current {
                moved = true;
                any = true;
            }
        }
        if !moved {
            break;
        }
    }
    any
}

/// Leiden's queue-based local moving. Nodes may also move to an empty
/// community; neighbors of a moved node are revisited.
fn fast_local_moving(g: &Graph, comm: &mut [usize], resolution: f64, rng: &mut Xorshift64) {
    let n = g.n_nodes();
    let mut tot = vec![0.0; n];
    let mut size = vec![0usize; n];
    for i in 0..n {
        tot[comm[i]] += g.strength[i];
        size[comm[i]] += 1;
    }
    let mut empty: Vec<usize> = (0..n).filter(|&c| size[c] == 0).collect();

    let mut order: Vec<usize> = (0..n).collect();
    rng.shuffle(&mut order);
    let mut queue: VecDeque<usize> = order.into();
    let mut queued = vec![true; n];
    let mut nw = NeighborWeights::new(n);

    while let Some(i) = queue.pop_front() {
        queued[i] = false;
        let ki = g.strength[i];
        let current = comm[i];
        for &(j, w) in &g.adjacency[i] {
            nw.add(comm[j], w);
        }
        tot[current] -= ki;
        size[current] -= 1;
        if size[current] == 0 {
            empty.push(current);
        }

        let gain = |c: usize| nw.weight[c] - resolution * ki * tot[c] / g.total;
        let mut best = current;
        let mut best_gain = gain(current);
        for &c in &nw.touched {
            let gc = gain(c);
            if gc > best_gain + GAIN_EPS {
                best = c;
                best_gain = gc;
            }
        }
        if best_gain < -GAIN_EPS {
            if let Some(&e) = empty.last() {
                best = e;
            }
        }

        if size[best] == 0 {
            if let Some(pos) = empty.iter().rposition(|&c| c == best) {
                empty.swap_remove(pos);
            }
        }
        tot[best] += ki;
        size[best] += 1;
        comm[i] = best;
        nw.clear();

        if best != current {
            for &(j, _) in &g.adjacency[i] {
                if !queued[j] && comm[j] != best {
                    queued[j] = true;
                    queue.push_back(j);
                }
            }
        }
    }
}

/// Leiden refinement: inside each community, singleton nodes that are well
/// connected join a well-connected refined subset chosen at random with
/// probability `∝ exp(ΔQ / randomness)` among non-negative gains.
fn refine(
    g: &Graph,
    comm: &[usize],
    resolution: f64,
    randomness: f64,
    rng: &mut Xorshift64,
) -> Vec<usize> {
    let n = g.n_nodes();
    let mut refined: Vec<usize> = (0..n).collect();
    let mut size = vec![1usize; n];
    let mut tot_ref = g.strength.clone();

    // Weight from each node to the rest of its community.
    let internal: Vec<f64> = (0..n)
        .map(|v| {
            g.adjacency[v]
                .iter()
                .filter(|&&(j, _)| comm[j] == comm[v])
                .map(|&(_, w)| w)
                .sum()
        })
        .collect();
    // Weight from each refined subset to the rest of its community.
    let mut external = internal.clone();

    let mut tot_comm = vec![0.0; n];
    for v in 0..n {
        tot_comm[comm[v]] += g.strength[v];
    }

    let mut order: Vec<usize> = (0..n).collect();
    rng.shuffle(&mut order);
    let mut nw = NeighborWeights::new(n);
    let mut candidates: Vec<(usize, f64)> = Vec::new();

    for &v in &order {
        if size[refined[v]] != 1 {
            continue;
        }
        let kv = g.strength[v];
        let c = comm[v];
        if internal[v] < resolution * kv * (tot_comm[c] - kv) / g.total {
            continue;
        }

        for &(j, w) in &g.adjacency[v] {
            if comm[j] == c {
                nw.add(refined[j], w);
            }
        }
        candidates.clear();
        for &r in &nw.touched {
            if r == refined[v] {
                continue;
            }
            let well_connected =
                external[r] >= resolution * tot_ref[r] * (tot_comm[c] - tot_ref[r]) / g.total;
            let gain = nw.weight[r] - resolution * kv * tot_ref[r] / g.total;
            if well_connected && gain >= 0.0 {
                // ΔQ = gain / m
                candidates.push((r, 2.0 * gain / g.total));
            }
        }

        if !candidates.is_empty() {
            let max_dq = candidates.iter().fold(f64::NEG_INFINITY, |m, &(_, d)| m.max(d));
            let weights: Vec<f64> = candidates
                .iter()
                .map(|&(_, d)| ((d - max_dq) / randomness).exp())
                .collect();
            let total: f64 = weights.iter().sum();
            let mut u = rng.next_f64() * total;
            let mut chosen = candidates[candidates.len() - 1].0;
            for (&(r, _), &w) in candidates.iter().zip(&weights) {
                if u < w {
                    chosen = r;
                    break;
                }
                u -= w;
            }

            let old = refined[v];
            external[chosen] += internal[v] - 2.0 * nw.weight[chosen];
            tot_ref[chosen] += kv;
            size[chosen] += 1;
            size[old] = 0;
            tot_ref[old] = 0.0;
            external[old] = 0.0;
            refined[v] = chosen;
        }
        nw.clear();
    }
    refined
}

/// Optimize modularity from `initial` (or singletons) and return a
/// partition of the nodes with contiguous ids in order of first node.
pub fn optimize_modularity(
    graph: &Graph,
    algorithm: CommunityAlgorithm,
    resolution: f64,
    randomness: f64,
    initial: Option<&[usize]>,
    rng: &mut Xorshift64,
) -> Vec<usize> {
    let n = graph.n_nodes();
    let mut comm: Vec<usize> = match initial {
        Some(p) if p.len() == n => p.to_vec(),
        _ => (0..n).collect(),
    };
    renumber(&mut comm);
    if graph.total <= 0.0 {
        return (0..n).collect();
    }

    let mut level = graph.clone();
    let mut membership: Vec<usize> = (0..n).collect();

    for _ in 0..MAX_LEVELS {
        match algorithm {
            CommunityAlgorithm::Louvain | CommunityAlgorithm::Slm => {
                local_moving(&level, &mut comm, resolution, None, rng);
            }
            CommunityAlgorithm::Leiden => fast_local_moving(&level, &mut comm, resolution, rng),
        }
        let n_comm = renumber(&mut comm);
        if n_comm == level.n_nodes() {
            break;
        }

        let mut groups = match algorithm {
            CommunityAlgorithm::Louvain => comm.clone(),
            CommunityAlgorithm::Leiden => refine(&level, &comm, resolution, randomness, rng),
            CommunityAlgorithm::Slm => {
                let mut sub: Vec<usize> = (0..level.n_nodes()).collect();
                local_moving(&level, &mut sub, resolution, Some(&comm), rng);
                sub
            }
        };
        let mut n_groups = renumber(&mut groups);
        if n_groups == level.n_nodes() {
            // Nothing merged below the community level.
            groups = comm.clone();
            n_groups = n_comm;
        }
        let mut next = vec![0usize; n_groups];
        for v in 0..level.n_nodes() {
            next[groups[v]] = comm[v];
        }

        membership = membership.iter().map(|&x| groups[x]).collect();
        level = level.aggregate(&groups, n_groups);
        comm = next;
    }

    let mut result: Vec<usize> = membership.iter().map(|&x| comm[x]).collect();
    renumber(&mut result);
    result
}
