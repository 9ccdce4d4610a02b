//! Speculative coloring of one partition.
//!
//! Owned colors live in an atomic array written by the round's chunk
//! workers. Colors of neighbors owned by other nodes come from
//! [`StoredColors`], which only the connection readers write.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use gmcolor_color::{chunk_size, yields, AtomicColors, ColoringError, FirstFit};
use gmcolor_graph::{owner_of, Color, Subgraph, VertexId, UNCOLORED};
use gmcolor_net::{NodeIndex, VertexInfo};
use rayon::prelude::*;

/// Last reported colors of vertices owned by other nodes.
#[derive(Debug, Default)]
pub struct StoredColors(RwLock<HashMap<VertexId, Color>>);

impl StoredColors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, vertex: VertexId, color: Color) {
        self.0
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(vertex, color);
    }

    pub fn get(&self, vertex: VertexId) -> Option<Color> {
        self.read().get(&vertex).copied()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<VertexId, Color>> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// One node's partition with its colors.
#[derive(Debug)]
pub struct PartitionColoring {
    subgraph: Subgraph,
    colors: AtomicColors,
    stored: Arc<StoredColors>,
    edge: Vec<bool>,
    max_color: Color,
}

impl PartitionColoring {
    /// Colors carried by `subgraph` are discarded; every vertex starts
    /// uncolored so its first color is always reported.
    pub fn new(subgraph: Subgraph, stored: Arc<StoredColors>, max_color: Color) -> Self {
        let colors = AtomicColors::from_colors(std::iter::repeat(UNCOLORED).take(subgraph.len()));
        let edge = subgraph.edge_vertices();
        Self {
            subgraph,
            colors,
            stored,
            edge,
            max_color,
        }
    }

    pub fn begin(&self) -> VertexId {
        self.subgraph.begin
    }

    pub fn len(&self) -> usize {
        self.subgraph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subgraph.is_empty()
    }

    pub fn max_color(&self) -> Color {
        self.max_color
    }

    /// Every owned vertex, in global index order.
    pub fn owned(&self) -> Vec<VertexId> {
        (self.subgraph.begin..self.subgraph.end()).collect()
    }

    /// Owned vertices with at least one neighbor on another node.
    pub fn edge_vertices(&self) -> &[bool] {
        &self.edge
    }

    /// Current color of an owned vertex.
    pub fn color(&self, v: VertexId) -> Color {
        self.colors.load(self.subgraph.local(v))
    }

    /// Node owning global vertex `v`.
    pub fn owner(&self, v: VertexId) -> NodeIndex {
        owner_of(v, self.subgraph.len())
    }

    fn neighbor_color(&self, j: VertexId, stored: Option<&HashMap<VertexId, Color>>) -> Color {
        if self.subgraph.owns(j) {
            return self.colors.load(self.subgraph.local(j));
        }
        stored
            .and_then(|s| s.get(&j).copied())
            .unwrap_or(UNCOLORED)
    }

    /// Run `f` with the stored colors locked only if local vertex `i` has
    /// boundary neighbors.
    fn with_neighbors<T>(
        &self,
        i: usize,
        f: impl FnOnce(Option<&HashMap<VertexId, Color>>) -> T,
    ) -> T {
        if self.edge[i] {
            f(Some(&*self.stored.read()))
        } else {
            f(None)
        }
    }

    /// First-fit every vertex of `u` in `n_threads` chunks.
    ///
    /// Returns the boundary vertices whose color changed; their owners on
    /// other nodes must be told.
    pub fn speculate(
        &self,
        u: &[VertexId],
        n_threads: usize,
    ) -> Result<Vec<VertexId>, ColoringError> {
        let per_chunk = chunk_size(u.len(), n_threads);
        let changed = u
            .par_chunks(per_chunk)
            .map(|chunk| {
                let mut ff = FirstFit::new(self.max_color);
                let mut changed = Vec::new();
                for &v in chunk {
                    let i = self.subgraph.local(v);
                    let adj = &self.subgraph.graph.vertices[i].adj;
                    let picked = self.with_neighbors(i, |stored| {
                        ff.pick(adj.iter().map(|&j| self.neighbor_color(j, stored)))
                    });
                    let color = picked.ok_or(ColoringError::BudgetExceeded {
                        vertex: v,
                        max_color: self.max_color,
                    })?;
                    if self.colors.load(i) != color {
                        self.colors.store(i, color);
                        if self.edge[i] {
                            changed.push(v);
                        }
                    }
                }
                Ok(changed)
            })
            .collect::<Result<Vec<Vec<VertexId>>, ColoringError>>()?;
        Ok(changed.concat())
    }

    /// Vertices of `u` that must recolor: those sharing a color with a
    /// lower-indexed neighbor.
    pub fn detect(&self, u: &[VertexId], n_threads: usize) -> Vec<VertexId> {
        let per_chunk = chunk_size(u.len(), n_threads);
        u.par_chunks(per_chunk)
            .flat_map_iter(|chunk| {
                chunk
                    .iter()
                    .copied()
                    .filter(move |&v| self.has_conflict(v))
            })
            .collect()
    }

    fn has_conflict(&self, v: VertexId) -> bool {
        let i = self.subgraph.local(v);
        let own = self.colors.load(i);
        let adj = &self.subgraph.graph.vertices[i].adj;
        self.with_neighbors(i, |stored| {
            adj.iter()
                .any(|&j| yields(v, j) && self.neighbor_color(j, stored) == own)
        })
    }

    /// `VERTEX_INFO` frames for `changed`, batched per owning node. A vertex
    /// is sent once to each distinct owner among its neighbors.
    pub fn updates(&self, changed: &[VertexId]) -> BTreeMap<NodeIndex, Vec<u8>> {
        let mut batches: BTreeMap<NodeIndex, Vec<u8>> = BTreeMap::new();
        let mut owners = Vec::new();
        for &v in changed {
            let i = self.subgraph.local(v);
            let info = VertexInfo {
                color: self.colors.load(i),
                vertex: v,
            };
            owners.clear();
            owners.extend(
                self.subgraph.graph.vertices[i]
                    .adj
                    .iter()
                    .filter(|&&j| !self.subgraph.owns(j))
                    .map(|&j| self.owner(j)),
            );
            owners.sort_unstable();
            owners.dedup();
            for &owner in &owners {
                info.append_frame(batches.entry(owner).or_default());
            }
        }
        batches
    }

    /// Every owned vertex is colored within budget and differs from every
    /// neighbor, boundary neighbors included. A boundary neighbor whose
    /// color was never reported fails the check.
    pub fn check_valid_coloring(&self) -> bool {
        let stored = self.stored.read();
        (0..self.subgraph.len()).all(|i| {
            let own = self.colors.load(i);
            own < self.max_color
                && self.subgraph.graph.vertices[i].adj.iter().all(|&j| {
                    if self.subgraph.owns(j) {
                        self.colors.load(self.subgraph.local(j)) != own
                    } else {
                        stored.get(&j).is_some_and(|&c| c != own)
                    }
                })
        })
    }

    /// The partition with its current colors.
    pub fn colored_subgraph(&self) -> Subgraph {
        let mut sub = self.subgraph.clone();
        self.colors.write_back(&mut sub.graph);
        sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmcolor_graph::{generate, partition, Graph};
    use proptest::prelude::*;

    /// Nodes of a partitioned graph, each with its own stored colors.
    fn nodes(graph: &Graph, workers: usize, max_color: Color) -> Vec<PartitionColoring> {
        partition(graph, workers)
            .unwrap()
            .into_iter()
            .map(|sub| PartitionColoring::new(sub, Arc::new(StoredColors::new()), max_color))
            .collect()
    }

    /// Lockstep rounds with updates delivered in memory. Returns the
    /// number of rounds until every node is idle.
    fn run_lockstep(nodes: &[PartitionColoring], threads: usize) -> Result<usize, ColoringError> {
        let mut pending: Vec<Vec<VertexId>> = nodes.iter().map(|n| n.owned()).collect();
        let mut rounds = 0;
        while pending.iter().any(|u| !u.is_empty()) {
            rounds += 1;
            let mut outgoing = Vec::new();
            for (node, u) in nodes.iter().zip(&pending) {
                let changed = node.speculate(u, threads)?;
                outgoing.push(node.updates(&changed));
            }
            for batches in outgoing {
                for (owner, bytes) in batches {
                    for frame in bytes.chunks(1 + VertexInfo::LEN) {
                        let info = VertexInfo::decode(&frame[1..]).unwrap();
                        nodes[owner as usize - 1].stored.set(info.vertex, info.color);
                    }
                }
            }
            for (node, u) in nodes.iter().zip(pending.iter_mut()) {
                *u = node.detect(u, threads);
            }
        }
        Ok(rounds)
    }

    #[test]
    fn boundary_edge_is_resolved() {
        // two paths 0-4 and 5-9 joined by the single edge 4-5
        let mut g = Graph::new(10);
        for v in (0..4).chain(5..9) {
            g.add_undirected_edge(v, v + 1).unwrap();
        }
        g.add_undirected_edge(4, 5).unwrap();

        let nodes = nodes(&g, 2, 3);
        assert!(nodes.iter().all(|n| n.len() == 5));
        assert_eq!(nodes[0].edge_vertices(), &[false, false, false, false, true]);
        assert_eq!(nodes[1].edge_vertices(), &[true, false, false, false, false]);

        // both ends of the boundary edge start with color 0; 5 yields
        let rounds = run_lockstep(&nodes, 1).unwrap();
        assert_eq!(rounds, 2);
        assert!(nodes.iter().all(PartitionColoring::check_valid_coloring));
        assert_eq!(nodes[0].color(4), 0);
        assert_eq!(nodes[1].color(5), 2);
    }

    #[test]
    fn updates_are_sent_once_per_owner() {
        let g = generate::complete(6);
        let nodes = nodes(&g, 3, 6);
        let changed = nodes[0].speculate(&nodes[0].owned(), 1).unwrap();
        assert_eq!(changed, vec![0, 1]);
        let batches = nodes[0].updates(&changed);
        assert_eq!(batches.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
        for bytes in batches.values() {
            assert_eq!(bytes.len(), 2 * (1 + VertexInfo::LEN));
        }
    }

    #[test]
    fn unchanged_colors_are_not_reported() {
        let g = generate::ring(4);
        let nodes = nodes(&g, 2, 2);
        let u = nodes[0].owned();
        assert_eq!(nodes[0].speculate(&u, 1).unwrap().len(), 2);
        assert!(nodes[0].speculate(&u, 1).unwrap().is_empty());
    }

    #[test]
    fn unreported_boundary_neighbor_is_invalid() {
        let g = generate::ring(4);
        let nodes = nodes(&g, 2, 2);
        nodes[0].speculate(&nodes[0].owned(), 1).unwrap();
        assert!(!nodes[0].check_valid_coloring());
    }

    #[test]
    fn budget_exceeded_names_vertex() {
        let g = generate::complete(4);
        let nodes = nodes(&g, 2, 2);
        nodes[1].stored.set(0, 0);
        nodes[1].stored.set(1, 1);
        assert_eq!(
            nodes[1].speculate(&[2], 1),
            Err(ColoringError::BudgetExceeded {
                vertex: 2,
                max_color: 2
            })
        );
    }

    #[test]
    fn colored_subgraph_carries_colors() {
        let g = generate::ring(6);
        let nodes = nodes(&g, 2, 3);
        run_lockstep(&nodes, 1).unwrap();
        let sub = nodes[1].colored_subgraph();
        assert_eq!(sub.begin, 3);
        assert!(sub.graph.vertices.iter().all(|v| v.color < 3));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        // Uneven splits pad the last partitions with isolated vertices;
        // the higher-index tie-break must still converge to a valid coloring.
        #[test]
        fn padded_partitions_converge(
            n in 1usize..120,
            workers in 1usize..9,
            bf in 0.0f32..8.0,
            threads in 1usize..4,
            seed in any::<u64>(),
        ) {
            let g = generate::random_seeded(n, bf, seed);
            let max = g.max_degree() as Color + 1;
            let nodes = nodes(&g, workers, max);
            let rounds = run_lockstep(&nodes, threads).unwrap();
            prop_assert!(rounds <= n + 1);
            prop_assert!(nodes.iter().all(PartitionColoring::check_valid_coloring));
        }
    }
}
