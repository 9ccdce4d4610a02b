//! Graph generators used by the drivers, tests and benchmarks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::graph::{Graph, VertexId};

/// Complete graph: every pair of vertices is adjacent.
pub fn complete(n: usize) -> Graph {
    let mut g = Graph::new(n);
    for i in 1..n {
        for j in 0..i {
            link(&mut g, i, j);
        }
    }
    g
}

/// Cycle graph: every vertex has exactly two neighbors (one edge for `n == 2`).
pub fn ring(n: usize) -> Graph {
    let mut g = Graph::new(n);
    for i in 0..n.saturating_sub(1) {
        link(&mut g, i, i + 1);
    }
    if n > 2 {
        link(&mut g, 0, n - 1);
    }
    g
}

/// Random graph with average branching factor `bf`.
///
/// Each of the `n(n-1)/2` possible edges is present with probability
/// `bf / (n - 1)`.
pub fn random(n: usize, bf: f32) -> Graph {
    random_with(n, bf, &mut rand::thread_rng())
}

/// Deterministic variant of [`random`].
pub fn random_seeded(n: usize, bf: f32, seed: u64) -> Graph {
    random_with(n, bf, &mut StdRng::seed_from_u64(seed))
}

fn random_with<R: Rng>(n: usize, bf: f32, rng: &mut R) -> Graph {
    let mut g = Graph::new(n);
    if n < 2 {
        return g;
    }
    let p_edge = bf / (n - 1) as f32;
    for i in 1..n {
        for j in 0..i {
            if rng.gen::<f32>() < p_edge {
                link(&mut g, i, j);
            }
        }
    }
    g
}

fn link(g: &mut Graph, a: usize, b: usize) {
    g.vertices[a].adj.push(b as VertexId);
    g.vertices[b].adj.push(a as VertexId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_graph_degrees() {
        let g = complete(6);
        assert!(g.vertices.iter().all(|v| v.degree() == 5));
        assert_eq!(g.edge_count(), 15);
    }

    #[test]
    fn ring_degrees() {
        assert!(ring(7).vertices.iter().all(|v| v.degree() == 2));
        assert_eq!(ring(2).edge_count(), 1);
        assert_eq!(ring(1).edge_count(), 0);
    }

    #[test]
    fn random_branching_factor_is_close() {
        let n = 800;
        let bf = 20.0;
        let g = random_seeded(n, bf, 7);
        let actual = (2 * g.edge_count()) as f32 / n as f32;
        assert!((actual - bf).abs() < 0.2 * bf, "branching factor {actual}");
        assert!(g.is_symmetric());
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        assert_eq!(random_seeded(50, 4.0, 1), random_seeded(50, 4.0, 1));
    }
}
