//! Vertex-indexed adjacency graph.
//!
//! Vertices are addressed by their index in [`Graph::vertices`]. Adjacency
//! lists hold global vertex indices; for a [`crate::Subgraph`] these may point
//! outside the locally stored range.

use crate::error::{GraphError, Result};

/// A vertex color. [`UNCOLORED`] marks a vertex that has not been assigned yet.
pub type Color = u32;

/// Global vertex index.
pub type VertexId = u32;

/// Sentinel for a vertex without a color. Never forbids a color for its neighbors.
pub const UNCOLORED: Color = Color::MAX;

/// A single vertex: its current color and the global indices of its neighbors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    /// Current color, or [`UNCOLORED`].
    pub color: Color,
    /// Neighbor indices (order irrelevant).
    pub adj: Vec<VertexId>,
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            color: UNCOLORED,
            adj: Vec::new(),
        }
    }
}

impl Vertex {
    /// Whether this vertex has been assigned a color.
    pub const fn is_colored(&self) -> bool {
        self.color != UNCOLORED
    }

    /// Number of neighbors.
    pub fn degree(&self) -> usize {
        self.adj.len()
    }
}

/// Undirected graph stored as adjacency lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    pub vertices: Vec<Vertex>,
}

impl Graph {
    /// Create a graph of `len` isolated, uncolored vertices.
    pub fn new(len: usize) -> Self {
        Self {
            vertices: vec![Vertex::default(); len],
        }
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Append an isolated vertex with the given color and return its index.
    pub fn add_vertex(&mut self, color: Color) -> VertexId {
        self.vertices.push(Vertex {
            color,
            adj: Vec::new(),
        });
        (self.vertices.len() - 1) as VertexId
    }

    /// Add an undirected edge. Duplicate edges are not detected.
    pub fn add_undirected_edge(&mut self, a: VertexId, b: VertexId) -> Result<()> {
        let len = self.vertices.len();
        if a as usize >= len || b as usize >= len {
            return Err(GraphError::InvalidEdge { from: a, to: b, len });
        }
        self.vertices[a as usize].adj.push(b);
        self.vertices[b as usize].adj.push(a);
        Ok(())
    }

    /// Number of undirected edges (each edge is stored twice).
    pub fn edge_count(&self) -> usize {
        self.vertices.iter().map(Vertex::degree).sum::<usize>() / 2
    }

    /// Largest vertex degree, 0 for an empty graph.
    pub fn max_degree(&self) -> usize {
        self.vertices.iter().map(Vertex::degree).max().unwrap_or(0)
    }

    /// Current colors in vertex order.
    pub fn colors(&self) -> Vec<Color> {
        self.vertices.iter().map(|v| v.color).collect()
    }

    /// Overwrite every vertex color.
    ///
    /// # Panics
    ///
    /// Panics if `colors` does not have one entry per vertex.
    pub fn set_colors(&mut self, colors: &[Color]) {
        assert_eq!(colors.len(), self.vertices.len(), "one color per vertex");
        for (v, &c) in self.vertices.iter_mut().zip(colors) {
            v.color = c;
        }
    }

    /// Reset every vertex to [`UNCOLORED`].
    pub fn clear_colors(&mut self) {
        for v in &mut self.vertices {
            v.color = UNCOLORED;
        }
    }

    /// Number of distinct colors in use (uncolored vertices are not counted).
    pub fn color_count(&self) -> usize {
        let mut used: Vec<Color> = self
            .vertices
            .iter()
            .filter(|v| v.is_colored())
            .map(|v| v.color)
            .collect();
        used.sort_unstable();
        used.dedup();
        used.len()
    }

    /// Whether adjacency is symmetric: `b ∈ adj(a)` iff `a ∈ adj(b)`.
    pub fn is_symmetric(&self) -> bool {
        self.vertices.iter().enumerate().all(|(a, v)| {
            v.adj.iter().all(|&b| {
                self.vertices
                    .get(b as usize)
                    .is_some_and(|w| w.adj.contains(&(a as VertexId)))
            })
        })
    }

    /// First pair of adjacent vertices sharing a color, or an uncolored vertex
    /// paired with itself.
    pub fn first_conflict(&self) -> Option<(VertexId, VertexId)> {
        for (i, v) in self.vertices.iter().enumerate() {
            let i = i as VertexId;
            if !v.is_colored() {
                return Some((i, i));
            }
            for &j in &v.adj {
                if self.vertices[j as usize].color == v.color {
                    return Some((i, j));
                }
            }
        }
        None
    }

    /// Whether every vertex is colored and no edge joins two equal colors.
    pub fn check_valid_coloring(&self) -> bool {
        self.first_conflict().is_none()
    }
}
