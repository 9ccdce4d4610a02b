//! Contiguous vertex-range partitioning.
//!
//! Worker `k` (1-based, index 0 is the server) owns the half-open range
//! `[(k-1) * per_node, k * per_node)`. Every range has the same length;
//! when the vertex count does not divide evenly the last ranges are padded
//! with isolated placeholder vertices, so ownership is a plain division.

use std::ops::Range;

use crate::error::{GraphError, Result};
use crate::format;
use crate::graph::{Color, Graph, VertexId, UNCOLORED};

/// Largest number of workers whose node count, server included, fits the
/// one-byte count field.
pub const MAX_WORKERS: usize = u8::MAX as usize - 1;

/// Vertex ownership for a graph split across `workers` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioning {
    total: usize,
    workers: usize,
    per_node: usize,
}

impl Partitioning {
    /// Split `total` vertices across `workers` nodes.
    pub fn new(total: usize, workers: usize) -> Result<Self> {
        if workers == 0 || workers > MAX_WORKERS {
            return Err(GraphError::InvalidPartition(format!(
                "worker count {workers} outside 1..={MAX_WORKERS}"
            )));
        }
        let per_node = total.div_ceil(workers).max(1);
        if per_node * workers > VertexId::MAX as usize {
            return Err(GraphError::InvalidPartition(format!(
                "{total} vertices exceed the addressable range"
            )));
        }
        Ok(Self {
            total,
            workers,
            per_node,
        })
    }

    /// Number of real (non-padding) vertices.
    pub const fn total(&self) -> usize {
        self.total
    }

    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Vertices held by every worker, padding included.
    pub const fn per_node(&self) -> usize {
        self.per_node
    }

    /// Vertex count after padding.
    pub const fn padded_total(&self) -> usize {
        self.per_node * self.workers
    }

    /// Global range owned by worker `node` (1-based).
    pub fn range(&self, node: u8) -> Range<VertexId> {
        debug_assert!(node >= 1 && node as usize <= self.workers);
        let begin = (node as usize - 1) * self.per_node;
        begin as VertexId..(begin + self.per_node) as VertexId
    }

    /// Worker index owning global vertex `v`.
    pub fn owner(&self, v: VertexId) -> u8 {
        owner_of(v, self.per_node)
    }
}

/// Worker index owning `v` when every worker holds `per_node` vertices.
pub fn owner_of(v: VertexId, per_node: usize) -> u8 {
    (1 + v as usize / per_node) as u8
}

/// The part of a graph owned by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subgraph {
    /// First owned global index.
    pub begin: VertexId,
    /// Owned vertices; adjacency lists hold global indices.
    pub graph: Graph,
}

impl Subgraph {
    /// One past the last owned global index.
    pub fn end(&self) -> VertexId {
        self.begin + self.graph.len() as VertexId
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Whether global vertex `v` is owned by this subgraph.
    pub fn owns(&self, v: VertexId) -> bool {
        v >= self.begin && v < self.end()
    }

    /// Local array index of owned global vertex `v`.
    pub fn local(&self, v: VertexId) -> usize {
        (v - self.begin) as usize
    }

    /// Global index of local vertex `i`.
    pub fn global(&self, i: usize) -> VertexId {
        self.begin + i as VertexId
    }

    /// For every owned vertex, whether it has a neighbor outside the range.
    pub fn edge_vertices(&self) -> Vec<bool> {
        self.graph
            .vertices
            .iter()
            .map(|v| v.adj.iter().any(|&j| !self.owns(j)))
            .collect()
    }

    /// Serialize for the `SUBGRAPH` wire message.
    pub fn to_payload(&self) -> String {
        format::dump(&self.graph)
    }

    /// Rebuild the subgraph received by worker `node`.
    ///
    /// All partitions have equal length, so the range start follows from the
    /// node index and the received vertex count.
    pub fn from_payload(node: u8, text: &str) -> Result<Self> {
        if node == 0 {
            return Err(GraphError::InvalidPartition(
                "node index 0 is reserved for the server".into(),
            ));
        }
        let graph = format::parse_lines(text)?;
        let begin = (node as usize - 1) * graph.len();
        Ok(Self {
            begin: begin as VertexId,
            graph,
        })
    }
}

/// Split `graph` into one padded subgraph per worker.
pub fn partition(graph: &Graph, workers: usize) -> Result<Vec<Subgraph>> {
    let parts = Partitioning::new(graph.len(), workers)?;
    let subgraphs = (1..=workers as u8)
        .map(|node| {
            let range = parts.range(node);
            let mut sub = Graph::new(parts.per_node());
            for (local, global) in range.clone().enumerate() {
                if let Some(v) = graph.vertices.get(global as usize) {
                    sub.vertices[local] = v.clone();
                }
            }
            Subgraph {
                begin: range.start,
                graph: sub,
            }
        })
        .collect();
    Ok(subgraphs)
}

/// Reassemble the first `total` vertices from subgraphs, dropping padding.
pub fn assemble(parts: &[Subgraph], total: usize) -> Graph {
    let mut graph = Graph::new(total);
    for sub in parts {
        for (i, v) in sub.graph.vertices.iter().enumerate() {
            let global = sub.global(i) as usize;
            if global < total {
                graph.vertices[global] = v.clone();
            }
        }
    }
    graph
}

/// Colors of the first `total` vertices across subgraphs; missing ones stay
/// [`UNCOLORED`].
pub fn assembled_colors(parts: &[Subgraph], total: usize) -> Vec<Color> {
    let mut colors = vec![UNCOLORED; total];
    for sub in parts {
        for (i, v) in sub.graph.vertices.iter().enumerate() {
            if let Some(c) = colors.get_mut(sub.global(i) as usize) {
                *c = v.color;
            }
        }
    }
    colors
}
