//! GM Color graph model
//!
//! Adjacency-list graphs, the line-oriented text format used both on disk and
//! as the `SUBGRAPH` wire payload, and contiguous vertex-range partitioning.
//!
//! # Ownership
//!
//! A graph of `n` vertices split across `w` workers gives every worker
//! `ceil(n / w)` vertices. Worker `k` (1-based) owns the global range
//! `[(k-1) * per_node, k * per_node)`; short partitions are padded with
//! isolated placeholders so ownership of any global index is a division.
//!
//! ```
//! use gmcolor_graph::{generate, partition};
//!
//! let g = generate::ring(10);
//! let parts = partition(&g, 2).unwrap();
//! assert_eq!(parts[1].begin, 5);
//! assert!(parts[1].owns(9));
//! ```

mod error;
mod graph;
pub mod format;
pub mod generate;
mod partition;

pub use error::{GraphError, Result};
pub use graph::{Color, Graph, Vertex, VertexId, UNCOLORED};
pub use partition::{
    assemble, assembled_colors, owner_of, partition, Partitioning, Subgraph, MAX_WORKERS,
};
