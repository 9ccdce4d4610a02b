//! Error types for gmcolor-graph.

use thiserror::Error;

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while building, loading or partitioning graphs.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The text format could not be parsed.
    #[error("parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// An edge references a vertex that does not exist.
    #[error("invalid edge ({from}, {to}) in graph of {len} vertices")]
    InvalidEdge { from: u32, to: u32, len: usize },

    /// A partition request cannot be satisfied.
    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    /// IO error while reading or writing a graph file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
