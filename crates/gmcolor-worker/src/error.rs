//! Error types for the distributed coloring nodes.

use std::time::Duration;

use gmcolor_net::NodeIndex;
use thiserror::Error;

/// Result type for worker and server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end a coloring run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("graph error: {0}")]
    Graph(#[from] gmcolor_graph::GraphError),

    /// The color budget is too small for some vertex.
    #[error("coloring error: {0}")]
    Coloring(#[from] gmcolor_color::ColoringError),

    #[error("network error: {0}")]
    Net(#[from] gmcolor_net::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A compute task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Peers did not reach the barrier in time.
    #[error("round {round}: nodes {waiting:?} did not report within {timeout:?}")]
    RoundTimeout {
        round: usize,
        waiting: Vec<NodeIndex>,
        timeout: Duration,
    },

    /// A peer went away before it finished.
    #[error("node {index} disconnected before finishing: {reason}")]
    PeerDisconnected { index: NodeIndex, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// A message arrived that the current phase cannot accept.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The final coloring failed validation.
    #[error("invalid coloring: {0}")]
    InvalidColoring(String),
}
