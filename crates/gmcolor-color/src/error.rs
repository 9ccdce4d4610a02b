//! Error types for gmcolor-color.

use gmcolor_graph::{Color, VertexId};
use thiserror::Error;

/// Result type for coloring operations.
pub type Result<T> = std::result::Result<T, ColoringError>;

/// Errors that can occur while coloring.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColoringError {
    /// Every color below `max_color` is taken by a neighbor of `vertex`.
    ///
    /// The caller chose too small a budget; `max_color` must be at least the
    /// maximum degree plus one for every variant to succeed.
    #[error("color budget {max_color} exceeded at vertex {vertex}")]
    BudgetExceeded { vertex: VertexId, max_color: Color },
}
