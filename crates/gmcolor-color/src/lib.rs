//! GM Color in-process algorithms
//!
//! Greedy first-fit coloring in three flavors that share one first-fit rule
//! and one conflict tie-break:
//!
//! - [`color_sequential`]: single pass in vertex order, the reference oracle
//! - [`color_parallel_gm`]: Gebremedhin-Manne speculation, one task per vertex
//! - [`color_parallel_gm_chunked`]: the same with one task per chunk
//!
//! All variants produce a valid coloring whenever `max_color` is at least the
//! maximum degree plus one, and fail with
//! [`ColoringError::BudgetExceeded`] instead of under-coloring otherwise.
//!
//! ```
//! use gmcolor_color::color_sequential;
//! use gmcolor_graph::generate;
//!
//! let mut g = generate::ring(4);
//! color_sequential(&mut g, 2).unwrap();
//! assert_eq!(g.colors(), vec![0, 1, 0, 1]);
//! ```

mod error;
mod first_fit;
mod parallel;
mod sequential;

pub use error::{ColoringError, Result};
pub use first_fit::{chunk_size, default_threads, yields, AtomicColors, FirstFit};
pub use parallel::{color_parallel_gm, color_parallel_gm_chunked, ColoringReport};
pub use sequential::color_sequential;
