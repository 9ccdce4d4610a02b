//! Building blocks shared by every coloring variant.

use std::sync::atomic::{AtomicU32, Ordering};

use gmcolor_graph::{Color, Graph, VertexId};

/// Reusable scratch for the first-fit rule: the smallest color not used by
/// any neighbor in the current snapshot.
#[derive(Debug, Clone)]
pub struct FirstFit {
    used: Vec<bool>,
}

impl FirstFit {
    /// Scratch for colors `0..max_color`.
    pub fn new(max_color: Color) -> Self {
        Self {
            used: vec![false; max_color as usize],
        }
    }

    pub fn max_color(&self) -> Color {
        self.used.len() as Color
    }

    /// Smallest color in `0..max_color` absent from `neighbor_colors`.
    ///
    /// Colors outside the budget, including the uncolored sentinel, forbid
    /// nothing. Returns `None` when the whole budget is taken.
    pub fn pick<I>(&mut self, neighbor_colors: I) -> Option<Color>
    where
        I: IntoIterator<Item = Color>,
    {
        self.used.fill(false);
        for c in neighbor_colors {
            if let Some(slot) = self.used.get_mut(c as usize) {
                *slot = true;
            }
        }
        self.used.iter().position(|used| !used).map(|c| c as Color)
    }
}

/// Conflict tie-break: of two adjacent same-colored vertices the one with
/// the higher global index recolors.
#[inline]
pub const fn yields(vertex: VertexId, neighbor: VertexId) -> bool {
    vertex > neighbor
}

/// Vertex colors shared between concurrent workers.
///
/// Speculative coloring reads neighbors while other workers write them;
/// relaxed atomics make those races defined. A fork/join boundary between
/// phases orders the writes before the next phase reads them.
#[derive(Debug)]
pub struct AtomicColors(Vec<AtomicU32>);

impl AtomicColors {
    pub fn from_colors(colors: impl IntoIterator<Item = Color>) -> Self {
        Self(colors.into_iter().map(AtomicU32::new).collect())
    }

    /// Snapshot of a graph's current colors.
    pub fn from_graph(graph: &Graph) -> Self {
        Self::from_colors(graph.vertices.iter().map(|v| v.color))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn load(&self, i: usize) -> Color {
        self.0[i].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store(&self, i: usize, color: Color) {
        self.0[i].store(color, Ordering::Relaxed);
    }

    /// Plain copy of every color.
    pub fn to_vec(&self) -> Vec<Color> {
        self.0.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    /// Write the colors back into `graph`.
    pub fn write_back(&self, graph: &mut Graph) {
        for (v, c) in graph.vertices.iter_mut().zip(&self.0) {
            v.color = c.load(Ordering::Relaxed);
        }
    }
}

/// Split `len` items into `parts` contiguous chunks; returns the chunk size.
pub fn chunk_size(len: usize, parts: usize) -> usize {
    len.div_ceil(parts.max(1)).max(1)
}

/// Default worker count: twice the available cores.
pub fn default_threads() -> usize {
    2 * std::thread::available_parallelism().map_or(1, |n| n.get())
}
