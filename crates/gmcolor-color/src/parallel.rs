//! Shared-memory Gebremedhin-Manne coloring.
//!
//! Every round colors the pending set `U` speculatively in parallel, then
//! checks `U` for conflicts. Of two adjacent vertices that ended with the
//! same color the higher-indexed one is queued for the next round. The set
//! of settled vertices only grows, so the loop terminates.
//!
//! Two granularities are provided:
//! - [`color_parallel_gm`]: one task per vertex.
//! - [`color_parallel_gm_chunked`]: `U` split into `n_threads` contiguous
//!   chunks, one task per chunk, with the pending buffers reused across
//!   rounds.

use gmcolor_graph::{Color, Graph, VertexId};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{ColoringError, Result};
use crate::first_fit::{chunk_size, yields, AtomicColors, FirstFit};

/// Outcome of a parallel run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColoringReport {
    /// Speculate/detect rounds executed.
    pub rounds: usize,
}

fn color_vertex(
    graph: &Graph,
    colors: &AtomicColors,
    ff: &mut FirstFit,
    v: VertexId,
) -> Result<()> {
    let adj = &graph.vertices[v as usize].adj;
    match ff.pick(adj.iter().map(|&j| colors.load(j as usize))) {
        Some(c) => {
            colors.store(v as usize, c);
            Ok(())
        }
        None => Err(ColoringError::BudgetExceeded {
            vertex: v,
            max_color: ff.max_color(),
        }),
    }
}

fn has_conflict(graph: &Graph, colors: &AtomicColors, v: VertexId) -> bool {
    let own = colors.load(v as usize);
    graph.vertices[v as usize]
        .adj
        .iter()
        .any(|&j| colors.load(j as usize) == own && yields(v, j))
}

/// GM coloring with one task per vertex.
pub fn color_parallel_gm(graph: &mut Graph, max_color: Color) -> Result<ColoringReport> {
    let colors = AtomicColors::from_graph(graph);
    let mut u: Vec<VertexId> = (0..graph.len() as VertexId).collect();
    let mut rounds = 0;

    while !u.is_empty() {
        rounds += 1;
        debug!(round = rounds, pending = u.len(), "speculative round");

        let g = &*graph;
        u.par_iter()
            .with_max_len(1)
            .try_for_each(|&v| color_vertex(g, &colors, &mut FirstFit::new(max_color), v))?;

        u = u
            .par_iter()
            .with_max_len(1)
            .copied()
            .filter(|&v| has_conflict(g, &colors, v))
            .collect();
    }

    colors.write_back(graph);
    Ok(ColoringReport { rounds })
}

/// GM coloring with `n_threads` chunk tasks per round.
///
/// Runs on the current rayon pool; wrap in `ThreadPool::install` to bound
/// the number of OS threads.
pub fn color_parallel_gm_chunked(
    graph: &mut Graph,
    max_color: Color,
    n_threads: usize,
) -> Result<ColoringReport> {
    let colors = AtomicColors::from_graph(graph);
    let mut u: Vec<VertexId> = (0..graph.len() as VertexId).collect();
    let mut r: Vec<VertexId> = Vec::with_capacity(u.len() / 10);
    let mut rounds = 0;

    while !u.is_empty() {
        rounds += 1;
        let per_chunk = chunk_size(u.len(), n_threads);
        debug!(round = rounds, pending = u.len(), per_chunk, "speculative round");

        let g = &*graph;
        u.par_chunks(per_chunk).try_for_each(|chunk| {
            let mut ff = FirstFit::new(max_color);
            chunk
                .iter()
                .try_for_each(|&v| color_vertex(g, &colors, &mut ff, v))
        })?;

        r.clear();
        let shared = &colors;
        r.par_extend(u.par_chunks(per_chunk).flat_map_iter(|chunk| {
            chunk
                .iter()
                .copied()
                .filter(move |&v| has_conflict(g, shared, v))
        }));
        std::mem::swap(&mut u, &mut r);
    }

    colors.write_back(graph);
    Ok(ColoringReport { rounds })
}
