//! Single-pass sequential coloring.
//!
//! Vertices are processed strictly in index order, so every vertex sees the
//! final color of all earlier neighbors; no conflict detection is needed.
//! This is the correctness oracle for the parallel and distributed variants.

use gmcolor_graph::{Color, Graph};

use crate::error::{ColoringError, Result};
use crate::first_fit::FirstFit;

/// Greedy first-fit coloring in vertex order.
///
/// Neighbors that are still uncolored do not constrain the choice.
pub fn color_sequential(graph: &mut Graph, max_color: Color) -> Result<()> {
    let mut ff = FirstFit::new(max_color);

    for i in 0..graph.vertices.len() {
        let color = {
            let vertices = &graph.vertices;
            ff.pick(vertices[i].adj.iter().map(|&j| vertices[j as usize].color))
        };
        match color {
            Some(c) => graph.vertices[i].color = c,
            None => {
                return Err(ColoringError::BudgetExceeded {
                    vertex: i as u32,
                    max_color,
                })
            }
        }
    }

    Ok(())
}
