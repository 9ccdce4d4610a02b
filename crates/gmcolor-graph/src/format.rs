//! Text graph format.
//!
//! ```text
//! 3
//! 0;1,2
//! 1;0
//! -1;0
//! ```
//!
//! Line 1 is the vertex count. Every following line is
//! `<color>;<comma-separated neighbor indices>`; an empty adjacency list is
//! allowed and `-1` stands for an uncolored vertex. The same text is the
//! payload of the `SUBGRAPH` wire message, where neighbor indices are global
//! and may exceed the local vertex count.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::{GraphError, Result};
use crate::graph::{Color, Graph, Vertex, VertexId, UNCOLORED};

/// Parse a complete graph; every neighbor index must be a local vertex.
pub fn parse(text: &str) -> Result<Graph> {
    let (graph, line_of) = parse_numbered(text)?;
    let len = graph.len();
    for (v, &line) in graph.vertices.iter().zip(&line_of) {
        if let Some(&bad) = v.adj.iter().find(|&&j| j as usize >= len) {
            return Err(GraphError::Parse {
                line,
                reason: format!("neighbor {bad} out of range for {len} vertices"),
            });
        }
    }
    Ok(graph)
}

/// Parse without range-checking neighbor indices (subgraph payloads).
pub fn parse_lines(text: &str) -> Result<Graph> {
    parse_numbered(text).map(|(graph, _)| graph)
}

/// Parse, also returning the 1-based source line of each vertex.
fn parse_numbered(text: &str) -> Result<(Graph, Vec<usize>)> {
    let mut lines = text.lines().enumerate();

    let count = match lines.next() {
        Some((_, header)) => header.trim().parse::<usize>().map_err(|e| GraphError::Parse {
            line: 1,
            reason: format!("invalid vertex count {header:?}: {e}"),
        })?,
        None => {
            return Err(GraphError::Parse {
                line: 1,
                reason: "missing vertex count".into(),
            })
        }
    };

    let mut vertices = Vec::with_capacity(count);
    let mut line_of = Vec::with_capacity(count);
    for (idx, line) in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if vertices.len() == count {
            return Err(GraphError::Parse {
                line: idx + 1,
                reason: format!("more than {count} vertex lines"),
            });
        }
        vertices.push(parse_vertex(line, idx + 1)?);
        line_of.push(idx + 1);
    }

    if vertices.len() != count {
        return Err(GraphError::Parse {
            line: count + 1,
            reason: format!("expected {count} vertex lines, found {}", vertices.len()),
        });
    }

    Ok((Graph { vertices }, line_of))
}

fn parse_vertex(line: &str, lineno: usize) -> Result<Vertex> {
    let (color, adj) = line.split_once(';').ok_or_else(|| GraphError::Parse {
        line: lineno,
        reason: "missing ';' separator".into(),
    })?;

    let color = match color.trim() {
        "-1" => UNCOLORED,
        c => c.parse::<Color>().map_err(|e| GraphError::Parse {
            line: lineno,
            reason: format!("invalid color {c:?}: {e}"),
        })?,
    };

    let adj = adj
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<VertexId>().map_err(|e| GraphError::Parse {
                line: lineno,
                reason: format!("invalid neighbor {s:?}: {e}"),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Vertex { color, adj })
}

/// Serialize a graph to the text format.
pub fn dump(graph: &Graph) -> String {
    let mut out = String::with_capacity(graph.len() * 8);
    let _ = writeln!(out, "{}", graph.len());
    for v in &graph.vertices {
        if v.is_colored() {
            let _ = write!(out, "{};", v.color);
        } else {
            out.push_str("-1;");
        }
        for (k, j) in v.adj.iter().enumerate() {
            if k > 0 {
                out.push(',');
            }
            let _ = write!(out, "{j}");
        }
        out.push('\n');
    }
    out
}

/// Load a graph file.
pub fn read_file(path: impl AsRef<Path>) -> Result<Graph> {
    parse(&fs::read_to_string(path)?)
}

/// Write a graph file.
pub fn write_file(path: impl AsRef<Path>, graph: &Graph) -> Result<()> {
    fs::write(path, dump(graph))?;
    Ok(())
}
