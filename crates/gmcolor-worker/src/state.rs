//! Per-worker coloring state shared by the round loop and the handlers.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gmcolor_graph::Subgraph;
use gmcolor_net::{NodeConnPool, NodeIndex};
use tracing::info;

use crate::barrier::RoundBarrier;
use crate::coloring::{PartitionColoring, StoredColors};
use crate::config::WorkerConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Registered and holding a subgraph; waiting for the start signal.
    Init,
    /// Coloring rounds in progress.
    Running,
    /// Local work done and every peer reported finished.
    Finished,
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Finished => "finished",
        })
    }
}

/// Everything a worker needs once the handshake completed.
#[derive(Debug)]
pub struct WorkerState {
    index: NodeIndex,
    node_count: u8,
    coloring: PartitionColoring,
    pool: Arc<NodeConnPool>,
    barrier: Arc<RoundBarrier>,
    phase: Mutex<WorkerPhase>,
    rounds: AtomicUsize,
    n_threads: usize,
    round_timeout: Option<Duration>,
}

impl WorkerState {
    /// Build the state for node `index` of `node_count` (server included).
    /// The pool must already be registered as `index`.
    pub fn new(
        index: NodeIndex,
        node_count: u8,
        subgraph: Subgraph,
        stored: Arc<StoredColors>,
        barrier: Arc<RoundBarrier>,
        pool: Arc<NodeConnPool>,
        config: &WorkerConfig,
    ) -> Result<Self> {
        if index == 0 || index >= node_count {
            return Err(Error::Protocol(format!(
                "node index {index} outside 1..{node_count}"
            )));
        }
        let registered = pool.index()?;
        if registered != index {
            return Err(gmcolor_net::Error::Handshake(format!(
                "server assigned index {index}, connections imply {registered}"
            ))
            .into());
        }
        Ok(Self {
            index,
            node_count,
            coloring: PartitionColoring::new(subgraph, stored, config.max_color),
            pool,
            barrier,
            phase: Mutex::new(WorkerPhase::Init),
            rounds: AtomicUsize::new(0),
            n_threads: config.n_threads,
            round_timeout: config.round_timeout,
        })
    }

    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// Nodes in the run, server included.
    pub fn node_count(&self) -> u8 {
        self.node_count
    }

    /// Every other worker.
    pub fn peers(&self) -> Vec<NodeIndex> {
        (1..self.node_count).filter(|&i| i != self.index).collect()
    }

    pub fn coloring(&self) -> &PartitionColoring {
        &self.coloring
    }

    pub fn pool(&self) -> &Arc<NodeConnPool> {
        &self.pool
    }

    pub fn barrier(&self) -> &RoundBarrier {
        &self.barrier
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    pub fn round_timeout(&self) -> Option<Duration> {
        self.round_timeout
    }

    pub fn phase(&self) -> WorkerPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, from: WorkerPhase, to: WorkerPhase) -> Result<()> {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *phase != from {
            return Err(Error::Protocol(format!(
                "cannot move to {to} while {}",
                *phase
            )));
        }
        *phase = to;
        info!(node = self.index, phase = %to, "phase change");
        Ok(())
    }

    /// The start signal arrived.
    pub fn start(&self) -> Result<()> {
        self.transition(WorkerPhase::Init, WorkerPhase::Running)
    }

    /// No local work is left and every peer reported finished.
    pub fn finish(&self) -> Result<()> {
        self.transition(WorkerPhase::Running, WorkerPhase::Finished)
    }

    /// Rounds executed so far.
    pub fn rounds(&self) -> usize {
        self.rounds.load(Ordering::Acquire)
    }

    pub(crate) fn set_rounds(&self, rounds: usize) {
        self.rounds.store(rounds, Ordering::Release);
    }

    /// Validate owned vertices against local and stored colors.
    pub fn check_valid_coloring(&self) -> bool {
        self.coloring.check_valid_coloring()
    }

    pub fn edge_vertices(&self) -> &[bool] {
        self.coloring.edge_vertices()
    }

    /// The owned subgraph with its current colors.
    pub fn colored_subgraph(&self) -> Subgraph {
        self.coloring.colored_subgraph()
    }
}
