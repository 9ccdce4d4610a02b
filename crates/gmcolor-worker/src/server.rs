//! Server driver: partition, hand out identities, start, collect.

use std::collections::BTreeSet;
use std::net::SocketAddrV4;
use std::sync::Arc;

use gmcolor_color::{color_parallel_gm, color_parallel_gm_chunked, color_sequential};
use gmcolor_graph::{assembled_colors, format, partition, Color, Graph, Subgraph, MAX_WORKERS};
use gmcolor_net::{
    attach_tcp, ConnEvent, IndexCount, MessageType, NodeConnPool, NodeIndex, PeerAddress,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error, info, Instrument};

use crate::config::{LocalAlgorithm, ServerConfig};
use crate::error::{Error, Result};
use crate::handlers::{server_table, ServerEvent};

/// What a server run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The input graph with the final colors.
    pub graph: Graph,
    pub colors_used: usize,
    /// Rounds of the parallel local algorithms; `None` when not applicable.
    pub rounds: Option<usize>,
}

/// Color `graph` on the given workers and return it with the collected
/// colors.
///
/// Workers are numbered in list order starting at 1. Every worker
/// connection is closed on return.
pub async fn run_distributed(
    workers: &[SocketAddrV4],
    graph: &Graph,
    max_color: Color,
) -> Result<Graph> {
    if workers.is_empty() || workers.len() > MAX_WORKERS {
        return Err(Error::Config(format!(
            "{} workers, expected 1..={MAX_WORKERS}",
            workers.len()
        )));
    }
    let pool = NodeConnPool::new();
    let span = tracing::info_span!("node", index = 0);
    let result = orchestrate(&pool, workers, graph, max_color)
        .instrument(span)
        .await;
    pool.close_all().await;
    result
}

struct Inbox {
    events: UnboundedReceiver<ServerEvent>,
    conn_events: UnboundedReceiver<ConnEvent>,
}

enum Next {
    Event(ServerEvent),
    Lost(ConnEvent),
}

impl Inbox {
    async fn next(&mut self) -> Result<Next> {
        tokio::select! {
            biased;
            event = self.events.recv() => event
                .map(Next::Event)
                .ok_or_else(|| Error::Protocol("server events ended".into())),
            Some(event) = self.conn_events.recv() => Ok(Next::Lost(event)),
        }
    }
}

fn lost(event: ConnEvent, phase: &str) -> Error {
    let index = event.index().unwrap_or(NodeIndex::MAX);
    let reason = match event {
        ConnEvent::Closed { label, .. } => format!("{label} closed {phase}"),
        ConnEvent::Failed { label, error, .. } => format!("{label} failed {phase}: {error}"),
    };
    Error::PeerDisconnected { index, reason }
}

fn check_worker(index: NodeIndex, workers: usize) -> Result<usize> {
    match index as usize {
        i @ 1.. if i <= workers => Ok(i - 1),
        _ => Err(Error::Protocol(format!(
            "message from unknown node {index}"
        ))),
    }
}

async fn orchestrate(
    pool: &NodeConnPool,
    workers: &[SocketAddrV4],
    graph: &Graph,
    max_color: Color,
) -> Result<Graph> {
    let parts = partition(graph, workers.len())?;
    let (event_tx, events) = mpsc::unbounded_channel();
    let (conn_tx, conn_events) = mpsc::unbounded_channel();
    let table = Arc::new(server_table(event_tx));
    let mut inbox = Inbox {
        events,
        conn_events,
    };

    for (k, addr) in workers.iter().enumerate() {
        let index = (k + 1) as NodeIndex;
        let stream = TcpStream::connect(addr).await?;
        let (conn, _reader) = attach_tcp(stream, Arc::clone(&table), conn_tx.clone())?;
        conn.set_index(index)?;
        pool.add_unregistered(conn);
        debug!(worker = index, %addr, "connected");
    }
    drop(conn_tx);
    pool.register_as(0)?;

    let count = u8::try_from(workers.len() + 1).map_err(|_| {
        Error::Config(format!("{} workers overflow the node count", workers.len()))
    })?;
    for index in 1..count {
        let identity = IndexCount { index, count };
        pool.send(index, MessageType::NodeIndexCount, &identity.encode())
            .await?;
        for higher in index + 1..count {
            let peer = PeerAddress {
                index: higher,
                addr: workers[higher as usize - 1],
            };
            pool.send(index, MessageType::NodeAddress, &peer.encode())
                .await?;
        }
    }
    for (k, part) in parts.iter().enumerate() {
        let index = (k + 1) as NodeIndex;
        let conn = pool.get(index).ok_or_else(|| Error::PeerDisconnected {
            index,
            reason: "connection lost before the partition was sent".into(),
        })?;
        conn.send_subgraph(&part.to_payload()).await?;
    }
    info!(workers = workers.len(), vertices = graph.len(), "partitions sent");

    let mut acked = BTreeSet::new();
    while acked.len() < workers.len() {
        match inbox.next().await? {
            Next::Event(ServerEvent::Ack(index)) => {
                check_worker(index, workers.len())?;
                acked.insert(index);
            }
            Next::Event(other) => {
                return Err(Error::Protocol(format!("{other:?} before start")));
            }
            Next::Lost(event) => return Err(lost(event, "during handshake")),
        }
    }
    pool.broadcast_workers(MessageType::BeginColoring, &[]).await?;
    info!("coloring started");

    let results = collect(&mut inbox, workers.len()).await?;
    let mut colored = graph.clone();
    colored.set_colors(&assembled_colors(&results, graph.len()));
    if let Some((a, b)) = colored.first_conflict() {
        return Err(Error::InvalidColoring(format!(
            "vertices {a} and {b} share color {}",
            colored.vertices[a as usize].color
        )));
    }
    if let Some(v) = colored.vertices.iter().position(|v| v.color >= max_color) {
        return Err(Error::InvalidColoring(format!(
            "vertex {v} has color {} outside the budget of {max_color}",
            colored.vertices[v].color
        )));
    }
    info!(colors = colored.color_count(), "coloring collected");
    Ok(colored)
}

/// Wait for every worker's finish report and colored partition.
async fn collect(inbox: &mut Inbox, workers: usize) -> Result<Vec<Subgraph>> {
    let mut finished = BTreeSet::new();
    let mut results: Vec<Option<Subgraph>> = vec![None; workers];

    while finished.len() < workers || results.iter().any(Option::is_none) {
        match inbox.next().await? {
            Next::Event(ServerEvent::Finished(index)) => {
                check_worker(index, workers)?;
                finished.insert(index);
            }
            Next::Event(ServerEvent::Result { index, text }) => {
                let slot = check_worker(index, workers)?;
                debug!(worker = index, bytes = text.len(), "result received");
                results[slot] = Some(Subgraph::from_payload(index, &text)?);
            }
            Next::Event(ServerEvent::Ack(index)) => {
                return Err(Error::Protocol(format!("late acknowledgement from {index}")));
            }
            // A worker hangs up once it is done; that is only a failure
            // before its result arrived.
            Next::Lost(event) => match event.index() {
                Some(i) if i >= 1 && results.get(i as usize - 1).is_some_and(Option::is_some) => {
                    debug!(worker = i, "worker disconnected after reporting");
                }
                _ => return Err(lost(event, "while coloring")),
            },
        }
    }
    Ok(results.into_iter().flatten().collect())
}

/// Color in-process with one of the shared-memory algorithms.
///
/// Returns the number of rounds for the parallel algorithms.
pub fn run_local(
    graph: &mut Graph,
    algorithm: LocalAlgorithm,
    max_color: Color,
    n_threads: usize,
) -> Result<Option<usize>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("gm-local-{i}"))
        .build()
        .map_err(|e| Error::Config(format!("cannot build compute pool: {e}")))?;
    info!(%algorithm, threads = n_threads, vertices = graph.len(), "coloring locally");

    let rounds = pool.install(|| -> Result<Option<usize>> {
        Ok(match algorithm {
            LocalAlgorithm::Sequential => {
                color_sequential(graph, max_color)?;
                None
            }
            LocalAlgorithm::Parallel => Some(color_parallel_gm(graph, max_color)?.rounds),
            LocalAlgorithm::ParallelChunked => {
                Some(color_parallel_gm_chunked(graph, max_color, n_threads)?.rounds)
            }
        })
    })?;
    if !graph.check_valid_coloring() {
        return Err(Error::InvalidColoring(format!(
            "{algorithm} produced a conflict at {:?}",
            graph.first_conflict()
        )));
    }
    Ok(rounds)
}

/// Load the configured graph, color it, and write the output file if one
/// is configured.
pub async fn run_server(config: &ServerConfig) -> Result<RunSummary> {
    config.validate()?;
    let mut graph = format::read_file(&config.graph_path)?;
    info!(
        path = %config.graph_path.display(),
        vertices = graph.len(),
        edges = graph.edge_count(),
        max_degree = graph.max_degree(),
        "graph loaded"
    );

    let rounds = match config.local {
        Some(algorithm) => {
            let (max_color, n_threads) = (config.max_color, config.n_threads);
            let (colored, rounds) = tokio::task::spawn_blocking(move || {
                let rounds = run_local(&mut graph, algorithm, max_color, n_threads);
                (graph, rounds)
            })
            .await?;
            graph = colored;
            rounds?
        }
        None => {
            graph = run_distributed(&config.workers, &graph, config.max_color)
                .await
                .inspect_err(|e| error!(error = %e, "distributed run failed"))?;
            None
        }
    };

    if let Some(path) = &config.output_path {
        format::write_file(path, &graph)?;
        info!(path = %path.display(), "colored graph written");
    }
    let colors_used = graph.color_count();
    info!(colors = colors_used, ?rounds, "done");
    Ok(RunSummary {
        graph,
        colors_used,
        rounds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmcolor_graph::generate;

    #[test]
    fn local_algorithms_agree_on_validity() {
        for algorithm in [
            LocalAlgorithm::Sequential,
            LocalAlgorithm::Parallel,
            LocalAlgorithm::ParallelChunked,
        ] {
            let mut graph = generate::random_seeded(300, 8.0, 5);
            let rounds = run_local(&mut graph, algorithm, 64, 4).unwrap();
            assert!(graph.check_valid_coloring(), "{algorithm}");
            assert_eq!(rounds.is_some(), algorithm != LocalAlgorithm::Sequential);
        }
    }

    #[test]
    fn local_budget_is_enforced() {
        let mut graph = generate::complete(6);
        assert!(matches!(
            run_local(&mut graph, LocalAlgorithm::Sequential, 5, 1),
            Err(Error::Coloring(_))
        ));
    }

    #[test]
    fn worker_indices_are_checked() {
        assert_eq!(check_worker(1, 3).unwrap(), 0);
        assert_eq!(check_worker(3, 3).unwrap(), 2);
        assert!(check_worker(0, 3).is_err());
        assert!(check_worker(4, 3).is_err());
    }

    #[tokio::test]
    async fn worker_count_must_fit_one_byte() {
        let graph = generate::ring(4);
        let addr: SocketAddrV4 = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(
            run_distributed(&vec![addr; MAX_WORKERS + 1], &graph, 8).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn empty_worker_list_is_rejected() {
        let graph = generate::ring(4);
        assert!(matches!(
            run_distributed(&[], &graph, 8).await,
            Err(Error::Config(_))
        ));
    }
}
