//! Distributed round loop.
//!
//! Each round: speculate on the compute pool, push changed boundary colors
//! to their owners, report the round, wait for every peer's report, then
//! detect conflicts. Colors a peer sends before its report are applied by
//! the connection reader before the report itself, so passing the barrier
//! means every update for the round is in [`StoredColors`].
//!
//! [`StoredColors`]: crate::coloring::StoredColors

use std::sync::Arc;

use gmcolor_graph::VertexId;
use gmcolor_net::{MessageType, VertexInfo};
use rayon::ThreadPool;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::state::WorkerState;

fn compute_pool(n_threads: usize) -> Result<Arc<ThreadPool>> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("gm-color-{i}"))
        .build()
        .map(Arc::new)
        .map_err(|e| Error::Config(format!("cannot build compute pool: {e}")))
}

/// Send this round's boundary updates. Writes stay buffered; the round
/// report that follows flushes them.
async fn push_updates(state: &WorkerState, changed: &[VertexId]) -> Result<()> {
    let batches = state.coloring().updates(changed);
    for (owner, bytes) in batches {
        let Some(conn) = state.pool().get(owner) else {
            if state.barrier().is_finished(owner) {
                continue;
            }
            return Err(Error::PeerDisconnected {
                index: owner,
                reason: "no open connection for boundary update".into(),
            });
        };
        debug!(peer = owner, updates = bytes.len() / (1 + VertexInfo::LEN), "pushing colors");
        conn.write_frame(MessageType::Cont, &bytes, true).await?;
    }
    Ok(())
}

/// Run rounds until no owned vertex is pending, then tell every peer.
///
/// Returns the number of rounds. The state must be `Running`.
pub async fn run_rounds(state: Arc<WorkerState>) -> Result<usize> {
    let pool = compute_pool(state.n_threads())?;
    let peers = state.peers();
    let me = state.index();
    let mut u = state.coloring().owned();
    let mut round = 0;

    while !u.is_empty() {
        round += 1;
        info!(round, pending = u.len(), "round start");

        let (changed, pending) = {
            let state = Arc::clone(&state);
            let pool = Arc::clone(&pool);
            tokio::task::spawn_blocking(move || {
                let changed = pool.install(|| state.coloring().speculate(&u, state.n_threads()));
                (changed, u)
            })
            .await?
        };
        let changed = changed?;
        u = pending;

        push_updates(&state, &changed).await?;
        state
            .pool()
            .broadcast_workers(MessageType::NodeRoundFinished, &[me])
            .await?;
        state
            .barrier()
            .wait_round(round, &peers, state.round_timeout())
            .await?;

        u = {
            let state = Arc::clone(&state);
            let pool = Arc::clone(&pool);
            tokio::task::spawn_blocking(move || {
                pool.install(|| state.coloring().detect(&u, state.n_threads()))
            })
            .await?
        };
        state.set_rounds(round);
        debug!(round, changed = changed.len(), conflicts = u.len(), "round done");
    }

    // the server counts these too
    state
        .pool()
        .broadcast(MessageType::NodeFinished, &[me])
        .await?;
    info!(rounds = round, "local coloring complete");
    Ok(round)
}

/// Wait for every peer to finish, then mark the state finished.
pub async fn await_peers(state: &WorkerState) -> Result<()> {
    state
        .barrier()
        .wait_finished(&state.peers(), state.round_timeout())
        .await?;
    state.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::RoundBarrier;
    use crate::coloring::StoredColors;
    use crate::config::WorkerConfig;
    use crate::handlers::worker_table;
    use crate::state::WorkerPhase;
    use gmcolor_color::ColoringError;
    use gmcolor_graph::{generate, partition, Graph};
    use gmcolor_net::{attach, read_frame, NodeConn, NodeConnPool};
    use tokio::io::{duplex, BufReader, DuplexStream};
    use tokio::sync::mpsc;

    /// A lone worker whose only connection is the server.
    fn lone_worker(graph: &Graph, max_color: u32) -> (Arc<WorkerState>, DuplexStream) {
        let (near, far) = duplex(1024);
        let server = Arc::new(NodeConn::new("server", near));
        server.set_index(0).unwrap();
        let pool = Arc::new(NodeConnPool::new());
        pool.add_unregistered(server);
        pool.register().unwrap();

        let sub = partition(graph, 1).unwrap().remove(0);
        let state = WorkerState::new(
            1,
            2,
            sub,
            Arc::new(StoredColors::new()),
            Arc::new(RoundBarrier::new()),
            pool,
            &WorkerConfig::default().with_threads(4).with_max_color(max_color),
        )
        .unwrap();
        (Arc::new(state), far)
    }

    #[tokio::test]
    async fn single_worker_colors_everything() {
        let (state, server_end) = lone_worker(&generate::random_seeded(400, 10.0, 9), 64);
        state.start().unwrap();
        let rounds = run_rounds(Arc::clone(&state)).await.unwrap();
        await_peers(&state).await.unwrap();

        assert!(rounds >= 1);
        assert_eq!(state.rounds(), rounds);
        assert_eq!(state.phase(), WorkerPhase::Finished);
        assert!(state.check_valid_coloring());

        // the server sees no round traffic, only the finish report
        state.pool().close_all().await;
        let mut reader = BufReader::new(server_end);
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.kind, MessageType::NodeFinished);
        assert_eq!(frame.payload, vec![1]);
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    /// Two workers linked in memory, each with its own server stream.
    fn linked_pair(graph: &Graph, max_color: u32) -> Vec<(Arc<WorkerState>, DuplexStream)> {
        let parts = partition(graph, 2).unwrap();
        let (one_end, two_end) = duplex(64 * 1024);
        let ends = [(1, 2, one_end), (2, 1, two_end)];
        // readers tolerate a dropped event receiver
        let (conn_tx, _) = mpsc::unbounded_channel();

        ends.into_iter()
            .map(|(me, peer, end)| {
                let stored = Arc::new(StoredColors::new());
                let barrier = Arc::new(RoundBarrier::new());
                let (events_tx, _) = mpsc::unbounded_channel();
                let table = worker_table(Arc::clone(&stored), Arc::clone(&barrier), events_tx);
                let (read, write) = tokio::io::split(end);
                let (link, _reader) =
                    attach(format!("peer-{peer}"), read, write, Arc::new(table), conn_tx.clone());
                link.set_index(peer).unwrap();

                let (near, far) = duplex(1024);
                let server = Arc::new(NodeConn::new("server", near));
                server.set_index(0).unwrap();
                let pool = Arc::new(NodeConnPool::new());
                pool.add_unregistered(server);
                pool.add_unregistered(link);
                assert_eq!(pool.register().unwrap(), me);

                let state = WorkerState::new(
                    me,
                    3,
                    parts[me as usize - 1].clone(),
                    stored,
                    barrier,
                    pool,
                    &WorkerConfig::default().with_threads(2).with_max_color(max_color),
                )
                .unwrap();
                (Arc::new(state), far)
            })
            .collect()
    }

    #[tokio::test]
    async fn server_gets_one_finish_report_per_worker() {
        let mut g = Graph::new(10);
        for v in (0..4).chain(5..9) {
            g.add_undirected_edge(v, v + 1).unwrap();
        }
        g.add_undirected_edge(4, 5).unwrap();
        let nodes = linked_pair(&g, 3);
        for (state, _) in &nodes {
            state.start().unwrap();
        }

        let (one, two) = tokio::join!(
            run_rounds(Arc::clone(&nodes[0].0)),
            run_rounds(Arc::clone(&nodes[1].0))
        );
        one.unwrap();
        two.unwrap();
        for (state, _) in &nodes {
            await_peers(state).await.unwrap();
            assert!(state.check_valid_coloring());
        }

        for (state, server_end) in nodes {
            state.pool().close_all().await;
            let mut reader = BufReader::new(server_end);
            let frame = read_frame(&mut reader).await.unwrap().unwrap();
            assert_eq!(frame.kind, MessageType::NodeFinished);
            assert_eq!(frame.payload, vec![state.index()]);
            assert!(read_frame(&mut reader).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn budget_exceeded_is_fatal() {
        let (state, _server_end) = lone_worker(&generate::complete(5), 3);
        state.start().unwrap();
        assert!(matches!(
            run_rounds(state).await,
            Err(Error::Coloring(ColoringError::BudgetExceeded { max_color: 3, .. }))
        ));
    }
}
