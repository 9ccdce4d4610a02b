//! Worker node driver.
//!
//! A worker listens for the server and for lower-indexed peers, dials the
//! higher-indexed peers the server announces, and registers its pool once
//! every peer has identified itself. It then acknowledges, waits for the
//! start signal, runs the round loop, and returns its colored partition to
//! the server.

use std::net::SocketAddr;
use std::sync::Arc;

use gmcolor_graph::Subgraph;
use gmcolor_net::{
    attach_tcp, ConnEvent, DispatchTable, EventSender, IndexCount, MessageType, NodeConnPool,
    NodeIndex, PeerAddress,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn, Instrument};

use crate::barrier::RoundBarrier;
use crate::coloring::StoredColors;
use crate::config::WorkerConfig;
use crate::engine::{await_peers, run_rounds};
use crate::error::{Error, Result};
use crate::handlers::{worker_table, WorkerEvent};
use crate::state::WorkerState;

/// Outcome of a worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub index: NodeIndex,
    pub rounds: usize,
    /// Vertices in this worker's partition, padding included.
    pub owned: usize,
    /// Owned vertices with a neighbor on another worker.
    pub boundary: usize,
    pub colors_used: usize,
}

/// A bound worker, ready to accept the server.
#[derive(Debug)]
pub struct Worker {
    config: WorkerConfig,
    listener: TcpListener,
}

impl Worker {
    pub async fn bind(config: WorkerConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen).await?;
        info!(addr = %listener.local_addr()?, threads = config.n_threads, "worker listening");
        Ok(Self { config, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve one coloring run.
    ///
    /// Every connection is closed on return, so a failure here surfaces as a
    /// lost peer everywhere else.
    pub async fn run(self) -> Result<WorkerReport> {
        let pool = Arc::new(NodeConnPool::new());
        let span = tracing::info_span!("node", index = tracing::field::Empty);
        let result = drive(self.config, self.listener, Arc::clone(&pool))
            .instrument(span)
            .await;
        if let Err(e) = &result {
            error!(error = %e, "worker run failed");
        }
        pool.close_all().await;
        result
    }
}

struct Channels {
    table: Arc<DispatchTable>,
    conn_tx: EventSender,
    events: UnboundedReceiver<WorkerEvent>,
    conn_events: UnboundedReceiver<ConnEvent>,
}

async fn drive(
    config: WorkerConfig,
    listener: TcpListener,
    pool: Arc<NodeConnPool>,
) -> Result<WorkerReport> {
    let stored = Arc::new(StoredColors::new());
    let barrier = Arc::new(RoundBarrier::new());
    let (event_tx, events) = mpsc::unbounded_channel();
    let (conn_tx, conn_events) = mpsc::unbounded_channel();
    let table = Arc::new(worker_table(
        Arc::clone(&stored),
        Arc::clone(&barrier),
        event_tx.clone(),
    ));
    let mut channels = Channels {
        table,
        conn_tx,
        events,
        conn_events,
    };

    let acceptor = tokio::spawn(
        accept_loop(
            listener,
            Arc::clone(&channels.table),
            channels.conn_tx.clone(),
            Arc::clone(&pool),
            event_tx,
        )
        .in_current_span(),
    );
    let handshake = handshake(&pool, &mut channels).await;
    acceptor.abort();
    let (identity, text) = handshake?;

    let subgraph = Subgraph::from_payload(identity.index, &text)?;
    let state = Arc::new(WorkerState::new(
        identity.index,
        identity.count,
        subgraph,
        stored,
        Arc::clone(&barrier),
        Arc::clone(&pool),
        &config,
    )?);
    pool.send(0, MessageType::Ack, &[identity.index]).await?;
    debug!("acknowledged partition");

    let Channels {
        conn_tx,
        mut events,
        mut conn_events,
        ..
    } = channels;
    drop(conn_tx);
    wait_for_begin(&mut events, &mut conn_events).await?;
    state.start()?;

    let monitor = tokio::spawn(watch_connections(conn_events, barrier).in_current_span());
    let outcome = color_and_report(&state).await;
    monitor.abort();
    outcome?;

    let coloring = state.coloring();
    let colored = state.colored_subgraph();
    Ok(WorkerReport {
        index: state.index(),
        rounds: state.rounds(),
        owned: coloring.len(),
        boundary: coloring.edge_vertices().iter().filter(|&&b| b).count(),
        colors_used: colored.graph.color_count(),
    })
}

async fn color_and_report(state: &Arc<WorkerState>) -> Result<()> {
    run_rounds(Arc::clone(state)).await?;

    let server = state.pool().get(0).ok_or_else(|| Error::PeerDisconnected {
        index: 0,
        reason: "server connection lost before the result was sent".into(),
    })?;
    server
        .send_subgraph(&state.colored_subgraph().to_payload())
        .await?;

    await_peers(state).await?;
    if !state.check_valid_coloring() {
        return Err(Error::InvalidColoring(format!(
            "partition of node {} has a conflict or an unreported boundary color",
            state.index()
        )));
    }
    info!(rounds = state.rounds(), "worker finished");
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    table: Arc<DispatchTable>,
    conn_tx: EventSender,
    pool: Arc<NodeConnPool>,
    events: UnboundedSender<WorkerEvent>,
) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "accepted connection");
                stream
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                return;
            }
        };
        match attach_tcp(stream, Arc::clone(&table), conn_tx.clone()) {
            Ok((conn, _reader)) => pool.add_unregistered(conn),
            Err(e) => {
                warn!(error = %e, "dropping accepted connection");
                continue;
            }
        }
        if events.send(WorkerEvent::Accepted).is_err() {
            return;
        }
    }
}

fn lost(event: ConnEvent) -> Error {
    match event {
        ConnEvent::Failed { error, .. } => error.into(),
        ConnEvent::Closed { label, index } => Error::PeerDisconnected {
            index: index.unwrap_or(NodeIndex::MAX),
            reason: format!("{label} closed during handshake"),
        },
    }
}

/// Collect identity, dial higher peers and wait until the pool can register.
async fn handshake(
    pool: &NodeConnPool,
    channels: &mut Channels,
) -> Result<(IndexCount, String)> {
    let mut identity: Option<IndexCount> = None;
    let mut subgraph: Option<String> = None;

    loop {
        tokio::select! {
            biased;
            event = channels.events.recv() => {
                let Some(event) = event else {
                    return Err(Error::Protocol("handshake events ended".into()));
                };
                match event {
                    WorkerEvent::Identity(id) => {
                        if identity.is_some() {
                            return Err(Error::Protocol("identity assigned twice".into()));
                        }
                        if id.index == 0 || id.index >= id.count {
                            return Err(Error::Protocol(format!(
                                "assigned index {} outside 1..{}",
                                id.index, id.count
                            )));
                        }
                        tracing::Span::current().record("index", id.index);
                        info!(count = id.count, "identity received");
                        identity = Some(id);
                    }
                    WorkerEvent::Dial(peer) => {
                        let me = identity.ok_or_else(|| {
                            Error::Protocol("peer address before identity".into())
                        })?;
                        dial(pool, channels, me.index, peer).await?;
                    }
                    WorkerEvent::Subgraph(text) => {
                        if subgraph.replace(text).is_some() {
                            return Err(Error::Protocol("partition sent twice".into()));
                        }
                    }
                    WorkerEvent::PeerIdentified(_) | WorkerEvent::Accepted => {}
                    WorkerEvent::BeginColoring => {
                        return Err(Error::Protocol("start signal before handshake completed".into()));
                    }
                }
            }
            Some(event) = channels.conn_events.recv() => return Err(lost(event)),
        }

        let Some(id) = identity else { continue };
        let expected = id.count as usize - 1;
        let connected = pool.unregistered_len();
        if connected > expected {
            return Err(Error::Protocol(format!(
                "{connected} connections for {expected} expected peers"
            )));
        }
        if subgraph.is_some() && connected == expected && pool.identified_len() == expected {
            let index = pool.register()?;
            if index != id.index {
                return Err(gmcolor_net::Error::Handshake(format!(
                    "server assigned index {}, connections imply {index}",
                    id.index
                ))
                .into());
            }
            let text = subgraph.take().unwrap_or_default();
            info!(peers = expected, "pool registered");
            return Ok((id, text));
        }
    }
}

async fn dial(
    pool: &NodeConnPool,
    channels: &Channels,
    me: NodeIndex,
    peer: PeerAddress,
) -> Result<()> {
    if peer.index <= me {
        return Err(Error::Protocol(format!(
            "asked to dial lower node {} from {me}",
            peer.index
        )));
    }
    let stream = TcpStream::connect(peer.addr).await?;
    let (conn, _reader) = attach_tcp(stream, Arc::clone(&channels.table), channels.conn_tx.clone())?;
    conn.set_index(peer.index)?;
    conn.write_frame(MessageType::DialerIndex, &[me], false).await?;
    debug!(peer = peer.index, addr = %peer.addr, "dialed peer");
    pool.add_unregistered(conn);
    Ok(())
}

async fn wait_for_begin(
    events: &mut UnboundedReceiver<WorkerEvent>,
    conn_events: &mut UnboundedReceiver<ConnEvent>,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(WorkerEvent::BeginColoring) => return Ok(()),
                Some(WorkerEvent::PeerIdentified(_) | WorkerEvent::Accepted) => {}
                Some(other) => {
                    return Err(Error::Protocol(format!("unexpected {other:?} after handshake")));
                }
                None => return Err(Error::Protocol("start signal never arrived".into())),
            },
            Some(event) = conn_events.recv() => return Err(lost(event)),
        }
    }
}

/// Turn lost worker connections into barrier failures.
async fn watch_connections(mut events: UnboundedReceiver<ConnEvent>, barrier: Arc<RoundBarrier>) {
    while let Some(event) = events.recv().await {
        match event.index() {
            Some(0) | None => warn!(?event, "server connection ended"),
            Some(peer) => {
                let reason = match &event {
                    ConnEvent::Closed { .. } => "connection closed".to_string(),
                    ConnEvent::Failed { error, .. } => error.to_string(),
                };
                barrier.peer_lost(peer, reason);
            }
        }
    }
}
