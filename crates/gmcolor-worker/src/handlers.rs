//! Dispatch tables for worker and server connections.
//!
//! Handlers run on the connection's reader task, so they only record state
//! or forward an event to the driver; they never block.

use std::sync::Arc;

use gmcolor_net::{
    decode_index, DispatchTable, IndexCount, MessageType, NodeIndex, PeerAddress, VertexInfo,
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::barrier::RoundBarrier;
use crate::coloring::StoredColors;

/// Handshake progress reported to the worker driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The server assigned this node's index.
    Identity(IndexCount),
    /// Dial this higher-indexed peer.
    Dial(PeerAddress),
    /// An accepted peer announced its index.
    PeerIdentified(NodeIndex),
    /// The accept loop queued a connection.
    Accepted,
    /// This node's partition, in the graph text format.
    Subgraph(String),
    BeginColoring,
}

/// Events the server driver waits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Ack(NodeIndex),
    Finished(NodeIndex),
    /// A worker's colored partition.
    Result { index: NodeIndex, text: String },
}

fn forward<E>(tx: &mpsc::UnboundedSender<E>, event: E) -> gmcolor_net::Result<()> {
    tx.send(event)
        .map_err(|_| gmcolor_net::Error::Protocol("node driver is gone".into()))
}

fn subgraph_text(payload: &[u8]) -> gmcolor_net::Result<String> {
    String::from_utf8(payload.to_vec())
        .map_err(|e| gmcolor_net::Error::Protocol(format!("subgraph is not UTF-8: {e}")))
}

/// Handlers for every connection of a worker.
pub fn worker_table(
    stored: Arc<StoredColors>,
    barrier: Arc<RoundBarrier>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> DispatchTable {
    let identity_tx = events.clone();
    let dial_tx = events.clone();
    let dialer_tx = events.clone();
    let subgraph_tx = events.clone();
    let begin_tx = events;
    let finished = Arc::clone(&barrier);

    DispatchTable::new()
        .on(MessageType::NodeIndexCount, move |payload, conn| {
            let identity = IndexCount::decode(payload)?;
            // only the server assigns identities
            conn.set_index(0)?;
            debug!(index = identity.index, count = identity.count, "identity assigned");
            forward(&identity_tx, WorkerEvent::Identity(identity))
        })
        .on(MessageType::NodeAddress, move |payload, _conn| {
            forward(&dial_tx, WorkerEvent::Dial(PeerAddress::decode(payload)?))
        })
        .on(MessageType::DialerIndex, move |payload, conn| {
            let index = decode_index(payload)?;
            conn.set_index(index)?;
            debug!(peer = index, label = conn.label(), "peer identified");
            forward(&dialer_tx, WorkerEvent::PeerIdentified(index))
        })
        .on(MessageType::Subgraph, move |payload, _conn| {
            forward(&subgraph_tx, WorkerEvent::Subgraph(subgraph_text(payload)?))
        })
        .on(MessageType::BeginColoring, move |_payload, _conn| {
            forward(&begin_tx, WorkerEvent::BeginColoring)
        })
        .on(MessageType::VertexInfo, move |payload, _conn| {
            let info = VertexInfo::decode(payload)?;
            trace!(vertex = info.vertex, color = info.color, "stored color");
            stored.set(info.vertex, info.color);
            Ok(())
        })
        .on(MessageType::NodeRoundFinished, move |payload, _conn| {
            barrier.round_finished(decode_index(payload)?);
            Ok(())
        })
        .on(MessageType::NodeFinished, move |payload, _conn| {
            finished.node_finished(decode_index(payload)?);
            Ok(())
        })
}

/// Handlers for the server's worker connections.
pub fn server_table(events: mpsc::UnboundedSender<ServerEvent>) -> DispatchTable {
    let ack_tx = events.clone();
    let finished_tx = events.clone();
    let result_tx = events;

    DispatchTable::new()
        .on(MessageType::Ack, move |payload, _conn| {
            forward(&ack_tx, ServerEvent::Ack(decode_index(payload)?))
        })
        .on(MessageType::NodeFinished, move |payload, _conn| {
            forward(&finished_tx, ServerEvent::Finished(decode_index(payload)?))
        })
        .on(MessageType::Subgraph, move |payload, conn| {
            let index = conn.index().ok_or_else(|| {
                gmcolor_net::Error::Protocol(format!("result from unidentified {}", conn.label()))
            })?;
            forward(
                &result_tx,
                ServerEvent::Result {
                    index,
                    text: subgraph_text(payload)?,
                },
            )
        })
}
