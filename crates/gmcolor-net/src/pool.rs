//! Connection registry addressed by node index.
//!
//! Connections arrive in any order (accepts race dials), so the pool starts
//! as an unordered list. Once every connection announced its peer index,
//! [`NodeConnPool::register`] reorders them into slots where slot `i` is
//! node `i` and the single unfilled slot is this node.

use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tracing::{debug, info, warn};

use crate::conn::NodeConn;
use crate::error::{Error, Result};
use crate::message::{MessageType, NodeIndex};

/// State of one registered slot.
#[derive(Debug, Clone)]
pub enum Slot {
    Active(Arc<NodeConn>),
    /// Removed, or failed on write.
    Closed,
    /// No connection was ever made to this index.
    NeverConnected,
    /// This node.
    Local,
}

impl Slot {
    fn open_conn(&self) -> Option<&Arc<NodeConn>> {
        match self {
            Slot::Active(conn) if conn.is_open() => Some(conn),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct NodeConnPool {
    unregistered: Mutex<Vec<Arc<NodeConn>>>,
    slots: RwLock<Vec<Slot>>,
    own: OnceLock<NodeIndex>,
}

impl NodeConnPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection whose peer index may not be known yet.
    pub fn add_unregistered(&self, conn: Arc<NodeConn>) {
        debug!(peer = %conn.label(), "connection added");
        lock(&self.unregistered).push(conn);
    }

    /// Number of connections waiting for registration.
    pub fn unregistered_len(&self) -> usize {
        lock(&self.unregistered).len()
    }

    /// Connections waiting for registration that already announced an index.
    pub fn identified_len(&self) -> usize {
        lock(&self.unregistered)
            .iter()
            .filter(|c| c.index().is_some())
            .count()
    }

    /// Reorder into index-addressed slots and infer this node's index.
    ///
    /// With a connection to the server (index 0) the slots are
    /// `0..=len`; in a worker-only mesh they are `1..=len + 1`. Either way
    /// exactly one slot must remain free, and it becomes [`Slot::Local`].
    pub fn register(&self) -> Result<NodeIndex> {
        let conns = std::mem::take(&mut *lock(&self.unregistered));
        let with_server = conns.iter().any(|c| c.index() == Some(0));
        self.install(conns, if with_server { 0 } else { 1 })
    }

    /// Register with a known own index (the server registers as 0).
    pub fn register_as(&self, own: NodeIndex) -> Result<NodeIndex> {
        let conns = std::mem::take(&mut *lock(&self.unregistered));
        let first = if own == 0 || conns.iter().any(|c| c.index() == Some(0)) {
            0
        } else {
            1
        };
        let index = self.install(conns, first)?;
        if index != own {
            return Err(Error::Handshake(format!(
                "expected to register as node {own}, free slot is {index}"
            )));
        }
        Ok(index)
    }

    fn install(&self, conns: Vec<Arc<NodeConn>>, first: usize) -> Result<NodeIndex> {
        if self.own.get().is_some() {
            return Err(Error::Handshake("pool registered twice".into()));
        }
        let peers = conns.len();
        let last = first + peers;
        if last > NodeIndex::MAX as usize {
            return Err(Error::Handshake(format!(
                "{} connections exceed the node index range",
                conns.len()
            )));
        }

        let mut slots = vec![Slot::NeverConnected; last + 1];
        for conn in conns {
            let index = conn.index().ok_or_else(|| {
                Error::Handshake(format!("{} never announced its index", conn.label()))
            })? as usize;
            if index < first || index > last {
                return Err(Error::Handshake(format!(
                    "{} announced index {index} outside {first}..={last}",
                    conn.label()
                )));
            }
            if let Slot::Active(other) = &slots[index] {
                return Err(Error::Handshake(format!(
                    "{} and {} both announced index {index}",
                    other.label(),
                    conn.label()
                )));
            }
            slots[index] = Slot::Active(conn);
        }

        let free: Vec<usize> = (first..=last)
            .filter(|&i| matches!(slots[i], Slot::NeverConnected))
            .collect();
        let &[own] = free.as_slice() else {
            return Err(Error::Handshake(format!(
                "expected exactly one unfilled slot, found {}",
                free.len()
            )));
        };
        slots[own] = Slot::Local;
        let own = own as NodeIndex;

        *self.slots.write().unwrap_or_else(|e| e.into_inner()) = slots;
        // install runs once; the guard above rejects a second call
        let _ = self.own.set(own);
        info!(index = own, peers, "connection pool registered");
        Ok(own)
    }

    pub fn is_registered(&self) -> bool {
        self.own.get().is_some()
    }

    /// This node's index.
    pub fn index(&self) -> Result<NodeIndex> {
        self.own.get().copied().ok_or(Error::Unregistered)
    }

    /// Number of slots, this node and never-connected slots included.
    pub fn len(&self) -> usize {
        self.read_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of one slot.
    pub fn slot(&self, index: NodeIndex) -> Option<Slot> {
        self.read_slots().get(index as usize).cloned()
    }

    /// Open connection to node `index`.
    pub fn get(&self, index: NodeIndex) -> Option<Arc<NodeConn>> {
        self.read_slots()
            .get(index as usize)
            .and_then(Slot::open_conn)
            .cloned()
    }

    /// Indices of open peer workers (server excluded).
    pub fn active_workers(&self) -> Vec<NodeIndex> {
        self.open_peers()
            .into_iter()
            .map(|(i, _)| i)
            .filter(|&i| i != 0)
            .collect()
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, Vec<Slot>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn open_peers(&self) -> Vec<(NodeIndex, Arc<NodeConn>)> {
        self.read_slots()
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.open_conn().map(|c| (i as NodeIndex, Arc::clone(c))))
            .collect()
    }

    fn mark_closed(&self, index: NodeIndex) {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get_mut(index as usize) {
            if matches!(slot, Slot::Active(_)) {
                *slot = Slot::Closed;
            }
        }
    }

    /// Unicast one frame, flushed.
    pub async fn send(&self, index: NodeIndex, kind: MessageType, payload: &[u8]) -> Result<()> {
        self.index()?;
        let conn = self
            .get(index)
            .ok_or_else(|| Error::Closed(format!("node {index}")))?;
        let result = conn.write_frame(kind, payload, false).await;
        if result.is_err() {
            self.mark_closed(index);
        }
        result
    }

    /// Send to every open peer, server included.
    pub async fn broadcast(&self, kind: MessageType, payload: &[u8]) -> Result<()> {
        self.broadcast_filtered(kind, payload, |_| true).await
    }

    /// Send to every open peer worker.
    pub async fn broadcast_workers(&self, kind: MessageType, payload: &[u8]) -> Result<()> {
        self.broadcast_filtered(kind, payload, |i| i != 0).await
    }

    /// Every target is attempted; the first failure is returned afterwards.
    async fn broadcast_filtered(
        &self,
        kind: MessageType,
        payload: &[u8],
        include: impl Fn(NodeIndex) -> bool,
    ) -> Result<()> {
        self.index()?;
        let mut first_error = None;
        for (index, conn) in self.open_peers() {
            if !include(index) {
                continue;
            }
            if let Err(e) = conn.write_frame(kind, payload, false).await {
                warn!(peer = index, error = %e, "broadcast failed, closing slot");
                self.mark_closed(index);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Close slot `index`; later broadcasts skip it.
    pub async fn remove(&self, index: NodeIndex) {
        let removed = {
            let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
            match slots.get_mut(index as usize) {
                Some(slot) if matches!(slot, Slot::Active(_)) => {
                    std::mem::replace(slot, Slot::Closed)
                }
                _ => return,
            }
        };
        if let Slot::Active(conn) = removed {
            debug!(peer = index, "removing connection");
            conn.close().await;
        }
    }

    /// Close every connection, registered or not.
    pub async fn close_all(&self) {
        let pending = std::mem::take(&mut *lock(&self.unregistered));
        for conn in pending {
            conn.close().await;
        }
        let indices: Vec<NodeIndex> = self.open_peers().into_iter().map(|(i, _)| i).collect();
        for index in indices {
            self.remove(index).await;
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::read_frame;
    use tokio::io::{duplex, BufReader, DuplexStream};

    fn announced(index: NodeIndex) -> (Arc<NodeConn>, DuplexStream) {
        let (near, far) = duplex(256);
        let conn = Arc::new(NodeConn::new(format!("peer-{index}"), near));
        conn.set_index(index).unwrap();
        (conn, far)
    }

    fn pool_of(indices: &[NodeIndex]) -> (NodeConnPool, Vec<DuplexStream>) {
        let pool = NodeConnPool::new();
        let mut remotes = Vec::new();
        for &i in indices {
            let (conn, far) = announced(i);
            pool.add_unregistered(conn);
            remotes.push(far);
        }
        (pool, remotes)
    }

    #[test]
    fn worker_mesh_infers_own_index() {
        let (pool, _remotes) = pool_of(&[1, 3, 2]);
        assert_eq!(pool.register().unwrap(), 4);
        assert_eq!(pool.index().unwrap(), 4);
        for i in 1..=3 {
            assert_eq!(pool.get(i).unwrap().index(), Some(i));
        }
        assert!(matches!(pool.slot(4), Some(Slot::Local)));
        assert!(matches!(pool.slot(0), Some(Slot::NeverConnected)));
        assert_eq!(pool.active_workers(), vec![1, 2, 3]);
    }

    #[test]
    fn self_in_the_middle() {
        let (pool, _remotes) = pool_of(&[0, 4, 1, 3]);
        assert_eq!(pool.register().unwrap(), 2);
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.active_workers(), vec![1, 3, 4]);
    }

    #[test]
    fn server_registers_as_zero() {
        let (pool, _remotes) = pool_of(&[2, 1, 3]);
        assert_eq!(pool.register_as(0).unwrap(), 0);
        assert!(matches!(pool.slot(0), Some(Slot::Local)));
        assert_eq!(pool.active_workers(), vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_index_is_inconsistent() {
        let (pool, _remotes) = pool_of(&[1, 2, 2]);
        assert!(matches!(pool.register(), Err(Error::Handshake(_))));
        assert!(!pool.is_registered());
    }

    #[test]
    fn gap_is_inconsistent() {
        // a missing connection pushes an index past the pool size
        let (pool, _remotes) = pool_of(&[0, 1, 4]);
        assert!(matches!(pool.register(), Err(Error::Handshake(_))));
    }

    #[test]
    fn unannounced_connection_is_inconsistent() {
        let pool = NodeConnPool::new();
        let (near, _far) = duplex(16);
        pool.add_unregistered(Arc::new(NodeConn::new("anon", near)));
        assert_eq!(pool.identified_len(), 0);
        assert!(matches!(pool.register(), Err(Error::Handshake(_))));
    }

    #[test]
    fn unregistered_pool_has_no_index() {
        let pool = NodeConnPool::new();
        assert!(matches!(pool.index(), Err(Error::Unregistered)));
    }

    #[tokio::test]
    async fn broadcast_workers_skips_server() {
        let (pool, remotes) = pool_of(&[0, 2, 3]);
        assert_eq!(pool.register().unwrap(), 1);
        pool.broadcast_workers(MessageType::NodeRoundFinished, &[1])
            .await
            .unwrap();
        pool.remove(0).await;

        let mut remotes = remotes.into_iter();
        let mut server = BufReader::new(remotes.next().unwrap());
        // the server connection was closed without receiving the frame
        assert!(read_frame(&mut server).await.unwrap().is_none());
        for remote in remotes {
            let mut reader = BufReader::new(remote);
            let frame = read_frame(&mut reader).await.unwrap().unwrap();
            assert_eq!(frame.kind, MessageType::NodeRoundFinished);
            assert_eq!(frame.payload, vec![1]);
        }
    }

    #[tokio::test]
    async fn failed_peer_is_skipped_afterwards() {
        let (pool, mut remotes) = pool_of(&[1, 2]);
        assert_eq!(pool.register().unwrap(), 3);
        drop(remotes.remove(0));

        let err = pool.broadcast(MessageType::NodeFinished, &[3]).await;
        assert!(matches!(err, Err(Error::PeerWrite { .. })));
        assert!(matches!(pool.slot(1), Some(Slot::Closed)));
        assert_eq!(pool.active_workers(), vec![2]);

        pool.broadcast(MessageType::NodeFinished, &[3]).await.unwrap();
        let mut reader = BufReader::new(remotes.remove(0));
        for _ in 0..2 {
            let frame = read_frame(&mut reader).await.unwrap().unwrap();
            assert_eq!(frame.kind, MessageType::NodeFinished);
        }
    }

    #[tokio::test]
    async fn send_to_self_or_removed_fails() {
        let (pool, _remotes) = pool_of(&[1]);
        assert_eq!(pool.register().unwrap(), 2);
        assert!(matches!(
            pool.send(2, MessageType::NodeFinished, &[2]).await,
            Err(Error::Closed(_))
        ));
        pool.remove(1).await;
        assert!(pool.get(1).is_none());
        assert!(matches!(
            pool.send(1, MessageType::NodeFinished, &[2]).await,
            Err(Error::Closed(_))
        ));
    }
}
