//! Round barrier fed by peer messages.
//!
//! Each peer's `NODE_ROUND_FINISHED` messages are counted, never
//! decremented. Waiting for round `r` means waiting until every peer has
//! reported at least `r` rounds or has finished altogether. A peer that
//! runs one round ahead only raises its own count, so its next report can
//! never be mistaken for the current round.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use gmcolor_net::NodeIndex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Progress {
    rounds: BTreeMap<NodeIndex, usize>,
    finished: BTreeSet<NodeIndex>,
    lost: BTreeMap<NodeIndex, String>,
}

impl Progress {
    fn rounds_of(&self, peer: NodeIndex) -> usize {
        self.rounds.get(&peer).copied().unwrap_or(0)
    }

    /// Peers still holding up `done`, or the first lost one among them.
    fn pending(
        &self,
        peers: &[NodeIndex],
        done: impl Fn(NodeIndex) -> bool,
    ) -> std::result::Result<Vec<NodeIndex>, Error> {
        let mut waiting = Vec::new();
        for &peer in peers {
            if done(peer) {
                continue;
            }
            if let Some(reason) = self.lost.get(&peer) {
                return Err(Error::PeerDisconnected {
                    index: peer,
                    reason: reason.clone(),
                });
            }
            waiting.push(peer);
        }
        Ok(waiting)
    }
}

#[derive(Debug, Default)]
pub struct RoundBarrier {
    progress: Mutex<Progress>,
    notify: Notify,
}

impl RoundBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut Progress)) {
        f(&mut self.progress.lock().unwrap_or_else(|e| e.into_inner()));
        self.notify.notify_waiters();
    }

    fn progress(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `NODE_ROUND_FINISHED` from `peer`.
    pub fn round_finished(&self, peer: NodeIndex) {
        self.update(|p| {
            let count = p.rounds.entry(peer).or_insert(0);
            *count += 1;
            trace!(peer, rounds = *count, "round finished");
        });
    }

    /// `NODE_FINISHED` from `peer`.
    pub fn node_finished(&self, peer: NodeIndex) {
        debug!(peer, "node finished");
        self.update(|p| {
            p.finished.insert(peer);
        });
    }

    /// The connection to `peer` ended. Harmless once the peer finished;
    /// otherwise every wait involving it fails.
    pub fn peer_lost(&self, peer: NodeIndex, reason: impl Into<String>) {
        let reason = reason.into();
        self.update(|p| {
            if !p.finished.contains(&peer) {
                p.lost.insert(peer, reason);
            }
        });
    }

    pub fn rounds_of(&self, peer: NodeIndex) -> usize {
        self.progress().rounds_of(peer)
    }

    pub fn is_finished(&self, peer: NodeIndex) -> bool {
        self.progress().finished.contains(&peer)
    }

    /// Wait until every peer in `peers` reported `round` rounds or finished.
    pub async fn wait_round(
        &self,
        round: usize,
        peers: &[NodeIndex],
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.wait(round, peers, timeout, |p, peer| {
            p.finished.contains(&peer) || p.rounds_of(peer) >= round
        })
        .await
    }

    /// Wait until every peer in `peers` sent `NODE_FINISHED`.
    pub async fn wait_finished(&self, peers: &[NodeIndex], timeout: Option<Duration>) -> Result<()> {
        self.wait(0, peers, timeout, |p, peer| p.finished.contains(&peer))
            .await
    }

    async fn wait(
        &self,
        round: usize,
        peers: &[NodeIndex],
        timeout: Option<Duration>,
        done: impl Fn(&Progress, NodeIndex) -> bool,
    ) -> Result<()> {
        let Some(limit) = timeout else {
            return self.wait_until(peers, &done).await;
        };
        match tokio::time::timeout(limit, self.wait_until(peers, &done)).await {
            Ok(result) => result,
            Err(_) => {
                let progress = self.progress();
                let waiting = progress.pending(peers, |peer| done(&progress, peer))?;
                Err(Error::RoundTimeout {
                    round,
                    waiting,
                    timeout: limit,
                })
            }
        }
    }

    async fn wait_until(
        &self,
        peers: &[NodeIndex],
        done: &impl Fn(&Progress, NodeIndex) -> bool,
    ) -> Result<()> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking so an update in between is not lost
            notified.as_mut().enable();
            let satisfied = {
                let progress = self.progress();
                progress.pending(peers, |peer| done(&progress, peer))?.is_empty()
            };
            if satisfied {
                return Ok(());
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn resolves_when_all_peers_report() {
        let barrier = Arc::new(RoundBarrier::new());
        let waiter = {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move { barrier.wait_round(1, &[1, 3], None).await })
        };
        barrier.round_finished(1);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        barrier.round_finished(3);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn peer_one_round_ahead_counts_once_per_round() {
        let barrier = RoundBarrier::new();
        // peer 2 reports rounds 1 and 2 before this node waits for round 1
        barrier.round_finished(2);
        barrier.round_finished(2);
        barrier.wait_round(1, &[2], None).await.unwrap();
        barrier.wait_round(2, &[2], None).await.unwrap();
        assert_eq!(barrier.rounds_of(2), 2);
        let early = barrier
            .wait_round(3, &[2], Some(Duration::from_millis(20)))
            .await;
        assert!(matches!(early, Err(Error::RoundTimeout { round: 3, .. })));
    }

    #[tokio::test]
    async fn finished_peer_satisfies_later_rounds() {
        let barrier = RoundBarrier::new();
        barrier.round_finished(1);
        barrier.node_finished(1);
        barrier.wait_round(7, &[1], None).await.unwrap();
        barrier.wait_finished(&[1], None).await.unwrap();
        assert!(barrier.is_finished(1));
    }

    #[tokio::test]
    async fn timeout_names_missing_peers() {
        let barrier = RoundBarrier::new();
        barrier.round_finished(1);
        match barrier
            .wait_round(1, &[1, 2, 4], Some(Duration::from_millis(10)))
            .await
        {
            Err(Error::RoundTimeout { waiting, .. }) => assert_eq!(waiting, vec![2, 4]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn lost_peer_fails_waiters() {
        let barrier = Arc::new(RoundBarrier::new());
        let waiter = {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move { barrier.wait_finished(&[2], None).await })
        };
        tokio::task::yield_now().await;
        barrier.peer_lost(2, "connection reset");
        assert!(matches!(
            waiter.await.unwrap(),
            Err(Error::PeerDisconnected { index: 2, .. })
        ));
    }

    #[tokio::test]
    async fn loss_after_finish_is_ignored() {
        let barrier = RoundBarrier::new();
        barrier.node_finished(3);
        barrier.peer_lost(3, "closed");
        barrier.wait_finished(&[3], None).await.unwrap();
    }

    #[tokio::test]
    async fn no_peers_is_immediate() {
        RoundBarrier::new().wait_round(1, &[], None).await.unwrap();
    }
}
