//! Peer registry: address -> active link, shared by the accept path, discovery,
//! every receive loop and the broadcast path.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use crate::error::LinkError;
use crate::link::Link;

/// Frames a peer may have waiting before it counts as stalled.
pub const OUTBOX_CAPACITY: usize = 32;

/// Encoded frames waiting for a peer's writer task.
pub type Outbox = mpsc::Receiver<Arc<[u8]>>;

/// One registered connection. Cloning shares the link and its outbound queue;
/// the registry stays the authority that retires it.
#[derive(Clone)]
pub struct PeerHandle {
    addr: SocketAddr,
    link: Arc<dyn Link>,
    outbox: mpsc::Sender<Arc<[u8]>>,
}

impl PeerHandle {
    /// New handle plus the receiving end of its outbound queue, to be drained
    /// by exactly one writer task.
    pub fn new(addr: SocketAddr, link: Arc<dyn Link>) -> (Self, Outbox) {
        let (outbox, rx) = mpsc::channel(OUTBOX_CAPACITY);
        (Self { addr, link, outbox }, rx)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn link(&self) -> &Arc<dyn Link> {
        &self.link
    }

    /// Queue one frame without waiting. A full queue means the peer stopped
    /// reading; a closed one means its writer is gone.
    pub fn enqueue(&self, frame: Arc<[u8]>) -> Result<(), LinkError> {
        self.outbox.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => LinkError::Backlogged,
            TrySendError::Closed(_) => LinkError::Closed,
        })
    }

    /// True when both handles wrap the same link object.
    pub fn same_link(&self, other: &Arc<dyn Link>) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.link) as *const (),
            Arc::as_ptr(other) as *const (),
        )
    }
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("addr", &self.addr)
            .field("closed", &self.link.is_closed())
            .finish()
    }
}

/// Concurrency-safe table of active peers. Each operation is atomic; a snapshot
/// is a copy and never holds the lock while the caller uses it.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<BTreeMap<SocketAddr, PeerHandle>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer` under its address. Returns false without touching the
    /// table if the address is already present; the caller then owns closing the link.
    pub async fn insert(&self, peer: PeerHandle) -> bool {
        let mut peers = self.peers.write().await;
        if peers.contains_key(&peer.addr) {
            return false;
        }
        peers.insert(peer.addr, peer);
        true
    }

    /// Remove whatever is registered under `addr`. Idempotent: absent is `None`.
    pub async fn remove(&self, addr: &SocketAddr) -> Option<PeerHandle> {
        self.peers.write().await.remove(addr)
    }

    /// Remove `addr` only if it still maps to `link`. A newer link registered
    /// under the same address after `link` was retired is left alone.
    pub async fn retire(&self, addr: &SocketAddr, link: &Arc<dyn Link>) -> Option<PeerHandle> {
        let mut peers = self.peers.write().await;
        match peers.get(addr) {
            Some(handle) if handle.same_link(link) => peers.remove(addr),
            _ => None,
        }
    }

    pub async fn contains(&self, addr: &SocketAddr) -> bool {
        self.peers.read().await.contains_key(addr)
    }

    /// Point-in-time copy of all entries, ordered by address.
    pub async fn snapshot(&self) -> Vec<PeerHandle> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Take every entry out, leaving the registry empty (shutdown path).
    pub async fn drain(&self) -> Vec<PeerHandle> {
        let mut peers = self.peers.write().await;
        std::mem::take(&mut *peers).into_values().collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::StreamLink;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn link(port: u16) -> Arc<dyn Link> {
        let (a, _b) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(a);
        Arc::new(StreamLink::new(addr(port), r, w))
    }

    fn peer(port: u16, link: Arc<dyn Link>) -> PeerHandle {
        PeerHandle::new(addr(port), link).0
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_address() {
        let reg = PeerRegistry::new();
        let first = link(1);
        assert!(reg.insert(peer(1, first.clone())).await);
        assert!(!reg.insert(peer(1, link(1))).await);
        assert_eq!(reg.len().await, 1);
        let snap = reg.snapshot().await;
        assert!(snap[0].same_link(&first));
    }

    #[tokio::test]
    async fn concurrent_insert_exactly_one_wins() {
        let reg = Arc::new(PeerRegistry::new());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let reg = reg.clone();
            tasks.push(tokio::spawn(async move { reg.insert(peer(7, link(7))).await }));
        }
        let mut wins = 0;
        for t in tasks {
            if t.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let reg = PeerRegistry::new();
        reg.insert(peer(2, link(2))).await;
        assert!(reg.remove(&addr(2)).await.is_some());
        assert!(reg.remove(&addr(2)).await.is_none());
        assert!(!reg.contains(&addr(2)).await);
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn retire_ignores_stale_link() {
        let reg = PeerRegistry::new();
        let old = link(3);
        let new = link(3);
        reg.insert(peer(3, old.clone())).await;
        reg.remove(&addr(3)).await;
        reg.insert(peer(3, new.clone())).await;
        assert!(reg.retire(&addr(3), &old).await.is_none());
        assert!(reg.contains(&addr(3)).await);
        assert!(reg.retire(&addr(3), &new).await.is_some());
        assert!(!reg.contains(&addr(3)).await);
    }

    #[tokio::test]
    async fn snapshot_is_unaffected_by_later_mutation() {
        let reg = PeerRegistry::new();
        reg.insert(peer(5, link(5))).await;
        reg.insert(peer(4, link(4))).await;
        let snap = reg.snapshot().await;
        reg.remove(&addr(4)).await;
        reg.insert(peer(6, link(6))).await;
        let addrs: Vec<_> = snap.iter().map(PeerHandle::addr).collect();
        assert_eq!(addrs, vec![addr(4), addr(5)]);
        assert_eq!(reg.len().await, 2);
    }

    #[tokio::test]
    async fn drain_empties_registry() {
        let reg = PeerRegistry::new();
        reg.insert(peer(8, link(8))).await;
        reg.insert(peer(9, link(9))).await;
        assert_eq!(reg.drain().await.len(), 2);
        assert!(reg.is_empty().await);
    }

    #[test]
    fn enqueue_reports_full_and_closed_queues() {
        let (handle, rx) = PeerHandle::new(addr(10), link(10));
        let frame: Arc<[u8]> = Arc::from(&b"frame"[..]);
        for _ in 0..OUTBOX_CAPACITY {
            handle.enqueue(frame.clone()).unwrap();
        }
        assert!(matches!(handle.enqueue(frame.clone()), Err(LinkError::Backlogged)));
        drop(rx);
        assert!(matches!(handle.enqueue(frame), Err(LinkError::Closed)));
    }
}
