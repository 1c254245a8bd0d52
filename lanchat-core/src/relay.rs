//! Relay: push one locally typed message to every registered peer.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::protocol::ChatMessage;
use crate::registry::PeerRegistry;
use crate::wire::encode_message;

/// Outcome of one broadcast, for logs and tests. Never shown to the user.
#[derive(Debug, Clone, Default)]
pub struct BroadcastReport {
    pub message_id: String,
    /// Peers whose outbound queue accepted the frame.
    pub queued: usize,
    /// Peers dropped because their queue was full or already closed.
    pub failed: Vec<SocketAddr>,
}

pub struct Relay {
    username: String,
    registry: Arc<PeerRegistry>,
}

impl Relay {
    pub fn new(username: impl Into<String>, registry: Arc<PeerRegistry>) -> Self {
        Self {
            username: username.into(),
            registry,
        }
    }

    /// Best-effort fan-out. Never waits on a peer's socket: each frame goes to
    /// the peer's outbound queue. A peer that cannot take it is retired and
    /// closed; the others in the snapshot still get the message.
    pub async fn broadcast(&self, text: &str) -> BroadcastReport {
        let msg = ChatMessage::new(self.username.as_str(), text);
        let mut report = BroadcastReport {
            message_id: msg.id().to_owned(),
            ..Default::default()
        };
        let frame: Arc<[u8]> = match encode_message(&msg) {
            Ok(p) => p.into(),
            Err(e) => {
                warn!(error = %e, "failed to encode outgoing message");
                return report;
            }
        };

        for peer in self.registry.snapshot().await {
            match peer.enqueue(frame.clone()) {
                Ok(()) => report.queued += 1,
                Err(e) => {
                    warn!(peer = %peer.addr(), error = %e, "peer not keeping up, dropping");
                    self.registry.retire(&peer.addr(), peer.link()).await;
                    peer.link().close().await;
                    report.failed.push(peer.addr());
                }
            }
        }
        debug!(
            id = %report.message_id,
            queued = report.queued,
            failed = report.failed.len(),
            "broadcast"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::link::{Link, StreamLink};
    use crate::manager::ConnectionManager;
    use crate::registry::OUTBOX_CAPACITY;
    use crate::transport::TcpDialer;
    use crate::wire::decode_message;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    type MemLink = StreamLink<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    /// Link whose sends always fail; counts close calls.
    struct BrokenLink {
        addr: SocketAddr,
        closes: AtomicUsize,
        closed: CancellationToken,
    }

    #[async_trait]
    impl Link for BrokenLink {
        fn peer_addr(&self) -> SocketAddr {
            self.addr
        }
        async fn send(&self, _payload: &[u8]) -> Result<(), LinkError> {
            Err(LinkError::Io(std::io::ErrorKind::BrokenPipe.into()))
        }
        async fn recv(&self) -> Result<Vec<u8>, LinkError> {
            self.closed.cancelled().await;
            Err(LinkError::Closed)
        }
        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.closed.cancel();
        }
        fn is_closed(&self) -> bool {
            self.closes.load(Ordering::SeqCst) > 0
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 2], port))
    }

    fn mem_pair(port: u16, buffer: usize) -> (Arc<MemLink>, MemLink) {
        let (a, b) = tokio::io::duplex(buffer);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (
            Arc::new(StreamLink::new(addr(port), ar, aw)),
            StreamLink::new(addr(0), br, bw),
        )
    }

    /// Manager whose links are registered by hand; it spawns the writer tasks.
    fn manager(registry: &Arc<PeerRegistry>) -> Arc<ConnectionManager> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(ConnectionManager::new(
            "alice",
            registry.clone(),
            Arc::new(TcpDialer::default()),
            tx,
        ))
    }

    async fn wait_until_absent(registry: &PeerRegistry, addr: SocketAddr) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.contains(&addr).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("peer was not retired");
    }

    #[tokio::test]
    async fn failing_peer_is_isolated_and_removed() {
        let registry = Arc::new(PeerRegistry::new());
        let mgr = manager(&registry);
        let mut remotes = Vec::new();
        for port in [1, 2, 4] {
            let (local, remote) = mem_pair(port, 4096);
            assert!(mgr.accept_link(addr(port), local).await);
            remotes.push(remote);
        }
        let broken = Arc::new(BrokenLink {
            addr: addr(3),
            closes: AtomicUsize::new(0),
            closed: CancellationToken::new(),
        });
        assert!(mgr.accept_link(addr(3), broken.clone()).await);

        let relay = Relay::new("alice", registry.clone());
        let report = relay.broadcast("hi").await;
        assert_eq!(report.queued, 4);
        assert!(report.failed.is_empty());

        for remote in &remotes {
            let msg = decode_message(&remote.recv().await.unwrap()).unwrap();
            assert_eq!(msg.text(), "hi");
            assert_eq!(msg.username(), "alice");
            assert_eq!(msg.id(), report.message_id);
        }
        // The broken peer's writer hits the send error and retires it.
        wait_until_absent(&registry, addr(3)).await;
        assert!(broken.is_closed());
        assert_eq!(registry.len().await, 3);

        let report = relay.broadcast("again").await;
        assert_eq!(report.queued, 3);
        assert!(report.failed.is_empty());
        for remote in &remotes {
            let msg = decode_message(&remote.recv().await.unwrap()).unwrap();
            assert_eq!(msg.text(), "again");
        }

        mgr.close_all().await;
        mgr.wait_idle().await;
    }

    #[tokio::test]
    async fn stalled_peer_never_blocks_broadcast() {
        let registry = Arc::new(PeerRegistry::new());
        let mgr = manager(&registry);
        let (healthy, healthy_remote) = mem_pair(1, 64 * 1024);
        // The remote end of this one is held but never read.
        let (stalled, _stalled_remote) = mem_pair(2, 1024);
        assert!(mgr.accept_link(addr(1), healthy).await);
        assert!(mgr.accept_link(addr(2), stalled.clone()).await);

        let relay = Relay::new("alice", registry.clone());
        let text = "x".repeat(320);
        let rounds = OUTBOX_CAPACITY + 8;
        let mut dropped = Vec::new();
        for _ in 0..rounds {
            let report = tokio::time::timeout(Duration::from_secs(1), relay.broadcast(&text))
                .await
                .expect("broadcast blocked on a stalled peer");
            dropped.extend(report.failed);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(dropped, vec![addr(2)]);
        assert!(!registry.contains(&addr(2)).await);
        assert!(stalled.is_closed());
        assert!(registry.contains(&addr(1)).await);
        for _ in 0..rounds {
            let frame = tokio::time::timeout(Duration::from_secs(1), healthy_remote.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(decode_message(&frame).unwrap().text(), text);
        }

        mgr.close_all().await;
        tokio::time::timeout(Duration::from_secs(2), mgr.wait_idle())
            .await
            .expect("writer tasks did not exit");
    }

    #[tokio::test]
    async fn broadcast_with_no_peers_is_noop() {
        let relay = Relay::new("alice", Arc::new(PeerRegistry::new()));
        let report = relay.broadcast("anyone?").await;
        assert_eq!(report.queued, 0);
        assert!(report.failed.is_empty());
        assert!(!report.message_id.is_empty());
    }
}
