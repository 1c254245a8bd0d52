//! Connection manager: turns discovery sightings and accepted connections into
//! registered links, and owns a receive loop and a writer task per registered link.
//!
//! Per candidate: `Sighted -> Skipped | Dialing -> Registered`, or
//! `Dialing -> Failed` / `Dialing -> Duplicate` (link closed, never registered).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::discovery::{Sighting, SightingStream};
use crate::error::LinkError;
use crate::link::Link;
use crate::protocol::ChatMessage;
use crate::registry::{Outbox, PeerHandle, PeerRegistry};
use crate::seen::RecentIds;
use crate::transport::Dialer;

/// What happened to one discovery sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SightingOutcome {
    /// Our own advertisement; never dialed.
    SelfSighting,
    /// Address already registered (we dialed them, or they dialed us).
    AlreadyLinked,
    Registered(SocketAddr),
    /// Dial succeeded but another link won the address first; ours was closed.
    Duplicate,
    /// Dial failed; dropped without retry until the peer is sighted again.
    DialFailed,
    /// Node is shutting down.
    ShuttingDown,
}

pub struct ConnectionManager {
    local_name: String,
    registry: Arc<PeerRegistry>,
    dialer: Arc<dyn Dialer>,
    incoming: mpsc::UnboundedSender<ChatMessage>,
    seen: Arc<Mutex<RecentIds>>,
    tasks: TaskTracker,
    closing: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        local_name: impl Into<String>,
        registry: Arc<PeerRegistry>,
        dialer: Arc<dyn Dialer>,
        incoming: mpsc::UnboundedSender<ChatMessage>,
    ) -> Self {
        Self {
            local_name: local_name.into(),
            registry,
            dialer,
            incoming,
            seen: Arc::new(Mutex::new(RecentIds::default())),
            tasks: TaskTracker::new(),
            closing: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Handle one sighting: skip self and known addresses, otherwise dial and register.
    pub async fn on_sighting(&self, sighting: Sighting) -> SightingOutcome {
        if sighting.name == self.local_name {
            debug!(name = %sighting.name, "ignoring own advertisement");
            return SightingOutcome::SelfSighting;
        }
        if self.closing.is_cancelled() {
            return SightingOutcome::ShuttingDown;
        }
        let addr = sighting.socket_addr();
        if self.registry.contains(&addr).await {
            return SightingOutcome::AlreadyLinked;
        }
        info!(peer = %addr, name = %sighting.name, "peer discovered, dialing");
        let link = match self.dialer.dial(addr).await {
            Ok(link) => link,
            Err(e) => {
                warn!(peer = %addr, error = %e, "dial failed");
                return SightingOutcome::DialFailed;
            }
        };
        if self.register(addr, link).await {
            SightingOutcome::Registered(addr)
        } else if self.closing.is_cancelled() {
            SightingOutcome::ShuttingDown
        } else {
            SightingOutcome::Duplicate
        }
    }

    /// Register an accepted inbound link under its remote address.
    /// Returns false (and closes the link) on a duplicate.
    pub async fn accept_link(&self, remote: SocketAddr, link: Arc<dyn Link>) -> bool {
        self.register(remote, link).await
    }

    /// Consume sightings until the stream ends or `shutdown` fires. Each dial runs
    /// in its own task so an unreachable candidate does not stall the others.
    pub async fn run_discovery(
        self: Arc<Self>,
        mut sightings: SightingStream,
        shutdown: CancellationToken,
    ) {
        loop {
            let sighting = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = sightings.next() => match next {
                    Some(s) => s,
                    None => break,
                },
            };
            let manager = self.clone();
            self.tasks.spawn(async move {
                manager.on_sighting(sighting).await;
            });
        }
        debug!("discovery stream finished");
    }

    /// Close every registered link and refuse new registrations. Receive loops
    /// observe the close and exit; pair with [`wait_idle`](Self::wait_idle).
    pub async fn close_all(&self) {
        self.closing.cancel();
        let peers = self.registry.drain().await;
        let count = peers.len();
        for peer in peers {
            peer.link().close().await;
        }
        self.tasks.close();
        info!(count, "closed all peer links");
    }

    /// Wait for all receive loops and pending dials to finish after `close_all`.
    pub async fn wait_idle(&self) {
        self.tasks.wait().await;
    }

    async fn register(&self, addr: SocketAddr, link: Arc<dyn Link>) -> bool {
        if self.closing.is_cancelled() {
            link.close().await;
            return false;
        }
        let (peer, outbox) = PeerHandle::new(addr, link.clone());
        if !self.registry.insert(peer).await {
            info!(peer = %addr, "already linked, closing duplicate");
            link.close().await;
            return false;
        }
        // close_all may have drained the registry between the check above and the insert.
        if self.closing.is_cancelled() {
            self.registry.retire(&addr, &link).await;
            link.close().await;
            return false;
        }
        info!(peer = %addr, "peer linked");
        self.tasks.spawn(writer_loop(
            addr,
            link.clone(),
            outbox,
            self.registry.clone(),
        ));
        self.tasks.spawn(receive_loop(
            addr,
            link,
            self.registry.clone(),
            self.incoming.clone(),
            self.seen.clone(),
        ));
        true
    }
}

/// Drain one peer's outbound queue onto its link. Ends when the handle is gone
/// from the registry (queue closed) or a write fails; a failure retires the link.
async fn writer_loop(
    addr: SocketAddr,
    link: Arc<dyn Link>,
    mut outbox: Outbox,
    registry: Arc<PeerRegistry>,
) {
    while let Some(frame) = outbox.recv().await {
        if let Err(e) = link.send(&frame).await {
            if !matches!(e, LinkError::Closed) {
                warn!(peer = %addr, error = %e, "send failed, dropping peer");
            }
            break;
        }
    }
    registry.retire(&addr, &link).await;
    link.close().await;
}

/// Read frames until the link fails, forwarding decoded messages. Decode errors
/// are skipped; transport errors end the loop and retire this link.
async fn receive_loop(
    addr: SocketAddr,
    link: Arc<dyn Link>,
    registry: Arc<PeerRegistry>,
    incoming: mpsc::UnboundedSender<ChatMessage>,
    seen: Arc<Mutex<RecentIds>>,
) {
    loop {
        let frame = match link.recv().await {
            Ok(frame) => frame,
            Err(LinkError::Closed) => {
                debug!(peer = %addr, "link closed locally");
                break;
            }
            Err(e) => {
                info!(peer = %addr, error = %e, "peer link lost");
                break;
            }
        };
        let msg = match crate::wire::decode_message(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(peer = %addr, error = %e, "discarding malformed frame");
                continue;
            }
        };
        if !seen.lock().await.insert(msg.id()) {
            debug!(peer = %addr, id = %msg.id(), "duplicate message suppressed");
            continue;
        }
        if incoming.send(msg).is_err() {
            debug!(peer = %addr, "no presentation sink, dropping message");
        }
    }
    registry.retire(&addr, &link).await;
    link.close().await;
}
