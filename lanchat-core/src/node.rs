//! Chat node: wires listener, registry, connection manager and relay together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::discovery::SightingStream;
use crate::error::NodeError;
use crate::manager::ConnectionManager;
use crate::protocol::ChatMessage;
use crate::registry::PeerRegistry;
use crate::relay::{BroadcastReport, Relay};
use crate::transport::{self, TcpDialer, DEFAULT_DIAL_TIMEOUT};

/// Startup parameters for a node.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Display name; also the advertised instance name used for self-detection.
    pub username: String,
    /// TCP listen port; 0 picks an ephemeral one.
    pub port: u16,
    pub dial_timeout: Duration,
}

impl NodeOptions {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            port: 0,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

/// A running node. Incoming messages arrive on the receiver returned by [`ChatNode::start`].
pub struct ChatNode {
    username: String,
    local_addr: SocketAddr,
    registry: Arc<PeerRegistry>,
    manager: Arc<ConnectionManager>,
    relay: Relay,
    shutdown: CancellationToken,
    background: TaskTracker,
}

impl ChatNode {
    /// Bind the listener and start accepting. Bind failure is fatal to the caller.
    pub async fn start(
        opts: NodeOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChatMessage>), NodeError> {
        let listener = transport::bind(opts.port).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| NodeError::Bind {
                port: opts.port,
                source,
            })?;

        let registry = Arc::new(PeerRegistry::new());
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(ConnectionManager::new(
            opts.username.clone(),
            registry.clone(),
            Arc::new(TcpDialer::new(opts.dial_timeout)),
            incoming_tx,
        ));
        let relay = Relay::new(opts.username.clone(), registry.clone());

        let shutdown = CancellationToken::new();
        let background = TaskTracker::new();
        background.spawn(transport::accept_loop(
            listener,
            manager.clone(),
            shutdown.child_token(),
        ));
        info!(addr = %local_addr, user = %opts.username, "node listening");

        let node = Self {
            username: opts.username,
            local_addr,
            registry,
            manager,
            relay,
            shutdown,
            background,
        };
        Ok((node, incoming_rx))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The port to advertise.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Start consuming a discovery stream. Stops on shutdown or when the stream ends.
    pub fn attach_discovery(&self, sightings: SightingStream) {
        self.background.spawn(
            self.manager
                .clone()
                .run_discovery(sightings, self.shutdown.child_token()),
        );
    }

    pub async fn broadcast(&self, text: &str) -> BroadcastReport {
        self.relay.broadcast(text).await
    }

    /// Stop discovery and accepting, close every link, wait for receive loops.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.background.close();
        self.background.wait().await;
        self.manager.close_all().await;
        self.manager.wait_idle().await;
        info!("node stopped");
    }
}
