//! Local transport: TCP listener (inbound links) and TCP dialer (outbound links).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LinkError, NodeError};
use crate::link::{Link, TcpLink};
use crate::manager::ConnectionManager;

/// Default time allowed for an outbound connect.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Opens outbound links.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: SocketAddr) -> Result<Arc<dyn Link>, LinkError>;
}

/// Dials plain TCP with a connect timeout.
pub struct TcpDialer {
    timeout: Duration,
}

impl TcpDialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(DEFAULT_DIAL_TIMEOUT)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: SocketAddr) -> Result<Arc<dyn Link>, LinkError> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| LinkError::Timeout(addr))??;
        Ok(Arc::new(TcpLink::from_tcp(stream)?))
    }
}

/// Bind the listener on all interfaces. Port 0 lets the OS pick.
pub async fn bind(port: u16) -> Result<TcpListener, NodeError> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|source| NodeError::Bind { port, source })
}

/// Accept inbound connections until `shutdown` fires, handing each to the manager.
pub async fn accept_loop(
    listener: TcpListener,
    manager: Arc<ConnectionManager>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = listener.accept() => res,
        };
        match accepted {
            Ok((stream, remote)) => {
                let link = match TcpLink::from_tcp(stream) {
                    Ok(link) => link,
                    Err(e) => {
                        warn!(peer = %remote, error = %e, "dropping inbound connection");
                        continue;
                    }
                };
                debug!(peer = %remote, "inbound connection");
                manager.accept_link(remote, Arc::new(link)).await;
            }
            // Per-connection failures (e.g. aborted before accept) do not stop the listener.
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    info!("stopped accepting connections");
}
