//! Discovery boundary: sightings of other nodes, delivered as a lazy stream.

use std::net::{IpAddr, SocketAddr};

use tokio::sync::mpsc;

/// One observed advertisement: instance name plus the address to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub name: String,
    pub ip: IpAddr,
    pub port: u16,
}

impl Sighting {
    pub fn new(name: impl Into<String>, ip: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            ip,
            port,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Producer half, held by a discovery provider.
#[derive(Clone)]
pub struct SightingSender {
    tx: mpsc::UnboundedSender<Sighting>,
}

impl SightingSender {
    /// Push a sighting. Returns false once the consumer is gone.
    pub fn send(&self, sighting: Sighting) -> bool {
        self.tx.send(sighting).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Infinite, non-restartable sequence of sightings. Ends only when every
/// sender is dropped; a fresh browse needs a fresh stream.
pub struct SightingStream {
    rx: mpsc::UnboundedReceiver<Sighting>,
}

impl SightingStream {
    /// Wait for the next sighting; `None` when the provider has stopped.
    pub async fn next(&mut self) -> Option<Sighting> {
        self.rx.recv().await
    }
}

pub fn sighting_channel() -> (SightingSender, SightingStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SightingSender { tx }, SightingStream { rx })
}
