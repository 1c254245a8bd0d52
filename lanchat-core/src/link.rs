//! Transport link: one framed duplex channel to a single remote peer.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::LinkError;
use crate::wire::{read_frame, write_frame};

/// A bidirectional, message-framed connection to one peer.
///
/// `send` and `recv` may run concurrently from different tasks (writer task and
/// receive loop). `close` is idempotent and wakes any pending `recv` or `send` with
/// [`LinkError::Closed`].
#[async_trait]
pub trait Link: Send + Sync {
    /// Remote endpoint of the underlying channel.
    fn peer_addr(&self) -> SocketAddr;

    /// Send one frame. Frames sent from one task arrive in order.
    async fn send(&self, payload: &[u8]) -> Result<(), LinkError>;

    /// Wait for the next frame.
    async fn recv(&self) -> Result<Vec<u8>, LinkError>;

    /// Close the link. Safe to call more than once, from any task.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// [`Link`] over any split async byte stream, using length-prefixed frames.
pub struct StreamLink<R, W> {
    peer: SocketAddr,
    reader: Mutex<R>,
    writer: Mutex<W>,
    closed: CancellationToken,
}

/// Link over a TCP connection.
pub type TcpLink = StreamLink<OwnedReadHalf, OwnedWriteHalf>;

impl<R, W> StreamLink<R, W> {
    pub fn new(peer: SocketAddr, reader: R, writer: W) -> Self {
        Self {
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
        }
    }
}

impl TcpLink {
    pub fn from_tcp(stream: TcpStream) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::new(peer, reader, writer))
    }
}

#[async_trait]
impl<R, W> Link for StreamLink<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    async fn send(&self, payload: &[u8]) -> Result<(), LinkError> {
        if self.closed.is_cancelled() {
            return Err(LinkError::Closed);
        }
        let mut writer = self.writer.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(LinkError::Closed),
            res = write_frame(&mut *writer, payload) => res,
        }
    }

    async fn recv(&self) -> Result<Vec<u8>, LinkError> {
        if self.closed.is_cancelled() {
            return Err(LinkError::Closed);
        }
        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(LinkError::Closed),
            res = read_frame(&mut *reader) => res,
        }
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        // Pending sends observe the token and release the writer.
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
