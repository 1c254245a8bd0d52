//! Error types shared across the core.

use std::net::SocketAddr;

/// JSON encode/decode failure for a chat message. Non-fatal to the link on receive.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Transport failure on a link. Any of these ends the link's receive loop.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too large ({0} bytes)")]
    FrameTooLarge(usize),
    #[error("dial to {0} timed out")]
    Timeout(SocketAddr),
    /// The peer is not draining its outbound queue.
    #[error("outbound queue full")]
    Backlogged,
}

/// Node startup failure. Fatal: the process cannot run without a listener.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}
