//! LAN chat core: peer membership and message relay.
//! Discovery and presentation are supplied by the host; this crate owns links,
//! the peer registry, receive loops and broadcast.

pub mod discovery;
pub mod error;
pub mod link;
pub mod manager;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod seen;
pub mod transport;
pub mod wire;

pub use discovery::{sighting_channel, Sighting, SightingSender, SightingStream};
pub use error::{CodecError, LinkError, NodeError};
pub use link::{Link, StreamLink, TcpLink};
pub use manager::{ConnectionManager, SightingOutcome};
pub use node::{ChatNode, NodeOptions};
pub use protocol::{ChatMessage, MAX_TEXT_CHARS};
pub use registry::{PeerHandle, PeerRegistry, OUTBOX_CAPACITY};
pub use relay::{BroadcastReport, Relay};
pub use wire::{decode_message, encode_message};
