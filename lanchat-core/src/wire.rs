//! Framing: length-prefix (4 bytes LE) + JSON payload.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CodecError, LinkError};
use crate::protocol::ChatMessage;

const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: usize = 1024 * 1024; // 1 MiB

/// Serialize a message to its JSON payload (no length prefix).
pub fn encode_message(msg: &ChatMessage) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(msg).map_err(CodecError::Encode)
}

/// Parse a JSON payload back into a message.
pub fn decode_message(bytes: &[u8]) -> Result<ChatMessage, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Decode)
}

/// Write one frame: 4 bytes LE length + payload, then flush.
pub async fn write_frame<W>(w: &mut W, payload: &[u8]) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(LinkError::FrameTooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    w.write_all(&out).await?;
    w.flush().await?;
    Ok(())
}

/// Read one frame's payload. A declared length above the limit is fatal:
/// the stream cannot be resynchronised after skipping it.
pub async fn read_frame<R>(r: &mut R) -> Result<Vec<u8>, LinkError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_SIZE];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(LinkError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    Ok(payload)
}
