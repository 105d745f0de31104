//! The length-prefixed wire protocol spoken by producers.
//!
//! Every message is framed as `type (1 byte) · length (4 bytes, big-endian) ·
//! payload (length bytes of JSON)`. After each fully framed message the
//! server writes a single ACK byte. The current implementation always sends
//! [`ACK_OK`]; [`ACK_ERR`] is reserved so future producers can start reading
//! per-message outcomes without a protocol change.

use oculo_core::{MemoryEvent, Span, ToolCall, Trace};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected and the connection is closed.
pub const MAX_PAYLOAD_BYTES: u32 = 10 * 1024 * 1024;

/// ACK byte written after every successfully framed message.
pub const ACK_OK: u8 = 0x00;

/// Reserved for per-message error reporting.
pub const ACK_ERR: u8 = 0x01;

/// Discriminates the payload kind of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Trace,
    Span,
    MemoryEvent,
    Batch,
}

impl MessageType {
    /// Decode a type byte. `None` for unknown types — the message is
    /// rejected but the connection stays open.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(MessageType::Trace),
            0x02 => Some(MessageType::Span),
            0x03 => Some(MessageType::MemoryEvent),
            0x04 => Some(MessageType::Batch),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            MessageType::Trace => 0x01,
            MessageType::Span => 0x02,
            MessageType::MemoryEvent => 0x03,
            MessageType::Batch => 0x04,
        }
    }
}

/// A batch payload: optional lists of each record kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireBatch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<Trace>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Span>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory_events: Vec<MemoryEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl WireBatch {
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
            && self.spans.is_empty()
            && self.memory_events.is_empty()
            && self.tool_calls.is_empty()
    }
}

/// How a frame read can fail.
#[derive(Debug)]
pub enum FrameError {
    /// The peer closed the connection between frames. Not an error.
    Eof,
    /// The declared payload length exceeds [`MAX_PAYLOAD_BYTES`].
    Oversize(u32),
    /// Short read mid-frame or a socket error.
    Io(std::io::Error),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Eof => write!(f, "connection closed"),
            FrameError::Oversize(len) => write!(f, "message too large: {len} bytes"),
            FrameError::Io(e) => write!(f, "frame read failed: {e}"),
        }
    }
}

/// Read one framed message. Returns the raw type byte and the payload;
/// dispatching on the type (including rejecting unknown ones) is the
/// caller's job.
pub async fn read_frame<R>(reader: &mut R) -> Result<(u8, Vec<u8>), FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut type_buf = [0u8; 1];
    if let Err(e) = reader.read_exact(&mut type_buf).await {
        // EOF before a new frame begins is a clean close; anything else is a
        // torn frame.
        return match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Err(FrameError::Eof),
            _ => Err(FrameError::Io(e)),
        };
    }

    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(FrameError::Io)?;
    let payload_len = u32::from_be_bytes(len_buf);

    if payload_len > MAX_PAYLOAD_BYTES {
        return Err(FrameError::Oversize(payload_len));
    }

    let mut payload = vec![0u8; payload_len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(FrameError::Io)?;

    Ok((type_buf[0], payload))
}

/// Write one framed message (used by tests and producer tooling).
pub async fn write_frame<W>(
    writer: &mut W,
    msg_type: MessageType,
    payload: &[u8],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[msg_type.as_byte()]).await?;
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use oculo_core::TraceStatus;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, MessageType::Trace, br#"{"hello":1}"#)
            .await
            .unwrap();

        let (msg_type, payload) = read_frame(&mut server).await.unwrap();
        assert_eq!(msg_type, MessageType::Trace.as_byte());
        assert_eq!(payload, br#"{"hello":1}"#);
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, MessageType::Batch, b"").await.unwrap();

        let (msg_type, payload) = read_frame(&mut server).await.unwrap();
        assert_eq!(msg_type, 0x04);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_oversize_length_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x02]).await.unwrap();
        client
            .write_all(&(MAX_PAYLOAD_BYTES + 1).to_be_bytes())
            .await
            .unwrap();

        match read_frame(&mut server).await {
            Err(FrameError::Oversize(len)) => assert_eq!(len, MAX_PAYLOAD_BYTES + 1),
            other => panic!("expected oversize error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clean_eof_between_frames() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        match read_frame(&mut server).await {
            Err(FrameError::Eof) => {}
            other => panic!("expected eof, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        // Type byte and a length of 100 bytes, but only 3 bytes of payload.
        client.write_all(&[0x01]).await.unwrap();
        client.write_all(&100u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        match read_frame(&mut server).await {
            Err(FrameError::Io(_)) => {}
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[test]
    fn test_message_type_bytes() {
        for t in [
            MessageType::Trace,
            MessageType::Span,
            MessageType::MemoryEvent,
            MessageType::Batch,
        ] {
            assert_eq!(MessageType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(MessageType::from_byte(0x00), None);
        assert_eq!(MessageType::from_byte(0x7f), None);
    }

    #[test]
    fn test_wire_batch_omits_empty_lists() {
        let batch = WireBatch {
            traces: vec![Trace {
                trace_id: "t1".to_string(),
                agent_name: "a".to_string(),
                start_time: 1,
                end_time: None,
                status: TraceStatus::Running,
                metadata: None,
            }],
            ..WireBatch::default()
        };
        let json = serde_json::to_string(&batch).unwrap();
        assert!(json.contains("\"traces\""));
        assert!(!json.contains("\"spans\""));

        let back: WireBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back.traces.len(), 1);
        assert!(back.spans.is_empty());
        assert!(!back.is_empty());
    }

    #[test]
    fn test_wire_batch_empty_object() {
        let batch: WireBatch = serde_json::from_str("{}").unwrap();
        assert!(batch.is_empty());
    }
}
