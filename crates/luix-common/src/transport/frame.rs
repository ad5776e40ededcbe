//! Wire framing.
//!
//! ```text
//! +--------+---------+-------+------------+-----------+-----------+
//! | magic  | version | flags | serializer | length    | body      |
//! | 2 (BE) | 1       | 1     | 1          | 4 (BE)    | length    |
//! +--------+---------+-------+------------+-----------+-----------+
//! ```
//!
//! The length is validated against the configured maximum before the body is
//! read, so an oversized frame never gets buffered.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{LuixError, Result};
use crate::protocol::{Request, Response};
use crate::transport::codec::Codec;

pub const MAGIC: u16 = 0x4C58;
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 9;

pub const FLAG_RESPONSE: u8 = 0b0000_0001;
pub const FLAG_HEARTBEAT: u8 = 0b0000_0010;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub flags: u8,
    pub serializer_id: u8,
    pub length: u32,
}

impl FrameHeader {
    pub fn new(flags: u8, serializer_id: u8, length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags,
            serializer_id,
            length,
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }

    pub fn is_heartbeat(&self) -> bool {
        self.flags & FLAG_HEARTBEAT != 0
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&MAGIC.to_be_bytes());
        buf[2] = self.version;
        buf[3] = self.flags;
        buf[4] = self.serializer_id;
        buf[5..9].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decodes and validates a header.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::Codec`] on a bad magic number, an unsupported
    /// version, or a body length above `max_content_length`.
    pub fn decode(buf: &[u8; HEADER_LEN], max_content_length: usize) -> Result<Self> {
        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(LuixError::Codec(format!("Bad frame magic 0x{:04x}", magic)));
        }
        let version = buf[2];
        if version != PROTOCOL_VERSION {
            return Err(LuixError::Codec(format!(
                "Unsupported protocol version {}",
                version
            )));
        }
        let length = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
        if length as usize > max_content_length {
            return Err(LuixError::Codec(format!(
                "Frame too large: {} bytes (max {} bytes)",
                length, max_content_length
            )));
        }
        Ok(Self {
            version,
            flags: buf[3],
            serializer_id: buf[4],
            length,
        })
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn request(codec: &Codec, request: &Request, heartbeat: bool) -> Result<Self> {
        let body = codec.encode_request(request)?;
        let flags = if heartbeat { FLAG_HEARTBEAT } else { 0 };
        Self::with_body(flags, codec, body)
    }

    pub fn response(codec: &Codec, response: &Response, heartbeat: bool) -> Result<Self> {
        let body = codec.encode_response(response)?;
        let flags = if heartbeat {
            FLAG_RESPONSE | FLAG_HEARTBEAT
        } else {
            FLAG_RESPONSE
        };
        Self::with_body(flags, codec, body)
    }

    fn with_body(flags: u8, codec: &Codec, body: Vec<u8>) -> Result<Self> {
        let length = u32::try_from(body.len())
            .map_err(|_| LuixError::Codec(format!("Frame body too large: {} bytes", body.len())))?;
        Ok(Self {
            header: FrameHeader::new(flags, codec.serializer().id(), length),
            body,
        })
    }

    /// Codec named by the frame header.
    pub fn codec(&self) -> Result<Codec> {
        Codec::from_id(self.header.serializer_id)
    }

    pub fn decode_request(&self) -> Result<Request> {
        self.codec()?.decode_request(&self.body)
    }

    pub fn decode_response(&self) -> Result<Response> {
        self.codec()?.decode_response(&self.body)
    }
}

/// Writes a frame and flushes the writer.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(HEADER_LEN + frame.body.len());
    buf.extend_from_slice(&frame.header.encode());
    buf.extend_from_slice(&frame.body);

    writer
        .write_all(&buf)
        .await
        .map_err(|e| map_io_error(e, "writing frame"))?;
    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing frame"))?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// frames.
pub async fn read_frame<R>(reader: &mut R, max_content_length: usize) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(map_io_error(e, "reading frame header")),
    }

    let header = FrameHeader::decode(&header_buf, max_content_length)?;

    let mut body = vec![0u8; header.length as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| map_io_error(e, "reading frame body"))?;

    Ok(Some(Frame { header, body }))
}

/// Map IO errors to appropriate LuixError variants
pub fn map_io_error(err: std::io::Error, context: &str) -> LuixError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            LuixError::Transport(format!("{}: timed out", context))
        }
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::NotConnected => {
            LuixError::Connection(format!("{}: Connection lost", context))
        }
        _ => LuixError::from(err),
    }
}
