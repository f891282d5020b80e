//! Fixed-size message header for AC/RPC.
//!
//! Every message is a 28 byte header followed by `data_len` bytes of payload
//! and `content_len` bytes of raw content. All header fields are big-endian
//! `u32`s with no padding:
//!
//! ```text
//! +---------+------+----------+----------+-------------+--------+-------+
//! | version | type | auth_len | data_len | content_len | msg_id | flags |
//! | 4 bytes |  4   |    4     |    4     |      4      |   4    |   4   |
//! +---------+------+----------+----------+-------------+--------+-------+
//! | payload (data_len bytes) | content (content_len bytes)             |
//! +--------------------------+-----------------------------------------+
//! ```

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version marker: "AC02".
pub const MAGIC: u32 = 0x4143_3032;

/// Size of the header on the wire (7 x 4 bytes).
pub const HEADER_SIZE: usize = 28;

/// Header flags bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u32);

impl Flags {
    /// This message is a reply.
    pub const IS_REPLY: u32 = 1 << 0;
    /// The sender wants a reply.
    pub const WANT_REPLY: u32 = 1 << 1;
    /// This message signals an error.
    pub const IS_ERROR: u32 = 1 << 2;
    /// Payload is encrypted (not supported).
    pub const DATA_ENCRYPTED: u32 = 1 << 3;
    /// Content is encrypted (not supported).
    pub const CONTENT_ENCRYPTED: u32 = 1 << 4;

    const ENCRYPTED_MASK: u32 = Self::DATA_ENCRYPTED | Self::CONTENT_ENCRYPTED;

    pub fn new() -> Self {
        Self(0)
    }

    /// Unknown bits are carried through untouched.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn with_reply(mut self) -> Self {
        self.0 |= Self::IS_REPLY;
        self
    }

    pub fn with_want_reply(mut self) -> Self {
        self.0 |= Self::WANT_REPLY;
        self
    }

    pub fn with_error(mut self) -> Self {
        self.0 |= Self::IS_ERROR;
        self
    }

    pub fn is_reply(&self) -> bool {
        self.0 & Self::IS_REPLY != 0
    }

    pub fn wants_reply(&self) -> bool {
        self.0 & Self::WANT_REPLY != 0
    }

    pub fn is_error(&self) -> bool {
        self.0 & Self::IS_ERROR != 0
    }

    /// Returns whether either encryption bit is set.
    pub fn is_encrypted(&self) -> bool {
        self.0 & Self::ENCRYPTED_MASK != 0
    }
}

/// A decoded AC/RPC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    /// Protocol version, always [`MAGIC`] for valid headers.
    pub version: u32,
    /// Remote operation code (the `type` field on the wire).
    pub op: u32,
    /// Length of the authentication block; zero when unauthenticated.
    pub auth_len: u32,
    /// Length of the payload following the header.
    pub data_len: u32,
    /// Length of the raw content following the payload.
    pub content_len: u32,
    /// Correlation id, opaque to the transport.
    pub msg_id: u32,
    /// Flags bitfield.
    pub flags: Flags,
}

impl Header {
    /// Creates a request header asking for a reply.
    pub fn request(op: u32, msg_id: u32, data_len: u32, content_len: u32) -> Self {
        Self {
            version: MAGIC,
            op,
            auth_len: 0,
            data_len,
            content_len,
            msg_id,
            flags: Flags::new().with_want_reply(),
        }
    }

    /// Creates the reply header for `request`.
    pub fn reply_to(request: &Header, data_len: u32, content_len: u32) -> Self {
        Self {
            version: MAGIC,
            op: request.op,
            auth_len: 0,
            data_len,
            content_len,
            msg_id: request.msg_id,
            flags: Flags::new().with_reply(),
        }
    }

    /// Creates an error reply header for `request`. The payload carries the
    /// error message; there is no content.
    pub fn error_reply_to(request: &Header, data_len: u32) -> Self {
        let mut header = Self::reply_to(request, data_len, 0);
        header.flags = header.flags.with_error();
        header
    }

    /// Encodes the header into its 28 byte wire form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32(self.version);
        buf.put_u32(self.op);
        buf.put_u32(self.auth_len);
        buf.put_u32(self.data_len);
        buf.put_u32(self.content_len);
        buf.put_u32(self.msg_id);
        buf.put_u32(self.flags.bits());
        out
    }

    /// Appends the encoded header to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.encode());
    }

    /// Decodes a header from the first 28 bytes of `buf`.
    ///
    /// Only the version field is checked here; flag validation depends on
    /// which side of the exchange is reading.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::Incomplete {
                needed: HEADER_SIZE - buf.len(),
            });
        }

        let mut buf = &buf[..HEADER_SIZE];
        let version = buf.get_u32();
        if version != MAGIC {
            return Err(ProtocolError::InvalidVersion(version));
        }

        Ok(Self {
            version,
            op: buf.get_u32(),
            auth_len: buf.get_u32(),
            data_len: buf.get_u32(),
            content_len: buf.get_u32(),
            msg_id: buf.get_u32(),
            flags: Flags::from_bits(buf.get_u32()),
        })
    }

    /// Checks a header received where a reply is expected.
    ///
    /// Order matters: a bad version or missing reply flag means the rest of
    /// the header cannot be trusted, and encrypted bodies cannot be framed.
    /// The error flag is left to the caller.
    pub fn validate_reply(&self) -> Result<(), ProtocolError> {
        if self.version != MAGIC {
            return Err(ProtocolError::InvalidVersion(self.version));
        }
        if !self.flags.is_reply() {
            return Err(ProtocolError::NotReply(self.flags.bits()));
        }
        if self.flags.is_encrypted() {
            return Err(ProtocolError::UnsupportedEncryption(self.flags.bits()));
        }
        Ok(())
    }

    /// Checks a header received where a request is expected.
    pub fn validate_request(&self) -> Result<(), ProtocolError> {
        if self.version != MAGIC {
            return Err(ProtocolError::InvalidVersion(self.version));
        }
        if self.flags.is_reply() {
            return Err(ProtocolError::UnexpectedReply(self.flags.bits()));
        }
        if self.flags.is_encrypted() {
            return Err(ProtocolError::UnsupportedEncryption(self.flags.bits()));
        }
        Ok(())
    }
}

/// Reads and decodes one header from `reader`.
///
/// A peer that closes before 28 bytes arrive yields an
/// `UnexpectedEof` I/O error.
pub async fn read_header<R>(reader: &mut R) -> Result<Header, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut buf).await?;
    Header::decode(&buf)
}

/// Encodes and writes one header to `writer`.
pub async fn write_header<W>(writer: &mut W, header: &Header) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&header.encode()).await?;
    Ok(())
}
