//! Per-call connection handling.
//!
//! A [`Connection`] lives for exactly one call. Every step on it, from
//! connect to the last content byte, is bounded by the single deadline
//! fixed when the call started.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::reader::ContentReader;
use acrpc_protocol::{Header, Payload, ProtocolError, HEADER_SIZE};
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

/// Encodes a request header and marshaled payload into one buffer.
///
/// Nothing touches the network here, so a payload that fails to marshal
/// aborts the call before any byte is sent.
pub fn encode_request<T: Payload>(
    op: u32,
    msg_id: u32,
    request: &T,
    content_len: u64,
) -> Result<BytesMut, ClientError> {
    let data = request.encode().map_err(|e| {
        tracing::warn!("cannot marshal AC/RPC request (op {}): {}", op, e);
        ClientError::Payload(e)
    })?;

    let data_len = wire_len("payload", data.len() as u64)?;
    let content_len = wire_len("content", content_len)?;

    let header = Header::request(op, msg_id, data_len, content_len);
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + data.len());
    header.encode_into(&mut buf);
    buf.extend_from_slice(&data);
    Ok(buf)
}

fn wire_len(what: &'static str, len: u64) -> Result<u32, ClientError> {
    u32::try_from(len).map_err(|_| {
        ClientError::Protocol(ProtocolError::TooLarge {
            what,
            size: len,
            max: u32::MAX as u64,
        })
    })
}

/// Runs one I/O step against the call deadline.
async fn bounded<T, F>(deadline: Instant, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout_at(deadline, fut).await {
        Ok(result) => result.map_err(ClientError::from),
        Err(_) => Err(ClientError::Timeout),
    }
}

/// A single-call connection to an AC/RPC peer.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    stream: S,
    deadline: Instant,
    max_payload_size: u32,
    max_content_size: u64,
}

impl Connection<TcpStream> {
    /// Connects to the configured peer.
    pub async fn open(config: &ClientConfig, deadline: Instant) -> Result<Self, ClientError> {
        tracing::debug!("connect to {}", config.addr);
        let stream = bounded(deadline, TcpStream::connect(config.addr.as_str())).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, config, deadline))
    }

    /// Hands the connection over as a reader of the reply content.
    pub fn into_content_reader(self, content_len: u32) -> Result<ContentReader, ClientError> {
        self.check_content_len(content_len)?;
        Ok(ContentReader::new(self.stream, content_len, self.deadline))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already-established stream.
    pub fn new(stream: S, config: &ClientConfig, deadline: Instant) -> Self {
        Self {
            stream,
            deadline,
            max_payload_size: config.max_payload_size,
            max_content_size: config.max_content_size,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Writes the encoded request followed by in-memory content.
    pub async fn send(&mut self, request: &[u8], content: &[u8]) -> Result<(), ClientError> {
        let deadline = self.deadline;
        bounded(deadline, self.stream.write_all(request)).await?;
        if !content.is_empty() {
            bounded(deadline, self.stream.write_all(content)).await?;
        }
        bounded(deadline, self.stream.flush()).await?;
        tracing::debug!(
            "sent request ({} bytes, {} content bytes)",
            request.len(),
            content.len()
        );
        Ok(())
    }

    /// Writes the encoded request followed by exactly `content_len` bytes
    /// drained from `source`.
    pub async fn send_from<R>(
        &mut self,
        request: &[u8],
        content_len: u32,
        source: &mut R,
    ) -> Result<(), ClientError>
    where
        R: AsyncRead + Unpin,
    {
        let deadline = self.deadline;
        bounded(deadline, self.stream.write_all(request)).await?;

        let expected = content_len as u64;
        let mut limited = source.take(expected);
        let written = bounded(deadline, tokio::io::copy(&mut limited, &mut self.stream)).await?;
        if written < expected {
            tracing::warn!(
                "content source ended after {} of {} bytes",
                written,
                expected
            );
            return Err(ClientError::ShortContent { written, expected });
        }

        bounded(deadline, self.stream.flush()).await?;
        tracing::debug!(
            "sent request ({} bytes, {} streamed content bytes)",
            request.len(),
            written
        );
        Ok(())
    }

    /// Reads and validates the reply header, then reads and decodes the
    /// reply payload.
    pub async fn recv_reply<T: Payload>(&mut self) -> Result<(Header, T), ClientError> {
        let header = self.recv_header().await?;

        if header.data_len > self.max_payload_size {
            return Err(ClientError::Protocol(ProtocolError::TooLarge {
                what: "payload",
                size: header.data_len as u64,
                max: self.max_payload_size as u64,
            }));
        }

        let data = self.read_exact(header.data_len as usize).await?;
        let payload = T::decode(data).map_err(|e| {
            tracing::warn!("cannot unmarshal AC/RPC reply (op {}): {}", header.op, e);
            ClientError::Payload(e)
        })?;

        Ok((header, payload))
    }

    /// Reads exactly `content_len` bytes of reply content.
    pub async fn recv_content(&mut self, content_len: u32) -> Result<Bytes, ClientError> {
        self.check_content_len(content_len)?;
        self.read_exact(content_len as usize).await
    }

    fn check_content_len(&self, content_len: u32) -> Result<(), ClientError> {
        if content_len as u64 > self.max_content_size {
            return Err(ClientError::Protocol(ProtocolError::TooLarge {
                what: "content",
                size: content_len as u64,
                max: self.max_content_size,
            }));
        }
        Ok(())
    }

    async fn recv_header(&mut self) -> Result<Header, ClientError> {
        let mut buf = [0u8; HEADER_SIZE];
        bounded(self.deadline, self.stream.read_exact(&mut buf)).await?;

        let header = Header::decode(&buf).map_err(|e| {
            tracing::warn!("bad AC/RPC reply header: {}", e);
            e
        })?;
        tracing::debug!("recvd header {:?}", header);

        header.validate_reply().map_err(|e| {
            tracing::warn!("bad AC/RPC reply header: {}", e);
            e
        })?;

        if header.flags.is_error() {
            let message = self.recv_error_message(&header).await;
            tracing::warn!(
                "AC/RPC error reply (op {}, msg {}): {}",
                header.op,
                header.msg_id,
                message
            );
            return Err(ClientError::Remote {
                op: header.op,
                msg_id: header.msg_id,
                message,
            });
        }

        Ok(header)
    }

    /// Best-effort read of the message carried by an error reply. The
    /// declared lengths of an error reply are not trusted for framing, so
    /// any failure here just yields an empty message.
    async fn recv_error_message(&mut self, header: &Header) -> String {
        if header.data_len == 0 || header.data_len > self.max_payload_size {
            return String::new();
        }
        match self.read_exact(header.data_len as usize).await {
            Ok(data) => String::from_utf8_lossy(&data).into_owned(),
            Err(e) => {
                tracing::debug!("could not read error message: {}", e);
                String::new()
            }
        }
    }

    async fn read_exact(&mut self, len: usize) -> Result<Bytes, ClientError> {
        let mut buf = vec![0u8; len];
        if len > 0 {
            bounded(self.deadline, self.stream.read_exact(&mut buf)).await?;
        }
        Ok(Bytes::from(buf))
    }
}
