//! Reader over the content of a streamed download.

use crate::error::ClientError;
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, Take};
use tokio::net::TcpStream;
use tokio::time::{Instant, Sleep};

const READ_CHUNK: u64 = 64 * 1024;

/// The still-open connection of a `get` call, positioned at the start of the
/// reply content.
///
/// Yields exactly `content_len` bytes and then EOF. The call deadline keeps
/// running: once it passes, reads fail with `ErrorKind::TimedOut`. A peer
/// that closes early produces `ErrorKind::UnexpectedEof`. Dropping the
/// reader closes the connection.
#[derive(Debug)]
pub struct ContentReader {
    inner: Take<TcpStream>,
    deadline: Pin<Box<Sleep>>,
    content_len: u64,
}

impl ContentReader {
    pub(crate) fn new(stream: TcpStream, content_len: u32, deadline: Instant) -> Self {
        Self {
            inner: stream.take(content_len as u64),
            deadline: Box::pin(tokio::time::sleep_until(deadline)),
            content_len: content_len as u64,
        }
    }

    /// Total content length declared by the peer.
    pub fn content_len(&self) -> u64 {
        self.content_len
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> u64 {
        self.inner.limit()
    }

    /// Reads all remaining content into memory. The buffer grows as bytes
    /// arrive rather than up front to the declared length.
    pub async fn read_to_bytes(&mut self) -> Result<Bytes, ClientError> {
        let mut buf = BytesMut::new();
        while self.remaining() > 0 {
            buf.reserve(self.remaining().min(READ_CHUNK) as usize);
            self.read_buf(&mut buf).await?;
        }
        Ok(buf.freeze())
    }

    /// Copies all remaining content to `writer`, returning the byte count.
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> Result<u64, ClientError>
    where
        W: AsyncWrite + Unpin,
    {
        let copied = tokio::io::copy(self, writer).await?;
        writer.flush().await?;
        Ok(copied)
    }

    /// Shuts the connection down. Unread content is discarded.
    pub async fn close(self) -> Result<(), ClientError> {
        let mut stream = self.inner.into_inner();
        stream.shutdown().await?;
        Ok(())
    }
}

impl AsyncRead for ContentReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.inner.limit() == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if this.deadline.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "deadline elapsed while reading content",
            )));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if buf.filled().len() == before {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "connection closed with {} content bytes outstanding",
                    this.inner.limit()
                ),
            )));
        }

        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), server.unwrap().0)
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[tokio::test]
    async fn test_reads_exactly_content_len() {
        let (client, mut server) = pair().await;
        server.write_all(b"0123456789trailing").await.unwrap();

        let mut reader = ContentReader::new(client, 10, far_deadline());
        assert_eq!(reader.content_len(), 10);

        let content = reader.read_to_bytes().await.unwrap();
        assert_eq!(&content[..], b"0123456789");
        assert_eq!(reader.remaining(), 0);

        // Further reads report EOF rather than touching the trailing bytes.
        let mut rest = Vec::new();
        assert_eq!(reader.read_to_end(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_early_close_is_eof_error() {
        let (client, mut server) = pair().await;
        server.write_all(b"abc").await.unwrap();
        drop(server);

        let mut reader = ContentReader::new(client, 10, far_deadline());
        let result = reader.read_to_bytes().await;
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_huge_declared_length_closed_early() {
        let (client, mut server) = pair().await;
        server.write_all(b"abc").await.unwrap();
        drop(server);

        let mut reader = ContentReader::new(client, u32::MAX, far_deadline());
        let result = reader.read_to_bytes().await;
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert_eq!(reader.remaining(), u32::MAX as u64 - 3);
    }

    #[tokio::test]
    async fn test_deadline_applies_to_reads() {
        let (client, _server) = pair().await;
        let deadline = Instant::now() + Duration::from_millis(50);

        let mut reader = ContentReader::new(client, 10, deadline);
        let mut buf = [0u8; 10];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_copy_to_writer() {
        let (client, mut server) = pair().await;
        server.write_all(&[7u8; 4096]).await.unwrap();

        let mut reader = ContentReader::new(client, 4096, far_deadline());
        let mut out = Vec::new();
        let copied = reader.copy_to(&mut out).await.unwrap();
        assert_eq!(copied, 4096);
        assert!(out.iter().all(|&b| b == 7));
    }

    #[tokio::test]
    async fn test_empty_content() {
        let (client, _server) = pair().await;
        let mut reader = ContentReader::new(client, 0, far_deadline());
        assert!(reader.read_to_bytes().await.unwrap().is_empty());
        reader.close().await.unwrap();
    }
}
