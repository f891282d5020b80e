//! High-level client API.

use crate::config::ClientConfig;
use crate::connection::{encode_request, Connection};
use crate::error::ClientError;
use crate::reader::ContentReader;
use acrpc_protocol::Payload;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::Instant;

/// A fully read reply.
#[derive(Debug, Clone)]
pub struct Reply<T> {
    /// Message id echoed by the peer.
    pub msg_id: u32,
    /// Decoded reply payload.
    pub payload: T,
    /// Reply content.
    pub content: Bytes,
}

/// A reply whose content is still on the wire.
///
/// The caller owns the connection through `reader` and is expected to read
/// `content_len` bytes from it before dropping it.
#[derive(Debug)]
pub struct Download<T> {
    /// Message id echoed by the peer.
    pub msg_id: u32,
    /// Decoded reply payload.
    pub payload: T,
    /// Content length declared by the peer.
    pub content_len: u32,
    /// Open connection positioned at the start of the content.
    pub reader: ContentReader,
}

/// Client for one AC/RPC peer.
///
/// Every call opens its own connection, so a `Client` may be shared between
/// tasks. Message ids are taken from an atomic counter, one per call.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    msg_id: AtomicU32,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        let msg_id = AtomicU32::new(config.msg_id);
        Self { config, msg_id }
    }

    /// Creates a client after checking the configuration.
    pub fn try_new(config: ClientConfig) -> Result<Self, ClientError> {
        config
            .validate()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self::new(config))
    }

    /// Creates a client from the config file and environment variables
    /// (see [`ClientConfig::load`]).
    pub fn from_env() -> Result<Self, ClientError> {
        let config = ClientConfig::load().map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn addr(&self) -> &str {
        &self.config.addr
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Returns the message id the next call will use.
    pub fn msg_id(&self) -> u32 {
        self.msg_id.load(Ordering::Relaxed)
    }

    /// Sets the message id the next call will use, for callers that manage
    /// correlation themselves.
    pub fn set_msg_id(&self, msg_id: u32) {
        self.msg_id.store(msg_id, Ordering::Relaxed);
    }

    fn next_msg_id(&self) -> u32 {
        self.msg_id.fetch_add(1, Ordering::Relaxed)
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.timeout()
    }

    /// Sends `request` and `content`, and reads back the full reply.
    pub async fn call<Req, Res>(
        &self,
        op: u32,
        request: &Req,
        content: &[u8],
    ) -> Result<Reply<Res>, ClientError>
    where
        Req: Payload,
        Res: Payload,
    {
        let deadline = self.deadline();
        let msg_id = self.next_msg_id();
        let head = encode_request(op, msg_id, request, content.len() as u64)?;

        let mut conn = Connection::open(&self.config, deadline).await?;
        conn.send(&head, content).await?;

        let (header, payload) = conn.recv_reply::<Res>().await?;
        let content = conn.recv_content(header.content_len).await?;
        tracing::debug!(
            "call op={} msg={} done ({} content bytes)",
            op,
            msg_id,
            content.len()
        );

        Ok(Reply {
            msg_id: header.msg_id,
            payload,
            content,
        })
    }

    /// Like [`call`](Self::call), but streams exactly `content_len` bytes
    /// of request content from `source` instead of buffering it.
    pub async fn put<Req, Res, R>(
        &self,
        op: u32,
        request: &Req,
        content_len: u32,
        source: &mut R,
    ) -> Result<Reply<Res>, ClientError>
    where
        Req: Payload,
        Res: Payload,
        R: AsyncRead + Unpin,
    {
        let deadline = self.deadline();
        let msg_id = self.next_msg_id();
        let head = encode_request(op, msg_id, request, content_len as u64)?;

        let mut conn = Connection::open(&self.config, deadline).await?;
        conn.send_from(&head, content_len, source).await?;

        let (header, payload) = conn.recv_reply::<Res>().await?;
        let content = conn.recv_content(header.content_len).await?;
        tracing::debug!(
            "put op={} msg={} done ({} content bytes sent)",
            op,
            msg_id,
            content_len
        );

        Ok(Reply {
            msg_id: header.msg_id,
            payload,
            content,
        })
    }

    /// Like [`call`](Self::call), but leaves the reply content on the
    /// connection and hands the connection to the caller.
    pub async fn get<Req, Res>(
        &self,
        op: u32,
        request: &Req,
        content: &[u8],
    ) -> Result<Download<Res>, ClientError>
    where
        Req: Payload,
        Res: Payload,
    {
        let deadline = self.deadline();
        let msg_id = self.next_msg_id();
        let head = encode_request(op, msg_id, request, content.len() as u64)?;

        let mut conn = Connection::open(&self.config, deadline).await?;
        conn.send(&head, content).await?;

        let (header, payload) = conn.recv_reply::<Res>().await?;
        tracing::debug!(
            "get op={} msg={} ready ({} content bytes pending)",
            op,
            msg_id,
            header.content_len
        );

        let reader = conn.into_content_reader(header.content_len)?;
        Ok(Download {
            msg_id: header.msg_id,
            payload,
            content_len: header.content_len,
            reader,
        })
    }
}
