//! TCP server implementation.

use crate::config::Config;
use crate::error::ServerError;
use crate::handler::{Handler, Request, Response};
use acrpc_protocol::{
    read_header, write_header, Header, ProtocolError, DEFAULT_PORT, MAX_PAYLOAD_SIZE,
};
use bytes::{Bytes, BytesMut};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Time allowed for one whole request/reply exchange.
    pub io_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest request payload accepted.
    pub max_payload_size: u32,
    /// Largest request content accepted.
    pub max_content_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            io_timeout: Duration::from_secs(30),
            max_connections: 1000,
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_content_size: 256 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn with_max_content_size(mut self, size: u64) -> Self {
        self.max_content_size = size;
        self
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            io_timeout: config.network.io_timeout(),
            max_connections: config.network.max_connections,
            max_payload_size: config.limits.max_payload_size,
            max_content_size: config.limits.max_content_size,
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server answering one AC/RPC request per connection.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    handler: Arc<dyn Handler>,
    stats: Arc<ServerStats>,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
}

impl Server {
    /// Binds the listening socket. Requests are not accepted until
    /// [`run`](Self::run) is called.
    pub async fn bind(config: ServerConfig, handler: Arc<dyn Handler>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            listener,
            handler,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        })
    }

    /// Returns the address actually bound, which differs from the configured
    /// one when port 0 was requested.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", self.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            let stop = *shutdown_rx.borrow_and_update();
            if stop {
                break;
            }

            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let handler = self.handler.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();

                            tokio::spawn(async move {
                                let result =
                                    Self::handle_connection(stream, addr, handler, &config, &stats)
                                        .await;

                                if let Err(e) = result {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::debug!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Server shutting down");
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Serves the single request of one connection within the I/O timeout.
    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<dyn Handler>,
        config: &ServerConfig,
        stats: &ServerStats,
    ) -> Result<(), ServerError> {
        tracing::debug!("Client connected: {}", addr);
        stream.set_nodelay(true)?;

        tokio::time::timeout(
            config.io_timeout,
            Self::serve(&mut stream, handler, config, stats),
        )
        .await
        .map_err(|_| ServerError::Timeout)??;

        stream.shutdown().await?;
        Ok(())
    }

    async fn serve(
        stream: &mut TcpStream,
        handler: Arc<dyn Handler>,
        config: &ServerConfig,
        stats: &ServerStats,
    ) -> Result<(), ServerError> {
        let header = read_header(stream).await?;
        if let Err(e) = header.validate_request() {
            tracing::warn!("rejecting request: {}", e);
            return Err(e.into());
        }

        if header.data_len > config.max_payload_size {
            return Err(ProtocolError::TooLarge {
                what: "payload",
                size: header.data_len as u64,
                max: config.max_payload_size as u64,
            }
            .into());
        }
        if header.content_len as u64 > config.max_content_size {
            return Err(ProtocolError::TooLarge {
                what: "content",
                size: header.content_len as u64,
                max: config.max_content_size,
            }
            .into());
        }

        let payload = read_exact(stream, header.data_len).await?;
        let content = read_exact(stream, header.content_len).await?;
        stats.requests_total.fetch_add(1, Ordering::Relaxed);

        let request = Request {
            header,
            payload,
            content,
        };
        let result = handler.handle(request);

        if !header.flags.wants_reply() {
            if let Err(e) = result {
                tracing::debug!("op={} msg={} failed: {}", header.op, header.msg_id, e);
            }
            return Ok(());
        }

        match result {
            Ok(response) => write_reply(stream, &header, response).await,
            Err(e) => {
                tracing::debug!("op={} msg={} failed: {}", header.op, header.msg_id, e);
                stats.errors_total.fetch_add(1, Ordering::Relaxed);
                write_error(stream, &header, &e.to_string()).await
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

async fn read_exact(stream: &mut TcpStream, len: u32) -> Result<Bytes, ServerError> {
    let mut buf = BytesMut::zeroed(len as usize);
    stream.read_exact(&mut buf).await?;
    Ok(buf.freeze())
}

async fn write_reply(
    stream: &mut TcpStream,
    request: &Header,
    response: Response,
) -> Result<(), ServerError> {
    let data_len = wire_len("payload", response.payload.len())?;
    let content_len = wire_len("content", response.content.len())?;

    let reply = Header::reply_to(request, data_len, content_len);
    write_header(stream, &reply).await?;
    stream.write_all(&response.payload).await?;
    stream.write_all(&response.content).await?;
    stream.flush().await?;
    Ok(())
}

async fn write_error(
    stream: &mut TcpStream,
    request: &Header,
    message: &str,
) -> Result<(), ServerError> {
    let reply = Header::error_reply_to(request, wire_len("payload", message.len())?);
    write_header(stream, &reply).await?;
    stream.write_all(message.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

fn wire_len(what: &'static str, len: usize) -> Result<u32, ServerError> {
    u32::try_from(len).map_err(|_| {
        ServerError::from(ProtocolError::TooLarge {
            what,
            size: len as u64,
            max: u32::MAX as u64,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{builtin_router, ops, SinkReceipt};
    use acrpc_client::{Client, ClientConfig, ClientError};
    use acrpc_protocol::{Flags, Json, HEADER_SIZE};
    use std::io::Cursor;

    async fn start(config: ServerConfig) -> (Arc<Server>, Client) {
        let server = Server::bind(config, Arc::new(builtin_router()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let server = Arc::new(server);

        let runner = server.clone();
        tokio::spawn(async move { runner.run().await });

        let client = Client::new(
            ClientConfig::new(addr.to_string()).with_timeout(Duration::from_secs(5)),
        );
        (server, client)
    }

    fn local() -> ServerConfig {
        ServerConfig::new("127.0.0.1:0".parse().unwrap())
    }

    /// Writes raw bytes and returns everything the server sends back.
    async fn raw_exchange(addr: SocketAddr, bytes: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(bytes).await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_server_not_running_until_run() {
        let server = Server::bind(local(), Arc::new(builtin_router()))
            .await
            .unwrap();
        assert!(!server.is_running());
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_echo_call() {
        let (server, client) = start(local()).await;

        let reply = client
            .call::<String, String>(ops::ECHO, &"hello".to_string(), b"0123456789")
            .await
            .unwrap();
        assert_eq!(reply.payload, "hello");
        assert_eq!(&reply.content[..], b"0123456789");
        assert_eq!(reply.msg_id, 1);

        assert_eq!(server.stats().requests_total.load(Ordering::Relaxed), 1);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_put_to_sink() {
        let (server, client) = start(local()).await;

        let data = vec![0x5Au8; 64 * 1024];
        let mut source = Cursor::new(data);
        let reply = client
            .put::<(), Json<SinkReceipt>, _>(ops::SINK, &(), 64 * 1024, &mut source)
            .await
            .unwrap();
        assert_eq!(reply.payload.into_inner().received, 64 * 1024);
        assert!(reply.content.is_empty());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_get_streams_content() {
        let (server, client) = start(local()).await;

        let mut download = client
            .get::<Vec<u8>, Vec<u8>>(ops::ECHO, &b"meta".to_vec(), b"streamed body")
            .await
            .unwrap();
        assert_eq!(download.payload, b"meta");
        assert_eq!(download.content_len, 13);

        let content = download.reader.read_to_bytes().await.unwrap();
        assert_eq!(&content[..], b"streamed body");
        server.shutdown();
    }

    #[tokio::test]
    async fn test_handler_failure_is_remote_error() {
        let (server, client) = start(local()).await;

        let err = client
            .call::<(), ()>(ops::FAIL, &(), b"")
            .await
            .unwrap_err();
        match err {
            ClientError::Remote { op, message, .. } => {
                assert_eq!(op, ops::FAIL);
                assert_eq!(message, "request failed");
            }
            other => panic!("expected remote error, got {other:?}"),
        }

        let err = client.call::<(), ()>(42, &(), b"").await.unwrap_err();
        assert!(err.is_remote());
        assert!(err.to_string().contains("unknown operation 42"));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_bad_version_gets_no_reply() {
        let (server, _client) = start(local()).await;
        let addr = server.local_addr().unwrap();

        let mut header = Header::request(ops::ECHO, 1, 0, 0);
        header.version = 0x4143_3031;
        let reply = raw_exchange(addr, &header.encode()).await;
        assert!(reply.is_empty());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_encrypted_request_rejected() {
        let (server, _client) = start(local()).await;
        let addr = server.local_addr().unwrap();

        let mut header = Header::request(ops::ECHO, 1, 0, 0);
        header.flags = Flags::from_bits(Flags::WANT_REPLY | Flags::DATA_ENCRYPTED);
        let reply = raw_exchange(addr, &header.encode()).await;
        assert!(reply.is_empty());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_no_reply_without_want_reply() {
        let (server, _client) = start(local()).await;
        let addr = server.local_addr().unwrap();

        let mut header = Header::request(ops::ECHO, 5, 2, 0);
        header.flags = Flags::new();
        let mut request = header.encode().to_vec();
        request.extend_from_slice(b"hi");

        let reply = raw_exchange(addr, &request).await;
        assert!(reply.is_empty());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_raw_reply_layout() {
        let (server, _client) = start(local()).await;
        let addr = server.local_addr().unwrap();

        let header = Header::request(ops::ECHO, 77, 3, 2);
        let mut request = header.encode().to_vec();
        request.extend_from_slice(b"abcde");

        let reply = raw_exchange(addr, &request).await;
        assert_eq!(reply.len(), HEADER_SIZE + 5);

        let reply_header = Header::decode(&reply).unwrap();
        assert!(reply_header.validate_reply().is_ok());
        assert!(!reply_header.flags.is_error());
        assert_eq!(reply_header.op, ops::ECHO);
        assert_eq!(reply_header.msg_id, 77);
        assert_eq!(reply_header.data_len, 3);
        assert_eq!(reply_header.content_len, 2);
        assert_eq!(&reply[HEADER_SIZE..], b"abcde");
        server.shutdown();
    }

    #[tokio::test]
    async fn test_oversized_payload_closes_connection() {
        let (server, client) = start(local().with_max_payload_size(8)).await;

        let err = client
            .call::<String, String>(ops::ECHO, &"far too long for the limit".to_string(), b"")
            .await
            .unwrap_err();
        assert!(err.is_transport());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let server = Arc::new(
            Server::bind(local(), Arc::new(builtin_router()))
                .await
                .unwrap(),
        );
        server.shutdown();

        let runner = server.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!server.is_running());
    }

    #[test]
    fn test_config_from_file_config() {
        let mut config = Config::default();
        config.network.io_timeout_secs = 7;
        config.limits.max_payload_size = 512;

        let server_config = ServerConfig::from(&config);
        assert_eq!(server_config.io_timeout, Duration::from_secs(7));
        assert_eq!(server_config.max_payload_size, 512);
        assert_eq!(server_config.bind_addr, config.network.bind_addr);
    }
}
