//! Client error types.

use acrpc_protocol::{PayloadError, ProtocolError};
use std::io;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("content source ended after {written} of {expected} bytes")]
    ShortContent { written: u64, expected: u64 },

    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("remote error (op {op}, msg {msg_id}): {message}")]
    Remote {
        op: u32,
        msg_id: u32,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns whether the failure happened at the stream layer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::ConnectionClosed
                | ClientError::Timeout
                | ClientError::ShortContent { .. }
        )
    }

    /// Returns whether the peer violated the wire protocol.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ClientError::Protocol(_))
    }

    /// Returns whether the peer flagged an application-level error.
    pub fn is_remote(&self) -> bool {
        matches!(self, ClientError::Remote { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout)
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => ClientError::ConnectionClosed,
            io::ErrorKind::TimedOut => ClientError::Timeout,
            _ => ClientError::Io(e),
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(e) => e.into(),
            other => ClientError::Protocol(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let err: ClientError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, ClientError::ConnectionClosed));

        let err: ClientError = io::Error::new(io::ErrorKind::TimedOut, "late").into();
        assert!(err.is_timeout());

        let err: ClientError = io::Error::new(io::ErrorKind::ConnectionRefused, "no").into();
        assert!(matches!(err, ClientError::Io(_)));
        assert!(err.is_transport());
    }

    #[test]
    fn test_protocol_error_mapping() {
        let err: ClientError = ProtocolError::NotReply(0).into();
        assert!(err.is_protocol());
        assert!(!err.is_transport());

        let io = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let err: ClientError = ProtocolError::Io(io).into();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[test]
    fn test_error_classes_are_distinct() {
        let remote = ClientError::Remote {
            op: 1,
            msg_id: 2,
            message: "no such key".to_string(),
        };
        assert!(remote.is_remote());
        assert!(!remote.is_transport());
        assert!(!remote.is_protocol());
        assert!(remote.to_string().contains("no such key"));

        let short = ClientError::ShortContent {
            written: 10,
            expected: 1000,
        };
        assert!(short.is_transport());
        assert!(!short.is_remote());
    }
}
