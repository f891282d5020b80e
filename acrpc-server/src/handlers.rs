//! Built-in handlers served by the `acrpc` binary.

use crate::handler::{Handler, HandlerError, Request, Response, Router};
use acrpc_protocol::Json;
use serde::{Deserialize, Serialize};

/// Operation codes of the built-in handlers.
pub mod ops {
    pub const ECHO: u32 = 1;
    pub const SINK: u32 = 2;
    pub const FAIL: u32 = 3;
}

/// Returns payload and content unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Handler for Echo {
    fn handle(&self, request: Request) -> Result<Response, HandlerError> {
        Ok(Response::new(request.payload, request.content))
    }
}

/// Reply payload of [`Sink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReceipt {
    pub received: u64,
}

/// Consumes the content and replies with its length as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sink;

impl Handler for Sink {
    fn handle(&self, request: Request) -> Result<Response, HandlerError> {
        let receipt = SinkReceipt {
            received: request.content.len() as u64,
        };
        Response::from_payload(&Json(receipt))
    }
}

/// Always fails with a fixed message.
#[derive(Debug, Clone)]
pub struct Fail {
    message: String,
}

impl Fail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for Fail {
    fn default() -> Self {
        Self::new("request failed")
    }
}

impl Handler for Fail {
    fn handle(&self, _request: Request) -> Result<Response, HandlerError> {
        Err(HandlerError::Failed(self.message.clone()))
    }
}

/// Router with every built-in handler registered under its op code.
pub fn builtin_router() -> Router {
    Router::new()
        .route(ops::ECHO, Echo)
        .route(ops::SINK, Sink)
        .route(ops::FAIL, Fail::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use acrpc_protocol::{Header, Payload};
    use bytes::Bytes;

    fn request(op: u32, payload: &'static [u8], content: &'static [u8]) -> Request {
        Request {
            header: Header::request(op, 9, payload.len() as u32, content.len() as u32),
            payload: Bytes::from_static(payload),
            content: Bytes::from_static(content),
        }
    }

    #[test]
    fn test_echo() {
        let resp = Echo.handle(request(ops::ECHO, b"ping", b"body")).unwrap();
        assert_eq!(&resp.payload[..], b"ping");
        assert_eq!(&resp.content[..], b"body");
    }

    #[test]
    fn test_sink_counts_content() {
        let resp = Sink.handle(request(ops::SINK, b"", &[0u8; 300])).unwrap();
        assert!(resp.content.is_empty());

        let Json(receipt) = Json::<SinkReceipt>::decode(resp.payload).unwrap();
        assert_eq!(receipt, SinkReceipt { received: 300 });
    }

    #[test]
    fn test_fail() {
        let err = Fail::new("disk on fire")
            .handle(request(ops::FAIL, b"", b""))
            .unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn test_builtin_router() {
        let router = builtin_router();
        assert_eq!(router.ops(), vec![ops::ECHO, ops::SINK, ops::FAIL]);
        assert!(router.handle(request(ops::FAIL, b"", b"")).is_err());
    }
}
