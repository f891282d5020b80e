//! Request handlers and dispatch.

use acrpc_protocol::{Header, Payload, PayloadError};
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;

/// A fully received request.
#[derive(Debug, Clone)]
pub struct Request {
    pub header: Header,
    pub payload: Bytes,
    pub content: Bytes,
}

impl Request {
    /// Operation code of the request.
    pub fn op(&self) -> u32 {
        self.header.op
    }

    /// Decodes the request payload.
    pub fn decode<T: Payload>(&self) -> Result<T, HandlerError> {
        Ok(T::decode(self.payload.clone())?)
    }
}

/// A handler's reply, before framing.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub payload: Bytes,
    pub content: Bytes,
}

impl Response {
    pub fn new(payload: Bytes, content: Bytes) -> Self {
        Self { payload, content }
    }

    /// Creates a response from an encodable payload, with no content.
    pub fn from_payload<T: Payload>(payload: &T) -> Result<Self, HandlerError> {
        Ok(Self {
            payload: payload.encode()?,
            content: Bytes::new(),
        })
    }

    pub fn with_content(mut self, content: Bytes) -> Self {
        self.content = content;
        self
    }
}

/// Errors returned by handlers. The message is sent back to the caller in
/// an error reply.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unknown operation {0}")]
    UnknownOp(u32),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("{0}")]
    Failed(String),
}

/// Handles one request.
///
/// Handlers run on the connection's task and should not block.
pub trait Handler: Send + Sync {
    fn handle(&self, request: Request) -> Result<Response, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(Request) -> Result<Response, HandlerError> + Send + Sync,
{
    fn handle(&self, request: Request) -> Result<Response, HandlerError> {
        self(request)
    }
}

/// Dispatches requests to handlers by operation code.
#[derive(Default)]
pub struct Router {
    routes: HashMap<u32, Box<dyn Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `op`, replacing any previous one.
    pub fn route(mut self, op: u32, handler: impl Handler + 'static) -> Self {
        self.routes.insert(op, Box::new(handler));
        self
    }

    /// Returns the registered operation codes.
    pub fn ops(&self) -> Vec<u32> {
        let mut ops: Vec<u32> = self.routes.keys().copied().collect();
        ops.sort_unstable();
        ops
    }
}

impl Handler for Router {
    fn handle(&self, request: Request) -> Result<Response, HandlerError> {
        match self.routes.get(&request.op()) {
            Some(handler) => handler.handle(request),
            None => Err(HandlerError::UnknownOp(request.op())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acrpc_protocol::Json;

    fn request(op: u32, payload: &'static [u8]) -> Request {
        Request {
            header: Header::request(op, 1, payload.len() as u32, 0),
            payload: Bytes::from_static(payload),
            content: Bytes::new(),
        }
    }

    #[test]
    fn test_router_dispatch() {
        let router = Router::new()
            .route(1, |_req: Request| -> Result<Response, HandlerError> {
                Ok(Response::new(Bytes::from_static(b"one"), Bytes::new()))
            })
            .route(2, |req: Request| -> Result<Response, HandlerError> {
                Ok(Response::new(req.payload, Bytes::new()))
            });

        assert_eq!(router.ops(), vec![1, 2]);

        let resp = router.handle(request(1, b"")).unwrap();
        assert_eq!(&resp.payload[..], b"one");

        let resp = router.handle(request(2, b"two")).unwrap();
        assert_eq!(&resp.payload[..], b"two");
    }

    #[test]
    fn test_router_unknown_op() {
        let router = Router::new();
        let err = router.handle(request(99, b"")).unwrap_err();
        assert!(matches!(err, HandlerError::UnknownOp(99)));
        assert_eq!(err.to_string(), "unknown operation 99");
    }

    #[test]
    fn test_request_decode() {
        let req = request(1, br#"{"n":5}"#);
        let Json(value): Json<serde_json::Value> = req.decode().unwrap();
        assert_eq!(value["n"], 5);

        let req = request(1, b"not json");
        let err = req.decode::<Json<serde_json::Value>>().unwrap_err();
        assert!(matches!(err, HandlerError::Payload(_)));
    }

    #[test]
    fn test_response_from_payload() {
        let resp = Response::from_payload(&"hello".to_string())
            .unwrap()
            .with_content(Bytes::from_static(b"body"));
        assert_eq!(&resp.payload[..], b"hello");
        assert_eq!(&resp.content[..], b"body");
    }
}
