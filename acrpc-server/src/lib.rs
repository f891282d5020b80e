//! # acrpc-server
//!
//! Reference AC/RPC responder.
//!
//! This crate provides:
//! - TCP accept loop with one request per connection
//! - Request framing and validation
//! - Handler dispatch by operation code
//! - Error replies for failed handlers
//! - Built-in echo, sink and failing handlers

pub mod config;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod server;

pub use config::{Config, LimitsConfig, NetworkConfig};
pub use error::ServerError;
pub use handler::{Handler, HandlerError, Request, Response, Router};
pub use server::{Server, ServerConfig, ServerStats};
