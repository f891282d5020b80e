//! # acrpc-client
//!
//! Client library for AC/RPC.
//!
//! This crate provides:
//! - A connection-per-call client with a single deadline per call
//! - Buffered request/reply (`call`), streamed upload (`put`) and
//!   streamed download (`get`)
//! - Reply validation and error mapping
//! - Client configuration from YAML and environment variables

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod reader;

pub use client::{Client, Download, Reply};
pub use config::{ClientConfig, ConfigError};
pub use connection::Connection;
pub use error::ClientError;
pub use reader::ContentReader;
