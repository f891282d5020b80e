//! # acrpc-protocol
//!
//! Wire protocol implementation for AC/RPC.
//!
//! This crate provides:
//! - The fixed 28-byte message header and its flag bitfield
//! - Async helpers for reading and writing headers on a byte stream
//! - The `Payload` capability used to marshal typed request/reply bodies
//! - Protocol error types

pub mod error;
pub mod header;
pub mod payload;

pub use error::{PayloadError, ProtocolError};
pub use header::{read_header, write_header, Flags, Header, HEADER_SIZE, MAGIC};
pub use payload::{Json, Payload};

/// Default port for AC/RPC peers.
pub const DEFAULT_PORT: u16 = 7402;

/// Maximum payload size accepted by default (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;
