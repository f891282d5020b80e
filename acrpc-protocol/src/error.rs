//! Protocol and payload error types.

use thiserror::Error;

/// Protocol-level errors raised while framing or validating messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("incomplete header: need {needed} more bytes")]
    Incomplete { needed: usize },

    #[error("protocol botched: invalid AC/RPC version {0:#010x}")]
    InvalidVersion(u32),

    #[error("protocol botched: invalid response (flags {0:#x})")]
    NotReply(u32),

    #[error("protocol botched: unexpected reply (flags {0:#x})")]
    UnexpectedReply(u32),

    #[error("unsupported AC/RPC encryption (flags {0:#x})")]
    UnsupportedEncryption(u32),

    #[error("{what} too large: {size} bytes (max {max})")]
    TooLarge {
        what: &'static str,
        size: u64,
        max: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the peer's header could not be understood at all.
    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, ProtocolError::InvalidVersion(_))
    }
}

/// Errors raised while marshaling or unmarshaling a payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("invalid payload: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidVersion(0x41433031);
        assert!(err.to_string().contains("0x41433031"));
        assert!(err.is_version_mismatch());

        let err = ProtocolError::NotReply(0x2);
        assert!(err.to_string().contains("invalid response"));
        assert!(!err.is_version_mismatch());

        let err = ProtocolError::UnsupportedEncryption(0x9);
        assert!(err.to_string().contains("encryption"));

        let err = ProtocolError::Incomplete { needed: 10 };
        assert!(err.to_string().contains("10"));

        let err = ProtocolError::TooLarge {
            what: "payload",
            size: 100,
            max: 50,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("payload"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn test_payload_error_display() {
        let err = PayloadError::Invalid("bad".to_string());
        assert_eq!(err.to_string(), "invalid payload: bad");
        assert!(PayloadError::InvalidUtf8.to_string().contains("UTF-8"));
    }
}
