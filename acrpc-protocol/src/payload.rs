//! Typed request and reply payloads.
//!
//! The protocol never looks inside a payload: it is `data_len` opaque bytes
//! produced by [`Payload::encode`] and handed back to [`Payload::decode`] on
//! the other side.

use crate::error::PayloadError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A value that can marshal itself to and from payload bytes.
pub trait Payload: Sized {
    /// Serializes the value. Failures abort a call before anything is sent.
    fn encode(&self) -> Result<Bytes, PayloadError>;

    /// Deserializes a value from exactly the payload bytes of a message.
    fn decode(data: Bytes) -> Result<Self, PayloadError>;
}

/// Empty payload. Decoding discards whatever the peer sent.
impl Payload for () {
    fn encode(&self) -> Result<Bytes, PayloadError> {
        Ok(Bytes::new())
    }

    fn decode(_data: Bytes) -> Result<Self, PayloadError> {
        Ok(())
    }
}

impl Payload for Bytes {
    fn encode(&self) -> Result<Bytes, PayloadError> {
        Ok(self.clone())
    }

    fn decode(data: Bytes) -> Result<Self, PayloadError> {
        Ok(data)
    }
}

impl Payload for Vec<u8> {
    fn encode(&self) -> Result<Bytes, PayloadError> {
        Ok(Bytes::copy_from_slice(self))
    }

    fn decode(data: Bytes) -> Result<Self, PayloadError> {
        Ok(data.to_vec())
    }
}

impl Payload for String {
    fn encode(&self) -> Result<Bytes, PayloadError> {
        Ok(Bytes::copy_from_slice(self.as_bytes()))
    }

    fn decode(data: Bytes) -> Result<Self, PayloadError> {
        String::from_utf8(data.to_vec()).map_err(|_| PayloadError::InvalidUtf8)
    }
}

/// JSON-encoded payload for any serde type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Payload for Json<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self) -> Result<Bytes, PayloadError> {
        Ok(Bytes::from(serde_json::to_vec(&self.0)?))
    }

    fn decode(data: Bytes) -> Result<Self, PayloadError> {
        Ok(Json(serde_json::from_slice(&data)?))
    }
}
