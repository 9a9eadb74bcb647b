//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always written with `to_vec_named` so field names travel with
//! the data. Request envelopes and rows stay readable when either side adds
//! optional fields.

use bytes::Bytes;

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Encode a value straight into a `Bytes` payload.
    #[inline]
    pub fn encode_bytes<T: serde::Serialize + ?Sized>(value: &T) -> Result<Bytes> {
        Self::encode(value).map(Bytes::from)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
