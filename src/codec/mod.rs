//! Codec module - MessagePack encoding for envelopes, stub arguments and rows.
//!
//! Request envelopes, service-stub arguments and results, and structured
//! table rows all share one encoding: [`MsgPackCodec`], built on `rmp-serde`
//! with struct-as-map output.
//!
//! # Example
//!
//! ```
//! use ytwire::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
