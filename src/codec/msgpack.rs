//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written as maps (`to_vec_named`), so fields can be added to
//! an extension type without breaking older readers that ignore them.
//!
//! # Example
//!
//! ```
//! use halfduplex::codec::MsgPackCodec;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Trace {
//!     span: u64,
//! }
//!
//! let ext = MsgPackCodec::encode_bytes(&Trace { span: 9 }).unwrap();
//! let decoded: Trace = MsgPackCodec::decode(&ext).unwrap();
//! assert_eq!(decoded, Trace { span: 9 });
//! ```

use bytes::Bytes;

use crate::error::Result;

/// MessagePack codec for extension metadata.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value as a struct-as-map MsgPack document.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Encode directly into `Bytes`, ready for [`Frame::with_extension`].
    ///
    /// [`Frame::with_extension`]: crate::protocol::Frame::with_extension
    #[inline]
    pub fn encode_bytes<T: serde::Serialize>(value: &T) -> Result<Bytes> {
        Self::encode(value).map(Bytes::from)
    }

    /// Decode MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns `MsgPackDecode` if the bytes do not describe a `T`.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
