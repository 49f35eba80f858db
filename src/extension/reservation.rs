//! Buffer reservation hint carried in a BEGIN extension.
//!
//! A writer may announce how much payload it intends to send by attaching a
//! MsgPack map `{"reserve": <u32>}` to its BEGIN. The coordinator reserves
//! that many bytes from the pool when the direction opens. Extensions that
//! are not a reservation map are opaque to the coordinator and ignored here.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::MsgPackCodec;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reserve: u32,
}

impl Reservation {
    pub fn new(reserve: u32) -> Self {
        Self { reserve }
    }

    /// Encode as a BEGIN extension.
    pub fn to_extension(&self) -> Result<Bytes> {
        MsgPackCodec::encode_bytes(self)
    }

    /// Reservation declared by a BEGIN extension, if it carries one.
    pub fn declared_in(extension: Option<&[u8]>) -> Option<usize> {
        let bytes = extension?;
        MsgPackCodec::decode::<Reservation>(bytes)
            .ok()
            .map(|r| r.reserve as usize)
    }
}
