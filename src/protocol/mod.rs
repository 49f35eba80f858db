//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary protocol:
//! - 14-byte header encoding/decoding
//! - Frame encode/decode with absent vs. empty field distinction
//! - Frame buffer for accumulating partial reads

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{decode, decode_with_limit, encode, Direction, Frame, FrameBody, FrameType, StreamId};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    codes, flags, Header, ABSENT_LENGTH, AUTHORIZATION_SIZE, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE,
    LENGTH_PREFIX_SIZE,
};
