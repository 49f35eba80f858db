//! Typed encoding for extension metadata.
//!
//! The frame layer treats extensions as opaque bytes. Applications that want
//! structure inside them use [`MsgPackCodec`], which is also how the BEGIN
//! buffer reservation hint is carried.

mod msgpack;

pub use msgpack::MsgPackCodec;
