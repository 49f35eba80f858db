//! Handshake module - authorization tokens and the per-stream handshake record.
//!
//! Both directions of a stream open with BEGIN. The coordinator collects the
//! two offers in a [`HandshakeRecord`] and opens the stream only when their
//! [`Authorization`] tokens are byte-equal.

mod authorization;
mod record;

pub use authorization::{matches, Authorization};
pub use record::{BeginOffer, HandshakeOutcome, HandshakeRecord};
