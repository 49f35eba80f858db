//! # halfduplex
//!
//! Half-duplex streams over a full-duplex byte transport.
//!
//! A stream is identified by a [`StreamId`](protocol::StreamId) and consists
//! of two directions, initiator→acceptor and acceptor→initiator, each with its
//! own lifecycle. Both endpoints open a stream by exchanging BEGIN frames whose
//! authorization tokens must match; after that each direction carries DATA and
//! FLUSH until its writer ENDs or ABORTs it, or its reader RESETs it.
//!
//! ## Layers
//!
//! - [`protocol`] - byte-exact frame codec and incremental [`FrameBuffer`](protocol::FrameBuffer)
//! - [`handshake`] - authorization tokens and BEGIN pairing
//! - [`extension`] - per-direction extension requirements
//! - [`pool`] - payload storage contract
//! - [`stream`] - per-direction state machines and the [`StreamCoordinator`]
//! - [`Session`] - the coordinator driven by an async transport
//!
//! ## Example
//!
//! ```
//! use halfduplex::handshake::Authorization;
//! use halfduplex::protocol::{Direction, Frame, StreamId};
//! use halfduplex::{StreamCoordinator, StreamEvent};
//!
//! let coordinator = StreamCoordinator::with_defaults();
//! let id = StreamId(1);
//! let token = Authorization::from(0xfeed_u64);
//!
//! coordinator.receive(Frame::begin(id, Direction::InitiatorToAcceptor, token));
//! let out = coordinator.receive(Frame::begin(id, Direction::AcceptorToInitiator, token));
//! assert_eq!(out.events, vec![StreamEvent::Opened { stream_id: id }]);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod extension;
pub mod handshake;
pub mod pool;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod writer;

pub use config::{CoordinatorConfig, Escalation};
pub use error::{HalfDuplexError, Rejection, Result};
pub use session::{Session, SessionBuilder};
pub use stream::{Dispatch, StreamCoordinator, StreamEvent};
