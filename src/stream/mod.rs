//! Stream module - per-direction lifecycles and the stream registry.
//!
//! - [`DirectionMachine`] - state machine for one direction
//! - [`StreamCoordinator`] - routes frames to streams, settles handshakes,
//!   applies the escalation policy, destroys finished streams

mod coordinator;
mod direction;

pub use coordinator::{Dispatch, StreamCoordinator, StreamEvent};
pub use direction::{Delivery, DeliveryKind, DirectionMachine, DirectionState, Drained};
