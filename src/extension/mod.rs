//! Extension module - per-direction extension metadata rules.
//!
//! Provides:
//! - [`ExtensionPolicy`] - `(frame type, direction)` → requirement lookup table
//! - [`ExtensionValidator`] - checks frames against a policy
//! - [`Reservation`] - typed BEGIN extension asking for pool capacity

mod policy;
mod reservation;
mod validator;

pub use policy::{ExtensionPolicy, ExtensionRequirement, ExtensionRule};
pub use reservation::Reservation;
pub use validator::{ExtensionValidator, Validation};
