//! Authorization tokens and their comparison.
//!
//! Authorization is a trust boundary: the comparison always walks every byte
//! of both tokens so its running time does not depend on where they differ.

use std::fmt;
use std::hint::black_box;

use crate::protocol::AUTHORIZATION_SIZE;

/// Fixed-width authorization token offered on BEGIN.
#[derive(Clone, Copy, Default)]
pub struct Authorization([u8; AUTHORIZATION_SIZE]);

impl Authorization {
    /// Create a token from raw bytes.
    pub const fn new(bytes: [u8; AUTHORIZATION_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw token bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; AUTHORIZATION_SIZE] {
        &self.0
    }

    /// Token as a big-endian integer.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }
}

impl From<u64> for Authorization {
    fn from(value: u64) -> Self {
        Self(value.to_be_bytes())
    }
}

impl From<[u8; AUTHORIZATION_SIZE]> for Authorization {
    fn from(bytes: [u8; AUTHORIZATION_SIZE]) -> Self {
        Self(bytes)
    }
}

impl PartialEq for Authorization {
    fn eq(&self, other: &Self) -> bool {
        matches(self, other)
    }
}

impl Eq for Authorization {}

// Tokens are credentials: never print their value.
impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Authorization(..)")
    }
}

/// Byte-exact, constant-structure equality of two tokens.
///
/// Every byte pair is folded into one accumulator; there is no early exit.
pub fn matches(a: &Authorization, b: &Authorization) -> bool {
    let diff = a
        .0
        .iter()
        .zip(b.0.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    black_box(diff) == 0
}
