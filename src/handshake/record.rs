//! Transient handshake state for a stream.
//!
//! A `HandshakeRecord` exists from the first BEGIN on a new stream id until
//! both BEGIN frames have been seen (or the handshake fails). It is owned by
//! the coordinator's per-stream state and dropped once settled.

use bytes::Bytes;

use super::authorization::{matches, Authorization};
use crate::protocol::{Direction, StreamId};

/// What one direction offered in its BEGIN frame.
#[derive(Debug, Clone)]
pub struct BeginOffer {
    pub authorization: Authorization,
    pub extension: Option<Bytes>,
}

/// Result of comparing both offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Both tokens are byte-equal; the stream is bound to this authorization.
    Agreed(Authorization),
    /// The tokens differ.
    Mismatch,
}

/// Offers collected during the handshake.
#[derive(Debug, Clone)]
pub struct HandshakeRecord {
    stream_id: StreamId,
    offers: [Option<BeginOffer>; 2],
}

impl HandshakeRecord {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            offers: [None, None],
        }
    }

    #[inline]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Record a BEGIN offer.
    ///
    /// Returns `false` if that direction already offered (duplicate BEGIN).
    pub fn offer(&mut self, direction: Direction, offer: BeginOffer) -> bool {
        let slot = &mut self.offers[direction.index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(offer);
        true
    }

    pub fn offer_of(&self, direction: Direction) -> Option<&BeginOffer> {
        self.offers[direction.index()].as_ref()
    }

    /// Compare the two tokens. `None` while the handshake is incomplete.
    pub fn settle(&self) -> Option<HandshakeOutcome> {
        match &self.offers {
            [Some(initiator), Some(acceptor)] => {
                if matches(&initiator.authorization, &acceptor.authorization) {
                    Some(HandshakeOutcome::Agreed(initiator.authorization))
                } else {
                    Some(HandshakeOutcome::Mismatch)
                }
            }
            _ => None,
        }
    }
}
