//! Wire format encoding and decoding.
//!
//! Implements the 14-byte frame header:
//! ```text
//! ┌──────┬───────┬───────────┬─────────────┐
//! │ Type │ Flags │ Stream ID │ Body length │
//! │ 1    │ 1     │ 8 bytes   │ 4 bytes     │
//! │ u8   │       │ uint64 BE │ uint32 BE   │
//! └──────┴───────┴───────────┴─────────────┘
//! ```
//!
//! The body that follows is:
//! ```text
//! [ authorization (8) ]            BEGIN only
//! [ ext length (4) ][ ext ]        all frames, 0xFFFFFFFF = absent
//! [ payload length (4) ][ payload ] DATA / FLUSH only, 0xFFFFFFFF = absent
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{HalfDuplexError, Result};

/// Header size in bytes (fixed, exactly 14).
pub const HEADER_SIZE: usize = 14;

/// Width of the authorization token carried on BEGIN.
pub const AUTHORIZATION_SIZE: usize = 8;

/// Width of a length prefix inside the body.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Length prefix marking an absent (null) extension or payload.
pub const ABSENT_LENGTH: u32 = u32::MAX;

/// Default maximum body length (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Frame type codes.
pub mod codes {
    pub const BEGIN: u8 = 0x01;
    pub const DATA: u8 = 0x02;
    pub const END: u8 = 0x03;
    pub const ABORT: u8 = 0x04;
    pub const FLUSH: u8 = 0x05;
    pub const RESET: u8 = 0x06;
}

/// Flag constants for the protocol.
pub mod flags {
    /// Direction: acceptor-to-initiator (1) or initiator-to-acceptor (0).
    pub const DIRECTION_REPLY: u8 = 0b0000_0001;

    /// Reserved bits mask (bits 1-7).
    pub const RESERVED_MASK: u8 = 0b1111_1110;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame type code (see `codes`).
    pub type_code: u8,
    /// Flags byte (see `flags`).
    pub flags: u8,
    /// Stream identifier.
    pub stream_id: u64,
    /// Body length in bytes.
    pub body_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(type_code: u8, flags: u8, stream_id: u64, body_length: u32) -> Self {
        Self {
            type_code,
            flags,
            stream_id,
            body_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use halfduplex::protocol::{codes, Header, HEADER_SIZE};
    ///
    /// let header = Header::new(codes::DATA, 0, 42, 9);
    /// assert_eq!(header.encode().len(), HEADER_SIZE);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (14 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.type_code;
        buf[1] = self.flags;
        buf[2..10].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[10..14].copy_from_slice(&self.body_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let mut stream_id = [0u8; 8];
        stream_id.copy_from_slice(&buf[2..10]);
        Some(Self {
            type_code: buf[0],
            flags: buf[1],
            stream_id: u64::from_be_bytes(stream_id),
            body_length: u32::from_be_bytes([buf[10], buf[11], buf[12], buf[13]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Type code is one of the six known frame types
    /// - Body length doesn't exceed max
    /// - Reserved flag bits are 0
    pub fn validate(&self, max_frame_size: u32) -> Result<()> {
        if !(codes::BEGIN..=codes::RESET).contains(&self.type_code) {
            return Err(HalfDuplexError::MalformedFrame(format!(
                "Unknown frame type 0x{:02x}",
                self.type_code
            )));
        }

        if self.body_length > max_frame_size {
            return Err(HalfDuplexError::MalformedFrame(format!(
                "Body size {} exceeds maximum {}",
                self.body_length, max_frame_size
            )));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(HalfDuplexError::MalformedFrame(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if direction is acceptor-to-initiator.
    #[inline]
    pub fn is_reply(&self) -> bool {
        flags::has_flag(self.flags, flags::DIRECTION_REPLY)
    }
}
