//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 14 bytes
//! - `WaitingForBody`: Header parsed, need N more body bytes
//!
//! # Example
//!
//! ```ignore
//! use halfduplex::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the transport
//! let frames = buffer.push(&chunk)?;
//!
//! for frame in frames {
//!     println!("Got {} on stream {}", frame.frame_type(), frame.stream_id);
//! }
//! ```

use bytes::BytesMut;

use super::wire_format::{Header, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 14 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for body bytes.
    WaitingForBody { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// All data is stored in a single `BytesMut` buffer; frame bodies are split
/// off and frozen without copying.
pub struct FrameBuffer {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed body size.
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame body: 16MB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with custom max body size.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// If data is fragmented, partial data is buffered internally for the
    /// next push.
    ///
    /// # Errors
    ///
    /// Returns `MalformedFrame` if a header or body is invalid. The buffer
    /// should be discarded afterwards: the connection is no longer in sync.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match &self.state {
                State::WaitingForHeader => {
                    let header = match Header::decode(&self.buffer) {
                        Some(h) => h,
                        None => return Ok(None),
                    };

                    // Reject before buffering an oversized body
                    header.validate(self.max_frame_size)?;

                    let _ = self.buffer.split_to(HEADER_SIZE);
                    self.state = State::WaitingForBody { header };
                }

                State::WaitingForBody { header } => {
                    let needed = header.body_length as usize;
                    if self.buffer.len() < needed {
                        return Ok(None);
                    }

                    let header = *header;
                    let body = self.buffer.split_to(needed).freeze();
                    self.state = State::WaitingForHeader;

                    return Frame::from_parts(&header, body).map(Some);
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::Authorization;
    use crate::protocol::{codes, Direction, FrameType, StreamId};
    use bytes::Bytes;

    fn data_bytes(stream: u64, payload: &[u8]) -> Vec<u8> {
        Frame::data(
            StreamId(stream),
            Direction::InitiatorToAcceptor,
            Some(Bytes::copy_from_slice(payload)),
        )
        .encode()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&data_bytes(42, b"hello")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stream_id, StreamId(42));
        assert_eq!(frames[0].payload().map(|p| &p[..]), Some(&b"hello"[..]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = Frame::begin(StreamId(1), Direction::InitiatorToAcceptor, Authorization::from(3u64)).encode();
        combined.extend(data_bytes(1, b"second"));
        combined.extend(Frame::end(StreamId(1), Direction::InitiatorToAcceptor).encode());

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].frame_type(), FrameType::Begin);
        assert_eq!(frames[1].frame_type(), FrameType::Data);
        assert_eq!(frames[2].frame_type(), FrameType::End);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_header() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = data_bytes(42, b"test");

        let frames = buffer.push(&frame_bytes[..5]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        let frames = buffer.push(&frame_bytes[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_body() {
        let mut buffer = FrameBuffer::new();
        let payload = b"this is a longer payload that will be fragmented";
        let frame_bytes = data_bytes(42, payload);

        let partial_len = HEADER_SIZE + 10;
        let frames = buffer.push(&frame_bytes[..partial_len]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForBody");

        let frames = buffer.push(&frame_bytes[partial_len..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload().map(|p| &p[..]), Some(&payload[..]));
    }

    #[test]
    fn test_max_frame_size_validation() {
        let mut buffer = FrameBuffer::with_max_frame_size(100);
        let header = Header::new(codes::DATA, 0, 42, 1000);

        let result = buffer.push(&header.encode());

        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let mut buffer = FrameBuffer::new();
        let header = Header::new(0x09, 0, 1, 4);
        assert!(buffer.push(&header.encode()).is_err());
    }

    #[test]
    fn test_inconsistent_body_is_malformed() {
        let mut buffer = FrameBuffer::new();
        // END announcing 2 body bytes: too short for the extension prefix
        let mut bytes = Header::new(codes::END, 0, 1, 2).encode().to_vec();
        bytes.extend_from_slice(&[0, 0]);
        assert!(buffer.push(&bytes).is_err());
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();

        let frame1 = data_bytes(1, b"first");
        let frame2 = data_bytes(2, b"second");

        let mut data = frame1.clone();
        data.extend_from_slice(&frame2[..5]);

        let frames = buffer.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stream_id, StreamId(1));
        assert_eq!(buffer.len(), 5);

        let frames = buffer.push(&frame2[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stream_id, StreamId(2));
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = data_bytes(42, b"hi");

        let mut all_frames = Vec::new();
        for byte in &frame_bytes {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(all_frames[0].payload().map(|p| &p[..]), Some(&b"hi"[..]));
    }
}
