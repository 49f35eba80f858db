//! Frame types with typed accessors, plus `encode` / `decode`.
//!
//! A frame body is modelled as an enum so that only well-formed frames can be
//! built: authorization exists only on BEGIN and payload only on DATA/FLUSH.
//! Payload and extension keep the distinction between *absent* (`None`) and
//! *present but empty* (`Some(Bytes::new())`).
//!
//! # Example
//!
//! ```
//! use halfduplex::protocol::{decode, Direction, Frame, StreamId};
//! use bytes::Bytes;
//!
//! let frame = Frame::data(StreamId(1), Direction::InitiatorToAcceptor, Some(Bytes::from_static(b"hello")))
//!     .with_extension(Bytes::from_static(b"ext"));
//! let wire = frame.encode();
//! assert_eq!(decode(&wire).unwrap(), frame);
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::wire_format::{
    codes, flags, Header, ABSENT_LENGTH, AUTHORIZATION_SIZE, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE,
    LENGTH_PREFIX_SIZE,
};
use crate::error::{HalfDuplexError, Result};
use crate::handshake::Authorization;

/// Opaque stable identifier shared by both directions of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One of the two independently-lifecycled flows of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    InitiatorToAcceptor,
    AcceptorToInitiator,
}

impl Direction {
    /// Both directions, initiator-to-acceptor first.
    pub const ALL: [Direction; 2] = [
        Direction::InitiatorToAcceptor,
        Direction::AcceptorToInitiator,
    ];

    /// The opposite direction of the same stream.
    #[inline]
    pub fn peer(self) -> Self {
        match self {
            Direction::InitiatorToAcceptor => Direction::AcceptorToInitiator,
            Direction::AcceptorToInitiator => Direction::InitiatorToAcceptor,
        }
    }

    #[inline]
    fn flag(self) -> u8 {
        match self {
            Direction::InitiatorToAcceptor => 0,
            Direction::AcceptorToInitiator => flags::DIRECTION_REPLY,
        }
    }

    #[inline]
    fn from_header(header: &Header) -> Self {
        if header.is_reply() {
            Direction::AcceptorToInitiator
        } else {
            Direction::InitiatorToAcceptor
        }
    }

    /// Array slot for per-direction storage.
    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Direction::InitiatorToAcceptor => 0,
            Direction::AcceptorToInitiator => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::InitiatorToAcceptor => f.write_str("initiator-to-acceptor"),
            Direction::AcceptorToInitiator => f.write_str("acceptor-to-initiator"),
        }
    }
}

/// Frame type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Begin,
    Data,
    End,
    Abort,
    Flush,
    Reset,
}

impl FrameType {
    /// Wire type code.
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            FrameType::Begin => codes::BEGIN,
            FrameType::Data => codes::DATA,
            FrameType::End => codes::END,
            FrameType::Abort => codes::ABORT,
            FrameType::Flush => codes::FLUSH,
            FrameType::Reset => codes::RESET,
        }
    }

    /// Frame type for a wire type code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            codes::BEGIN => Some(FrameType::Begin),
            codes::DATA => Some(FrameType::Data),
            codes::END => Some(FrameType::End),
            codes::ABORT => Some(FrameType::Abort),
            codes::FLUSH => Some(FrameType::Flush),
            codes::RESET => Some(FrameType::Reset),
            _ => None,
        }
    }

    /// DATA and FLUSH carry a payload field.
    #[inline]
    pub fn carries_payload(self) -> bool {
        matches!(self, FrameType::Data | FrameType::Flush)
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameType::Begin => "BEGIN",
            FrameType::Data => "DATA",
            FrameType::End => "END",
            FrameType::Abort => "ABORT",
            FrameType::Flush => "FLUSH",
            FrameType::Reset => "RESET",
        };
        f.write_str(s)
    }
}

/// Type-specific frame content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    Begin { authorization: Authorization },
    Data { payload: Option<Bytes> },
    Flush { payload: Option<Bytes> },
    End,
    Abort,
    Reset,
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stream this frame belongs to.
    pub stream_id: StreamId,
    /// Direction this frame belongs to.
    pub direction: Direction,
    /// Type-specific content.
    pub body: FrameBody,
    /// Opaque extension metadata (zero-copy via `bytes::Bytes`).
    pub extension: Option<Bytes>,
}

impl Frame {
    /// Create a frame without extension.
    pub fn new(stream_id: StreamId, direction: Direction, body: FrameBody) -> Self {
        Self {
            stream_id,
            direction,
            body,
            extension: None,
        }
    }

    pub fn begin(stream_id: StreamId, direction: Direction, authorization: Authorization) -> Self {
        Self::new(stream_id, direction, FrameBody::Begin { authorization })
    }

    pub fn data(stream_id: StreamId, direction: Direction, payload: Option<Bytes>) -> Self {
        Self::new(stream_id, direction, FrameBody::Data { payload })
    }

    pub fn flush(stream_id: StreamId, direction: Direction, payload: Option<Bytes>) -> Self {
        Self::new(stream_id, direction, FrameBody::Flush { payload })
    }

    pub fn end(stream_id: StreamId, direction: Direction) -> Self {
        Self::new(stream_id, direction, FrameBody::End)
    }

    pub fn abort(stream_id: StreamId, direction: Direction) -> Self {
        Self::new(stream_id, direction, FrameBody::Abort)
    }

    pub fn reset(stream_id: StreamId, direction: Direction) -> Self {
        Self::new(stream_id, direction, FrameBody::Reset)
    }

    /// Attach extension metadata.
    pub fn with_extension(mut self, extension: impl Into<Bytes>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        match self.body {
            FrameBody::Begin { .. } => FrameType::Begin,
            FrameBody::Data { .. } => FrameType::Data,
            FrameBody::Flush { .. } => FrameType::Flush,
            FrameBody::End => FrameType::End,
            FrameBody::Abort => FrameType::Abort,
            FrameBody::Reset => FrameType::Reset,
        }
    }

    /// Authorization token (BEGIN only).
    #[inline]
    pub fn authorization(&self) -> Option<Authorization> {
        match self.body {
            FrameBody::Begin { authorization } => Some(authorization),
            _ => None,
        }
    }

    /// Payload (DATA/FLUSH only; `None` also when the payload is absent).
    #[inline]
    pub fn payload(&self) -> Option<&Bytes> {
        match &self.body {
            FrameBody::Data { payload } | FrameBody::Flush { payload } => payload.as_ref(),
            _ => None,
        }
    }

    /// Extension bytes, if present.
    #[inline]
    pub fn extension(&self) -> Option<&[u8]> {
        self.extension.as_deref()
    }

    /// Length of the encoded body (everything after the header).
    pub fn body_len(&self) -> usize {
        let mut len = LENGTH_PREFIX_SIZE + self.extension.as_ref().map_or(0, Bytes::len);
        match &self.body {
            FrameBody::Begin { .. } => len += AUTHORIZATION_SIZE,
            FrameBody::Data { payload } | FrameBody::Flush { payload } => {
                len += LENGTH_PREFIX_SIZE + payload.as_ref().map_or(0, Bytes::len);
            }
            FrameBody::End | FrameBody::Abort | FrameBody::Reset => {}
        }
        len
    }

    /// Build the wire header for this frame.
    pub fn header(&self) -> Header {
        Header::new(
            self.frame_type().code(),
            self.direction.flag(),
            self.stream_id.0,
            self.body_len() as u32,
        )
    }

    /// Encode the body (everything after the header).
    pub fn encode_body(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.body_len());
        if let FrameBody::Begin { authorization } = &self.body {
            buf.put_slice(authorization.as_bytes());
        }
        put_prefixed(&mut buf, self.extension.as_ref());
        if let FrameBody::Data { payload } | FrameBody::Flush { payload } = &self.body {
            put_prefixed(&mut buf, payload.as_ref());
        }
        buf.freeze()
    }

    /// Encode the complete frame as a single byte vector.
    ///
    /// Encoding is total: every `Frame` value has a wire form.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.encode_body();
        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        out.extend_from_slice(&self.header().encode());
        out.extend_from_slice(&body);
        out
    }

    /// Rebuild a frame from a validated header and its body bytes.
    pub fn from_parts(header: &Header, mut body: Bytes) -> Result<Self> {
        let frame_type = FrameType::from_code(header.type_code).ok_or_else(|| {
            HalfDuplexError::MalformedFrame(format!(
                "Unknown frame type 0x{:02x}",
                header.type_code
            ))
        })?;
        if body.len() != header.body_length as usize {
            return Err(HalfDuplexError::MalformedFrame(format!(
                "Body length {} does not match header length {}",
                body.len(),
                header.body_length
            )));
        }

        let authorization = if frame_type == FrameType::Begin {
            if body.remaining() < AUTHORIZATION_SIZE {
                return Err(HalfDuplexError::MalformedFrame(
                    "Truncated authorization".to_string(),
                ));
            }
            let mut token = [0u8; AUTHORIZATION_SIZE];
            body.copy_to_slice(&mut token);
            Some(Authorization::new(token))
        } else {
            None
        };

        let extension = take_prefixed(&mut body, "extension")?;

        let payload = if frame_type.carries_payload() {
            take_prefixed(&mut body, "payload")?
        } else {
            None
        };

        if body.has_remaining() {
            return Err(HalfDuplexError::MalformedFrame(format!(
                "{} trailing bytes after {}",
                body.remaining(),
                frame_type
            )));
        }

        let body = match (frame_type, authorization) {
            (FrameType::Begin, Some(authorization)) => FrameBody::Begin { authorization },
            (FrameType::Data, _) => FrameBody::Data { payload },
            (FrameType::Flush, _) => FrameBody::Flush { payload },
            (FrameType::End, _) => FrameBody::End,
            (FrameType::Abort, _) => FrameBody::Abort,
            (FrameType::Reset, _) => FrameBody::Reset,
            (FrameType::Begin, None) => {
                return Err(HalfDuplexError::MalformedFrame(
                    "BEGIN without authorization".to_string(),
                ))
            }
        };

        Ok(Self {
            stream_id: StreamId(header.stream_id),
            direction: Direction::from_header(header),
            body,
            extension,
        })
    }
}

fn put_prefixed(buf: &mut BytesMut, field: Option<&Bytes>) {
    match field {
        Some(bytes) => {
            debug_assert!((bytes.len() as u64) < ABSENT_LENGTH as u64);
            buf.put_u32(bytes.len() as u32);
            buf.put_slice(bytes);
        }
        None => buf.put_u32(ABSENT_LENGTH),
    }
}

fn take_prefixed(body: &mut Bytes, field: &str) -> Result<Option<Bytes>> {
    if body.remaining() < LENGTH_PREFIX_SIZE {
        return Err(HalfDuplexError::MalformedFrame(format!(
            "Truncated {} length",
            field
        )));
    }
    let len = body.get_u32();
    if len == ABSENT_LENGTH {
        return Ok(None);
    }
    let len = len as usize;
    if len > body.remaining() {
        return Err(HalfDuplexError::MalformedFrame(format!(
            "{} length {} exceeds remaining {} bytes",
            field,
            len,
            body.remaining()
        )));
    }
    Ok(Some(body.copy_to_bytes(len)))
}

/// Decode exactly one frame from `wire`, using the default size limit.
pub fn decode(wire: &[u8]) -> Result<Frame> {
    decode_with_limit(wire, DEFAULT_MAX_FRAME_SIZE)
}

/// Decode exactly one frame from `wire`.
///
/// The buffer must hold the header and the complete body, nothing more.
pub fn decode_with_limit(wire: &[u8], max_frame_size: u32) -> Result<Frame> {
    let header = Header::decode(wire)
        .ok_or_else(|| HalfDuplexError::MalformedFrame("Truncated header".to_string()))?;
    header.validate(max_frame_size)?;

    let expected = HEADER_SIZE + header.body_length as usize;
    if wire.len() != expected {
        return Err(HalfDuplexError::MalformedFrame(format!(
            "Frame length {} does not match expected {}",
            wire.len(),
            expected
        )));
    }

    Frame::from_parts(&header, Bytes::copy_from_slice(&wire[HEADER_SIZE..]))
}

/// Encode a frame (standalone function).
#[inline]
pub fn encode(frame: &Frame) -> Vec<u8> {
    frame.encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SID: StreamId = StreamId(0x0102_0304_0506_0708);

    fn auth(v: u64) -> Authorization {
        Authorization::from(v)
    }

    #[test]
    fn test_begin_layout() {
        let frame = Frame::begin(SID, Direction::AcceptorToInitiator, auth(0xAABB));
        let wire = frame.encode();

        assert_eq!(wire[0], codes::BEGIN);
        assert_eq!(wire[1], flags::DIRECTION_REPLY);
        assert_eq!(&wire[2..10], &[1, 2, 3, 4, 5, 6, 7, 8]);
        // authorization + absent extension prefix
        assert_eq!(&wire[10..14], &12u32.to_be_bytes());
        assert_eq!(&wire[14..22], &0xAABBu64.to_be_bytes());
        assert_eq!(&wire[22..26], &ABSENT_LENGTH.to_be_bytes());
        assert_eq!(wire.len(), HEADER_SIZE + 12);
    }

    #[test]
    fn test_data_absent_and_empty_payload_differ_on_wire() {
        let absent = Frame::data(SID, Direction::InitiatorToAcceptor, None).encode();
        let empty = Frame::data(SID, Direction::InitiatorToAcceptor, Some(Bytes::new())).encode();

        assert_ne!(absent, empty);
        assert_eq!(&absent[HEADER_SIZE + 4..], &ABSENT_LENGTH.to_be_bytes());
        assert_eq!(&empty[HEADER_SIZE + 4..], &0u32.to_be_bytes());

        assert_eq!(decode(&absent).unwrap().payload(), None);
        assert_eq!(
            decode(&empty).unwrap().payload(),
            Some(&Bytes::new())
        );
    }

    #[test]
    fn test_data_with_extension_layout() {
        let frame = Frame::data(SID, Direction::InitiatorToAcceptor, Some(Bytes::from_static(b"hello")))
            .with_extension(Bytes::from_static(b"ext"));
        let wire = frame.encode();

        let body = &wire[HEADER_SIZE..];
        assert_eq!(&body[0..4], &3u32.to_be_bytes());
        assert_eq!(&body[4..7], b"ext");
        assert_eq!(&body[7..11], &5u32.to_be_bytes());
        assert_eq!(&body[11..], b"hello");
    }

    #[test]
    fn test_roundtrip_every_frame_type() {
        let frames = vec![
            Frame::begin(SID, Direction::InitiatorToAcceptor, auth(7)),
            Frame::begin(SID, Direction::AcceptorToInitiator, auth(7)).with_extension(Bytes::from_static(b"e")),
            Frame::data(SID, Direction::AcceptorToInitiator, Some(Bytes::from_static(b"x"))),
            Frame::flush(SID, Direction::InitiatorToAcceptor, None).with_extension(Bytes::new()),
            Frame::end(SID, Direction::InitiatorToAcceptor).with_extension(Bytes::from_static(b"bye")),
            Frame::abort(SID, Direction::AcceptorToInitiator),
            Frame::reset(SID, Direction::InitiatorToAcceptor),
        ];
        for frame in frames {
            assert_eq!(decode(&frame.encode()).unwrap(), frame);
        }
    }

    #[test]
    fn test_empty_extension_distinct_from_absent() {
        let with_empty = Frame::end(SID, Direction::InitiatorToAcceptor).with_extension(Bytes::new());
        let decoded = decode(&with_empty.encode()).unwrap();
        assert_eq!(decoded.extension(), Some(&b""[..]));

        let without = decode(&Frame::end(SID, Direction::InitiatorToAcceptor).encode()).unwrap();
        assert_eq!(without.extension(), None);
    }

    #[test]
    fn test_decode_truncated_header() {
        let wire = Frame::end(SID, Direction::InitiatorToAcceptor).encode();
        let err = decode(&wire[..6]).unwrap_err();
        assert!(matches!(err, HalfDuplexError::MalformedFrame(_)));
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut wire = Frame::end(SID, Direction::InitiatorToAcceptor).encode();
        wire[0] = 0x42;
        assert!(decode(&wire).unwrap_err().to_string().contains("Unknown frame type"));
    }

    #[test]
    fn test_decode_truncated_authorization() {
        // BEGIN header announcing a 4-byte body: too short for the token
        let mut wire = Header::new(codes::BEGIN, 0, 1, 4).encode().to_vec();
        wire.extend_from_slice(&[0, 0, 0, 1]);
        assert!(decode(&wire).unwrap_err().to_string().contains("authorization"));
    }

    #[test]
    fn test_decode_length_prefix_overruns_body() {
        let mut wire = Header::new(codes::END, 0, 1, 6).encode().to_vec();
        wire.extend_from_slice(&10u32.to_be_bytes());
        wire.extend_from_slice(b"ab");
        assert!(decode(&wire).unwrap_err().to_string().contains("exceeds remaining"));
    }

    #[test]
    fn test_decode_trailing_bytes_in_body() {
        let mut wire = Header::new(codes::RESET, 0, 1, 6).encode().to_vec();
        wire.extend_from_slice(&ABSENT_LENGTH.to_be_bytes());
        wire.extend_from_slice(b"zz");
        assert!(decode(&wire).unwrap_err().to_string().contains("trailing"));
    }

    #[test]
    fn test_decode_buffer_longer_than_frame() {
        let mut wire = Frame::abort(SID, Direction::InitiatorToAcceptor).encode();
        wire.push(0);
        assert!(decode(&wire).unwrap_err().to_string().contains("does not match"));
    }

    #[test]
    fn test_decode_respects_limit() {
        let frame = Frame::data(SID, Direction::InitiatorToAcceptor, Some(Bytes::from(vec![0u8; 64])));
        assert!(decode_with_limit(&frame.encode(), 16).is_err());
        assert!(decode_with_limit(&frame.encode(), 1024).is_ok());
    }

    #[test]
    fn test_accessors() {
        let begin = Frame::begin(SID, Direction::InitiatorToAcceptor, auth(9));
        assert_eq!(begin.frame_type(), FrameType::Begin);
        assert_eq!(begin.authorization(), Some(auth(9)));
        assert_eq!(begin.payload(), None);

        let data = Frame::data(SID, Direction::InitiatorToAcceptor, Some(Bytes::from_static(b"p")));
        assert_eq!(data.authorization(), None);
        assert_eq!(data.payload().map(|p| &p[..]), Some(&b"p"[..]));
    }

    #[test]
    fn test_direction_peer_and_display() {
        assert_eq!(Direction::InitiatorToAcceptor.peer(), Direction::AcceptorToInitiator);
        assert_eq!(Direction::AcceptorToInitiator.peer(), Direction::InitiatorToAcceptor);
        assert_eq!(Direction::InitiatorToAcceptor.to_string(), "initiator-to-acceptor");
        assert_eq!(FrameType::Flush.to_string(), "FLUSH");
    }

    #[test]
    fn test_frame_type_codes_roundtrip() {
        for ft in [
            FrameType::Begin,
            FrameType::Data,
            FrameType::End,
            FrameType::Abort,
            FrameType::Flush,
            FrameType::Reset,
        ] {
            assert_eq!(FrameType::from_code(ft.code()), Some(ft));
        }
        assert_eq!(FrameType::from_code(0), None);
    }
}
