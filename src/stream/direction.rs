//! Per-direction frame state machine.
//!
//! ```text
//!            BEGIN agreed          END (writer)
//!   Idle ───────────────► Open ─────────────────► HalfClosedLocal ──drain/close_read──► Closed
//!                           │                                                             ▲
//!                           └── close_read (reader) ──► HalfClosedRemote ──── END ────────┘
//!
//!   Open / HalfClosed*  ── ABORT ──► Aborted
//!   any non-terminal    ── RESET ──► Reset
//! ```
//!
//! Every move into a terminal state goes through [`DirectionMachine::terminate`],
//! which drops all pooled storage of the direction. Buffers are released
//! there and nowhere else.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{HalfDuplexError, Rejection, Result};
use crate::extension::ExtensionValidator;
use crate::pool::{BufferPool, PooledBuffer};
use crate::protocol::{Direction, Frame, FrameBody, FrameType, StreamId};

/// Lifecycle state of one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectionState {
    Idle,
    Open,
    /// The writer sent END; no further DATA.
    HalfClosedLocal,
    /// The reader stopped reading; the writer must END.
    HalfClosedRemote,
    Closed,
    Aborted,
    Reset,
}

impl DirectionState {
    /// CLOSED, ABORTED and RESET are terminal.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DirectionState::Closed | DirectionState::Aborted | DirectionState::Reset
        )
    }
}

/// Whether a delivery came from DATA or FLUSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    Data,
    Flush,
}

/// Payload handed to the reader of a direction.
///
/// `payload` keeps the absent (`None`) / empty (`Some(empty)`) distinction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub kind: DeliveryKind,
    pub payload: Option<Bytes>,
    pub extension: Option<Bytes>,
}

/// Result of draining a direction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Drained {
    /// Deliveries in arrival order.
    pub deliveries: Vec<Delivery>,
    /// The writer's END has been consumed; the direction is now closed.
    pub ended: bool,
}

#[derive(Debug)]
struct Pending {
    delivery: Delivery,
    // Dropped together with the delivery; releases the pool handle.
    _storage: Option<PooledBuffer>,
}

/// State machine for one direction of one stream.
#[derive(Debug)]
pub struct DirectionMachine {
    stream_id: StreamId,
    direction: Direction,
    state: DirectionState,
    pending: VecDeque<Pending>,
    reservation: Option<PooledBuffer>,
    termination: Option<Rejection>,
    pool: Arc<dyn BufferPool>,
}

impl DirectionMachine {
    pub fn new(stream_id: StreamId, direction: Direction, pool: Arc<dyn BufferPool>) -> Self {
        Self {
            stream_id,
            direction,
            state: DirectionState::Idle,
            pending: VecDeque::new(),
            reservation: None,
            termination: None,
            pool,
        }
    }

    #[inline]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn state(&self) -> DirectionState {
        self.state
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Why the direction ended abnormally, if it did.
    #[inline]
    pub fn termination(&self) -> Option<Rejection> {
        self.termination
    }

    /// Deliveries waiting for the reader.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Bytes reserved at BEGIN, if any.
    pub fn reserved(&self) -> usize {
        self.reservation.as_ref().map_or(0, PooledBuffer::requested)
    }

    /// Complete the handshake: IDLE → OPEN, reserving `reserve` bytes if the
    /// BEGIN extension declared a reservation.
    ///
    /// A failed reservation aborts the direction with `OutOfMemory`.
    pub fn open(&mut self, reserve: Option<usize>) -> Result<()> {
        if self.state != DirectionState::Idle {
            return Err(self.violation(FrameType::Begin));
        }

        if let Some(size) = reserve.filter(|&n| n > 0) {
            match PooledBuffer::acquire(&self.pool, size) {
                Ok(buffer) => self.reservation = Some(buffer),
                Err(e) => {
                    self.terminate(DirectionState::Aborted, Some(Rejection::OutOfMemory));
                    return Err(e);
                }
            }
        }

        self.transition(DirectionState::Open);
        Ok(())
    }

    /// Apply an inbound frame.
    ///
    /// On success returns the new state. On failure the direction has
    /// already been driven to RESET (or ABORTED for `OutOfMemory`) and the
    /// error names the cause.
    pub fn receive(&mut self, frame: &Frame, validator: &ExtensionValidator) -> Result<DirectionState> {
        debug_assert_eq!(frame.direction, self.direction);

        // RESET is accepted in every non-terminal state.
        if let FrameBody::Reset = frame.body {
            if !self.is_terminal() {
                self.terminate(DirectionState::Reset, Some(Rejection::PeerReset));
                return Ok(self.state);
            }
            return Err(self.violation(FrameType::Reset));
        }

        let frame_type = frame.frame_type();
        if !self.permits(frame_type) {
            let err = self.violation(frame_type);
            self.reject(Rejection::ProtocolViolation);
            return Err(err);
        }

        if let Err(e) = validator
            .validate_frame(frame)
            .into_result(frame_type, self.direction)
        {
            self.reject(e.rejection().unwrap_or(Rejection::ProtocolViolation));
            return Err(e);
        }

        match &frame.body {
            FrameBody::Data { payload } => self.accept(DeliveryKind::Data, payload, &frame.extension)?,
            FrameBody::Flush { payload } => self.accept(DeliveryKind::Flush, payload, &frame.extension)?,
            FrameBody::End => match self.state {
                DirectionState::Open => self.transition(DirectionState::HalfClosedLocal),
                _ => self.terminate(DirectionState::Closed, None),
            },
            FrameBody::Abort => self.terminate(DirectionState::Aborted, None),
            FrameBody::Begin { .. } | FrameBody::Reset => {}
        }

        Ok(self.state)
    }

    /// Transport-reported cancellation: identical to a received ABORT.
    pub fn cancel(&mut self) -> bool {
        self.abort(None)
    }

    /// Abort locally, e.g. when the stream policy escalates a failure on the
    /// peer direction. Returns `false` if the direction was not open.
    pub fn abort(&mut self, reason: Option<Rejection>) -> bool {
        if self.permits(FrameType::Abort) {
            self.terminate(DirectionState::Aborted, reason);
            true
        } else {
            false
        }
    }

    /// Reset locally. Returns `false` if already terminal.
    pub fn reset(&mut self, reason: Rejection) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.terminate(DirectionState::Reset, Some(reason));
        true
    }

    /// Hand all buffered payload to the reader.
    ///
    /// Once the writer has ended (HALF_CLOSED_LOCAL), draining consumes the
    /// END as well and closes the direction.
    pub fn drain(&mut self) -> Drained {
        // Dropping each `Pending` releases its storage.
        let deliveries = self.pending.drain(..).map(|p| p.delivery).collect();

        let ended = self.state == DirectionState::HalfClosedLocal;
        if ended {
            self.terminate(DirectionState::Closed, None);
        }

        Drained { deliveries, ended }
    }

    /// The reader stops reading. Buffered payload is discarded.
    ///
    /// OPEN → HALF_CLOSED_REMOTE, HALF_CLOSED_LOCAL → CLOSED.
    pub fn close_read(&mut self) -> Result<DirectionState> {
        match self.state {
            DirectionState::Open => {
                self.pending.clear();
                self.transition(DirectionState::HalfClosedRemote);
            }
            DirectionState::HalfClosedLocal => self.terminate(DirectionState::Closed, None),
            _ => return Err(self.violation(FrameType::End)),
        }
        Ok(self.state)
    }

    fn permits(&self, frame_type: FrameType) -> bool {
        use DirectionState::*;
        match frame_type {
            FrameType::Begin => false,
            FrameType::Data | FrameType::Flush => self.state == Open,
            FrameType::End => matches!(self.state, Open | HalfClosedRemote),
            FrameType::Abort => matches!(self.state, Open | HalfClosedLocal | HalfClosedRemote),
            FrameType::Reset => !self.is_terminal(),
        }
    }

    fn accept(
        &mut self,
        kind: DeliveryKind,
        payload: &Option<Bytes>,
        extension: &Option<Bytes>,
    ) -> Result<()> {
        let storage = match payload {
            Some(bytes) if !bytes.is_empty() => match PooledBuffer::acquire(&self.pool, bytes.len()) {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    tracing::warn!(
                        "Stream {} {}: payload of {} bytes exceeds pool, aborting",
                        self.stream_id,
                        self.direction,
                        bytes.len()
                    );
                    self.terminate(DirectionState::Aborted, Some(Rejection::OutOfMemory));
                    return Err(e);
                }
            },
            _ => None,
        };

        self.pending.push_back(Pending {
            delivery: Delivery {
                kind,
                payload: payload.clone(),
                extension: extension.clone(),
            },
            _storage: storage,
        });
        Ok(())
    }

    fn reject(&mut self, reason: Rejection) {
        tracing::warn!(
            "Stream {} {}: rejected in state {:?} ({})",
            self.stream_id,
            self.direction,
            self.state,
            reason
        );
        self.terminate(DirectionState::Reset, Some(reason));
    }

    fn violation(&self, frame_type: FrameType) -> HalfDuplexError {
        HalfDuplexError::ProtocolViolation {
            frame_type,
            state: self.state,
        }
    }

    fn transition(&mut self, to: DirectionState) {
        debug_assert!(!to.is_terminal());
        tracing::debug!(
            "Stream {} {}: {:?} -> {:?}",
            self.stream_id,
            self.direction,
            self.state,
            to
        );
        self.state = to;
    }

    /// Single exit path into a terminal state; releases all pooled storage.
    fn terminate(&mut self, to: DirectionState, reason: Option<Rejection>) {
        debug_assert!(to.is_terminal());
        if self.is_terminal() {
            return;
        }
        tracing::debug!(
            "Stream {} {}: {:?} -> {:?}",
            self.stream_id,
            self.direction,
            self.state,
            to
        );
        self.state = to;
        self.termination = reason;
        self.pending.clear();
        self.reservation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::ExtensionPolicy;
    use crate::pool::MemoryPool;

    const SID: StreamId = StreamId(7);
    const I2A: Direction = Direction::InitiatorToAcceptor;

    fn setup(pool: &Arc<MemoryPool>) -> DirectionMachine {
        let shared: Arc<dyn BufferPool> = pool.clone();
        let mut machine = DirectionMachine::new(SID, I2A, shared);
        machine.open(None).unwrap();
        machine
    }

    fn small_pool() -> Arc<MemoryPool> {
        Arc::new(MemoryPool::new(1024, 1))
    }

    fn data(payload: &'static [u8]) -> Frame {
        Frame::data(SID, I2A, Some(Bytes::from_static(payload)))
    }

    #[test]
    fn test_open_from_idle() {
        let pool = small_pool();
        let machine = setup(&pool);
        assert_eq!(machine.state(), DirectionState::Open);
    }

    #[test]
    fn test_open_twice_is_violation() {
        let pool = small_pool();
        let mut machine = setup(&pool);
        assert!(matches!(
            machine.open(None),
            Err(HalfDuplexError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_open_with_reservation() {
        let pool = small_pool();
        let shared: Arc<dyn BufferPool> = pool.clone();
        let mut machine = DirectionMachine::new(SID, I2A, shared);
        machine.open(Some(100)).unwrap();

        assert_eq!(machine.reserved(), 100);
        assert_eq!(pool.used(), 100);

        machine.reset(Rejection::LocalReset);
        assert_eq!(pool.used(), 0);
        assert_eq!(pool.release_count(), 1);
    }

    #[test]
    fn test_open_reservation_out_of_memory_aborts() {
        let pool = Arc::new(MemoryPool::new(10, 1));
        let shared: Arc<dyn BufferPool> = pool.clone();
        let mut machine = DirectionMachine::new(SID, I2A, shared);

        let err = machine.open(Some(100)).unwrap_err();
        assert!(matches!(err, HalfDuplexError::OutOfMemory { .. }));
        assert_eq!(machine.state(), DirectionState::Aborted);
        assert_eq!(machine.termination(), Some(Rejection::OutOfMemory));
    }

    #[test]
    fn test_data_delivered_once() {
        let pool = small_pool();
        let mut machine = setup(&pool);
        let validator = ExtensionValidator::default();

        machine.receive(&data(b"hello"), &validator).unwrap();
        assert_eq!(machine.state(), DirectionState::Open);
        assert_eq!(pool.used(), 5);

        let drained = machine.drain();
        assert_eq!(drained.deliveries.len(), 1);
        assert_eq!(drained.deliveries[0].payload.as_deref(), Some(&b"hello"[..]));
        assert!(!drained.ended);
        assert_eq!(pool.used(), 0);

        assert!(machine.drain().deliveries.is_empty());
    }

    #[test]
    fn test_absent_and_empty_payload_are_distinct() {
        let pool = small_pool();
        let mut machine = setup(&pool);
        let validator = ExtensionValidator::default();

        machine.receive(&Frame::data(SID, I2A, None), &validator).unwrap();
        machine.receive(&data(b""), &validator).unwrap();
        assert_eq!(pool.acquire_count(), 0);

        let drained = machine.drain();
        assert_eq!(drained.deliveries[0].payload, None);
        assert_eq!(drained.deliveries[1].payload, Some(Bytes::new()));
    }

    #[test]
    fn test_flush_recorded_as_flush() {
        let pool = small_pool();
        let mut machine = setup(&pool);
        let frame = Frame::flush(SID, I2A, None).with_extension(Bytes::from_static(b"f"));

        machine.receive(&frame, &ExtensionValidator::default()).unwrap();

        let drained = machine.drain();
        assert_eq!(drained.deliveries[0].kind, DeliveryKind::Flush);
        assert_eq!(drained.deliveries[0].extension.as_deref(), Some(&b"f"[..]));
    }

    #[test]
    fn test_missing_extension_resets_without_touching_pool() {
        let pool = small_pool();
        let mut machine = setup(&pool);
        let validator = ExtensionValidator::new(ExtensionPolicy::new().require(FrameType::Data, I2A));

        let err = machine.receive(&data(b"hello"), &validator).unwrap_err();

        assert!(matches!(err, HalfDuplexError::MissingExtension { .. }));
        assert_eq!(machine.state(), DirectionState::Reset);
        assert_eq!(machine.termination(), Some(Rejection::MissingExtension));
        assert_eq!(pool.acquire_count(), 0);
    }

    #[test]
    fn test_end_then_data_is_violation() {
        let pool = small_pool();
        let mut machine = setup(&pool);
        let validator = ExtensionValidator::default();

        machine.receive(&Frame::end(SID, I2A), &validator).unwrap();
        assert_eq!(machine.state(), DirectionState::HalfClosedLocal);

        let err = machine.receive(&data(b"late"), &validator).unwrap_err();
        assert!(matches!(
            err,
            HalfDuplexError::ProtocolViolation {
                frame_type: FrameType::Data,
                state: DirectionState::HalfClosedLocal
            }
        ));
        assert_eq!(machine.state(), DirectionState::Reset);
    }

    #[test]
    fn test_drain_after_end_closes() {
        let pool = small_pool();
        let mut machine = setup(&pool);
        let validator = ExtensionValidator::default();

        machine.receive(&data(b"abc"), &validator).unwrap();
        machine.receive(&Frame::end(SID, I2A), &validator).unwrap();

        let drained = machine.drain();
        assert_eq!(drained.deliveries.len(), 1);
        assert!(drained.ended);
        assert_eq!(machine.state(), DirectionState::Closed);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_close_read_then_end_closes() {
        let pool = small_pool();
        let mut machine = setup(&pool);
        let validator = ExtensionValidator::default();

        machine.receive(&data(b"abc"), &validator).unwrap();
        assert_eq!(machine.close_read().unwrap(), DirectionState::HalfClosedRemote);
        assert_eq!(pool.used(), 0);

        // writer may not send more data, only END
        machine.receive(&Frame::end(SID, I2A), &validator).unwrap();
        assert_eq!(machine.state(), DirectionState::Closed);
    }

    #[test]
    fn test_abort_discards_and_releases_exactly_once() {
        let pool = small_pool();
        let mut machine = setup(&pool);
        let validator = ExtensionValidator::default();

        machine.receive(&data(b"one"), &validator).unwrap();
        machine.receive(&data(b"two"), &validator).unwrap();
        assert_eq!(pool.outstanding(), 2);

        machine.receive(&Frame::abort(SID, I2A), &validator).unwrap();
        assert_eq!(machine.state(), DirectionState::Aborted);
        assert_eq!(machine.pending_count(), 0);
        assert_eq!(pool.release_count(), 2);

        drop(machine);
        assert_eq!(pool.release_count(), 2);
    }

    #[test]
    fn test_abort_in_idle_is_violation() {
        let pool = small_pool();
        let shared: Arc<dyn BufferPool> = pool.clone();
        let mut machine = DirectionMachine::new(SID, I2A, shared);

        assert!(machine
            .receive(&Frame::abort(SID, I2A), &ExtensionValidator::default())
            .is_err());
        assert_eq!(machine.state(), DirectionState::Reset);
    }

    #[test]
    fn test_reset_from_half_closed() {
        let pool = small_pool();
        let mut machine = setup(&pool);
        let validator = ExtensionValidator::default();

        machine.receive(&Frame::end(SID, I2A), &validator).unwrap();
        machine.receive(&Frame::reset(SID, I2A), &validator).unwrap();
        assert_eq!(machine.state(), DirectionState::Reset);
        assert_eq!(machine.termination(), Some(Rejection::PeerReset));
    }

    #[test]
    fn test_terminal_state_accepts_nothing() {
        let pool = small_pool();
        let mut machine = setup(&pool);
        let validator = ExtensionValidator::default();

        machine.receive(&Frame::reset(SID, I2A), &validator).unwrap();
        assert!(machine.receive(&Frame::reset(SID, I2A), &validator).is_err());
        assert!(!machine.cancel());
        assert!(!machine.reset(Rejection::LocalReset));
        assert_eq!(machine.termination(), Some(Rejection::PeerReset));
    }

    #[test]
    fn test_cancel_matches_abort() {
        let pool = small_pool();
        let mut machine = setup(&pool);
        machine
            .receive(&data(b"x"), &ExtensionValidator::default())
            .unwrap();

        assert!(machine.cancel());
        assert_eq!(machine.state(), DirectionState::Aborted);
        assert_eq!(machine.termination(), None);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_payload_out_of_memory_aborts() {
        let pool = Arc::new(MemoryPool::new(4, 1));
        let mut machine = setup(&pool);

        let err = machine
            .receive(&data(b"too large"), &ExtensionValidator::default())
            .unwrap_err();

        assert!(matches!(err, HalfDuplexError::OutOfMemory { .. }));
        assert_eq!(machine.state(), DirectionState::Aborted);
        assert_eq!(machine.termination(), Some(Rejection::OutOfMemory));
    }
}
