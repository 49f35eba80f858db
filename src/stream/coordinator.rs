//! Stream registry and cross-direction coordination.
//!
//! The coordinator sits between the two endpoints of every stream. Each
//! inbound frame is routed to its stream's [`DirectionMachine`]; the result is
//! a [`Dispatch`] listing the frames to send back and the lifecycle events to
//! surface to the application.
//!
//! # Locking
//!
//! The registry is an `RwLock<HashMap<..>>` taken only to look up, insert or
//! remove streams. All work on a stream happens under that stream's own
//! `Mutex`, so frames for distinct streams are processed in parallel and the
//! two directions of one stream never observe each other half-updated. The
//! registry lock is never held while a stream lock is being acquired.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::direction::{DeliveryKind, DirectionMachine, DirectionState, Drained};
use crate::config::{CoordinatorConfig, Escalation};
use crate::error::{HalfDuplexError, Rejection, Result};
use crate::extension::{ExtensionValidator, Reservation, Validation};
use crate::handshake::{Authorization, BeginOffer, HandshakeOutcome, HandshakeRecord};
use crate::pool::{BufferPool, MemoryPool, DEFAULT_CAPACITY, DEFAULT_MIN_BLOCK_SIZE};
use crate::protocol::{decode_with_limit, Direction, Frame, FrameBody, FrameType, StreamId};

/// Lifecycle notification for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// Both BEGIN frames agreed; both directions are open.
    Opened { stream_id: StreamId },
    /// DATA or FLUSH buffered for the reader of `direction`.
    DataAvailable {
        stream_id: StreamId,
        direction: Direction,
        kind: DeliveryKind,
    },
    /// The writer of `direction` sent END.
    Ended {
        stream_id: StreamId,
        direction: Direction,
    },
    /// The reader of `direction` stopped reading.
    ReadClosed {
        stream_id: StreamId,
        direction: Direction,
    },
    Closed {
        stream_id: StreamId,
        direction: Direction,
    },
    /// `reason` is `None` when the writer aborted on its own.
    Aborted {
        stream_id: StreamId,
        direction: Direction,
        reason: Option<Rejection>,
    },
    Reset {
        stream_id: StreamId,
        direction: Direction,
        reason: Rejection,
    },
    HandshakeFailed { stream_id: StreamId },
    /// Both directions are terminal and the stream has been removed.
    Destroyed { stream_id: StreamId },
}

impl StreamEvent {
    pub fn stream_id(&self) -> StreamId {
        match *self {
            StreamEvent::Opened { stream_id }
            | StreamEvent::DataAvailable { stream_id, .. }
            | StreamEvent::Ended { stream_id, .. }
            | StreamEvent::ReadClosed { stream_id, .. }
            | StreamEvent::Closed { stream_id, .. }
            | StreamEvent::Aborted { stream_id, .. }
            | StreamEvent::Reset { stream_id, .. }
            | StreamEvent::HandshakeFailed { stream_id }
            | StreamEvent::Destroyed { stream_id } => stream_id,
        }
    }
}

/// Frames to send and events to surface after one operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub outbound: Vec<Frame>,
    pub events: Vec<StreamEvent>,
}

impl Dispatch {
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.events.is_empty()
    }

    /// Merge another dispatch, preserving order.
    pub fn extend(&mut self, other: Dispatch) {
        self.outbound.extend(other.outbound);
        self.events.extend(other.events);
    }

    fn reset(&mut self, stream_id: StreamId, direction: Direction) {
        self.outbound.push(Frame::reset(stream_id, direction));
    }

    fn abort(&mut self, stream_id: StreamId, direction: Direction) {
        self.outbound.push(Frame::abort(stream_id, direction));
    }

    fn event(&mut self, event: StreamEvent) {
        self.events.push(event);
    }
}

struct Stream {
    id: StreamId,
    machines: [DirectionMachine; 2],
    /// `Some` until both BEGIN frames have been settled.
    handshake: Option<HandshakeRecord>,
    authorization: Option<Authorization>,
}

impl Stream {
    fn new(id: StreamId, pool: &Arc<dyn BufferPool>) -> Self {
        Self {
            id,
            machines: Direction::ALL.map(|d| DirectionMachine::new(id, d, pool.clone())),
            handshake: Some(HandshakeRecord::new(id)),
            authorization: None,
        }
    }

    fn machine(&self, direction: Direction) -> &DirectionMachine {
        &self.machines[direction.index()]
    }

    fn machine_mut(&mut self, direction: Direction) -> &mut DirectionMachine {
        &mut self.machines[direction.index()]
    }

    fn is_finished(&self) -> bool {
        self.machines.iter().all(DirectionMachine::is_terminal)
    }
}

/// Owns every live stream and applies frames to them.
///
/// `Send + Sync`; share it behind an `Arc`.
pub struct StreamCoordinator {
    validator: ExtensionValidator,
    escalation: Escalation,
    max_frame_size: u32,
    pool: Arc<dyn BufferPool>,
    streams: RwLock<HashMap<StreamId, Arc<Mutex<Stream>>>>,
}

impl StreamCoordinator {
    pub fn new(config: CoordinatorConfig, pool: Arc<dyn BufferPool>) -> Self {
        Self {
            validator: ExtensionValidator::new(config.extension_policy),
            escalation: config.escalation,
            max_frame_size: config.max_frame_size,
            pool,
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Default configuration over a default-sized [`MemoryPool`].
    pub fn with_defaults() -> Self {
        Self::new(
            CoordinatorConfig::default(),
            MemoryPool::shared(DEFAULT_CAPACITY, DEFAULT_MIN_BLOCK_SIZE),
        )
    }

    pub fn validator(&self) -> &ExtensionValidator {
        &self.validator
    }

    pub fn escalation(&self) -> Escalation {
        self.escalation
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Number of live streams.
    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    pub fn contains(&self, stream_id: StreamId) -> bool {
        self.streams.read().contains_key(&stream_id)
    }

    /// Current state of one direction, `None` for unknown streams.
    pub fn state(&self, stream_id: StreamId, direction: Direction) -> Option<DirectionState> {
        let stream = self.get(stream_id)?;
        let state = stream.lock().machine(direction).state();
        Some(state)
    }

    /// Authorization the stream was bound to at handshake.
    pub fn authorization(&self, stream_id: StreamId) -> Option<Authorization> {
        self.get(stream_id)?.lock().authorization
    }

    /// Deliveries buffered for the reader of `direction`.
    pub fn pending(&self, stream_id: StreamId, direction: Direction) -> Option<usize> {
        let stream = self.get(stream_id)?;
        let count = stream.lock().machine(direction).pending_count();
        Some(count)
    }

    /// Apply one inbound frame.
    pub fn receive(&self, frame: Frame) -> Dispatch {
        let mut out = Dispatch::default();
        let stream_id = frame.stream_id;

        let stream = match frame.body {
            FrameBody::Begin { .. } => Some(self.get_or_create(stream_id)),
            _ => self.get(stream_id),
        };

        let Some(stream) = stream else {
            tracing::warn!(
                "{} for unknown stream {} ({})",
                frame.frame_type(),
                stream_id,
                frame.direction
            );
            if !is_teardown(frame.frame_type()) {
                out.reset(stream_id, frame.direction);
            }
            return out;
        };

        let finished = {
            let mut guard = stream.lock();
            self.apply(&mut guard, frame, &mut out);
            guard.is_finished()
        };
        if finished {
            self.destroy(stream_id, &stream, &mut out);
        }

        out
    }

    /// Decode one complete encoded frame and apply it.
    ///
    /// # Errors
    ///
    /// `MalformedFrame` if the bytes are not a valid frame. No stream is
    /// touched in that case.
    pub fn receive_bytes(&self, wire: &[u8]) -> Result<Dispatch> {
        let frame = decode_with_limit(wire, self.max_frame_size)?;
        Ok(self.receive(frame))
    }

    /// Hand buffered payload to the reader of `direction`.
    ///
    /// After the writer's END, this also closes the direction.
    pub fn drain(&self, stream_id: StreamId, direction: Direction) -> Result<(Drained, Dispatch)> {
        self.with_stream(stream_id, |stream, out| {
            let drained = stream.machine_mut(direction).drain();
            if drained.ended {
                out.event(StreamEvent::Closed {
                    stream_id,
                    direction,
                });
            }
            Ok(drained)
        })
    }

    /// The reader of `direction` stops reading; buffered payload is dropped.
    pub fn close_read(&self, stream_id: StreamId, direction: Direction) -> Result<Dispatch> {
        self.with_stream(stream_id, |stream, out| {
            let state = stream.machine_mut(direction).close_read()?;
            out.event(StreamEvent::ReadClosed {
                stream_id,
                direction,
            });
            if state == DirectionState::Closed {
                out.event(StreamEvent::Closed {
                    stream_id,
                    direction,
                });
            }
            Ok(())
        })
        .map(|((), out)| out)
    }

    /// Transport-reported cancellation of one direction; same as a received
    /// ABORT.
    pub fn cancel(&self, stream_id: StreamId, direction: Direction) -> Result<Dispatch> {
        self.with_stream(stream_id, |stream, out| {
            self.apply(stream, Frame::abort(stream_id, direction), out);
            Ok(())
        })
        .map(|((), out)| out)
    }

    /// Abort `direction` locally and emit ABORT toward its reader.
    pub fn abort(&self, stream_id: StreamId, direction: Direction) -> Result<Dispatch> {
        self.with_stream(stream_id, |stream, out| {
            if stream.machine_mut(direction).abort(None) {
                out.abort(stream_id, direction);
                out.event(StreamEvent::Aborted {
                    stream_id,
                    direction,
                    reason: None,
                });
            }
            Ok(())
        })
        .map(|((), out)| out)
    }

    /// Reset `direction` locally and emit RESET toward its writer.
    pub fn reset(&self, stream_id: StreamId, direction: Direction) -> Result<Dispatch> {
        self.with_stream(stream_id, |stream, out| {
            if stream.machine_mut(direction).reset(Rejection::LocalReset) {
                out.reset(stream_id, direction);
                out.event(StreamEvent::Reset {
                    stream_id,
                    direction,
                    reason: Rejection::LocalReset,
                });
            }
            Ok(())
        })
        .map(|((), out)| out)
    }

    /// Cancel every live direction of every stream, as on transport loss.
    pub fn cancel_all(&self) -> Dispatch {
        let ids: Vec<StreamId> = self.streams.read().keys().copied().collect();
        let mut out = Dispatch::default();

        for stream_id in ids {
            for direction in Direction::ALL {
                // Streams may disappear between iterations.
                if let Ok(d) = self.cancel(stream_id, direction) {
                    out.extend(d);
                }
            }
        }

        out
    }

    fn get(&self, stream_id: StreamId) -> Option<Arc<Mutex<Stream>>> {
        self.streams.read().get(&stream_id).cloned()
    }

    fn get_or_create(&self, stream_id: StreamId) -> Arc<Mutex<Stream>> {
        if let Some(stream) = self.get(stream_id) {
            return stream;
        }
        self.streams
            .write()
            .entry(stream_id)
            .or_insert_with(|| {
                tracing::debug!("Stream {} created", stream_id);
                Arc::new(Mutex::new(Stream::new(stream_id, &self.pool)))
            })
            .clone()
    }

    /// Remove the stream if the registry still holds this instance.
    fn destroy(&self, stream_id: StreamId, stream: &Arc<Mutex<Stream>>, out: &mut Dispatch) {
        let removed = {
            let mut streams = self.streams.write();
            match streams.get(&stream_id) {
                Some(current) if Arc::ptr_eq(current, stream) => streams.remove(&stream_id),
                _ => None,
            }
        };
        if removed.is_some() {
            tracing::debug!("Stream {} destroyed", stream_id);
            out.event(StreamEvent::Destroyed { stream_id });
        }
    }

    fn with_stream<R>(
        &self,
        stream_id: StreamId,
        f: impl FnOnce(&mut Stream, &mut Dispatch) -> Result<R>,
    ) -> Result<(R, Dispatch)> {
        let stream = self
            .get(stream_id)
            .ok_or(HalfDuplexError::UnknownStream(stream_id))?;

        let mut out = Dispatch::default();
        let (result, finished) = {
            let mut guard = stream.lock();
            let result = f(&mut guard, &mut out);
            (result, guard.is_finished())
        };
        if finished {
            self.destroy(stream_id, &stream, &mut out);
        }

        result.map(|r| (r, out))
    }

    fn apply(&self, stream: &mut Stream, frame: Frame, out: &mut Dispatch) {
        let id = stream.id;
        let direction = frame.direction;
        let frame_type = frame.frame_type();

        let state = stream.machine(direction).state();
        if state.is_terminal() {
            tracing::debug!(
                "Stream {} {}: {} ignored in {:?}",
                id,
                direction,
                frame_type,
                state
            );
            if !is_teardown(frame_type) {
                out.reset(id, direction);
            }
            return;
        }

        if let FrameBody::Begin { authorization } = frame.body {
            self.on_begin(stream, direction, authorization, frame.extension, out);
            return;
        }

        if stream.handshake.is_some() {
            let reason = if is_teardown(frame_type) {
                Rejection::PeerReset
            } else {
                tracing::warn!(
                    "Stream {} {}: {} before handshake completed",
                    id,
                    direction,
                    frame_type
                );
                Rejection::ProtocolViolation
            };
            let quiet = is_teardown(frame_type).then_some(direction);
            self.fail_handshake(stream, reason, quiet, out);
            return;
        }

        match stream.machine_mut(direction).receive(&frame, &self.validator) {
            Ok(state) => accepted(id, direction, frame_type, state, out),
            Err(e) => {
                tracing::warn!("Stream {} {}: {}", id, direction, e);
                let machine = stream.machine(direction);
                match machine.state() {
                    DirectionState::Aborted => {
                        out.abort(id, direction);
                        out.reset(id, direction);
                        out.event(StreamEvent::Aborted {
                            stream_id: id,
                            direction,
                            reason: machine.termination(),
                        });
                    }
                    DirectionState::Reset => {
                        out.reset(id, direction);
                        out.event(StreamEvent::Reset {
                            stream_id: id,
                            direction,
                            reason: machine
                                .termination()
                                .unwrap_or(Rejection::ProtocolViolation),
                        });
                    }
                    _ => {}
                }
                self.escalate(stream, direction, out);
            }
        }
    }

    fn on_begin(
        &self,
        stream: &mut Stream,
        direction: Direction,
        authorization: Authorization,
        extension: Option<bytes::Bytes>,
        out: &mut Dispatch,
    ) {
        let id = stream.id;

        if stream.handshake.is_none() {
            tracing::warn!("Stream {} {}: BEGIN on open direction", id, direction);
            self.reject(stream, direction, Rejection::ProtocolViolation, out);
            return;
        }

        if let Validation::Rejected(reason) =
            self.validator
                .validate(FrameType::Begin, direction, extension.as_deref())
        {
            tracing::warn!("Stream {} {}: BEGIN rejected ({})", id, direction, reason);
            self.fail_handshake(stream, reason, None, out);
            return;
        }

        let Some(record) = stream.handshake.as_mut() else {
            return;
        };
        if !record.offer(
            direction,
            BeginOffer {
                authorization,
                extension,
            },
        ) {
            tracing::warn!("Stream {} {}: duplicate BEGIN", id, direction);
            self.fail_handshake(stream, Rejection::ProtocolViolation, None, out);
            return;
        }

        let reserves = Direction::ALL.map(|d| {
            Reservation::declared_in(record.offer_of(d).and_then(|o| o.extension.as_deref()))
        });

        match record.settle() {
            None => {
                tracing::debug!("Stream {} {}: BEGIN recorded, awaiting peer", id, direction);
            }
            Some(HandshakeOutcome::Mismatch) => {
                tracing::warn!("{}", HalfDuplexError::HandshakeAuthorizationMismatch(id));
                self.fail_handshake(stream, Rejection::AuthorizationMismatch, None, out);
            }
            Some(HandshakeOutcome::Agreed(authorization)) => {
                stream.handshake = None;
                stream.authorization = Some(authorization);
                out.event(StreamEvent::Opened { stream_id: id });

                // Escalation needs both directions past IDLE.
                let failed = Direction::ALL.map(|d| {
                    match stream.machine_mut(d).open(reserves[d.index()]) {
                        Ok(()) => false,
                        Err(e) => {
                            tracing::warn!("Stream {} {}: {}", id, d, e);
                            true
                        }
                    }
                });

                for d in Direction::ALL {
                    if !failed[d.index()] {
                        continue;
                    }
                    out.abort(id, d);
                    out.reset(id, d);
                    out.event(StreamEvent::Aborted {
                        stream_id: id,
                        direction: d,
                        reason: Some(Rejection::OutOfMemory),
                    });
                    self.escalate(stream, d, out);
                }
            }
        }
    }

    /// Reset every direction of a stream whose handshake cannot complete.
    /// `quiet` names a direction whose writer already tore it down.
    fn fail_handshake(
        &self,
        stream: &mut Stream,
        reason: Rejection,
        quiet: Option<Direction>,
        out: &mut Dispatch,
    ) {
        let id = stream.id;
        stream.handshake = None;
        out.event(StreamEvent::HandshakeFailed { stream_id: id });

        for d in Direction::ALL {
            if stream.machine_mut(d).reset(reason) {
                if quiet != Some(d) {
                    out.reset(id, d);
                }
                out.event(StreamEvent::Reset {
                    stream_id: id,
                    direction: d,
                    reason,
                });
            }
        }
    }

    fn reject(&self, stream: &mut Stream, direction: Direction, reason: Rejection, out: &mut Dispatch) {
        if stream.machine_mut(direction).reset(reason) {
            out.reset(stream.id, direction);
            out.event(StreamEvent::Reset {
                stream_id: stream.id,
                direction,
                reason,
            });
            self.escalate(stream, direction, out);
        }
    }

    fn escalate(&self, stream: &mut Stream, failed: Direction, out: &mut Dispatch) {
        if self.escalation != Escalation::AbortPeer {
            return;
        }
        let peer = failed.peer();
        if stream.machine_mut(peer).abort(Some(Rejection::Escalated)) {
            tracing::debug!("Stream {} {}: aborted after peer failure", stream.id, peer);
            out.abort(stream.id, peer);
            out.event(StreamEvent::Aborted {
                stream_id: stream.id,
                direction: peer,
                reason: Some(Rejection::Escalated),
            });
        }
    }
}

fn is_teardown(frame_type: FrameType) -> bool {
    matches!(frame_type, FrameType::Abort | FrameType::Reset)
}

fn accepted(
    stream_id: StreamId,
    direction: Direction,
    frame_type: FrameType,
    state: DirectionState,
    out: &mut Dispatch,
) {
    match frame_type {
        FrameType::Data | FrameType::Flush => out.event(StreamEvent::DataAvailable {
            stream_id,
            direction,
            kind: if frame_type == FrameType::Data {
                DeliveryKind::Data
            } else {
                DeliveryKind::Flush
            },
        }),
        FrameType::End => {
            out.event(StreamEvent::Ended {
                stream_id,
                direction,
            });
            if state == DirectionState::Closed {
                out.event(StreamEvent::Closed {
                    stream_id,
                    direction,
                });
            }
        }
        FrameType::Abort => out.event(StreamEvent::Aborted {
            stream_id,
            direction,
            reason: None,
        }),
        FrameType::Reset => out.event(StreamEvent::Reset {
            stream_id,
            direction,
            reason: Rejection::PeerReset,
        }),
        FrameType::Begin => {}
    }
}
