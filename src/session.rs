//! Session: a [`StreamCoordinator`] driven by an async byte transport.
//!
//! [`SessionBuilder`] configures the coordinator and the writer task, then
//! [`start`](SessionBuilder::start) spawns:
//! 1. a read loop: transport bytes → [`FrameBuffer`] → coordinator
//! 2. the writer task carrying every outbound frame back to the transport
//!
//! Events caused by the remote endpoint are delivered through
//! [`Session::next_event`]. Local operations (`drain`, `close_read`, `reset`,
//! `abort`) return the events they cause to the caller instead.
//!
//! # Example
//!
//! ```ignore
//! use halfduplex::Session;
//!
//! let (read_half, write_half) = tokio::io::split(transport);
//! let mut session = Session::builder()
//!     .escalation(Escalation::AbortPeer)
//!     .start(read_half, write_half);
//!
//! while let Some(event) = session.next_event().await {
//!     if let StreamEvent::DataAvailable { stream_id, direction, .. } = event {
//!         let (drained, events) = session.drain(stream_id, direction).await?;
//!         // ...
//!     }
//! }
//! ```
//!
//! A malformed frame is connection-fatal: the read loop stops and
//! [`Session::wait`] returns the error. When the transport closes, every
//! live stream is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{CoordinatorConfig, Escalation};
use crate::error::Result;
use crate::extension::ExtensionPolicy;
use crate::pool::{BufferPool, MemoryPool};
use crate::protocol::{Direction, FrameBuffer, StreamId};
use crate::stream::{Dispatch, Drained, StreamCoordinator, StreamEvent};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Transport read size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Builder for a [`Session`].
pub struct SessionBuilder {
    config: CoordinatorConfig,
    pool: Option<Arc<dyn BufferPool>>,
    writer_config: WriterConfig,
    event_capacity: usize,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            pool: None,
            writer_config: WriterConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Replace the whole coordinator configuration.
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn extension_policy(mut self, policy: ExtensionPolicy) -> Self {
        self.config.extension_policy = policy;
        self
    }

    pub fn escalation(mut self, escalation: Escalation) -> Self {
        self.config.escalation = escalation;
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Payload storage. Defaults to a [`MemoryPool`] with default sizing.
    pub fn pool(mut self, pool: Arc<dyn BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn max_pending_frames(mut self, max: usize) -> Self {
        self.writer_config.max_pending_frames = max;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer_config.backpressure_timeout = timeout;
        self
    }

    /// Events buffered before the read loop waits for the application.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Spawn the read loop and writer task. Must be called inside a tokio
    /// runtime.
    pub fn start<R, W>(self, reader: R, writer: W) -> Session
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pool = self
            .pool
            .unwrap_or_else(|| Arc::new(MemoryPool::default()) as Arc<dyn BufferPool>);
        let max_frame_size = self.config.max_frame_size;
        let coordinator = Arc::new(StreamCoordinator::new(self.config, pool));

        let (writer, writer_task) = spawn_writer_task(writer, self.writer_config);
        let (events_tx, events_rx) = mpsc::channel(self.event_capacity);

        let read_task = tokio::spawn(read_loop(
            reader,
            FrameBuffer::with_max_frame_size(max_frame_size),
            coordinator.clone(),
            writer.clone(),
            events_tx,
        ));

        Session {
            coordinator,
            writer,
            events_rx,
            read_task,
            writer_task,
        }
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running session.
pub struct Session {
    coordinator: Arc<StreamCoordinator>,
    writer: WriterHandle,
    events_rx: mpsc::Receiver<StreamEvent>,
    read_task: JoinHandle<Result<()>>,
    writer_task: JoinHandle<Result<()>>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn coordinator(&self) -> &Arc<StreamCoordinator> {
        &self.coordinator
    }

    /// Next event caused by the remote endpoint or by transport loss; `None`
    /// once the read loop has stopped and all events were consumed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events_rx.recv().await
    }

    /// Take buffered payload for the reader of `direction`, along with the
    /// events the drain caused (`Closed`, `Destroyed`).
    pub async fn drain(
        &self,
        stream_id: StreamId,
        direction: Direction,
    ) -> Result<(Drained, Vec<StreamEvent>)> {
        let (drained, out) = self.coordinator.drain(stream_id, direction)?;
        let events = self.dispatch(out).await?;
        Ok((drained, events))
    }

    pub async fn close_read(&self, stream_id: StreamId, direction: Direction) -> Result<Vec<StreamEvent>> {
        let out = self.coordinator.close_read(stream_id, direction)?;
        self.dispatch(out).await
    }

    pub async fn reset(&self, stream_id: StreamId, direction: Direction) -> Result<Vec<StreamEvent>> {
        let out = self.coordinator.reset(stream_id, direction)?;
        self.dispatch(out).await
    }

    pub async fn abort(&self, stream_id: StreamId, direction: Direction) -> Result<Vec<StreamEvent>> {
        let out = self.coordinator.abort(stream_id, direction)?;
        self.dispatch(out).await
    }

    pub fn is_backpressure_active(&self) -> bool {
        self.writer.is_backpressure_active()
    }

    pub fn pending_frames(&self) -> usize {
        self.writer.pending_count()
    }

    /// Wait for the read loop to stop, then flush and stop the writer.
    ///
    /// Returns the read loop's error if the connection failed.
    pub async fn wait(self) -> Result<()> {
        let Session {
            writer,
            events_rx,
            read_task,
            writer_task,
            ..
        } = self;
        drop(events_rx);

        let read_result = join(read_task).await;
        drop(writer);
        let write_result = join(writer_task).await;

        read_result.and(write_result)
    }

    /// Write outbound frames; the events go back to the caller, never into
    /// the channel it consumes.
    async fn dispatch(&self, out: Dispatch) -> Result<Vec<StreamEvent>> {
        self.writer.send_all(&out.outbound).await?;
        Ok(out.events)
    }
}

async fn join(task: JoinHandle<Result<()>>) -> Result<()> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(crate::error::HalfDuplexError::Io(std::io::Error::other(e))),
    }
}

async fn forward(
    out: Dispatch,
    writer: &WriterHandle,
    events: &mpsc::Sender<StreamEvent>,
) -> Result<()> {
    writer.send_all(&out.outbound).await?;
    for event in out.events {
        // A dropped receiver only means nobody is listening.
        let _ = events.send(event).await;
    }
    Ok(())
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    mut frame_buffer: FrameBuffer,
    coordinator: Arc<StreamCoordinator>,
    writer: WriterHandle,
    events: mpsc::Sender<StreamEvent>,
) -> Result<()> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::error!("Transport read failed: {}", e);
                cancel_all(&coordinator, &events).await;
                return Err(e.into());
            }
        };

        let frames = match frame_buffer.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::error!("Closing connection: {}", e);
                cancel_all(&coordinator, &events).await;
                return Err(e);
            }
        };

        for frame in frames {
            let out = coordinator.receive(frame);
            if let Err(e) = forward(out, &writer, &events).await {
                if e.is_connection_fatal() {
                    tracing::error!("Transport write failed: {}", e);
                    cancel_all(&coordinator, &events).await;
                    return Err(e);
                }
                tracing::warn!("Outbound frames dropped: {}", e);
            }
        }
    }

    tracing::debug!("Transport closed, cancelling {} streams", coordinator.stream_count());
    cancel_all(&coordinator, &events).await;
    Ok(())
}

/// Cancel every stream after transport loss. Outbound frames are dropped.
async fn cancel_all(coordinator: &StreamCoordinator, events: &mpsc::Sender<StreamEvent>) {
    for event in coordinator.cancel_all().events {
        let _ = events.send(event).await;
    }
}
