//! Outbound writer task.
//!
//! Frames produced by the coordinator are queued on an mpsc channel and
//! written by a single task, so callers never contend for the transport.
//!
//! ```text
//! read loop ─┐
//! app ops   ─┼─► mpsc::Sender<OutboundFrame> ─► writer task ─► transport
//! ```
//!
//! Ready frames are batched and written with `write_vectored`. The number of
//! queued-but-unwritten frames is bounded; senders wait (up to a timeout)
//! when the bound is reached.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::error::{HalfDuplexError, Result};
use crate::protocol::{Frame, HEADER_SIZE};

pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames written per `write_vectored` batch.
const MAX_BATCH_SIZE: usize = 64;

/// A frame encoded for the wire: fixed header plus body.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub header: [u8; HEADER_SIZE],
    pub body: Bytes,
}

impl OutboundFrame {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            header: frame.header().encode(),
            body: frame.encode_body(),
        }
    }

    /// Total encoded size.
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

impl From<&Frame> for OutboundFrame {
    fn from(frame: &Frame) -> Self {
        Self::from_frame(frame)
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Queued frames above which senders wait.
    pub max_pending_frames: usize,
    pub channel_capacity: usize,
    /// How long a sender waits for the queue to drain.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

impl WriterConfig {
    pub fn max_pending_frames(mut self, max: usize) -> Self {
        self.max_pending_frames = max;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.backpressure_timeout = timeout;
        self
    }
}

/// Shared queue accounting between handles and the task.
#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    drained: Notify,
}

/// Cloneable sender side of the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<Pending>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    /// Queue a frame, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// `BackpressureTimeout` if the queue does not drain in time,
    /// `ConnectionClosed` if the writer task has stopped.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        self.send_encoded(OutboundFrame::from_frame(frame)).await
    }

    /// Queue every frame in order.
    pub async fn send_all(&self, frames: &[Frame]) -> Result<()> {
        for frame in frames {
            self.send(frame).await?;
        }
        Ok(())
    }

    pub async fn send_encoded(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            tokio::time::timeout(self.timeout, self.wait_for_capacity())
                .await
                .map_err(|_| HalfDuplexError::BackpressureTimeout)?;
        }

        self.pending.count.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).await.map_err(|_| {
            self.pending.count.fetch_sub(1, Ordering::AcqRel);
            HalfDuplexError::ConnectionClosed
        })
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: &Frame) -> Result<()> {
        if self.is_backpressure_active() {
            return Err(HalfDuplexError::BackpressureTimeout);
        }

        self.pending.count.fetch_add(1, Ordering::AcqRel);
        self.tx
            .try_send(OutboundFrame::from_frame(frame))
            .map_err(|e| {
                self.pending.count.fetch_sub(1, Ordering::AcqRel);
                match e {
                    mpsc::error::TrySendError::Full(_) => HalfDuplexError::BackpressureTimeout,
                    mpsc::error::TrySendError::Closed(_) => HalfDuplexError::ConnectionClosed,
                }
            })
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending_count() >= self.max_pending
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    async fn wait_for_capacity(&self) {
        loop {
            let drained = self.pending.drained.notified();
            if !self.is_backpressure_active() {
                return;
            }
            drained.await;
        }
    }
}

/// Spawn the writer task over `writer`.
///
/// The task ends cleanly once every [`WriterHandle`] has been dropped, or
/// with an error on the first failed write.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(Pending::default());

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        max_pending: config.max_pending_frames,
        timeout: config.backpressure_timeout,
    };

    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<Pending>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let written = batch.len();
        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::error!("Write of {} frames failed: {}", written, e);
            return Err(e);
        }
        batch.clear();

        pending.count.fetch_sub(written, Ordering::AcqRel);
        pending.drained.notify_waiters();
    }

    tracing::debug!("Writer channel closed, shutting down");
    writer.shutdown().await?;
    Ok(())
}

/// Write a batch with as few `write_vectored` calls as the transport allows.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut written = 0;

    while written < total {
        let slices = remaining_slices(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(HalfDuplexError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "transport accepted no bytes",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// Slices covering everything in `batch` after the first `skip` bytes.
fn remaining_slices(batch: &[OutboundFrame], skip: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.header[..], &frame.body[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip < end {
                slices.push(IoSlice::new(&part[skip.saturating_sub(offset)..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Direction, FrameBuffer, StreamId};
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn data(stream: u64, payload: &'static [u8]) -> Frame {
        Frame::data(
            StreamId(stream),
            Direction::InitiatorToAcceptor,
            Some(Bytes::from_static(payload)),
        )
    }

    #[test]
    fn test_outbound_frame_matches_encode() {
        let frame = data(42, b"hello");
        let outbound = OutboundFrame::from_frame(&frame);

        let mut joined = outbound.header.to_vec();
        joined.extend_from_slice(&outbound.body);
        assert_eq!(joined, frame.encode());
        assert_eq!(outbound.size(), joined.len());
    }

    #[test]
    fn test_writer_config_builder() {
        let config = WriterConfig::default()
            .max_pending_frames(8)
            .channel_capacity(4)
            .backpressure_timeout(Duration::from_millis(10));
        assert_eq!(config.max_pending_frames, 8);
        assert_eq!(config.channel_capacity, 4);
        assert_eq!(config.backpressure_timeout, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_send_reaches_transport() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        let frame = data(42, b"hello");
        handle.send(&frame).await.unwrap();

        let mut buf = vec![0u8; frame.encode().len()];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, frame.encode());
    }

    #[tokio::test]
    async fn test_batched_frames_decode_in_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        let frames: Vec<_> = (0..10u64).map(|i| data(i, b"abcd")).collect();
        handle.send_all(&frames).await.unwrap();
        drop(handle);
        task.await.unwrap().unwrap();

        let mut wire = Vec::new();
        server.read_to_end(&mut wire).await.unwrap();

        let decoded = FrameBuffer::new().push(&wire).unwrap();
        assert_eq!(decoded, frames);
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let (client, _server) = duplex(4096);
        let (handle, _task) =
            spawn_writer_task(client, WriterConfig::default().max_pending_frames(0));

        assert!(handle.is_backpressure_active());
        let result = handle.try_send(&data(1, b"x"));
        assert!(matches!(result, Err(HalfDuplexError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_send_times_out_under_backpressure() {
        let (client, _server) = duplex(4096);
        let config = WriterConfig::default()
            .max_pending_frames(0)
            .backpressure_timeout(Duration::from_millis(20));
        let (handle, _task) = spawn_writer_task(client, config);

        let result = handle.send(&data(1, b"x")).await;
        assert!(matches!(result, Err(HalfDuplexError::BackpressureTimeout)));
    }

    #[test]
    fn test_remaining_slices() {
        let batch = vec![OutboundFrame::from_frame(&data(42, b"hello"))];
        let body_len = batch[0].body.len();

        assert_eq!(remaining_slices(&batch, 0).len(), 2);

        let slices = remaining_slices(&batch, 5);
        assert_eq!(slices[0].len(), HEADER_SIZE - 5);
        assert_eq!(slices[1].len(), body_len);

        let slices = remaining_slices(&batch, HEADER_SIZE + 1);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), body_len - 1);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5u64)
            .map(|i| OutboundFrame::from_frame(&data(i, b"abc")))
            .collect();
        let expected: usize = batch.iter().map(OutboundFrame::size).sum();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), expected);
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_handle_drop() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);

        assert!(task.await.unwrap().is_ok());
    }
}
