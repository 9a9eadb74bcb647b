//! Dedicated writer task for the framed transport.
//!
//! Callers hand complete messages (every frame of one request, or a single
//! cancel frame) to a writer task over an mpsc channel. A message is queued
//! as one unit, so frames of one request are never split by a full queue.
//!
//! ```text
//! send() caller 1 ─┐
//! send() caller 2 ─┼─► mpsc::Sender<Vec<OutboundFrame>> ─► Writer Task ─► stream
//! cancel()        ─┘
//! ```
//!
//! The task batches whatever is queued into one vectored write.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{RpcError, Result};
use crate::protocol::{Header, HEADER_SIZE};

/// Default maximum queued messages before new ones are rejected.
pub const DEFAULT_MAX_PENDING_MESSAGES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum messages to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for cancel frames).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a frame; the header length is taken from `payload`, which
    /// must fit the u32 length field.
    #[inline]
    pub fn new(flags: u8, request_id: u64, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= u32::MAX as usize);
        let header = Header::new(flags, request_id, payload.len() as u32);
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum queued messages before `try_send` fails.
    pub max_pending_messages: usize,
    /// Channel capacity for the message queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_messages: DEFAULT_MAX_PENDING_MESSAGES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for queueing messages to the writer task.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Vec<OutboundFrame>>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<Vec<OutboundFrame>>, pending: Arc<AtomicUsize>, max_pending: usize) -> Self {
        Self {
            tx,
            pending,
            max_pending,
        }
    }

    /// Queue a message without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity and
    /// `Err(ConnectionClosed)` if the writer task is gone.
    pub fn try_send(&self, message: Vec<OutboundFrame>) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(RpcError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(message).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => RpcError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => RpcError::ConnectionClosed,
            }
        })
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Get current queued message count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task on the current runtime.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(tx, pending.clone(), config.max_pending_messages);
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Vec<OutboundFrame>>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(message) => message,
            None => {
                // every handle dropped
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };

        let mut batch = first;
        let mut messages = 1;
        while messages < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(message) => {
                    batch.extend(message);
                    messages += 1;
                }
                Err(_) => break,
            }
        }

        let result = write_batch(&mut writer, &batch).await;
        pending.fetch_sub(messages, Ordering::Release);
        if let Err(e) = result {
            tracing::error!("Writer task failed: {}", e);
            return Err(e);
        }
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after the first `skip_bytes` bytes.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        offset = header_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            offset = payload_end;
        }
    }

    slices
}
