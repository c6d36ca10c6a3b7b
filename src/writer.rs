//! Dedicated writer task: the single owner of the stream's write half.
//!
//! All outbound frames funnel through one mpsc channel into one task, so
//! concurrent `send()` calls are serialized at the byte-stream level and a
//! frame is always written contiguously (header immediately followed by its
//! payload, never interleaved with another frame).
//!
//! # Architecture
//!
//! ```text
//! send() 1 ─┐
//! send() 2 ─┼─► mpsc::Sender<OutboundFrame> ─► writer task ─► TCP write half
//! send() N ─┘
//! ```
//!
//! The channel is bounded, which doubles as backpressure: when the peer
//! stops draining, `send()` waits for queue space and fails with
//! [`MuxwireError::Backpressure`] after the configured timeout.
//!
//! On a write error the task aborts the affected frames' entries in the
//! pending-request table (their futures resolve with `ConnectionClosed`),
//! shuts the write half down, and exits.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::error::{MuxwireError, Result};
use crate::pending::PendingRequests;
use crate::protocol::{Header, HEADER_SIZE};

/// Default writer channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default timeout when the write queue is full.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames written between flushes.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header (8 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (may be empty).
    pub payload: Bytes,
    /// Correlation id of the request this frame carries, so a failed write
    /// can fail the matching pending entry.
    pub correlation_id: u32,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
            correlation_id: header.correlation_id,
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
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// How long `send` waits for queue space before giving up.
    pub send_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Handle for submitting frames to the writer task.
///
/// Cheaply cloneable; any task may submit concurrently.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    send_timeout: Duration,
}

impl WriterHandle {
    /// Submit a frame for transmission.
    ///
    /// Waits for queue space while backpressure is active, up to the
    /// configured timeout.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        match tokio::time::timeout(self.send_timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(MuxwireError::ConnectionClosed),
            Err(_) => Err(MuxwireError::Backpressure),
        }
    }

    /// Submit a frame without waiting for queue space.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MuxwireError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => MuxwireError::ConnectionClosed,
        })
    }
}

/// Spawn the writer task and return a handle for submitting frames.
///
/// `shutdown` is shared with the receive loop: whichever side detects a
/// failure first notifies it, and the writer performs the orderly
/// `shutdown()` of the write half (FIN) before exiting.
pub fn spawn_writer_task<W>(
    writer: W,
    table: Arc<PendingRequests>,
    shutdown: Arc<Notify>,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let handle = WriterHandle {
        tx,
        send_timeout: config.send_timeout,
    };

    let task = tokio::spawn(writer_loop(rx, writer, table, shutdown));

    (handle, task)
}

/// Main writer loop: drain the queue, write batches, flush once per batch.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    table: Arc<PendingRequests>,
    shutdown: Arc<Notify>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            biased;
            _ = shutdown.notified() => {
                let _ = writer.shutdown().await;
                return Ok(());
            }
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                // All handles dropped: orderly local close.
                None => {
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
            },
        };

        // Collect whatever else is already queued, up to the batch cap.
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            for frame in &batch {
                table.abort(frame.correlation_id);
            }
            tracing::error!(error = %e, frames = batch.len(), "write failed, closing connection");
            let _ = writer.shutdown().await;
            return Err(e);
        }
    }
}

/// Write every frame in the batch, then flush once.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for frame in batch {
        writer.write_all(&frame.header).await?;
        if !frame.payload.is_empty() {
            writer.write_all(&frame.payload).await?;
        }
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncReadExt};
    use tokio::sync::oneshot;

    fn frame(opcode: u16, correlation_id: u32, payload: &'static [u8]) -> OutboundFrame {
        let header = Header::for_payload(opcode, correlation_id, payload.len()).unwrap();
        OutboundFrame::new(&header, Bytes::from_static(payload))
    }

    fn spawn_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>, Arc<Notify>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shutdown = Arc::new(Notify::new());
        let (handle, task) = spawn_writer_task(
            writer,
            Arc::new(PendingRequests::new()),
            shutdown.clone(),
            WriterConfig::default(),
        );
        (handle, task, shutdown)
    }

    #[test]
    fn test_outbound_frame_size() {
        let f = frame(1, 42, b"hello");
        assert_eq!(f.size(), HEADER_SIZE + 5);
        assert_eq!(f.correlation_id, 42);
    }

    #[tokio::test]
    async fn test_writer_sends_frame() {
        let (client, mut server) = duplex(4096);
        let (handle, _task, _shutdown) = spawn_default(client);

        handle.send(frame(1, 42, b"hello")).await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(n, HEADER_SIZE + 5);

        let mut parser = FrameBuffer::new();
        let frames = parser.push(&buf[..n]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].correlation_id(), 42);
        assert_eq!(frames[0].payload(), b"hello");
    }

    #[tokio::test]
    async fn test_writer_frames_arrive_back_to_back() {
        let (client, mut server) = duplex(4096);
        let (handle, _task, _shutdown) = spawn_default(client);

        for i in 0..10u32 {
            handle.send(frame(1, i, b"abc")).await.unwrap();
        }

        let mut parser = FrameBuffer::new();
        let mut collected = Vec::new();
        let mut buf = vec![0u8; 1024];
        while collected.len() < 10 {
            let n = server.read(&mut buf).await.unwrap();
            collected.extend(parser.push(&buf[..n]).unwrap());
        }

        for (i, f) in collected.iter().enumerate() {
            assert_eq!(f.correlation_id(), i as u32);
            assert_eq!(f.payload(), b"abc");
        }
    }

    #[tokio::test]
    async fn test_writer_exits_cleanly_when_handles_drop() {
        let (client, _server) = duplex(4096);
        let (handle, task, _shutdown) = spawn_default(client);

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_writer_exits_on_shutdown_notify() {
        let (client, _server) = duplex(4096);
        let (handle, task, shutdown) = spawn_default(client);

        shutdown.notify_one();

        let result = task.await.unwrap();
        assert!(result.is_ok());
        drop(handle);
    }

    /// Writer that fails every write attempt.
    struct FailingWriter;

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer went away",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_error_aborts_pending_entry() {
        let table = Arc::new(PendingRequests::new());
        let shutdown = Arc::new(Notify::new());
        let (handle, task) = spawn_writer_task(
            FailingWriter,
            table.clone(),
            shutdown,
            WriterConfig::default(),
        );

        // Register the request the frame belongs to.
        let (tx, rx) = oneshot::channel();
        let id = table.register(tx);
        let header = Header::for_payload(1, id, 2).unwrap();
        handle
            .send(OutboundFrame::new(&header, Bytes::from_static(b"xy")))
            .await
            .unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(MuxwireError::Io(_))));

        // The entry was aborted, so the requester is woken rather than leaked.
        assert!(table.is_empty());
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_write_batch_contiguous_bytes() {
        let mut buf = Cursor::new(Vec::new());
        let batch = vec![frame(1, 1, b"one"), frame(2, 2, b""), frame(3, 3, b"three")];

        write_batch(&mut buf, &batch).await.unwrap();

        let written = buf.into_inner();
        let expected: usize = batch.iter().map(|f| f.size()).sum();
        assert_eq!(written.len(), expected);

        let mut parser = FrameBuffer::new();
        let frames = parser.push(&written).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].payload_len(), 0);
    }
}
