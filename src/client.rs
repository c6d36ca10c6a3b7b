//! Client builder and connection runtime.
//!
//! [`ClientBuilder`] configures frame limits, writer behavior, and the
//! unsolicited-frame hook. [`ClientBuilder::connect`] manages the lifecycle:
//! 1. Resolve the host and connect to the first reachable candidate
//! 2. Split the stream; spawn the writer task
//! 3. Arm the receive loop
//! 4. Hand back a [`Client`] for issuing requests
//!
//! # Example
//!
//! ```ignore
//! use muxwire::Client;
//!
//! #[tokio::main]
//! async fn main() -> muxwire::Result<()> {
//!     let client = Client::connect("127.0.0.1", 30800).await?;
//!
//!     let response = client.send(7, &[0x01, 0x02]).await?.await?;
//!     println!("{} payload bytes", response.payload_len());
//!
//!     client.wait_for_shutdown().await
//! }
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;

use crate::error::{MuxwireError, Result};
use crate::pending::{PendingRequests, Response, ResponseFuture};
use crate::protocol::{
    Frame, FrameBuffer, Header, ABSOLUTE_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE,
};
use crate::transport;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt has been made.
    Disconnected,
    /// Resolving and dialing candidates.
    Connecting,
    /// The receive loop is armed and requests may be sent.
    Connected,
    /// Torn down; every outstanding request has been failed.
    Closed,
}

/// Hook invoked on the receive-loop task for frames whose correlation id
/// matches no outstanding request. Keep it quick: frame dispatch waits on it.
pub type UnsolicitedHandler = Arc<dyn Fn(Frame) + Send + Sync>;

/// Builder for configuring and connecting a muxwire client.
pub struct ClientBuilder {
    max_frame_size: usize,
    writer_config: WriterConfig,
    unsolicited: Option<UnsolicitedHandler>,
}

impl ClientBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            writer_config: WriterConfig::default(),
            unsolicited: None,
        }
    }

    /// Set the maximum frame size, header included.
    ///
    /// Bounded above by the 16-bit length field (65535). Frames larger than
    /// this are rejected on send and are a fatal protocol error on receive.
    /// Default: 1024.
    pub fn max_frame_size(mut self, limit: usize) -> Self {
        self.max_frame_size = limit.clamp(HEADER_SIZE, ABSOLUTE_MAX_FRAME_SIZE);
        self
    }

    /// Set the writer queue capacity.
    ///
    /// Default: 1024.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set how long `send` waits when the writer queue is full.
    ///
    /// Default: 5 seconds.
    pub fn send_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.writer_config.send_timeout = timeout;
        self
    }

    /// Register a handler for frames that match no outstanding request.
    ///
    /// Without a handler such frames are logged and dropped; dispatch of
    /// later frames is unaffected either way.
    pub fn on_unsolicited<F>(mut self, handler: F) -> Self
    where
        F: Fn(Frame) + Send + Sync + 'static,
    {
        self.unsolicited = Some(Arc::new(handler));
        self
    }

    /// Resolve `host:port`, connect, and arm the receive loop.
    ///
    /// Candidate addresses are tried in resolution order; the first success
    /// wins. Failure of resolution or of every candidate is logged and
    /// surfaces as a retryable [`MuxwireError::Connect`]; nothing is
    /// propagated beyond that.
    pub async fn connect(self, host: &str, port: u16) -> Result<Client> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        state_tx.send_replace(ConnectionState::Connecting);

        let stream = transport::connect(host, port).await?;
        let (read_half, write_half) = stream.into_split();

        let pending = Arc::new(PendingRequests::new());
        let shutdown = Arc::new(Notify::new());
        let (writer, _writer_task) = spawn_writer_task(
            write_half,
            pending.clone(),
            shutdown.clone(),
            self.writer_config,
        );

        // Arm the receive loop before the client is handed out.
        state_tx.send_replace(ConnectionState::Connected);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let loop_pending = pending.clone();
        let loop_shutdown = shutdown.clone();
        let max_frame_size = self.max_frame_size;
        let unsolicited = self.unsolicited;
        tokio::spawn(async move {
            let outcome = read_loop(
                read_half,
                &loop_pending,
                unsolicited.as_ref(),
                max_frame_size,
            )
            .await;

            // Orderly teardown: FIN the write half, wake every outstanding
            // requester, then report the outcome to the owner.
            loop_shutdown.notify_one();
            loop_pending.fail_all();
            state_tx.send_replace(ConnectionState::Closed);
            let _ = shutdown_tx.send(outcome);
        });

        Ok(Client {
            pending,
            writer,
            max_frame_size,
            state_rx,
            shutdown,
            shutdown_rx,
            _writer_task,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected muxwire client.
///
/// Many requests may be outstanding concurrently on the one connection;
/// each [`send`](Self::send) returns a future resolved by the matching
/// response frame, in whatever order the peer answers.
pub struct Client {
    /// Outstanding requests, shared with the receive loop and writer task.
    pending: Arc<PendingRequests>,
    /// Handle into the writer task.
    writer: WriterHandle,
    /// Frame size limit, header included.
    max_frame_size: usize,
    /// Observed connection state.
    state_rx: watch::Receiver<ConnectionState>,
    /// Signals the writer task to FIN the write half.
    shutdown: Arc<Notify>,
    /// Resolved by the receive loop when the connection ends.
    shutdown_rx: oneshot::Receiver<Result<()>>,
    /// Writer task handle.
    _writer_task: JoinHandle<Result<()>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect with default settings. See [`ClientBuilder::connect`].
    pub async fn connect(host: &str, port: u16) -> Result<Client> {
        ClientBuilder::new().connect(host, port).await
    }

    /// Issue a request and get a future for its response.
    ///
    /// Registers a fresh correlation id, encodes the frame, and submits it
    /// to the writer task. The returned [`ResponseFuture`] resolves when the
    /// peer answers with a frame carrying the same correlation id; there is
    /// no timeout and no ordering guarantee across requests.
    ///
    /// If submission fails the registration is rolled back before the error
    /// is returned, so the table never leaks an entry for an unsent frame.
    pub async fn send(&self, opcode: u16, payload: &[u8]) -> Result<ResponseFuture> {
        self.send_bytes(opcode, Bytes::copy_from_slice(payload)).await
    }

    /// Zero-copy variant of [`send`](Self::send).
    pub async fn send_bytes(&self, opcode: u16, payload: Bytes) -> Result<ResponseFuture> {
        let frame_len = HEADER_SIZE + payload.len();
        if frame_len > self.max_frame_size {
            return Err(MuxwireError::FrameTooLarge {
                length: frame_len,
                max: self.max_frame_size,
            });
        }

        let (tx, rx) = oneshot::channel();
        let correlation_id = self.pending.register(tx);

        let header = match Header::for_payload(opcode, correlation_id, payload.len()) {
            Ok(header) => header,
            Err(e) => {
                self.pending.abort(correlation_id);
                return Err(e);
            }
        };

        if let Err(e) = self.writer.send(OutboundFrame::new(&header, payload)).await {
            self.pending.abort(correlation_id);
            return Err(e);
        }

        Ok(ResponseFuture::new(rx))
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for observing state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Begin an orderly local close: FIN the write half.
    ///
    /// The teardown completes when the peer closes its side; await
    /// [`wait_for_shutdown`](Self::wait_for_shutdown) for that.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Block until the connection ends.
    ///
    /// Resolves `Ok(())` on a clean peer close and `Err(e)` when the
    /// receive loop died on a read or framing error. The connection is
    /// already torn down and every outstanding request failed by the time
    /// this returns; whether to reconnect, propagate, or abort is the
    /// caller's policy.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        self.shutdown_rx
            .await
            .unwrap_or(Err(MuxwireError::ConnectionClosed))
    }
}

/// The self-perpetuating receive loop: read, decode, dispatch, repeat.
///
/// Reads are strictly serialized; a new read is not issued until every
/// frame completed by the previous one has been dispatched. Returns `Ok(())`
/// on peer EOF and `Err` on a read failure or framing violation, both of
/// which are unrecoverable for this connection.
async fn read_loop(
    mut reader: OwnedReadHalf,
    pending: &PendingRequests,
    unsolicited: Option<&UnsolicitedHandler>,
    max_frame_size: usize,
) -> Result<()> {
    let mut frame_buffer = FrameBuffer::with_max_frame_size(max_frame_size);
    let mut buf = vec![0u8; max_frame_size];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("peer closed the connection");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "read failed, tearing down connection");
                return Err(e.into());
            }
        };

        let frames = match frame_buffer.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::error!(error = %e, "inbound framing violation, tearing down connection");
                return Err(e);
            }
        };

        for frame in frames {
            dispatch(pending, unsolicited, frame);
        }
    }
}

/// Route one decoded frame to its requester, or to the unsolicited hook.
fn dispatch(pending: &PendingRequests, unsolicited: Option<&UnsolicitedHandler>, frame: Frame) {
    let correlation_id = frame.correlation_id();
    match pending.complete(correlation_id) {
        Some(sender) => {
            let response = Response {
                opcode: frame.opcode(),
                payload: frame.payload_bytes(),
            };
            // The table lock is already released here. A dead receiver just
            // means the requester gave up waiting.
            if sender.send(response).is_err() {
                tracing::debug!(correlation_id, "requester dropped before the response arrived");
            }
        }
        None => match unsolicited {
            Some(handler) => handler(frame),
            None => tracing::debug!(
                correlation_id,
                opcode = frame.opcode(),
                "dropping frame with no matching request"
            ),
        },
    }
}
