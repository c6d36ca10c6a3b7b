//! Pending-request table: correlation ids and response routing.
//!
//! Every outbound request registers a one-shot response slot here under a
//! freshly generated correlation id. The receive loop resolves the slot when
//! a frame with a matching id arrives; the requester observes the result
//! through a [`ResponseFuture`].
//!
//! # Architecture
//!
//! ```text
//! send() ──► register() ──► { id → oneshot::Sender } ◄── complete() ◄── receive loop
//!                │                                           │
//!                └── ResponseFuture ◄────── Response ─────────┘
//! ```
//!
//! The table is an explicitly owned value shared via `Arc`; there is no
//! ambient or global instance. A single mutex guards the whole map:
//! `register` runs on arbitrary caller tasks while `complete` runs on the
//! receive loop, and both must see a consistent view of which ids are live.
//! The mutex is never held across an `.await` or while a resolved sender is
//! fired.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{MuxwireError, Result};

/// A response delivered for a single request.
#[derive(Debug, Clone)]
pub struct Response {
    /// Opcode of the response frame; opaque to this crate.
    pub opcode: u16,
    /// Response payload (zero-copy slice of the receive buffer).
    pub payload: Bytes,
}

impl Response {
    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Sender half of a registered request slot.
pub type ResponseSender = oneshot::Sender<Response>;

/// Thread-safe map from outstanding correlation ids to response slots.
///
/// Invariants:
/// - an id is unique among currently outstanding requests; it may be reused
///   only after its entry has been removed
/// - every entry is consumed at most once, by [`complete`](Self::complete),
///   [`abort`](Self::abort), or [`fail_all`](Self::fail_all)
pub struct PendingRequests {
    entries: Mutex<HashMap<u32, ResponseSender>>,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a response slot under a fresh correlation id.
    ///
    /// Generates a pseudo-random 32-bit id, retrying while a live entry
    /// already uses it. Generation and insertion happen under one lock
    /// acquisition, so the returned id is never in use by another
    /// outstanding request.
    pub fn register(&self, sender: ResponseSender) -> u32 {
        let mut entries = self.entries.lock();
        loop {
            let id = rand::random::<u32>();
            if let Entry::Vacant(slot) = entries.entry(id) {
                slot.insert(sender);
                return id;
            }
        }
    }

    /// Atomically look up and remove the slot for `correlation_id`.
    ///
    /// Returns `None` if no such id is outstanding — unmatched or
    /// already-resolved ids are not an error. The caller fires the returned
    /// sender after this call, outside the table's lock.
    pub fn complete(&self, correlation_id: u32) -> Option<ResponseSender> {
        self.entries.lock().remove(&correlation_id)
    }

    /// Remove and drop the slot for `correlation_id`, if still outstanding.
    ///
    /// Used by the send path when submission fails after registration: the
    /// dropped sender wakes the paired [`ResponseFuture`] with
    /// [`MuxwireError::ConnectionClosed`]. Returns whether an entry existed.
    pub fn abort(&self, correlation_id: u32) -> bool {
        self.entries.lock().remove(&correlation_id).is_some()
    }

    /// Drain every outstanding entry on connection teardown.
    ///
    /// Dropping the senders wakes all paired futures with
    /// [`MuxwireError::ConnectionClosed`].
    pub fn fail_all(&self) {
        let drained: Vec<ResponseSender> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, sender)| sender).collect()
        };
        drop(drained);
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check whether no requests are outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

/// Future resolved when the response for one request arrives.
///
/// Returned by [`Client::send`](crate::Client::send). Resolves with the
/// matching [`Response`] exactly once, or with
/// [`MuxwireError::ConnectionClosed`] if the connection goes down first.
/// There is no built-in timeout; wrap the future in
/// `tokio::time::timeout` if expiry is needed.
#[derive(Debug)]
pub struct ResponseFuture {
    rx: oneshot::Receiver<Response>,
}

impl ResponseFuture {
    pub(crate) fn new(rx: oneshot::Receiver<Response>) -> Self {
        Self { rx }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| MuxwireError::ConnectionClosed))
    }
}
