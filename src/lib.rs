//! # muxwire
//!
//! An asynchronous, single-connection client transport that multiplexes
//! many logical request/response exchanges over one TCP byte stream, using
//! a length-prefixed framing protocol and a correlation-id table.
//!
//! ## Architecture
//!
//! ```text
//!  send() ──► pending table ──► writer task ──► TCP ──► peer
//!                  ▲                                      │
//!  ResponseFuture ◄┴── dispatch ◄── receive loop ◄── TCP ◄┘
//! ```
//!
//! - Every request registers a one-shot slot under a fresh pseudo-random
//!   correlation id and returns a [`ResponseFuture`].
//! - One writer task owns the write half; concurrent sends are serialized
//!   on the wire.
//! - One receive loop owns the read half; it decodes frames and resolves
//!   each matching slot exactly once, in whatever order the peer answers.
//! - Read or framing errors are unrecoverable for the connection: it is
//!   torn down, outstanding requests fail, and the owner gets the typed
//!   error from [`Client::wait_for_shutdown`].
//!
//! Payload contents, opcode meanings, reconnection policy, and transport
//! security are the caller's concern.
//!
//! ## Example
//!
//! ```ignore
//! use muxwire::Client;
//!
//! #[tokio::main]
//! async fn main() -> muxwire::Result<()> {
//!     let client = Client::connect("game.example.net", 30800).await?;
//!
//!     // Fire off requests concurrently; responses route back by id.
//!     let a = client.send(7, &[0x01, 0x02]).await?;
//!     let b = client.send(9, b"status").await?;
//!     let (ra, rb) = tokio::join!(a, b);
//!     println!("{} / {} bytes", ra?.payload_len(), rb?.payload_len());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod pending;
pub mod protocol;
pub mod transport;
pub mod writer;

mod client;

pub use client::{Client, ClientBuilder, ConnectionState, UnsolicitedHandler};
pub use error::{MuxwireError, Result};
pub use pending::{PendingRequests, Response, ResponseFuture};
