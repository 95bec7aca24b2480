//! Wire protocol and stream transport for tournbuddy.
//!
//! Messages travel as delimiter-terminated frames over a Unix or TCP byte
//! stream. [`wire`] finds frame boundaries, [`connection`] holds the
//! connection lifecycle and runs it on a tokio task, and [`transport`]
//! opens and accepts the underlying streams.

pub mod connection;
pub mod error;
pub mod transport;
pub mod wire;

pub use connection::{
    connect, open, Connection, ConnectionEvent, ConnectionEvents, ConnectionHandle, ConnectionState,
};
pub use error::ProtocolError;
pub use transport::{BoxedStream, ByteStream, Listener};
pub use wire::{FrameDecoder, MAX_MESSAGE_SIZE};
