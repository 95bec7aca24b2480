//! Tournament host daemon for tournbuddy.
//!
//! Binds the local control socket and an optional TCP listener, checks the
//! authorization code on every inbound connection, hands authorized
//! connections to the application as sessions, and publishes the host over
//! mDNS on request.

pub mod config;
pub mod daemon;
pub mod error;
pub mod session;
pub mod setup;
pub mod state;

pub use config::Config;
pub use daemon::{Daemon, DaemonEvent};
pub use error::DaemonError;
pub use session::{Session, SessionId};
pub use state::DaemonStatus;
