//! Discovery of tournament hosts.
//!
//! Hosts are found two ways: control sockets in the local socket directory
//! ([`directory`]) and DNS-SD advertisements on the network (the
//! [`Discovery`] trait, backed by [`mdns::MdnsDiscovery`]). The [`Browser`]
//! merges both into one endpoint list and reports every change.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tournbuddy_types::Advertisement;

pub mod browser;
pub mod directory;
pub mod error;
pub mod mdns;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use browser::{Browser, BrowserConfig, BrowserEvent, ServiceList};
pub use error::DiscoveryError;
pub use mdns::MdnsDiscovery;

/// Network advertisement and browsing for tournament hosts.
#[async_trait]
pub trait Discovery: Send + 'static {
    /// Start advertising a host under `name` on `port`.
    async fn advertise(&mut self, name: &str, port: u16) -> Result<(), DiscoveryError>;

    /// Stop advertising. A no-op when nothing is advertised.
    async fn stop_advertising(&mut self) -> Result<(), DiscoveryError>;

    /// Start browsing for hosts, sending changes to the returned receiver.
    async fn browse(&mut self) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError>;

    /// Stop browsing. The receiver returned by [`Self::browse`] closes.
    async fn stop_browsing(&mut self) -> Result<(), DiscoveryError>;
}

/// Events from the discovery subsystem.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A host was found, or re-announced itself.
    ServiceFound(Advertisement),
    /// A previously found host went away. Carries the full service name.
    ServiceLost(String),
}
