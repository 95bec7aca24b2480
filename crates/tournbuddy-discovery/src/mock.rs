//! Mock discovery backend for testing.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tournbuddy_types::service::service_type_domain;
use tournbuddy_types::Advertisement;

use crate::error::DiscoveryError;
use crate::{Discovery, DiscoveryEvent};

#[derive(Debug, Default)]
struct MockDiscoveryState {
    advertised: Option<(String, u16)>,
    advertise_calls: usize,
    advertise_error: Option<String>,
    browsing: bool,
}

/// Mock discovery backend.
///
/// Returns a `mpsc::Sender<DiscoveryEvent>` that tests use to inject remote
/// services; `browse()` hands the matching receiver to the caller.
pub struct MockDiscovery {
    feed_rx: Option<mpsc::Receiver<DiscoveryEvent>>,
    state: Arc<Mutex<MockDiscoveryState>>,
}

impl MockDiscovery {
    /// Create a new mock and a sender for injecting events.
    pub fn new() -> (Self, mpsc::Sender<DiscoveryEvent>) {
        let (feed_tx, feed_rx) = mpsc::channel(64);
        let mock = Self {
            feed_rx: Some(feed_rx),
            state: Arc::new(Mutex::new(MockDiscoveryState::default())),
        };
        (mock, feed_tx)
    }

    /// Get a clonable handle for observing the mock from tests.
    pub fn handle(&self) -> MockDiscoveryHandle {
        MockDiscoveryHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Clonable observer handle for `MockDiscovery`.
#[derive(Clone)]
pub struct MockDiscoveryHandle {
    state: Arc<Mutex<MockDiscoveryState>>,
}

impl MockDiscoveryHandle {
    /// Name and port currently advertised.
    pub fn advertised(&self) -> Option<(String, u16)> {
        self.state.lock().unwrap().advertised.clone()
    }

    /// How many times `advertise()` was called.
    pub fn advertise_calls(&self) -> usize {
        self.state.lock().unwrap().advertise_calls
    }

    /// Make later `advertise()` calls fail with a registration error, or
    /// succeed again with `None`.
    pub fn fail_advertise(&self, reason: Option<&str>) {
        self.state.lock().unwrap().advertise_error = reason.map(str::to_string);
    }

    pub fn is_browsing(&self) -> bool {
        self.state.lock().unwrap().browsing
    }
}

#[async_trait]
impl Discovery for MockDiscovery {
    async fn advertise(&mut self, name: &str, port: u16) -> Result<(), DiscoveryError> {
        let mut state = self.state.lock().unwrap();
        state.advertise_calls += 1;
        if let Some(reason) = &state.advertise_error {
            return Err(DiscoveryError::Registration(reason.clone()));
        }
        state.advertised = Some((name.to_string(), port));
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<(), DiscoveryError> {
        self.state.lock().unwrap().advertised = None;
        Ok(())
    }

    async fn browse(&mut self) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
        let feed_rx = self
            .feed_rx
            .take()
            .ok_or_else(|| DiscoveryError::Browse("MockDiscovery already browsing".to_string()))?;
        self.state.lock().unwrap().browsing = true;
        Ok(feed_rx)
    }

    async fn stop_browsing(&mut self) -> Result<(), DiscoveryError> {
        self.state.lock().unwrap().browsing = false;
        Ok(())
    }
}

/// An advertisement for `name` on `port`, resolved to the loopback address.
pub fn advertisement(name: &str, port: u16) -> Advertisement {
    Advertisement {
        fullname: format!("{name}.{}", service_type_domain()),
        hostname: "mockhost.local.".to_string(),
        port,
        addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
    }
}
