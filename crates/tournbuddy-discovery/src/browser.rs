//! Merged view of local and remote tournament hosts.
//!
//! The remote sub-list follows a [`Discovery`] event stream; the local
//! sub-list is rebuilt by scanning the socket directory on a timer and on
//! request. Every change is published as a [`ServiceList`] snapshot and sent
//! to the observer as a [`BrowserEvent`].

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tournbuddy_types::{Advertisement, Endpoint};
use tracing::{debug, info, warn};

use crate::directory;
use crate::error::DiscoveryError;
use crate::{Discovery, DiscoveryEvent};

/// Default time between local socket directory scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(3);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Local and remote hosts, in observation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceList {
    local: Vec<Endpoint>,
    remote: Vec<Endpoint>,
}

impl ServiceList {
    /// Local hosts followed by remote hosts.
    pub fn services(&self) -> Vec<Endpoint> {
        self.local.iter().chain(&self.remote).cloned().collect()
    }

    pub fn local(&self) -> &[Endpoint] {
        &self.local
    }

    pub fn remote(&self) -> &[Endpoint] {
        &self.remote
    }

    pub fn len(&self) -> usize {
        self.local.len() + self.remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }

    /// Add or refresh a remote host. Returns whether anything changed.
    ///
    /// A re-announcement with new host details replaces the entry in place.
    pub fn add_remote(&mut self, ad: Advertisement) -> bool {
        let existing = self.remote.iter_mut().find_map(|ep| match ep {
            Endpoint::Advertised(known) if known.fullname == ad.fullname => Some(known),
            _ => None,
        });
        match existing {
            Some(known)
                if known.hostname == ad.hostname
                    && known.port == ad.port
                    && known.addresses == ad.addresses =>
            {
                false
            }
            Some(known) => {
                *known = ad;
                true
            }
            None => {
                self.remote.push(Endpoint::advertised(ad));
                true
            }
        }
    }

    /// Remove a remote host by full service name. Returns whether it was
    /// known.
    pub fn remove_remote(&mut self, fullname: &str) -> bool {
        let before = self.remote.len();
        self.remote
            .retain(|ep| !matches!(ep, Endpoint::Advertised(ad) if ad.fullname == fullname));
        self.remote.len() != before
    }

    /// Replace the local sub-list with a fresh scan. Returns whether it
    /// differs from the previous one.
    pub fn replace_local(&mut self, local: Vec<Endpoint>) -> bool {
        if self.local == local {
            return false;
        }
        self.local = local;
        true
    }
}

/// Notification sent to the browser's observer.
#[derive(Debug, Clone)]
pub enum BrowserEvent {
    /// The merged list changed; carries the new list.
    ServicesChanged(Vec<Endpoint>),
}

/// Browser settings.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Directory scanned for local host sockets.
    pub socket_dir: PathBuf,
    pub scan_interval: Duration,
}

impl BrowserConfig {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            scan_interval: DEFAULT_SCAN_INTERVAL,
        }
    }
}

/// Running browser.
///
/// Dropping it stops the background task.
pub struct Browser {
    snapshot: watch::Receiver<ServiceList>,
    rescan_tx: mpsc::Sender<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Browser {
    /// Start browsing. Without a discovery backend only local sockets are
    /// listed.
    ///
    /// The first local scan happens immediately.
    pub async fn start(
        config: BrowserConfig,
        discovery: Option<Box<dyn Discovery>>,
    ) -> Result<(Self, mpsc::Receiver<BrowserEvent>), DiscoveryError> {
        let mut discovery = discovery;
        let remote = match discovery.as_mut() {
            Some(d) => Some(d.browse().await?),
            None => None,
        };

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(ServiceList::default());
        let (rescan_tx, rescan_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        info!(
            dir = %config.socket_dir.display(),
            remote = remote.is_some(),
            "browser started"
        );

        let task = BrowserTask {
            config,
            discovery,
            remote,
            list: ServiceList::default(),
            events: event_tx,
            snapshot: snapshot_tx,
        };
        let handle = tokio::spawn(task.run(rescan_rx, shutdown_rx));

        Ok((
            Self {
                snapshot: snapshot_rx,
                rescan_tx,
                shutdown_tx: Some(shutdown_tx),
                task: Some(handle),
            },
            event_rx,
        ))
    }

    /// Local hosts followed by remote hosts.
    pub fn service_list(&self) -> Vec<Endpoint> {
        self.snapshot.borrow().services()
    }

    pub fn local_service_list(&self) -> Vec<Endpoint> {
        self.snapshot.borrow().local().to_vec()
    }

    pub fn remote_service_list(&self) -> Vec<Endpoint> {
        self.snapshot.borrow().remote().to_vec()
    }

    /// Watch the merged list.
    pub fn subscribe(&self) -> watch::Receiver<ServiceList> {
        self.snapshot.clone()
    }

    /// Rescan the socket directory now. Requests made while one is already
    /// pending are merged.
    pub fn rescan(&self) {
        let _ = self.rescan_tx.try_send(());
    }

    /// Stop browsing and wait for the background task. Safe to call twice.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "browser task ended abnormally");
            }
        }
    }
}

struct BrowserTask {
    config: BrowserConfig,
    discovery: Option<Box<dyn Discovery>>,
    remote: Option<mpsc::Receiver<DiscoveryEvent>>,
    list: ServiceList,
    events: mpsc::Sender<BrowserEvent>,
    snapshot: watch::Sender<ServiceList>,
}

impl BrowserTask {
    async fn run(mut self, mut rescan_rx: mpsc::Receiver<()>, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let changed = tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => self.rescan_local().await,
                Some(()) = rescan_rx.recv() => {
                    ticker.reset();
                    self.rescan_local().await
                }
                event = next_remote(&mut self.remote) => match event {
                    Some(DiscoveryEvent::ServiceFound(ad)) => {
                        debug!(service = %ad.fullname, "remote service found");
                        self.list.add_remote(ad)
                    }
                    Some(DiscoveryEvent::ServiceLost(fullname)) => {
                        debug!(service = %fullname, "remote service lost");
                        self.list.remove_remote(&fullname)
                    }
                    None => {
                        warn!("remote discovery stream ended");
                        self.remote = None;
                        false
                    }
                },
            };

            if changed {
                self.publish();
            }
        }

        if let Some(mut discovery) = self.discovery.take() {
            if let Err(e) = discovery.stop_browsing().await {
                warn!(error = %e, "failed to stop browsing");
            }
        }
        debug!("browser stopped");
    }

    async fn rescan_local(&mut self) -> bool {
        let local = directory::local_endpoints(&self.config.socket_dir).await;
        self.list.replace_local(local)
    }

    fn publish(&mut self) {
        self.snapshot.send_replace(self.list.clone());
        // Each event carries the whole list, so a full channel only loses
        // intermediate states.
        match self
            .events
            .try_send(BrowserEvent::ServicesChanged(self.list.services()))
        {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => debug!("browser event channel full, dropping event"),
        }
    }
}

async fn next_remote(remote: &mut Option<mpsc::Receiver<DiscoveryEvent>>) -> Option<DiscoveryEvent> {
    match remote {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{advertisement, MockDiscovery};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn next_services(events: &mut mpsc::Receiver<BrowserEvent>) -> Vec<Endpoint> {
        let BrowserEvent::ServicesChanged(list) = timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for browser event")
            .expect("browser event channel closed");
        list
    }

    fn bind_socket(dir: &std::path::Path, name: &str) -> (PathBuf, std::os::unix::net::UnixListener) {
        let path = dir.join(name);
        let listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        (path, listener)
    }

    #[test]
    fn remote_adds_and_removes_are_idempotent() {
        let mut list = ServiceList::default();
        assert!(list.add_remote(advertisement("R1", 25600)));
        assert!(!list.add_remote(advertisement("R1", 25600)));
        assert!(!list.remove_remote("unknown._tournbuddy._tcp.local."));
        assert_eq!(list.remote().len(), 1);
        assert!(list.remove_remote(&advertisement("R1", 25600).fullname));
        assert!(list.is_empty());
    }

    #[test]
    fn re_announcement_updates_in_place() {
        let mut list = ServiceList::default();
        list.add_remote(advertisement("R1", 25600));
        list.add_remote(advertisement("R2", 25600));
        assert!(list.add_remote(advertisement("R1", 25601)));
        let ports: Vec<_> = list.remote().iter().map(|ep| ep.port().unwrap()).collect();
        assert_eq!(ports, vec![25601, 25600]);
    }

    #[test]
    fn local_and_remote_same_host_stay_separate() {
        let mut list = ServiceList::default();
        list.replace_local(vec![Endpoint::local("/tmp/tournamentd.1.sock")]);
        list.add_remote(advertisement("tournamentd.1.sock", 25600));
        assert_eq!(list.len(), 2);
        assert!(!list.services()[0].is_remote());
        assert!(list.services()[1].is_remote());
    }

    #[test]
    fn unchanged_local_scan_is_not_a_change() {
        let mut list = ServiceList::default();
        let scan = vec![Endpoint::local("/tmp/a.sock"), Endpoint::local("/tmp/b.sock")];
        assert!(list.replace_local(scan.clone()));
        assert!(!list.replace_local(scan));
        assert!(list.replace_local(Vec::new()));
    }

    #[tokio::test]
    async fn merges_local_and_remote_with_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let (l1, _g1) = bind_socket(dir.path(), "tournamentd.1.sock");
        let (l2, _g2) = bind_socket(dir.path(), "tournamentd.2.sock");

        let (mock, feed) = MockDiscovery::new();
        let observer = mock.handle();
        let mut config = BrowserConfig::new(dir.path());
        config.scan_interval = Duration::from_secs(3600);
        let (mut browser, mut events) = Browser::start(config, Some(Box::new(mock))).await.unwrap();
        assert!(observer.is_browsing());

        let local = vec![Endpoint::local(&l1), Endpoint::local(&l2)];
        assert_eq!(next_services(&mut events).await, local);

        let r1 = advertisement("R1", 25600);
        let r2 = advertisement("R2", 25601);
        feed.send(DiscoveryEvent::ServiceFound(r1.clone())).await.unwrap();
        assert_eq!(next_services(&mut events).await.len(), 3);
        feed.send(DiscoveryEvent::ServiceFound(r2.clone())).await.unwrap();
        assert_eq!(next_services(&mut events).await.len(), 4);
        feed.send(DiscoveryEvent::ServiceLost(r1.fullname.clone())).await.unwrap();

        let mut expected = local.clone();
        expected.push(Endpoint::advertised(r2));
        assert_eq!(next_services(&mut events).await, expected);
        assert_eq!(browser.service_list(), expected);
        assert_eq!(browser.local_service_list(), local);
        assert_eq!(browser.remote_service_list().len(), 1);

        browser.stop().await;
        assert!(!observer.is_browsing());
    }

    #[tokio::test]
    async fn undrained_events_do_not_stall_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (mock, feed) = MockDiscovery::new();
        let mut config = BrowserConfig::new(dir.path());
        config.scan_interval = Duration::from_secs(3600);
        let (mut browser, _events) = Browser::start(config, Some(Box::new(mock))).await.unwrap();

        for i in 0..100 {
            let ad = advertisement(&format!("R{i}"), 25600);
            feed.send(DiscoveryEvent::ServiceFound(ad)).await.unwrap();
        }

        let mut snapshot = browser.subscribe();
        timeout(WAIT, snapshot.wait_for(|list| list.remote().len() == 100))
            .await
            .expect("snapshot stopped updating")
            .unwrap();
        assert_eq!(browser.remote_service_list().len(), 100);
        timeout(WAIT, browser.stop()).await.expect("stop hung");
    }

    #[tokio::test]
    async fn rescan_notifies_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BrowserConfig::new(dir.path());
        config.scan_interval = Duration::from_secs(3600);
        let (mut browser, mut events) = Browser::start(config, None).await.unwrap();

        // Empty directory: the first scan changes nothing.
        browser.rescan();
        assert!(timeout(Duration::from_millis(200), events.recv()).await.is_err());

        let (path, _guard) = bind_socket(dir.path(), "tournamentd.9.sock");
        browser.rescan();
        assert_eq!(next_services(&mut events).await, vec![Endpoint::local(&path)]);

        browser.rescan();
        assert!(timeout(Duration::from_millis(200), events.recv()).await.is_err());

        std::fs::remove_file(&path).unwrap();
        browser.rescan();
        assert!(next_services(&mut events).await.is_empty());

        browser.stop().await;
        browser.stop().await;
    }

    #[tokio::test]
    async fn periodic_scan_picks_up_new_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BrowserConfig::new(dir.path());
        config.scan_interval = Duration::from_millis(50);
        let (mut browser, mut events) = Browser::start(config, None).await.unwrap();

        let (path, _guard) = bind_socket(dir.path(), "tournamentd.10.sock");
        assert_eq!(next_services(&mut events).await, vec![Endpoint::local(&path)]);
        browser.stop().await;
    }
}
