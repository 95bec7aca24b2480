//! mDNS/DNS-SD backend built on `mdns-sd`.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tournbuddy_types::service::service_type_domain;
use tournbuddy_types::Advertisement;
use tracing::{debug, info, trace, warn};

use crate::error::DiscoveryError;
use crate::{Discovery, DiscoveryEvent};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// [`Discovery`] over multicast DNS.
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
    /// `<host>.local.` used for registrations.
    host_name: String,
    /// Full name of the current registration.
    registered: Option<String>,
    browsing: bool,
}

impl MdnsDiscovery {
    /// Start the mDNS responder. `host` is this machine's host name, with or
    /// without the `.local.` suffix.
    pub fn new(host: &str) -> Result<Self, DiscoveryError> {
        let daemon =
            ServiceDaemon::new().map_err(|e| DiscoveryError::Unavailable(e.to_string()))?;
        Ok(Self {
            daemon,
            host_name: mdns_host_name(host),
            registered: None,
            browsing: false,
        })
    }
}

fn mdns_host_name(host: &str) -> String {
    let host = host.trim_end_matches('.');
    let host = host.strip_suffix(".local").unwrap_or(host);
    format!("{host}.local.")
}

fn advertisement_from(info: &ServiceInfo) -> Advertisement {
    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().map(|ip| IpAddr::from(*ip)).collect();
    addresses.sort();
    Advertisement {
        fullname: info.get_fullname().to_string(),
        hostname: info.get_hostname().to_string(),
        port: info.get_port(),
        addresses,
    }
}

#[async_trait]
impl Discovery for MdnsDiscovery {
    async fn advertise(&mut self, name: &str, port: u16) -> Result<(), DiscoveryError> {
        self.stop_advertising().await?;

        let ty = service_type_domain();
        let service = ServiceInfo::new(
            &ty,
            name,
            &self.host_name,
            "",
            port,
            None::<HashMap<String, String>>,
        )
        .map_err(|e| DiscoveryError::Registration(e.to_string()))?
        .enable_addr_auto();
        let fullname = service.get_fullname().to_string();

        self.daemon
            .register(service)
            .map_err(|e| DiscoveryError::Registration(e.to_string()))?;
        info!(service = %fullname, port, "advertising");
        self.registered = Some(fullname);
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<(), DiscoveryError> {
        if let Some(fullname) = self.registered.take() {
            self.daemon
                .unregister(&fullname)
                .map_err(|e| DiscoveryError::Registration(e.to_string()))?;
            info!(service = %fullname, "stopped advertising");
        }
        Ok(())
    }

    async fn browse(&mut self) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
        let ty = service_type_domain();
        let receiver = self
            .daemon
            .browse(&ty)
            .map_err(|e| DiscoveryError::Browse(e.to_string()))?;
        self.browsing = true;
        debug!(service_type = %ty, "browsing");

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                let event = match event {
                    ServiceEvent::ServiceResolved(info) => {
                        DiscoveryEvent::ServiceFound(advertisement_from(&info))
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => DiscoveryEvent::ServiceLost(fullname),
                    ServiceEvent::SearchStopped(_) => break,
                    other => {
                        trace!(event = ?other, "ignored mDNS event");
                        continue;
                    }
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("mDNS browse ended");
        });
        Ok(rx)
    }

    async fn stop_browsing(&mut self) -> Result<(), DiscoveryError> {
        if self.browsing {
            self.browsing = false;
            self.daemon
                .stop_browse(&service_type_domain())
                .map_err(|e| DiscoveryError::Browse(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for MdnsDiscovery {
    fn drop(&mut self) {
        if let Some(fullname) = self.registered.take() {
            let _ = self.daemon.unregister(&fullname);
        }
        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "mDNS daemon shutdown failed");
        }
    }
}
