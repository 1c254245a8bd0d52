//! mDNS discovery: advertise this node under its display name and browse for
//! other instances of the same service type.

use std::net::{IpAddr, Ipv4Addr};

use anyhow::{Context, Result};
use lanchat_core::{sighting_channel, Sighting, SightingSender, SightingStream};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, info, warn};

const PROP_VERSION: &str = "version";

pub struct Mdns {
    daemon: ServiceDaemon,
    service_type: String,
}

/// A live advertisement. Withdrawn explicitly on shutdown.
pub struct Advertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Mdns {
    /// Start the mDNS daemon. Failure is fatal: without presence the node is useless.
    pub fn new(service_type: &str) -> Result<Self> {
        let daemon = ServiceDaemon::new().context("start mDNS daemon")?;
        Ok(Self {
            daemon,
            service_type: service_type.to_string(),
        })
    }

    /// Announce `name` at `port` on every local interface.
    pub fn advertise(&self, name: &str, port: u16) -> Result<Advertisement> {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "lanchat-node".into());
        let properties = [(PROP_VERSION.to_string(), env!("CARGO_PKG_VERSION").to_string())];
        let service = ServiceInfo::new(
            &self.service_type,
            name,
            &format!("{host}.local."),
            "",
            port,
            &properties[..],
        )
        .context("create mDNS service info")?
        .enable_addr_auto();
        let fullname = service.get_fullname().to_string();
        self.daemon
            .register(service)
            .context("register mDNS service")?;
        info!(name, port, service = %self.service_type, "advertising");
        Ok(Advertisement {
            daemon: self.daemon.clone(),
            fullname,
        })
    }

    /// Start browsing. The returned stream yields one sighting per resolved
    /// announcement (repeats included; the consumer deduplicates).
    pub fn browse(&self) -> Result<SightingStream> {
        let receiver = self
            .daemon
            .browse(&self.service_type)
            .context("start mDNS browse")?;
        let (tx, stream) = sighting_channel();
        let service_type = self.service_type.clone();
        // The daemon hands out a blocking channel; drain it off the async workers.
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = receiver.recv() {
                if !forward_event(&tx, &service_type, event) {
                    break;
                }
            }
            debug!("mDNS browse finished");
        });
        info!(service = %self.service_type, "browsing for peers");
        Ok(stream)
    }

    pub fn stop_browse(&self) {
        if let Err(e) = self.daemon.stop_browse(&self.service_type) {
            warn!(error = %e, "failed to stop mDNS browse");
        }
    }

    pub fn shutdown(self) {
        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "failed to shut down mDNS daemon");
        }
    }
}

impl Advertisement {
    pub fn withdraw(self) {
        match self.daemon.unregister(&self.fullname) {
            Ok(_) => info!(name = %self.fullname, "advertisement withdrawn"),
            Err(e) => warn!(error = %e, "failed to withdraw advertisement"),
        }
    }
}

/// Returns false when browsing should stop (search stopped or consumer gone).
fn forward_event(tx: &SightingSender, service_type: &str, event: ServiceEvent) -> bool {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let Some(name) = instance_name(info.get_fullname(), service_type) else {
                debug!(fullname = info.get_fullname(), "unexpected service name");
                return true;
            };
            let candidates = info.get_addresses();
            let Some(ip) = pick_address(candidates) else {
                debug!(name, ?candidates, "resolved without a usable IPv4 address");
                return true;
            };
            debug!(name, %ip, ?candidates, port = info.get_port(), "mDNS sighting");
            tx.send(Sighting::new(name, ip, info.get_port()))
        }
        ServiceEvent::ServiceRemoved(_, fullname) => {
            debug!(%fullname, "service removed");
            true
        }
        ServiceEvent::SearchStopped(_) => false,
        _ => true,
    }
}

/// `alice._lanchat._tcp.local.` -> `alice`.
fn instance_name<'a>(fullname: &'a str, service_type: &str) -> Option<&'a str> {
    let name = fullname.strip_suffix(service_type)?.strip_suffix('.')?;
    (!name.is_empty()).then_some(name)
}

/// Pick the address most likely to reach the peer on the LAN. Only IPv4 is
/// considered: the listener binds `0.0.0.0`, and a link-local IPv6 address
/// carries no scope id. Ties go to the lowest address.
fn pick_address<'a>(addrs: impl IntoIterator<Item = &'a IpAddr>) -> Option<IpAddr> {
    addrs
        .into_iter()
        .filter_map(|ip| match ip {
            IpAddr::V4(v4) if !v4.is_unspecified() => Some((lan_rank(v4), *v4)),
            _ => None,
        })
        .min()
        .map(|(_, v4)| IpAddr::V4(v4))
}

/// Lower is better. Home networks sit in 192.168/16; 172.16/12 is where
/// container bridges usually live, so it ranks after 10/8.
fn lan_rank(ip: &Ipv4Addr) -> u8 {
    let [a, b, ..] = ip.octets();
    match (a, b) {
        _ if ip.is_loopback() => 5,
        _ if ip.is_link_local() => 4,
        (192, 168) => 0,
        (10, _) => 1,
        (172, 16..=31) => 2,
        _ => 3,
    }
}
