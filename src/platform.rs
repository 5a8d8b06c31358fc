//! Host services the relay depends on: which local addresses can carry
//! multicast, which devices can be captured on, and when either changes.

use std::collections::BTreeSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::IntervalStream;

use crate::error::{Error, Result};
use crate::relay::{log_err, Shutdown};
use crate::util::FilterSameExt;

/// A device the capture library can open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    pub name: String,
    pub description: Option<String>,
    pub addr: Ipv4Addr,
    pub netmask: Option<Ipv4Addr>,
}

impl std::fmt::Display for CaptureDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(desc) = &self.description {
            write!(f, " [{}]", desc)?;
        }
        match self.netmask {
            Some(mask) => write!(f, " ({}/{})", self.addr, u32::from(mask).count_ones()),
            None => write!(f, " ({})", self.addr),
        }
    }
}

pub trait Platform: Send + Sync {
    /// Local IPv4 addresses on interfaces that are up, running, not
    /// loopback, and multicast capable.
    fn multicast_addrs(&self) -> Result<Vec<Ipv4Addr>>;

    /// Capture devices that carry a non-zero IPv4 address.
    fn capture_devices(&self) -> Result<Vec<CaptureDevice>>;
}

pub type BoxPlatform = Arc<dyn Platform + 'static>;

/// The host's own network stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPlatform;

impl Platform for SystemPlatform {
    fn multicast_addrs(&self) -> Result<Vec<Ipv4Addr>> {
        let addrs = getifaddrs().map_err(|e| Error::platform("getifaddrs", io::Error::from(e)))?;
        let required =
            InterfaceFlags::IFF_UP | InterfaceFlags::IFF_RUNNING | InterfaceFlags::IFF_MULTICAST;

        let mut table = Vec::new();
        for ifaddr in addrs {
            if !ifaddr.flags.contains(required)
                || ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK)
            {
                continue;
            }
            let Some(addr) = ifaddr.address.as_ref().and_then(|a| a.as_sockaddr_in()) else {
                continue;
            };
            let ip = addr.ip();
            if ip.is_unspecified() || ip.is_loopback() || table.contains(&ip) {
                continue;
            }
            table.push(ip);
        }

        Ok(table)
    }

    fn capture_devices(&self) -> Result<Vec<CaptureDevice>> {
        let devices = pcap::Device::list().map_err(|source| Error::Capture {
            iface: "*".to_string(),
            source,
        })?;

        Ok(devices
            .into_iter()
            .filter_map(|device| {
                let (addr, netmask) = device.addresses.iter().find_map(|a| match a.addr {
                    IpAddr::V4(ip) if !ip.is_unspecified() => {
                        let netmask = match a.netmask {
                            Some(IpAddr::V4(mask)) => Some(mask),
                            _ => None,
                        };
                        Some((ip, netmask))
                    }
                    _ => None,
                })?;
                Some(CaptureDevice {
                    name: device.name,
                    description: device.desc,
                    addr,
                    netmask,
                })
            })
            .collect())
    }
}

/// Polls the platform every `every` and calls `on_change` on the blocking
/// pool whenever the set of multicast addresses differs from the last poll.
/// Calls never overlap: the next poll waits for the handler to return.
pub fn spawn_interface_watcher<F>(
    platform: BoxPlatform,
    every: Duration,
    mut shutdown: Shutdown,
    on_change: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let on_change = Arc::new(on_change);

    tokio::spawn(async move {
        let mut snapshots = IntervalStream::new(tokio::time::interval(every))
            .filter_map(move |_| {
                let platform = platform.clone();
                async move {
                    match tokio::task::spawn_blocking(move || platform.multicast_addrs()).await {
                        Ok(Ok(addrs)) => Some(addrs.into_iter().collect::<BTreeSet<_>>()),
                        Ok(Err(e)) => {
                            log::warn!("failed to poll interfaces ({})", e);
                            None
                        }
                        Err(e) => {
                            log::error!("interface poll task failed ({})", e);
                            None
                        }
                    }
                }
            })
            .changes();

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                next = snapshots.next() => match next {
                    Some(addrs) => {
                        log::info!("Interface addresses changed: {:?}", addrs);
                        let on_change = on_change.clone();
                        log_err(
                            tokio::task::spawn_blocking(move || on_change()).await,
                            "interface change handler panicked",
                        );
                    }
                    None => break,
                },
            }
        }
        log::debug!("interface watcher down");
    })
}
