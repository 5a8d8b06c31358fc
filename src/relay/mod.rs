pub(crate) mod capture;
pub(crate) mod frame;
pub(crate) mod iface_table;
pub(crate) mod mdns;
pub(crate) mod port_relay;
pub(crate) mod reconfigure;
pub(crate) mod server;
pub(crate) mod shutdown;
pub(crate) mod stats;

pub use capture::{CaptureSession, CaptureSet, InterfaceContext, CAPTURE_FILTER};
pub use frame::{classify, Action, Parser, ParseError, SessionFrame};
pub use iface_table::InterfaceTable;
pub use mdns::{MdnsRelay, MdnsRouter, PeerMode, Route};
pub use port_relay::{PortBinding, PortRelay};
pub use reconfigure::{Membership, Reconfigurator};
pub use server::Relay;
pub use shutdown::{Shutdown, ShutdownHandle};
pub use stats::{RelayStats, StatsSnapshot};

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// mDNS multicast group.
pub const MDNS_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;
/// Largest mDNS message allowed on the wire, jumbo frames included.
pub const MDNS_MAX_DATAGRAM: usize = 9000;
/// Unicast port carrying mDNS between relays.
pub const MDNS_RELAY_PORT: u16 = 5354;
/// Upper bound on the interface table.
pub const MAX_IP_COUNT: usize = 32;

pub const VIDEO_PORT: u16 = 47998;
pub const CONTROL_PORT: u16 = 47999;
pub const AUDIO_PORT: u16 = 48000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Video,
    Control,
    Audio,
}

impl Service {
    pub const ALL: [Service; 3] = [Service::Video, Service::Control, Service::Audio];

    pub fn name(&self) -> &'static str {
        match self {
            Service::Video => "video",
            Service::Control => "control",
            Service::Audio => "audio",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The fixed UDP ports the streaming device listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPorts {
    pub video: u16,
    pub control: u16,
    pub audio: u16,
}

impl Default for SessionPorts {
    fn default() -> Self {
        SessionPorts {
            video: VIDEO_PORT,
            control: CONTROL_PORT,
            audio: AUDIO_PORT,
        }
    }
}

impl SessionPorts {
    pub fn port(&self, service: Service) -> u16 {
        match service {
            Service::Video => self.video,
            Service::Control => self.control,
            Service::Audio => self.audio,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Service, u16)> + '_ {
        Service::ALL.iter().map(move |s| (*s, self.port(*s)))
    }

    pub fn lookup(&self, port: u16) -> Option<Service> {
        self.iter().find(|(_, p)| *p == port).map(|(s, _)| s)
    }
}

pub fn log_err<T, E: std::fmt::Display>(result: std::result::Result<T, E>, msg: &str) {
    if let Err(e) = result {
        log::error!("{} ({})", msg, e);
    }
}

pub fn log_warn<T, E: std::fmt::Display>(result: std::result::Result<T, E>, msg: &str) {
    if let Err(e) = result {
        log::warn!("{} ({})", msg, e)
    }
}
