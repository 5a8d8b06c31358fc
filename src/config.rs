use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddrV4;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::relay::{PeerMode, SessionPorts, MDNS_ADDR, MDNS_PORT, MDNS_RELAY_PORT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Set to false to run as a pure mDNS relay.
    pub enabled: bool,
    pub snaplen: i32,
    /// Read timeout in milliseconds; also how quickly a capture thread
    /// notices shutdown.
    pub timeout_ms: i32,
    pub promisc: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            enabled: true,
            snaplen: 65536,
            timeout_ms: 1000,
            promisc: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay_port: u16,
    pub peer_mode: PeerMode,
    pub mdns_group: SocketAddrV4,
    pub session_ports: SessionPorts,
    pub capture: CaptureConfig,
    pub poll_interval_secs: u64,
    pub stats_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            relay_port: MDNS_RELAY_PORT,
            peer_mode: PeerMode::default(),
            mdns_group: SocketAddrV4::new(MDNS_ADDR, MDNS_PORT),
            session_ports: SessionPorts::default(),
            capture: CaptureConfig::default(),
            poll_interval_secs: 5,
            stats_interval_secs: 60,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("can't read {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.relay_port == 0 {
            return Err(Error::Config("relay port must be set".to_string()));
        }
        if self.relay_port == MDNS_PORT {
            return Err(Error::Config(format!(
                "relay port can't be the mDNS port {}",
                MDNS_PORT
            )));
        }

        let mut seen = HashSet::new();
        for (service, port) in self.session_ports.iter() {
            if port == 0 {
                return Err(Error::Config(format!("{} port must be set", service)));
            }
            if !seen.insert(port) {
                return Err(Error::Config(format!("{} port {} is used twice", service, port)));
            }
        }

        if self.poll_interval_secs == 0 || self.stats_interval_secs == 0 {
            return Err(Error::Config("intervals must be at least one second".to_string()));
        }
        if self.capture.snaplen <= 0 || self.capture.timeout_ms <= 0 {
            return Err(Error::Config("capture snaplen and timeout must be positive".to_string()));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}
