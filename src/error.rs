use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::relay::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    /// A socket or interface enumeration call failed.
    #[error("{op} failed: {source}")]
    Platform {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The capture library refused an operation on an interface.
    #[error("capture on {iface} failed: {source}")]
    Capture {
        iface: String,
        #[source]
        source: pcap::Error,
    },

    #[error("{iface} is not an Ethernet interface (link type {link})")]
    LinkType { iface: String, link: i32 },

    /// A captured frame failed a bounds or consistency check.
    #[error("malformed frame: {0}")]
    Malformed(#[from] ParseError),

    /// A single forward attempt failed.
    #[error("failed to send to {to}: {source}")]
    Send {
        to: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read config file: {0}")]
    ConfigFile(#[from] serde_json::Error),
}

impl Error {
    pub fn platform(op: &'static str, source: io::Error) -> Self {
        Error::Platform { op, source }
    }

    /// The raw OS error code, when there is one.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Error::Platform { source, .. } | Error::Send { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attaches an operation name to an `io::Result`.
pub(crate) trait PlatformContext<T> {
    fn context(self, op: &'static str) -> Result<T>;
}

impl<T> PlatformContext<T> for io::Result<T> {
    fn context(self, op: &'static str) -> Result<T> {
        self.map_err(|e| Error::platform(op, e))
    }
}
