use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;

use super::{InterfaceTable, RelayStats, Shutdown, MDNS_MAX_DATAGRAM, MDNS_PORT};
use crate::error::{PlatformContext, Result};
use crate::util::create_socket;

/// What sits on the far side of the relay port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PeerMode {
    /// A plain mDNS speaker that sends from the standard port.
    #[default]
    Compliant,
    /// Another relay. Anything arriving from the standard mDNS port is
    /// unrelated multicast chatter and is discarded.
    Relay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Local mDNS traffic for the remote peer.
    ToPeer(SocketAddrV4),
    /// Remote traffic for the local group. `new_peer` is set when the
    /// sender replaced the remembered peer.
    ToGroup { group: SocketAddrV4, new_peer: bool },
    Drop,
}

/// Decides where each mDNS datagram goes and remembers the remote peer.
#[derive(Debug, Clone)]
pub struct MdnsRouter {
    mode: PeerMode,
    group: SocketAddrV4,
    peer: Option<SocketAddrV4>,
}

impl MdnsRouter {
    pub fn new(mode: PeerMode, group: SocketAddrV4) -> Self {
        MdnsRouter {
            mode,
            group,
            peer: None,
        }
    }

    pub fn peer(&self) -> Option<SocketAddrV4> {
        self.peer
    }

    pub fn route(&mut self, src: SocketAddrV4, is_local: bool) -> Route {
        if is_local {
            return match self.peer {
                Some(peer) => Route::ToPeer(peer),
                None => Route::Drop,
            };
        }

        if self.mode == PeerMode::Relay && src.port() == MDNS_PORT {
            return Route::Drop;
        }

        let new_peer = self.peer != Some(src);
        if new_peer {
            log::info!("Relaying mDNS traffic to {}", src);
            self.peer = Some(src);
        }
        Route::ToGroup {
            group: self.group,
            new_peer,
        }
    }
}

/// The relay-port socket and the loop that drives it.
pub struct MdnsRelay {
    socket: Arc<UdpSocket>,
    table: InterfaceTable,
    router: MdnsRouter,
    stats: Arc<RelayStats>,
}

impl MdnsRelay {
    pub fn bind(
        addr: SocketAddrV4,
        table: InterfaceTable,
        router: MdnsRouter,
        stats: Arc<RelayStats>,
    ) -> Result<Self> {
        let socket = create_socket(&addr).context("bind mDNS relay socket")?;
        Ok(MdnsRelay {
            socket: Arc::new(socket),
            table,
            router,
            stats,
        })
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("query relay socket address")
    }

    pub fn router(&self) -> &MdnsRouter {
        &self.router
    }

    /// Relays datagrams until shutdown. Any receive or send error ends the
    /// loop. Datagrams over [`MDNS_MAX_DATAGRAM`] are dropped whole rather
    /// than relayed cut short.
    pub async fn relay_loop(&mut self, mut shutdown: Shutdown) -> Result<()> {
        // one spare byte tells an oversized datagram from a full one
        let mut buf = vec![0u8; MDNS_MAX_DATAGRAM + 1];

        log::info!("Relay is up and running");
        loop {
            let (size, src) = tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                received = self.socket.recv_from(&mut buf) => {
                    received.context("receive mDNS datagram")?
                }
            };
            if size > MDNS_MAX_DATAGRAM {
                log::debug!("dropping oversized mDNS datagram from {}", src);
                self.stats.mdns_dropped();
                continue;
            }
            let src = match src {
                SocketAddr::V4(src) => src,
                SocketAddr::V6(_) => continue,
            };
            let data = &buf[..size];

            let is_local = self.table.contains(src.ip());
            let dst = match self.router.route(src, is_local) {
                Route::ToPeer(peer) => {
                    self.stats.mdns_to_peer();
                    peer
                }
                Route::ToGroup { group, .. } => {
                    self.stats.mdns_to_group();
                    group
                }
                Route::Drop => {
                    self.stats.mdns_dropped();
                    continue;
                }
            };

            log::trace!("{} -> {}: {}", src, dst, hex::encode(data));
            self.socket
                .send_to(data, dst)
                .await
                .context("send mDNS datagram")?;
        }
    }
}
