use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;

use super::{RelayStats, Service, SessionPorts};
use crate::error::{Error, PlatformContext, Result};
use crate::util::create_shared_socket;

/// One session service: the fixed port the device talks to and the port it
/// was last seen talking from.
pub struct PortBinding {
    service: Service,
    dst_port: u16,
    src_port: u16,
    socket: UdpSocket,
}

impl PortBinding {
    fn new(iface_addr: Ipv4Addr, service: Service, port: u16) -> Result<Self> {
        // Bound to the fixed port so the device sees replies come from the
        // port it expects.
        let socket = create_shared_socket(&SocketAddrV4::new(iface_addr, port))
            .context("bind UDP forwarding socket")?;
        Ok(PortBinding {
            service,
            dst_port: port,
            src_port: port,
            socket,
        })
    }

    pub fn service(&self) -> Service {
        self.service
    }
    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }
    pub fn src_port(&self) -> u16 {
        self.src_port
    }
    /// Whether a device packet has told us where to send.
    pub fn is_learned(&self) -> bool {
        self.src_port != self.dst_port
    }
}

/// Per-interface port remapping state. Owned by one capture thread.
pub struct PortRelay {
    iface_addr: Ipv4Addr,
    bindings: Vec<PortBinding>,
    stats: Arc<RelayStats>,
}

impl PortRelay {
    pub fn register(
        iface_addr: Ipv4Addr,
        ports: &SessionPorts,
        stats: Arc<RelayStats>,
    ) -> Result<Self> {
        let bindings = ports
            .iter()
            .map(|(service, port)| PortBinding::new(iface_addr, service, port))
            .collect::<Result<Vec<_>>>()?;

        Ok(PortRelay {
            iface_addr,
            bindings,
            stats,
        })
    }

    pub fn iface_addr(&self) -> Ipv4Addr {
        self.iface_addr
    }

    pub fn binding(&self, dst_port: u16) -> Option<&PortBinding> {
        self.bindings.iter().find(|b| b.dst_port == dst_port)
    }

    fn binding_mut(&mut self, dst_port: u16) -> Option<&mut PortBinding> {
        self.bindings.iter_mut().find(|b| b.dst_port == dst_port)
    }

    /// Records that the device reached `dst_port` from `src_port`. Returns
    /// whether this changed anything.
    pub fn reconfigure(&mut self, src_port: u16, dst_port: u16) -> bool {
        let iface_addr = self.iface_addr;
        let binding = match self.binding_mut(dst_port) {
            Some(b) => b,
            None => return false,
        };
        if binding.src_port == src_port {
            return false;
        }

        log::info!(
            "Shield is communicating with us on {} ({}): UDP {} -> {}",
            iface_addr,
            binding.service,
            src_port,
            dst_port
        );
        binding.src_port = src_port;
        self.stats.port_learned();
        true
    }

    /// Re-sends `payload` to `dst_addr` on the port the device last used
    /// for the service behind `dst_port`. Returns `Ok(None)` when no such
    /// port has been seen yet.
    pub fn forward(
        &self,
        dst_addr: Ipv4Addr,
        dst_port: u16,
        payload: &[u8],
    ) -> Result<Option<usize>> {
        let binding = match self.binding(dst_port) {
            Some(b) => b,
            None => return Ok(None),
        };
        if !binding.is_learned() {
            return Ok(None);
        }

        let to = SocketAddrV4::new(dst_addr, binding.src_port);
        match binding.socket.send_to(payload, to) {
            Ok(size) => {
                self.stats.session_forwarded(size);
                Ok(Some(size))
            }
            Err(source) => {
                self.stats.send_failed();
                Err(Error::Send {
                    to: SocketAddr::V4(to),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{free_port, listener, recv_packet};

    fn relay_on(ip: Ipv4Addr) -> (PortRelay, SessionPorts) {
        let ports = SessionPorts {
            video: free_port(ip),
            control: free_port(ip),
            audio: free_port(ip),
        };
        let relay = PortRelay::register(ip, &ports, RelayStats::new()).unwrap();
        (relay, ports)
    }

    #[test]
    fn bindings_start_unlearned() {
        let (relay, ports) = relay_on(Ipv4Addr::LOCALHOST);
        for (service, port) in ports.iter() {
            let binding = relay.binding(port).unwrap();
            assert_eq!(binding.service(), service);
            assert_eq!(binding.src_port(), binding.dst_port());
            assert!(!binding.is_learned());
        }
    }

    #[test]
    fn unlearned_forward_sends_nothing() {
        let (relay, ports) = relay_on(Ipv4Addr::LOCALHOST);
        let (device, device_addr) = listener(Ipv4Addr::LOCALHOST);

        let sent = relay.forward(*device_addr.ip(), ports.video, b"frame").unwrap();
        assert_eq!(sent, None);
        assert!(recv_packet(&device).is_none());
    }

    #[test]
    fn forward_goes_to_learned_port() {
        let (mut relay, ports) = relay_on(Ipv4Addr::LOCALHOST);
        let (device, device_addr) = listener(Ipv4Addr::LOCALHOST);

        assert!(relay.reconfigure(device_addr.port(), ports.control));
        let sent = relay
            .forward(Ipv4Addr::LOCALHOST, ports.control, b"control bytes")
            .unwrap();
        assert_eq!(sent, Some(13));

        let (data, from) = recv_packet(&device).unwrap();
        assert_eq!(data, b"control bytes");
        assert_eq!(from.port(), ports.control);
    }

    #[test]
    fn repeated_port_is_not_a_change() {
        let (mut relay, ports) = relay_on(Ipv4Addr::LOCALHOST);
        assert!(relay.reconfigure(51000, ports.audio));
        assert!(!relay.reconfigure(51000, ports.audio));
        assert!(relay.reconfigure(51002, ports.audio));
        assert_eq!(relay.binding(ports.audio).unwrap().src_port(), 51002);
        assert_eq!(relay.stats.snapshot().ports_learned, 2);
    }

    #[test]
    fn unknown_port_is_ignored() {
        let (mut relay, _) = relay_on(Ipv4Addr::LOCALHOST);
        assert!(!relay.reconfigure(51000, 5353));
        assert_eq!(relay.forward(Ipv4Addr::LOCALHOST, 5353, b"x").unwrap(), None);
    }
}
