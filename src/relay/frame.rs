use smoltcp::wire::{EthernetFrame, EthernetProtocol, IpProtocol, Ipv4Packet, UdpPacket};
use std::net::Ipv4Addr;
use thiserror::Error;

use super::{Service, SessionPorts};

mod field {
    pub const ETHERNET_HEADER_LEN: usize = 14;
    pub const IPV4_MIN_HEADER_LEN: usize = 20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("frame is shorter than its headers claim")]
    Truncated,
    #[error("frame exceeds the capture size")]
    Oversized,
    #[error("not an IPv4 frame")]
    NotIpv4,
    #[error("invalid IPv4 header length")]
    BadHeaderLength,
    #[error("not a UDP datagram")]
    NotUdp,
    #[error("fragmented datagram")]
    Fragment,
}

pub type Result<T> = std::result::Result<T, ParseError>;

pub trait Parser<'a> {
    const MIN_LENGTH: usize;
    const MAX_LENGTH: usize = 65536;

    fn do_parse(bytes: &'a [u8]) -> Result<Self>
    where
        Self: Sized;

    fn parse(bytes: &'a [u8]) -> Result<Self>
    where
        Self: Sized,
    {
        if bytes.len() < Self::MIN_LENGTH {
            Err(ParseError::Truncated)
        } else if bytes.len() > Self::MAX_LENGTH {
            Err(ParseError::Oversized)
        } else {
            Self::do_parse(bytes)
        }
    }
}

/// The parts of a captured Ethernet/IPv4/UDP frame the port relay cares
/// about. `payload` is cut to the UDP length field, so link-layer padding
/// never leaks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFrame<'a> {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

impl<'a> Parser<'a> for SessionFrame<'a> {
    const MIN_LENGTH: usize = field::ETHERNET_HEADER_LEN + field::IPV4_MIN_HEADER_LEN;

    fn do_parse(bytes: &'a [u8]) -> Result<SessionFrame<'a>> {
        let eth = EthernetFrame::new_checked(bytes).map_err(|_| ParseError::Truncated)?;
        if eth.ethertype() != EthernetProtocol::Ipv4 {
            return Err(ParseError::NotIpv4);
        }

        let ver_ihl = *eth.payload().first().ok_or(ParseError::Truncated)?;
        if ver_ihl >> 4 != 4 {
            return Err(ParseError::NotIpv4);
        }
        if ((ver_ihl & 0x0f) as usize) * 4 < field::IPV4_MIN_HEADER_LEN {
            return Err(ParseError::BadHeaderLength);
        }

        // new_checked cross-checks the header length and total length
        // against the bytes we actually captured.
        let ip = Ipv4Packet::new_checked(eth.payload()).map_err(|_| ParseError::Truncated)?;
        if ip.next_header() != IpProtocol::Udp {
            return Err(ParseError::NotUdp);
        }
        if ip.more_frags() || ip.frag_offset() != 0 {
            return Err(ParseError::Fragment);
        }

        let udp = UdpPacket::new_checked(ip.payload()).map_err(|_| ParseError::Truncated)?;

        Ok(SessionFrame {
            src_addr: Ipv4Addr::from(ip.src_addr().0),
            dst_addr: Ipv4Addr::from(ip.dst_addr().0),
            src_port: udp.src_port(),
            dst_port: udp.dst_port(),
            payload: udp.payload(),
        })
    }
}

/// What the port relay should do with a frame seen on one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    /// The device reached one of our fixed ports from `src_port`.
    Learn { service: Service, src_port: u16 },
    /// We sent from and to a fixed port; re-send `payload` to `dst_addr`
    /// on the port the device actually listens on.
    Forward {
        service: Service,
        dst_addr: Ipv4Addr,
        payload: &'a [u8],
    },
}

/// Decides what a frame means for the interface at `iface_addr`. Returns
/// `None` for frames that don't involve this interface, don't hit a session
/// port, or claim an impossible direction.
pub fn classify<'a>(
    frame: &SessionFrame<'a>,
    iface_addr: Ipv4Addr,
    ports: &SessionPorts,
) -> Option<Action<'a>> {
    if frame.src_addr != iface_addr && frame.dst_addr != iface_addr {
        return None;
    }

    let service = ports.lookup(frame.dst_port)?;

    if frame.src_port != frame.dst_port {
        // device -> us on a dynamic port; never from our own address
        if frame.src_addr == iface_addr {
            return None;
        }
        Some(Action::Learn {
            service,
            src_port: frame.src_port,
        })
    } else {
        // us -> device on the fixed port; must really be from us
        if frame.src_addr != iface_addr {
            return None;
        }
        Some(Action::Forward {
            service,
            dst_addr: frame.dst_addr,
            payload: frame.payload,
        })
    }
}
