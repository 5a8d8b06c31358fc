use pcap::{Active, Capture, Linktype};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;

use super::frame::{classify, Action, Parser, SessionFrame};
use super::{
    log_warn, InterfaceTable, PortRelay, RelayStats, SessionPorts, Shutdown, ShutdownHandle,
};
use crate::config::CaptureConfig;
use crate::error::{Error, PlatformContext, Result};
use crate::platform::{BoxPlatform, CaptureDevice};

/// Only IPv4 UDP ever reaches the handler.
pub const CAPTURE_FILTER: &str = "ip and udp";

/// Frame handling for one interface: parse, classify, hand to the port
/// relay.
pub struct InterfaceContext {
    iface_addr: Ipv4Addr,
    ports: SessionPorts,
    relay: PortRelay,
}

impl InterfaceContext {
    pub fn new(ports: SessionPorts, relay: PortRelay) -> Self {
        InterfaceContext {
            iface_addr: relay.iface_addr(),
            ports,
            relay,
        }
    }

    pub fn relay(&self) -> &PortRelay {
        &self.relay
    }

    pub fn handle_frame(&mut self, data: &[u8]) {
        let frame = match SessionFrame::parse(data) {
            Ok(frame) => frame,
            Err(e) => {
                log::trace!("dropping frame on {} ({})", self.iface_addr, e);
                return;
            }
        };

        match classify(&frame, self.iface_addr, &self.ports) {
            Some(Action::Learn { src_port, .. }) => {
                self.relay.reconfigure(src_port, frame.dst_port);
            }
            Some(Action::Forward { dst_addr, payload, .. }) => {
                log_warn(
                    self.relay.forward(dst_addr, frame.dst_port, payload),
                    "Failed to forward session datagram",
                );
            }
            None => {}
        }
    }
}

fn capture_err(iface: &str) -> impl Fn(pcap::Error) -> Error + '_ {
    move |source| Error::Capture {
        iface: iface.to_string(),
        source,
    }
}

/// A live capture on one interface plus the state it feeds.
pub struct CaptureSession {
    device: CaptureDevice,
    capture: Capture<Active>,
    context: InterfaceContext,
}

impl CaptureSession {
    pub fn open(
        device: CaptureDevice,
        config: &CaptureConfig,
        ports: &SessionPorts,
        stats: Arc<RelayStats>,
    ) -> Result<Self> {
        let mut capture = Capture::from_device(device.name.as_str())
            .map_err(capture_err(&device.name))?
            .promisc(config.promisc)
            .snaplen(config.snaplen)
            .timeout(config.timeout_ms)
            .open()
            .map_err(capture_err(&device.name))?;

        let link = capture.get_datalink();
        if link != Linktype::ETHERNET {
            return Err(Error::LinkType {
                iface: device.name,
                link: link.0,
            });
        }

        capture
            .filter(CAPTURE_FILTER, true)
            .map_err(capture_err(&device.name))?;

        let relay = PortRelay::register(device.addr, ports, stats)?;

        Ok(CaptureSession {
            device,
            capture,
            context: InterfaceContext::new(*ports, relay),
        })
    }

    pub fn spawn(self, shutdown: Shutdown) -> Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("capture-{}", self.device.name))
            .spawn(move || self.run(shutdown))
            .context("start capture thread")
    }

    fn run(self, shutdown: Shutdown) {
        let CaptureSession {
            device,
            mut capture,
            mut context,
        } = self;

        log::info!("Listening on {} for Shield traffic", device);
        // the read timeout bounds how long a shutdown can go unnoticed
        while !shutdown.is_triggered() {
            match capture.next_packet() {
                Ok(packet) => context.handle_frame(packet.data),
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => {
                    log::error!("Capture on {} stopped ({})", device.name, e);
                    break;
                }
            }
        }
        log::debug!("capture on {} down", device.name);
    }
}

type Opener = dyn Fn(CaptureDevice, Shutdown) -> Result<thread::JoinHandle<()>> + Send + Sync;

struct RunningCapture {
    device: String,
    shutdown: ShutdownHandle,
    thread: thread::JoinHandle<()>,
}

impl RunningCapture {
    fn stop(self) {
        self.shutdown.trigger();
        if self.thread.join().is_err() {
            log::error!("Capture thread on {} panicked", self.device);
        }
    }
}

/// The capture sessions currently running, one per interface address.
pub struct CaptureSet {
    platform: BoxPlatform,
    opener: Box<Opener>,
    running: BTreeMap<Ipv4Addr, RunningCapture>,
}

impl CaptureSet {
    pub fn new(
        platform: BoxPlatform,
        config: CaptureConfig,
        ports: SessionPorts,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self::with_opener(platform, move |device, shutdown| {
            CaptureSession::open(device, &config, &ports, stats.clone())?.spawn(shutdown)
        })
    }

    pub fn with_opener<F>(platform: BoxPlatform, opener: F) -> Self
    where
        F: Fn(CaptureDevice, Shutdown) -> Result<thread::JoinHandle<()>> + Send + Sync + 'static,
    {
        CaptureSet {
            platform,
            opener: Box::new(opener),
            running: BTreeMap::new(),
        }
    }

    /// Addresses with a live session.
    pub fn addrs(&self) -> Vec<Ipv4Addr> {
        self.running.keys().copied().collect()
    }

    /// Brings the sessions in line with the interface table: sessions whose
    /// address left the table are stopped and joined, devices whose address
    /// is new get a session. A device that can't be captured on is skipped;
    /// only failing to enumerate devices at all is an error.
    pub fn sync(&mut self, table: &InterfaceTable) -> Result<()> {
        let stale: Vec<Ipv4Addr> = self
            .running
            .keys()
            .filter(|addr| !table.contains(addr))
            .copied()
            .collect();
        for addr in stale {
            if let Some(capture) = self.running.remove(&addr) {
                log::info!("Closing capture on {}", capture.device);
                capture.stop();
            }
        }

        for device in self.platform.capture_devices()? {
            if self.running.contains_key(&device.addr) {
                continue;
            }
            // pcap also lists addresses of interfaces that are down
            if !table.contains(&device.addr) {
                log::debug!("Skipping {}: not an active multicast interface", device);
                continue;
            }

            let name = device.to_string();
            let addr = device.addr;
            let shutdown = ShutdownHandle::new();
            match (self.opener)(device, shutdown.subscribe()) {
                Ok(thread) => {
                    self.running.insert(
                        addr,
                        RunningCapture {
                            device: name,
                            shutdown,
                            thread,
                        },
                    );
                }
                Err(e) => log::warn!("Unable to capture on {} ({})", name, e),
            }
        }

        if self.running.is_empty() {
            log::warn!("No interface is capturing Shield traffic");
        }
        Ok(())
    }

    /// Stops and joins every session.
    pub fn stop_all(&mut self) {
        for (_, capture) in std::mem::take(&mut self.running) {
            capture.stop();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::platform::Platform;
    use crate::test::{free_port, listener, make_frame, recv_packet};
    use parking_lot::Mutex;
    use std::time::Duration;

    const IFACE: Ipv4Addr = Ipv4Addr::LOCALHOST;
    const DEVICE: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

    fn context() -> (InterfaceContext, SessionPorts, Arc<RelayStats>) {
        let ports = SessionPorts {
            video: free_port(IFACE),
            control: free_port(IFACE),
            audio: free_port(IFACE),
        };
        let stats = RelayStats::new();
        let relay = PortRelay::register(IFACE, &ports, stats.clone()).unwrap();
        (InterfaceContext::new(ports, relay), ports, stats)
    }

    #[test]
    fn learn_then_forward() {
        let (mut ctx, ports, stats) = context();
        let (device, device_addr) = listener(DEVICE);

        // nothing learned yet, so this goes nowhere
        ctx.handle_frame(&make_frame(IFACE, DEVICE, ports.video, ports.video, b"early"));

        ctx.handle_frame(&make_frame(DEVICE, IFACE, device_addr.port(), ports.video, b""));
        assert_eq!(ctx.relay().binding(ports.video).unwrap().src_port(), device_addr.port());

        ctx.handle_frame(&make_frame(IFACE, DEVICE, ports.video, ports.video, b"X"));

        let (data, from) = recv_packet(&device).unwrap();
        assert_eq!(data, b"X");
        assert_eq!(from.port(), ports.video);
        assert_eq!(stats.snapshot().session_forwarded, 1);
    }

    #[test]
    fn other_services_stay_unlearned() {
        let (mut ctx, ports, _) = context();
        ctx.handle_frame(&make_frame(DEVICE, IFACE, 51000, ports.audio, b""));

        assert!(ctx.relay().binding(ports.audio).unwrap().is_learned());
        assert!(!ctx.relay().binding(ports.video).unwrap().is_learned());
        assert!(!ctx.relay().binding(ports.control).unwrap().is_learned());
    }

    #[test]
    fn spoofed_learn_is_ignored() {
        let (mut ctx, ports, _) = context();
        ctx.handle_frame(&make_frame(IFACE, DEVICE, 51000, ports.control, b""));
        assert!(!ctx.relay().binding(ports.control).unwrap().is_learned());
    }

    #[test]
    fn garbage_is_dropped() {
        let (mut ctx, ports, stats) = context();
        let frame = make_frame(DEVICE, IFACE, 51000, ports.video, b"payload");
        for len in 0..frame.len() {
            ctx.handle_frame(&frame[..len]);
        }
        ctx.handle_frame(&[0xff; 200]);

        assert!(!ctx.relay().binding(ports.video).unwrap().is_learned());
        assert_eq!(stats.snapshot().ports_learned, 0);
    }

    struct Devices(Mutex<Vec<CaptureDevice>>);

    impl Platform for Devices {
        fn multicast_addrs(&self) -> Result<Vec<Ipv4Addr>> {
            Ok(vec![])
        }
        fn capture_devices(&self) -> Result<Vec<CaptureDevice>> {
            Ok(self.0.lock().clone())
        }
    }

    fn device(name: &str, addr: Ipv4Addr) -> CaptureDevice {
        CaptureDevice {
            name: name.to_string(),
            description: None,
            addr,
            netmask: None,
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;

    /// Sessions that idle until told to stop, recording both events.
    fn idle_set(devices: Vec<CaptureDevice>, log: &Log) -> CaptureSet {
        let log = log.clone();
        let platform = Arc::new(Devices(Mutex::new(devices)));
        CaptureSet::with_opener(platform, move |device, shutdown| {
            if device.name.starts_with("broken") {
                return Err(Error::LinkType {
                    iface: device.name,
                    link: 0,
                });
            }
            log.lock().push(format!("open {}", device.addr));
            let log = log.clone();
            Ok(thread::spawn(move || {
                while !shutdown.is_triggered() {
                    thread::sleep(Duration::from_millis(5));
                }
                log.lock().push(format!("stop {}", device.addr));
            }))
        })
    }

    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
    const B: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 5);
    const C: Ipv4Addr = Ipv4Addr::new(192, 168, 7, 2);

    #[test]
    fn sessions_follow_the_table() {
        let log: Log = Arc::new(Mutex::new(vec![]));
        let devices = vec![device("eth0", A), device("eth1", B), device("wlan0", C)];
        let mut set = idle_set(devices, &log);
        let table = InterfaceTable::with_addrs(vec![A, B]);

        set.sync(&table).unwrap();
        assert_eq!(set.addrs(), vec![A, B]);
        assert_eq!(log.lock().clone(), vec!["open 10.0.0.5", "open 10.0.1.5"]);

        // A went away and C came up
        table.replace(vec![B, C]);
        set.sync(&table).unwrap();
        assert_eq!(set.addrs(), vec![B, C]);
        assert_eq!(
            log.lock().clone(),
            vec!["open 10.0.0.5", "open 10.0.1.5", "stop 10.0.0.5", "open 192.168.7.2"]
        );

        set.stop_all();
        assert!(set.addrs().is_empty());
        let log = log.lock().clone();
        assert!(log.contains(&"stop 10.0.1.5".to_string()));
        assert!(log.contains(&"stop 192.168.7.2".to_string()));
    }

    #[test]
    fn unchanged_table_keeps_sessions() {
        let log: Log = Arc::new(Mutex::new(vec![]));
        let mut set = idle_set(vec![device("eth0", A)], &log);
        let table = InterfaceTable::with_addrs(vec![A]);

        set.sync(&table).unwrap();
        set.sync(&table).unwrap();
        assert_eq!(log.lock().clone(), vec!["open 10.0.0.5"]);
        set.stop_all();
    }

    #[test]
    fn failed_open_skips_only_that_device() {
        let log: Log = Arc::new(Mutex::new(vec![]));
        let mut set = idle_set(vec![device("broken0", A), device("eth1", B)], &log);

        set.sync(&InterfaceTable::with_addrs(vec![A, B])).unwrap();
        assert_eq!(set.addrs(), vec![B]);
        set.stop_all();
    }

    #[test]
    fn pcap_failures_do_not_abort_bring_up() {
        let devices = vec![
            device("eth-not-in-table", C),
            device("shield-relay-missing0", A),
        ];
        let mut set = CaptureSet::new(
            Arc::new(Devices(Mutex::new(devices))),
            CaptureConfig::default(),
            SessionPorts::default(),
            RelayStats::new(),
        );

        set.sync(&InterfaceTable::with_addrs(vec![A])).unwrap();
        assert!(set.addrs().is_empty());
    }
}
