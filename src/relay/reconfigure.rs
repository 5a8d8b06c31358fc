use parking_lot::Mutex;
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::net::UdpSocket;

use super::{InterfaceTable, MDNS_ADDR};
use crate::error::{Error, Result};
use crate::platform::BoxPlatform;

/// Membership of the mDNS group, per local interface address.
pub trait Membership: Send + Sync {
    fn join(&self, iface: Ipv4Addr) -> io::Result<()>;
    fn leave(&self, iface: Ipv4Addr) -> io::Result<()>;
}

impl Membership for UdpSocket {
    fn join(&self, iface: Ipv4Addr) -> io::Result<()> {
        self.join_multicast_v4(MDNS_ADDR, iface)
    }
    fn leave(&self, iface: Ipv4Addr) -> io::Result<()> {
        self.leave_multicast_v4(MDNS_ADDR, iface)
    }
}

/// Keeps the relay socket's group memberships in line with the interface
/// table.
pub struct Reconfigurator {
    table: InterfaceTable,
    membership: Arc<dyn Membership>,
    platform: BoxPlatform,
    serial: Mutex<()>,
}

impl Reconfigurator {
    pub fn new(
        table: InterfaceTable,
        membership: Arc<dyn Membership>,
        platform: BoxPlatform,
    ) -> Self {
        Reconfigurator {
            table,
            membership,
            platform,
            serial: Mutex::new(()),
        }
    }

    fn join(&self, addrs: &[Ipv4Addr]) -> Result<()> {
        for addr in addrs {
            self.membership
                .join(*addr)
                .map_err(|e| Error::platform("join mDNS multicast group", e))?;
            log::info!("Joined mDNS multicast group with interface {}", addr);
        }
        Ok(())
    }

    /// Joins the group on every address currently in the table.
    pub fn join_all(&self) -> Result<()> {
        let _serial = self.serial.lock();
        self.join(&self.table.snapshot())
    }

    /// Leaves the group on every address in the table. Memberships that are
    /// already gone only produce a warning.
    pub fn leave_all(&self) {
        let _serial = self.serial.lock();
        self.leave_current();
    }

    fn leave_current(&self) {
        for addr in self.table.snapshot() {
            match self.membership.leave(addr) {
                Ok(()) => log::debug!("Left mDNS multicast group on {}", addr),
                Err(e) => log::warn!("Failed to leave mDNS multicast group on {} ({})", addr, e),
            }
        }
    }

    /// Leave, refresh, rejoin. Calls are serialized against each other; the
    /// table lock itself is only held while the table is swapped.
    pub fn reconfigure(&self) -> Result<()> {
        let _serial = self.serial.lock();

        self.leave_current();
        let addrs = self.table.refresh(&*self.platform)?;
        if addrs.is_empty() {
            log::warn!("No multicast capable interface is up");
        }
        self.join(&addrs)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::platform::{CaptureDevice, Platform};
    use std::thread;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeSocket {
        log: Log,
        fail_leave: bool,
        fail_join: bool,
    }

    impl Membership for FakeSocket {
        fn join(&self, iface: Ipv4Addr) -> io::Result<()> {
            self.log.lock().push(format!("join {}", iface));
            if self.fail_join {
                return Err(io::Error::from(io::ErrorKind::AddrNotAvailable));
            }
            Ok(())
        }
        fn leave(&self, iface: Ipv4Addr) -> io::Result<()> {
            self.log.lock().push(format!("leave {}", iface));
            thread::sleep(Duration::from_millis(5));
            if self.fail_leave {
                return Err(io::Error::from(io::ErrorKind::AddrNotAvailable));
            }
            Ok(())
        }
    }

    struct FakePlatform {
        log: Log,
        addrs: Option<Vec<Ipv4Addr>>,
    }

    impl Platform for FakePlatform {
        fn multicast_addrs(&self) -> Result<Vec<Ipv4Addr>> {
            self.log.lock().push("refresh".to_string());
            self.addrs.clone().ok_or_else(|| {
                Error::platform("list addresses", io::Error::from(io::ErrorKind::Other))
            })
        }
        fn capture_devices(&self) -> Result<Vec<CaptureDevice>> {
            Ok(vec![])
        }
    }

    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
    const B: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 5);
    const C: Ipv4Addr = Ipv4Addr::new(192, 168, 7, 2);

    fn setup(
        fail_leave: bool,
        fail_join: bool,
        addrs: Option<Vec<Ipv4Addr>>,
    ) -> (Reconfigurator, InterfaceTable, Log) {
        let log: Log = Arc::new(Mutex::new(vec![]));
        let table = InterfaceTable::with_addrs(vec![A, B]);
        let socket = Arc::new(FakeSocket {
            log: log.clone(),
            fail_leave,
            fail_join,
        });
        let platform = Arc::new(FakePlatform {
            log: log.clone(),
            addrs,
        });
        (Reconfigurator::new(table.clone(), socket, platform), table, log)
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    #[test]
    fn failed_leaves_do_not_abort() {
        let (reconfigurator, table, log) = setup(true, false, Some(vec![C]));

        reconfigurator.reconfigure().unwrap();

        assert_eq!(
            entries(&log),
            vec!["leave 10.0.0.5", "leave 10.0.1.5", "refresh", "join 192.168.7.2"]
        );
        assert_eq!(table.snapshot(), vec![C]);
    }

    #[test]
    fn failed_refresh_aborts_before_join() {
        let (reconfigurator, table, log) = setup(false, false, None);

        assert!(reconfigurator.reconfigure().is_err());

        assert_eq!(entries(&log), vec!["leave 10.0.0.5", "leave 10.0.1.5", "refresh"]);
        assert_eq!(table.snapshot(), vec![A, B]);
    }

    #[test]
    fn failed_join_propagates() {
        let (reconfigurator, _, log) = setup(false, true, Some(vec![A, C]));

        let err = reconfigurator.reconfigure().unwrap_err();
        assert!(matches!(err, Error::Platform { op: "join mDNS multicast group", .. }));

        // stops at the first failure
        assert_eq!(entries(&log).last().unwrap(), "join 10.0.0.5");
    }

    #[test]
    fn concurrent_calls_do_not_interleave() {
        let (reconfigurator, _, log) = setup(false, false, Some(vec![C]));
        let reconfigurator = Arc::new(reconfigurator);

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let r = reconfigurator.clone();
                thread::spawn(move || r.reconfigure().unwrap())
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(
            entries(&log),
            vec![
                "leave 10.0.0.5",
                "leave 10.0.1.5",
                "refresh",
                "join 192.168.7.2",
                "leave 192.168.7.2",
                "refresh",
                "join 192.168.7.2",
            ]
        );
    }
}
