use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::Arc;

use super::MAX_IP_COUNT;
use crate::error::Result;
use crate::platform::Platform;

/// Local IPv4 addresses that currently count as "us".
///
/// Every access goes through one mutex and the contents are only ever
/// swapped wholesale, so a reader sees either the old table or the new one.
#[derive(Clone, Default)]
pub struct InterfaceTable {
    inner: Arc<Mutex<Vec<Ipv4Addr>>>,
}

impl InterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_addrs(addrs: Vec<Ipv4Addr>) -> Self {
        let table = Self::new();
        table.replace(addrs);
        table
    }

    /// Reloads the table from the platform. On failure the previous
    /// contents are kept.
    pub fn refresh(&self, platform: &dyn Platform) -> Result<Vec<Ipv4Addr>> {
        let addrs = platform.multicast_addrs()?;
        Ok(self.replace(addrs))
    }

    /// Swaps in a new table and returns what was stored.
    pub fn replace(&self, mut addrs: Vec<Ipv4Addr>) -> Vec<Ipv4Addr> {
        if addrs.len() > MAX_IP_COUNT {
            log::warn!(
                "{} local addresses found, only the first {} will be relayed",
                addrs.len(),
                MAX_IP_COUNT
            );
            addrs.truncate(MAX_IP_COUNT);
        }
        let stored = addrs.clone();
        *self.inner.lock() = addrs;
        stored
    }

    pub fn contains(&self, addr: &Ipv4Addr) -> bool {
        self.inner.lock().contains(addr)
    }

    pub fn snapshot(&self) -> Vec<Ipv4Addr> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use crate::platform::CaptureDevice;
    use std::io;

    struct Failing;

    impl Platform for Failing {
        fn multicast_addrs(&self) -> Result<Vec<Ipv4Addr>> {
            Err(Error::platform("list addresses", io::Error::from(io::ErrorKind::Other)))
        }
        fn capture_devices(&self) -> Result<Vec<CaptureDevice>> {
            Ok(vec![])
        }
    }

    #[test]
    fn failed_refresh_keeps_table() {
        let table = InterfaceTable::with_addrs(vec![Ipv4Addr::new(10, 0, 0, 5)]);
        assert!(table.refresh(&Failing).is_err());
        assert_eq!(table.snapshot(), vec![Ipv4Addr::new(10, 0, 0, 5)]);
    }

    #[test]
    fn table_is_capped() {
        let addrs = (0..40).map(|i| Ipv4Addr::new(10, 0, 1, i)).collect();
        let table = InterfaceTable::with_addrs(addrs);
        assert_eq!(table.len(), MAX_IP_COUNT);
        assert!(table.contains(&Ipv4Addr::new(10, 0, 1, 0)));
        assert!(!table.contains(&Ipv4Addr::new(10, 0, 1, 39)));
    }
}
