use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_stream::wrappers::IntervalStream;

use super::Shutdown;
use crate::util::FilterSameExt;

/// Traffic counters shared by the mDNS loop and every capture thread.
#[derive(Debug, Default)]
pub struct RelayStats {
    mdns_to_peer: AtomicU64,
    mdns_to_group: AtomicU64,
    mdns_dropped: AtomicU64,
    ports_learned: AtomicU64,
    session_forwarded: AtomicU64,
    session_bytes: AtomicU64,
    send_failures: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// mDNS datagrams sent to the remote peer
    pub mdns_to_peer: u64,
    /// mDNS datagrams sent to the local group
    pub mdns_to_group: u64,
    /// mDNS datagrams with nowhere to go
    pub mdns_dropped: u64,
    /// times a device source port was (re)learned
    pub ports_learned: u64,
    pub session_forwarded: u64,
    pub session_bytes: u64,
    pub send_failures: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl RelayStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mdns_to_peer(&self) {
        bump(&self.mdns_to_peer, 1)
    }
    pub fn mdns_to_group(&self) {
        bump(&self.mdns_to_group, 1)
    }
    pub fn mdns_dropped(&self) {
        bump(&self.mdns_dropped, 1)
    }
    pub fn port_learned(&self) {
        bump(&self.ports_learned, 1)
    }
    pub fn session_forwarded(&self, size: usize) {
        bump(&self.session_forwarded, 1);
        bump(&self.session_bytes, size as u64);
    }
    pub fn send_failed(&self) {
        bump(&self.send_failures, 1)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            mdns_to_peer: load(&self.mdns_to_peer),
            mdns_to_group: load(&self.mdns_to_group),
            mdns_dropped: load(&self.mdns_dropped),
            ports_learned: load(&self.ports_learned),
            session_forwarded: load(&self.session_forwarded),
            session_bytes: load(&self.session_bytes),
            send_failures: load(&self.send_failures),
        }
    }
}

/// Logs a snapshot every `every`, skipping intervals where nothing moved.
pub fn spawn_reporter(
    stats: Arc<RelayStats>,
    every: Duration,
    mut shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reports = IntervalStream::new(tokio::time::interval(every))
            .map(move |_| stats.snapshot())
            .filter_same();

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                next = reports.next() => match next {
                    Some(snapshot) => match serde_json::to_string(&snapshot) {
                        Ok(line) => log::info!("traffic {}", line),
                        Err(e) => log::warn!("failed to encode traffic stats ({})", e),
                    },
                    None => break,
                },
            }
        }
    })
}
