use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::capture::CaptureSet;
use super::reconfigure::Membership;
use super::{
    log_err, stats, InterfaceTable, MdnsRelay, MdnsRouter, Reconfigurator, RelayStats,
    ShutdownHandle, StatsSnapshot,
};
use crate::config::Config;
use crate::error::Result;
use crate::platform::{spawn_interface_watcher, BoxPlatform};

/// A running relay: the mDNS socket, its group memberships, one capture
/// thread per interface and the background tasks around them.
pub struct Relay {
    mdns: MdnsRelay,
    table: InterfaceTable,
    reconfigurator: Arc<Reconfigurator>,
    stats: Arc<RelayStats>,
    shutdown: ShutdownHandle,
    tasks: Vec<JoinHandle<()>>,
    captures: Option<Arc<Mutex<CaptureSet>>>,
}

impl Relay {
    pub async fn bring_up(config: Config, platform: BoxPlatform) -> Result<Relay> {
        config.validate()?;

        let table = InterfaceTable::new();
        let addrs = table.refresh(&*platform)?;
        if addrs.is_empty() {
            log::warn!("No multicast capable interface is up");
        }

        let stats = RelayStats::new();
        let mdns = MdnsRelay::bind(
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.relay_port),
            table.clone(),
            MdnsRouter::new(config.peer_mode, config.mdns_group),
            stats.clone(),
        )?;
        log::info!("mDNS relay bound on {}", mdns.local_addr()?);

        let membership: Arc<dyn Membership> = mdns.socket();
        let reconfigurator = Arc::new(Reconfigurator::new(
            table.clone(),
            membership,
            platform.clone(),
        ));
        reconfigurator.join_all()?;

        let shutdown = ShutdownHandle::new();

        let captures = if config.capture.enabled {
            let mut captures = CaptureSet::new(
                platform.clone(),
                config.capture.clone(),
                config.session_ports,
                stats.clone(),
            );
            captures.sync(&table)?;
            Some(Arc::new(Mutex::new(captures)))
        } else {
            log::info!("Packet capture disabled, relaying mDNS only");
            None
        };

        let watcher = {
            let reconfigurator = reconfigurator.clone();
            let table = table.clone();
            let captures = captures.clone();
            let on_change = move || {
                log_err(
                    reconfigurator.reconfigure(),
                    "Failed to reconfigure mDNS group membership",
                );
                // the table holds the last good scan even if rejoining failed
                if let Some(captures) = &captures {
                    log_err(captures.lock().sync(&table), "Failed to update capture sessions");
                }
            };
            spawn_interface_watcher(
                platform,
                config.poll_interval(),
                shutdown.subscribe(),
                on_change,
            )
        };
        let reporter =
            stats::spawn_reporter(stats.clone(), config.stats_interval(), shutdown.subscribe());

        Ok(Relay {
            mdns,
            table,
            reconfigurator,
            stats,
            shutdown,
            tasks: vec![watcher, reporter],
            captures,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.mdns.local_addr()
    }

    pub fn interfaces(&self) -> Vec<Ipv4Addr> {
        self.table.snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Runs the mDNS loop until shutdown is triggered or it fails.
    pub async fn run(&mut self) -> Result<()> {
        let shutdown = self.shutdown.subscribe();
        self.mdns.relay_loop(shutdown).await
    }

    /// Stops every task and thread, then drops group memberships.
    pub async fn teardown(self) {
        let Relay {
            reconfigurator,
            stats,
            shutdown,
            tasks,
            captures,
            ..
        } = self;

        shutdown.trigger();
        for task in tasks {
            log_err(task.await, "Background task failed");
        }
        if let Some(captures) = captures {
            log_err(
                tokio::task::spawn_blocking(move || captures.lock().stop_all()).await,
                "Failed to stop capture sessions",
            );
        }

        log_err(
            tokio::task::spawn_blocking(move || reconfigurator.leave_all()).await,
            "Failed to leave mDNS group",
        );

        match serde_json::to_string(&stats.snapshot()) {
            Ok(line) => log::info!("final traffic {}", line),
            Err(e) => log::warn!("failed to encode traffic stats ({})", e),
        }
        log::info!("Relay stopped");
    }
}
