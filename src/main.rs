use clap::Parser;
use shield_relay::platform::SystemPlatform;
use shield_relay::relay::{PeerMode, Relay};
use shield_relay::{panic, Config, Result};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Unicast port the remote relay peer talks to
    #[arg(short = 'p', long)]
    relay_port: Option<u16>,

    /// What is on the other side of the relay port
    #[arg(long, value_enum)]
    peer_mode: Option<PeerMode>,

    /// Relay mDNS only, without capturing session traffic
    #[arg(long)]
    no_capture: bool,

    /// Seconds between interface scans
    #[arg(long)]
    poll_interval: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(port) = self.relay_port {
            config.relay_port = port;
        }
        if let Some(mode) = self.peer_mode {
            config.peer_mode = mode;
        }
        if self.no_capture {
            config.capture.enabled = false;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }
}

async fn serve(config: Config) -> Result<()> {
    let mut relay = Relay::bring_up(config, Arc::new(SystemPlatform)).await?;

    let result = tokio::select! {
        result = relay.run() => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down");
            Ok(())
        }
    };

    relay.teardown().await;
    result
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    panic::set_panic_hook();

    log::info!(
        "shield-relay v{} git-{}",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(2);
        }
    };
    log::debug!("config: {:?}", config);

    if let Err(e) = serve(config).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
