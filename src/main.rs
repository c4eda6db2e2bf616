//! onionmux - load-balancing frontend for v2 onion services
//!
//! Connects to a controller, tracks the HSDir ring, and runs one balancing
//! loop per configured master service. Each master periodically fetches its
//! backends' descriptors, merges their introduction points and republishes
//! signed descriptors under the master identity.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use onionmux::balance::Master;
use onionmux::cli::Cli;
use onionmux::tor::{Controller, HsDirTracker};
use onionmux::util::time::SystemClock;
use onionmux::{config, crypto, logging};

/// How often each master re-evaluates its triggers.
const TICK_INTERVAL: Duration = Duration::from_secs(600);

/// How long a published descriptor set is considered fresh.
const PUBLISH_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load(&cli.config).context("failed to load config file")?;

    logging::init(cli.debug, &config.log_file_path).context("failed to initialize logger")?;
    info!("onionmux v{} starting", onionmux::VERSION);

    let controller = Arc::new(
        Controller::connect(&config.address, &config.control_port_password)
            .await
            .context("failed to initialize controller")?,
    );

    let tracker = Arc::new(HsDirTracker::new(Arc::clone(&controller)));
    Arc::clone(&tracker)
        .start()
        .await
        .context("failed to start directory ring tracker")?;

    debug!("launching services");
    let mut masters = JoinSet::new();
    let mut handles = Vec::new();

    for service in &config.services {
        let (public_key, private_key) =
            crypto::load_keypair(Path::new(&service.private_key_path))
                .context("failed to load keys from file")?;

        let master = Master::new(
            Arc::clone(&controller),
            Arc::clone(&tracker),
            SystemClock,
            service.backend_addresses.clone(),
            public_key,
            private_key,
            PUBLISH_INTERVAL,
        )
        .context("failed to initialize master")?;

        info!(
            "master {}: balancing {} backend(s)",
            master.onion_address(),
            service.backend_addresses.len()
        );

        handles.push(master.stop_handle());
        masters.spawn(master.run(TICK_INTERVAL));
    }

    info!("launched {} master service(s)", handles.len());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            finished = masters.join_next(), if !masters.is_empty() => {
                match finished {
                    Some(Ok(Ok(()))) => debug!("a master service stopped"),
                    Some(Ok(Err(e))) => error!("master service failed: {e:#}"),
                    Some(Err(e)) => error!("master task panicked: {e}"),
                    None => {}
                }
                if masters.is_empty() {
                    info!("all master services finished");
                    break;
                }
            }
        }
    }

    for handle in &handles {
        handle.stop();
    }
    tracker.stop();

    while masters.join_next().await.is_some() {}

    Ok(())
}
