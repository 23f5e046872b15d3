//! Drone node daemon: bridges the broker-side command fabric to the
//! ArduPilot flight controller.

mod autopilot;
mod config;
mod executor;
mod router;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aerolink_shared::{CipherEnvelope, DataType, Endpoint, Envelope, Transport, TransportSender};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::autopilot::{Autopilot, VehicleState};
use crate::config::NodeConfig;
use crate::executor::FlightExecutor;
use crate::router::MessageRouter;

#[derive(Parser, Debug)]
#[command(name = "uav-node", about = "AeroLink drone-side daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "AEROLINK_CONFIG", default_value = "uav-node.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = NodeConfig::load(&args.config)?;
    info!(drone = %config.drone_name, "drone node starting");

    let autopilot = Arc::new(
        Autopilot::connect(config.autopilot_config()).context("opening the autopilot link")?,
    );
    autopilot
        .wait_heartbeat(Duration::from_secs(30))
        .await
        .context("waiting for the autopilot heartbeat")?;
    autopilot.request_data_streams()?;
    autopilot.clear_mission().await?;
    info!("autopilot link up");

    let state = Arc::new(VehicleState::new());
    state.spawn_tracker(&autopilot);

    let transport = Transport::connect(
        config.rabbitmq.clone(),
        Endpoint::Drone {
            drone_name: config.drone_name.clone(),
        },
    )
    .await
    .context("connecting to the broker")?;
    let reporter = transport.sender();

    let mut router = MessageRouter::new();
    let mut commands = router.register(&config.service_name);

    let key_store = Arc::new(config.key_store()?);
    let mut executor = FlightExecutor::new(
        autopilot,
        state,
        key_store,
        config.drone_name.clone(),
    );

    let drone_name = config.drone_name.clone();
    let service_name = config.service_name.clone();
    tokio::spawn(async move {
        while let Some(envelope) = commands.recv().await {
            let report = executor.handle_envelope(envelope).await;
            send_report(&reporter, &drone_name, &service_name, &report);
        }
    });

    // Transport-fatal errors end the process; the supervisor restarts it.
    router.run(transport).await.context("transport down")?;
    Ok(())
}

fn send_report(
    reporter: &TransportSender,
    drone_name: &str,
    service_name: &str,
    report: &aerolink_shared::CommandReport,
) {
    let package = match CipherEnvelope::plain(report) {
        Ok(package) => package,
        Err(e) => {
            warn!("failed to encode report: {e}");
            return;
        }
    };
    let envelope = Envelope::new(drone_name, service_name, DataType::Service, package);
    match envelope.to_bytes() {
        Ok(bytes) => {
            if let Err(e) = reporter.send(service_name, bytes) {
                warn!("failed to queue report: {e}");
            }
        }
        Err(e) => warn!("failed to encode report envelope: {e}"),
    }
}
