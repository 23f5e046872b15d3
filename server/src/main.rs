//! Ground-station server: broker-facing drone registry plus the operator
//! HTTP gateway.

mod config;
mod dispatch;
mod gateway;
mod planner;
mod registry;

use std::path::PathBuf;
use std::sync::Arc;

use aerolink_shared::{Endpoint, Envelope, ReportStatus, Transport};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::dispatch::CommandDispatcher;
use crate::gateway::GatewayState;
use crate::registry::ClientRegistry;

#[derive(Parser, Debug)]
#[command(name = "aerolink-server", about = "AeroLink fleet control server")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "AEROLINK_CONFIG", default_value = "server.toml")]
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
    let config = ServerConfig::load(&args.config)?;
    info!(service = %config.service_name, "server starting");

    let mut transport = Transport::connect(
        config.rabbitmq.clone(),
        Endpoint::Server {
            service_name: config.service_name.clone(),
        },
    )
    .await
    .context("connecting to the broker")?;

    let key_store = Arc::new(config.key_store()?);
    let dispatcher =
        CommandDispatcher::new(transport.sender(), key_store, config.service_name.clone());
    let state = Arc::new(GatewayState::new(dispatcher));
    let registry = Arc::new(ClientRegistry::new());

    let listener = tokio::net::TcpListener::bind(&config.http_listen)
        .await
        .with_context(|| format!("binding {}", config.http_listen))?;
    info!(addr = %config.http_listen, "operator gateway listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, gateway::router(state)).await {
            warn!("gateway stopped: {e}");
        }
    });

    // Drone traffic drives the registry; a transport-fatal error ends the
    // process so the supervisor restarts it.
    loop {
        let bytes = transport.recv().await.context("transport down")?;
        let envelope = match Envelope::from_bytes(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("dropping unparseable drone message: {e}");
                continue;
            }
        };
        if registry.deliver(envelope).await {
            spawn_drone_consumer(&registry).await;
        }
    }
}

/// Attach a consumer to the most recently registered drone. Reports are
/// logged; everything else on the drone's queue is counted as telemetry.
async fn spawn_drone_consumer(registry: &Arc<ClientRegistry>) {
    for name in registry.connected_drones().await {
        let Some(mut rx) = registry.take_receiver(&name).await else {
            continue;
        };
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match serde_json::from_value::<aerolink_shared::CommandReport>(
                    envelope.data_package.data.clone(),
                ) {
                    Ok(report) if report.status == ReportStatus::Success => {
                        info!(drone = %report.drone_name, msg = %report.msg, "drone report")
                    }
                    Ok(report) => {
                        warn!(drone = %report.drone_name, msg = %report.msg, "drone error report")
                    }
                    Err(_) => {
                        info!(drone = %envelope.drone_name, "telemetry message")
                    }
                }
            }
        });
    }
}
