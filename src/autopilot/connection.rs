//! Flight controller link
//!
//! Wraps a MAVLink connection to ArduPilot. A dedicated reader thread fans
//! every inbound message out on a broadcast channel; sends go straight to
//! the connection, which is internally synchronized.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use mavlink::ardupilotmega::{MavMessage, REQUEST_DATA_STREAM_DATA};
use mavlink::{MavConnection, MavHeader};
use tokio::sync::broadcast;
use tracing::warn;

/// Link identity and the operation time bounds.
#[derive(Debug, Clone)]
pub struct AutopilotConfig {
    /// mavlink connection string, e.g. "udpin:127.0.0.1:14550" or
    /// "serial:/dev/ttyACM0:57600".
    pub connection: String,
    pub system_id: u8,
    pub component_id: u8,
    pub target_system: u8,
    pub target_component: u8,
    /// Telemetry rate requested from the vehicle, Hz.
    pub stream_rate_hz: u16,
    /// Default altitude for a bare takeoff instruction, meters.
    pub takeoff_altitude_m: f32,
    pub takeoff_timeout: Duration,
    pub land_timeout: Duration,
    /// Bounds each wait in the mission upload handshake and the final ack.
    pub ack_timeout: Duration,
    /// Bound on one full autonomous mission loop.
    pub mission_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            connection: "udpin:127.0.0.1:14550".to_string(),
            system_id: 255,      // ground/companion station
            component_id: 190,   // MAV_COMP_ID_ONBOARD_COMPUTER
            target_system: 1,    // autopilot
            target_component: 1, // MAV_COMP_ID_AUTOPILOT1
            stream_rate_hz: 4,
            takeoff_altitude_m: 10.0,
            takeoff_timeout: Duration::from_secs(30),
            land_timeout: Duration::from_secs(120),
            ack_timeout: Duration::from_secs(10),
            mission_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct Autopilot {
    conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
    config: AutopilotConfig,
    inbound: broadcast::Sender<MavMessage>,
}

impl Autopilot {
    /// Open the configured link and start the reader thread.
    pub fn connect(config: AutopilotConfig) -> Result<Self> {
        let conn = mavlink::connect::<MavMessage>(&config.connection)
            .map_err(|e| anyhow!("autopilot connect failed: {e}"))?;
        Ok(Self::with_connection(Arc::from(conn), config))
    }

    /// Build over an existing link. Tests use a loopback connection here.
    pub fn with_connection(
        conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
        config: AutopilotConfig,
    ) -> Self {
        let (inbound, _) = broadcast::channel(256);
        let reader_conn = conn.clone();
        let reader_tx = inbound.clone();
        std::thread::spawn(move || loop {
            match reader_conn.recv() {
                Ok((_header, msg)) => {
                    // Nobody listening yet is normal during startup.
                    let _ = reader_tx.send(msg);
                }
                Err(mavlink::error::MessageReadError::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    warn!("autopilot read error: {e}");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        });
        Self {
            conn,
            config,
            inbound,
        }
    }

    pub fn config(&self) -> &AutopilotConfig {
        &self.config
    }

    /// A live feed of every message from the vehicle, starting now.
    pub fn subscribe(&self) -> broadcast::Receiver<MavMessage> {
        self.inbound.subscribe()
    }

    pub fn send(&self, msg: &MavMessage) -> Result<()> {
        let header = MavHeader {
            system_id: self.config.system_id,
            component_id: self.config.component_id,
            sequence: 0,
        };
        self.conn
            .send(&header, msg)
            .map_err(|e| anyhow!("autopilot send failed: {e}"))?;
        Ok(())
    }

    /// Block until the vehicle heartbeats, proving the link is live.
    pub async fn wait_heartbeat(&self, timeout: Duration) -> Result<()> {
        self.recv_matching(timeout, |msg| {
            matches!(msg, MavMessage::HEARTBEAT(_)).then_some(())
        })
        .await
        .ok_or_else(|| anyhow!("no heartbeat from the autopilot"))
    }

    /// Ask the vehicle to stream all telemetry at the configured rate.
    pub fn request_data_streams(&self) -> Result<()> {
        self.send(&MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
            target_system: self.config.target_system,
            target_component: self.config.target_component,
            req_stream_id: 0, // MAV_DATA_STREAM_ALL
            req_message_rate: self.config.stream_rate_hz,
            start_stop: 1,
        }))
    }

    /// Await the first message the filter accepts, bounded by `timeout`.
    ///
    /// Subscribes on entry, so it only sees messages arriving after the
    /// call. Fine for streamed telemetry; request/response exchanges should
    /// subscribe before sending and use [`next_matching`].
    pub async fn recv_matching<T, F>(&self, timeout: Duration, filter: F) -> Option<T>
    where
        F: FnMut(&MavMessage) -> Option<T>,
    {
        let mut rx = self.subscribe();
        next_matching(&mut rx, timeout, filter).await
    }
}

/// Drain `rx` until the filter accepts a message or `timeout` elapses.
pub async fn next_matching<T, F>(
    rx: &mut broadcast::Receiver<MavMessage>,
    timeout: Duration,
    mut filter: F,
) -> Option<T>
where
    F: FnMut(&MavMessage) -> Option<T>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(msg)) => {
                if let Some(value) = filter(&msg) {
                    return Some(value);
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                warn!(skipped, "autopilot feed lagged");
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => return None,
            Err(_) => return None,
        }
    }
}
