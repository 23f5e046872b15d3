//! Vehicle state tracker
//!
//! Folds the telemetry stream into the small snapshot the wait loops poll:
//! armed, GPS fix, relative altitude, current mission item.

use std::sync::Arc;

use mavlink::ardupilotmega::MavMessage;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::connection::Autopilot;

#[derive(Debug, Clone, Copy, Default)]
pub struct VehicleSnapshot {
    pub armed: bool,
    /// 3-D fix or better.
    pub gps_fix: bool,
    pub relative_alt_m: f32,
    /// Index of the mission item the vehicle is flying toward.
    pub mission_seq: u16,
    pub custom_mode: u32,
}

#[derive(Default)]
pub struct VehicleState {
    snapshot: RwLock<VehicleSnapshot>,
}

impl VehicleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> VehicleSnapshot {
        *self.snapshot.read().await
    }

    pub async fn apply(&self, msg: &MavMessage) {
        match msg {
            MavMessage::HEARTBEAT(hb) => {
                let mut snap = self.snapshot.write().await;
                // MAV_MODE_FLAG_SAFETY_ARMED
                snap.armed = (hb.base_mode.bits() & 0x80) != 0;
                snap.custom_mode = hb.custom_mode;
            }
            MavMessage::GPS_RAW_INT(gps) => {
                self.snapshot.write().await.gps_fix = gps.fix_type as u8 >= 3;
            }
            MavMessage::GLOBAL_POSITION_INT(pos) => {
                self.snapshot.write().await.relative_alt_m = pos.relative_alt as f32 / 1000.0;
            }
            MavMessage::MISSION_CURRENT(current) => {
                self.snapshot.write().await.mission_seq = current.seq;
            }
            _ => {}
        }
    }

    /// Keep this tracker fed from the autopilot's message feed.
    pub fn spawn_tracker(self: &Arc<Self>, autopilot: &Autopilot) -> JoinHandle<()> {
        let mut rx = autopilot.subscribe();
        let state = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => state.apply(&msg).await,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
