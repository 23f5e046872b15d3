//! Mission upload and monitoring
//!
//! Implements the MAVLink mission sub-protocol against ArduPilot: clear,
//! count, item-by-item handback, final ack. Every wait is bounded; a silent
//! vehicle fails the upload instead of hanging the executor.

use std::time::Duration;

use aerolink_shared::Waypoint;
use anyhow::{bail, Result};
use mavlink::ardupilotmega::{
    MavCmd, MavFrame, MavMessage, MavMissionResult, MISSION_CLEAR_ALL_DATA, MISSION_COUNT_DATA,
    MISSION_ITEM_INT_DATA,
};

use super::connection::{next_matching, Autopilot};

/// Altitude of the synthesized takeoff item, meters.
const TAKEOFF_ITEM_ALT_M: f32 = 15.0;
/// Waypoint acceptance radius, meters.
const ACCEPT_RADIUS_M: f32 = 2.0;

/// A mission item before it is numbered and framed.
struct PlannedItem {
    command: MavCmd,
    lat: f64,
    lon: f64,
    alt: f32,
}

impl PlannedItem {
    fn into_message(self, seq: u16, autopilot: &Autopilot) -> MavMessage {
        let is_waypoint = self.command == MavCmd::MAV_CMD_NAV_WAYPOINT;
        MavMessage::MISSION_ITEM_INT(MISSION_ITEM_INT_DATA {
            target_system: autopilot.config().target_system,
            target_component: autopilot.config().target_component,
            seq,
            frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
            command: self.command,
            current: 0,
            autocontinue: 1,
            param1: 0.0,
            param2: if is_waypoint { ACCEPT_RADIUS_M } else { 0.0 },
            param3: 0.0,
            param4: if is_waypoint { f32::NAN } else { 0.0 },
            x: (self.lat * 1e7) as i32,
            y: (self.lon * 1e7) as i32,
            z: self.alt,
        })
    }
}

fn plan_items(waypoints: &[Waypoint], return_to_launch: bool) -> Vec<PlannedItem> {
    let mut items = Vec::with_capacity(waypoints.len() + 2);
    // Takeoff over the first waypoint; the vehicle climbs straight up.
    items.push(PlannedItem {
        command: MavCmd::MAV_CMD_NAV_TAKEOFF,
        lat: waypoints[0].lat,
        lon: waypoints[0].lon,
        alt: TAKEOFF_ITEM_ALT_M,
    });
    for wp in waypoints {
        items.push(PlannedItem {
            command: MavCmd::MAV_CMD_NAV_WAYPOINT,
            lat: wp.lat,
            lon: wp.lon,
            alt: wp.alt as f32,
        });
    }
    if return_to_launch {
        items.push(PlannedItem {
            command: MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH,
            lat: 0.0,
            lon: 0.0,
            alt: 0.0,
        });
    }
    items
}

impl Autopilot {
    /// Remove any mission stored on the vehicle.
    pub async fn clear_mission(&self) -> Result<()> {
        self.send(&MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
            target_system: self.config().target_system,
            target_component: self.config().target_component,
        }))?;
        // ArduPilot acks the clear; give it a moment before the next count.
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    /// Upload a mission: a synthesized takeoff item, the caller's waypoints,
    /// and optionally a return-to-launch item.
    pub async fn upload_mission(
        &self,
        waypoints: &[Waypoint],
        return_to_launch: bool,
    ) -> Result<()> {
        if waypoints.is_empty() {
            bail!("mission needs at least one waypoint");
        }
        let items = plan_items(waypoints, return_to_launch);
        let timeout = self.config().ack_timeout;

        // Subscribe before announcing the count so no handback is missed.
        let mut feed = self.subscribe();
        self.clear_mission().await?;
        self.send(&MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
            target_system: self.config().target_system,
            target_component: self.config().target_component,
            count: items.len() as u16,
        }))?;

        for (seq, item) in items.into_iter().enumerate() {
            let requested = next_matching(&mut feed, timeout, |msg| match msg {
                MavMessage::MISSION_REQUEST(req) => Some(req.seq),
                MavMessage::MISSION_REQUEST_INT(req) => Some(req.seq),
                _ => None,
            })
            .await;
            if requested.is_none() {
                bail!("mission upload failed: vehicle never asked for item {seq}");
            }
            self.send(&item.into_message(seq as u16, self))?;
        }

        let ack = next_matching(&mut feed, timeout, |msg| match msg {
            MavMessage::MISSION_ACK(ack) => Some(ack.mavtype),
            _ => None,
        })
        .await;
        match ack {
            Some(MavMissionResult::MAV_MISSION_ACCEPTED) => Ok(()),
            Some(other) => bail!("mission upload rejected: {other:?}"),
            None => bail!("mission upload failed: no acknowledgement from the vehicle"),
        }
    }

    /// Wait for one full autonomous loop: the current item must leave zero
    /// and come back to zero. Bounded by the mission timeout.
    pub async fn wait_mission_complete(&self) -> Result<()> {
        let mut feed = self.subscribe();
        let deadline = tokio::time::Instant::now() + self.config().mission_timeout;
        let mut started = false;
        loop {
            let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now())
            else {
                bail!("mission did not complete in time");
            };
            let seq = next_matching(&mut feed, remaining, |msg| match msg {
                MavMessage::MISSION_CURRENT(current) => Some(current.seq),
                _ => None,
            })
            .await;
            match seq {
                Some(0) if started => return Ok(()),
                Some(0) => {}
                Some(_) => started = true,
                None => bail!("mission did not complete in time"),
            }
        }
    }
}
