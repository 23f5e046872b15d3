//! One-shot vehicle operations
//!
//! Thin translations from executor intent to MAVLink messages. Waiting for
//! outcomes is the caller's job; everything here is fire-and-forget.

use anyhow::Result;
use mavlink::ardupilotmega::{
    MavCmd, MavFrame, MavMessage, PositionTargetTypemask, COMMAND_LONG_DATA,
    SET_POSITION_TARGET_LOCAL_NED_DATA,
};

use super::connection::Autopilot;

/// ArduPilot Copter flight modes used by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ArduPilotMode {
    Stabilize = 0,
    Auto = 3,
    Guided = 4,
    Loiter = 5,
    Rtl = 6,
    Land = 9,
}

/// Use only the velocity fields of a position target.
const VELOCITY_TYPE_MASK: u16 = 0b0101_1100_0111;
/// Use only the position fields of a position target.
const POSITION_TYPE_MASK: u16 = 0b0101_1111_1000;

impl Autopilot {
    fn command_long(&self, command: MavCmd, params: [f32; 7]) -> Result<()> {
        self.send(&MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system: self.config().target_system,
            target_component: self.config().target_component,
            command,
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        }))
    }

    pub fn set_mode(&self, mode: ArduPilotMode) -> Result<()> {
        // param1 = MAV_MODE_FLAG_CUSTOM_MODE_ENABLED, param2 = mode number
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [1.0, mode as u32 as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    pub fn arm_cmd(&self) -> Result<()> {
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    pub fn takeoff_cmd(&self, altitude_m: f32) -> Result<()> {
        self.command_long(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, f32::NAN, f32::NAN, f32::NAN, altitude_m],
        )
    }

    pub fn land_cmd(&self) -> Result<()> {
        self.command_long(
            MavCmd::MAV_CMD_NAV_LAND,
            [0.0, 0.0, 0.0, f32::NAN, f32::NAN, f32::NAN, 0.0],
        )
    }

    pub fn mission_start_cmd(&self) -> Result<()> {
        self.command_long(
            MavCmd::MAV_CMD_MISSION_START,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    /// Body-frame velocity set-point: forward/right/down, m/s.
    pub fn velocity_setpoint(&self, forward: f32, right: f32, down: f32) -> Result<()> {
        self.position_target(VELOCITY_TYPE_MASK, 0.0, 0.0, 0.0, forward, right, down)
    }

    /// Body-frame relative position set-point: forward/right/down, meters.
    pub fn position_setpoint(&self, forward: f32, right: f32, down: f32) -> Result<()> {
        self.position_target(POSITION_TYPE_MASK, forward, right, down, 0.0, 0.0, 0.0)
    }

    #[allow(clippy::too_many_arguments)]
    fn position_target(
        &self,
        type_mask: u16,
        x: f32,
        y: f32,
        z: f32,
        vx: f32,
        vy: f32,
        vz: f32,
    ) -> Result<()> {
        self.send(&MavMessage::SET_POSITION_TARGET_LOCAL_NED(
            SET_POSITION_TARGET_LOCAL_NED_DATA {
                time_boot_ms: 0,
                target_system: self.config().target_system,
                target_component: self.config().target_component,
                coordinate_frame: MavFrame::MAV_FRAME_BODY_OFFSET_NED,
                type_mask: PositionTargetTypemask::from_bits_truncate(type_mask),
                x,
                y,
                z,
                vx,
                vy,
                vz,
                afx: 0.0,
                afy: 0.0,
                afz: 0.0,
                yaw: 0.0,
                yaw_rate: 0.0,
            },
        ))
    }
}
