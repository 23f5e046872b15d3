//! Flight executor
//!
//! Drone-side interpreter of received envelopes. Holds the little state
//! that spans commands: whether we are airborne, and the one continuous
//! motion session allowed at a time.

use std::sync::Arc;
use std::time::Duration;

use aerolink_shared::{
    open_command, CipherEnvelope, CommandReport, DataType, Envelope, FlightCommand, KeyStore,
    MissionPayload, SpecialInstruction,
};
use anyhow::{bail, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::autopilot::{ArduPilotMode, Autopilot, VehicleState};

/// Continuous-motion set-point cadence.
const MOTION_TICK: Duration = Duration::from_millis(100);
/// Takeoff completes within this distance of the target altitude.
const TAKEOFF_TOLERANCE_M: f32 = 0.5;
/// Landing completes below this altitude, disarmed.
const LANDED_ALT_M: f32 = 0.3;

/// A cancellable repeating velocity loop. At most one exists at a time;
/// starting a new one supersedes the old, stopping is idempotent.
struct MotionSession {
    cancel: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

pub struct FlightExecutor {
    autopilot: Arc<Autopilot>,
    state: Arc<VehicleState>,
    key_store: Arc<dyn KeyStore>,
    drone_name: String,
    airborne: bool,
    motion: Option<MotionSession>,
}

impl FlightExecutor {
    pub fn new(
        autopilot: Arc<Autopilot>,
        state: Arc<VehicleState>,
        key_store: Arc<dyn KeyStore>,
        drone_name: impl Into<String>,
    ) -> Self {
        Self {
            autopilot,
            state,
            key_store,
            drone_name: drone_name.into(),
            airborne: false,
            motion: None,
        }
    }

    pub fn airborne(&self) -> bool {
        self.airborne
    }

    /// Interpret one envelope addressed to this drone.
    pub async fn handle_envelope(&mut self, envelope: Envelope) -> CommandReport {
        match envelope.data_type {
            DataType::Service => self.handle_service(envelope.data_package).await,
            DataType::Plan => self.handle_plan(envelope.data_package).await,
        }
    }

    /// Encrypted packages must open cleanly or the command is dropped; an
    /// undecryptable command is never executed.
    async fn handle_service(&mut self, package: CipherEnvelope) -> CommandReport {
        let command = if package.encrypt {
            let Some(ciphertext) = package.ciphertext() else {
                return self.report_error("encrypted package without ciphertext");
            };
            let Some(key) = self.key_store.lookup_key(&self.drone_name).await else {
                error!("no agreed key on record, dropping encrypted command");
                return self.report_error("no agreed key; encrypted command dropped");
            };
            match open_command(&key, ciphertext) {
                Ok(command) => command,
                Err(e) => {
                    error!("dropping undecryptable command: {e}");
                    return self.report_error(format!("command dropped: {e}"));
                }
            }
        } else {
            match serde_json::from_value::<FlightCommand>(package.data.clone()) {
                Ok(command) => command,
                Err(e) => return self.report_error(format!("malformed command: {e}")),
            }
        };
        self.execute(command).await
    }

    async fn execute(&mut self, command: FlightCommand) -> CommandReport {
        info!(instruction = ?command.special_instruction, "executing command");
        match command.special_instruction {
            SpecialInstruction::TakeOff => self.take_off().await,
            SpecialInstruction::Land => self.land().await,
            SpecialInstruction::ContinueStart => self.continue_start(&command),
            SpecialInstruction::ContinueStop => self.continue_stop(),
            SpecialInstruction::None => self.move_relative(&command),
        }
    }

    async fn take_off(&mut self) -> CommandReport {
        if self.airborne {
            warn!("takeoff refused: already airborne");
            return self.report_error("already airborne; takeoff ignored");
        }
        let target = self.autopilot.config().takeoff_altitude_m;
        match self.arm_and_takeoff(target).await {
            Ok(()) => {
                self.airborne = true;
                self.report_success("takeoff complete")
            }
            Err(e) => self.report_error(format!("takeoff failed: {e}")),
        }
    }

    /// Guided mode, 3-D fix required, arm if needed, climb, then poll
    /// relative altitude until within tolerance of the target.
    async fn arm_and_takeoff(&self, target_alt: f32) -> Result<()> {
        let config = self.autopilot.config();
        self.autopilot.set_mode(ArduPilotMode::Guided)?;

        let fix = self
            .autopilot
            .recv_matching(config.ack_timeout, |msg| match msg {
                mavlink::ardupilotmega::MavMessage::GPS_RAW_INT(gps) => {
                    Some(gps.fix_type as u8 >= 3)
                }
                _ => None,
            })
            .await;
        if !fix.unwrap_or(false) {
            bail!("no 3-D GPS fix");
        }

        if !self.state.snapshot().await.armed {
            self.autopilot.arm_cmd()?;
        }
        self.autopilot.takeoff_cmd(target_alt)?;

        let deadline = tokio::time::Instant::now() + config.takeoff_timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                bail!("did not reach {target_alt} m in time");
            }
            let alt = self.state.snapshot().await.relative_alt_m;
            if (alt - target_alt).abs() < TAKEOFF_TOLERANCE_M {
                return Ok(());
            }
            tokio::time::sleep(config.poll_interval).await;
        }
    }

    async fn land(&mut self) -> CommandReport {
        self.stop_motion();
        match self.land_and_confirm().await {
            Ok(()) => {
                self.airborne = false;
                self.report_success("landed")
            }
            Err(e) => self.report_error(format!("landing failed: {e}")),
        }
    }

    async fn land_and_confirm(&self) -> Result<()> {
        let config = self.autopilot.config();
        self.autopilot.land_cmd()?;
        let deadline = tokio::time::Instant::now() + config.land_timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                bail!("vehicle did not confirm touchdown in time");
            }
            let snap = self.state.snapshot().await;
            if snap.relative_alt_m < LANDED_ALT_M && !snap.armed {
                return Ok(());
            }
            tokio::time::sleep(config.poll_interval).await;
        }
    }

    /// Start (or supersede) the continuous-motion session: a 10 Hz body-frame
    /// velocity loop that runs until stopped.
    fn continue_start(&mut self, command: &FlightCommand) -> CommandReport {
        self.stop_motion();
        if let Err(e) = self.autopilot.set_mode(ArduPilotMode::Guided) {
            return self.report_error(format!("continuous motion failed: {e}"));
        }

        let (cancel, mut cancel_rx) = watch::channel(false);
        let autopilot = self.autopilot.clone();
        let (forward, right, down) = (command.x, command.y, command.z);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MOTION_TICK);
            loop {
                ticker.tick().await;
                if *cancel_rx.borrow() {
                    // Exactly one trailing zero set-point, then stop.
                    if let Err(e) = autopilot.velocity_setpoint(0.0, 0.0, 0.0) {
                        warn!("failed to send stop set-point: {e}");
                    }
                    break;
                }
                if let Err(e) = autopilot.velocity_setpoint(forward, right, down) {
                    warn!("failed to send velocity set-point: {e}");
                }
            }
        });
        self.motion = Some(MotionSession {
            cancel,
            _task: task,
        });
        info!(forward, right, down, "continuous motion started");
        self.report_success("continuous motion started")
    }

    /// Idempotent: stopping with no live session still reports success.
    fn continue_stop(&mut self) -> CommandReport {
        self.stop_motion();
        self.report_success("continuous motion stopped")
    }

    fn stop_motion(&mut self) {
        if let Some(session) = self.motion.take() {
            // The loop observes the signal within one tick and sends the
            // trailing zero itself.
            let _ = session.cancel.send(true);
        }
    }

    /// One-shot body-frame relative move.
    fn move_relative(&self, command: &FlightCommand) -> CommandReport {
        let result = self
            .autopilot
            .set_mode(ArduPilotMode::Guided)
            .and_then(|_| {
                self.autopilot
                    .position_setpoint(command.x, command.y, command.z)
            });
        match result {
            Ok(()) => self.report_success("relative move dispatched"),
            Err(e) => self.report_error(format!("relative move failed: {e}")),
        }
    }

    /// Mission flow: upload, take off, switch to AUTO, start, monitor.
    async fn handle_plan(&mut self, package: CipherEnvelope) -> CommandReport {
        let payload: MissionPayload = match serde_json::from_value(package.data.clone()) {
            Ok(payload) => payload,
            Err(e) => return self.report_error(format!("malformed mission: {e}")),
        };
        if payload.waypoints.is_empty() {
            return self.report_error("mission has no waypoints");
        }
        match self.fly_mission(&payload).await {
            Ok(()) => self.report_success("mission complete"),
            Err(e) => self.report_error(format!("mission failed: {e}")),
        }
    }

    async fn fly_mission(&mut self, payload: &MissionPayload) -> Result<()> {
        self.autopilot.upload_mission(&payload.waypoints, true).await?;
        self.arm_and_takeoff(self.autopilot.config().takeoff_altitude_m)
            .await?;
        self.airborne = true;
        self.autopilot.set_mode(ArduPilotMode::Auto)?;
        self.autopilot.mission_start_cmd()?;
        self.autopilot.wait_mission_complete().await
    }

    fn report_success(&self, msg: impl Into<String>) -> CommandReport {
        CommandReport::success(&self.drone_name, msg)
    }

    fn report_error(&self, msg: impl Into<String>) -> CommandReport {
        CommandReport::error(&self.drone_name, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autopilot::connection::loopback::LoopbackLink;
    use crate::autopilot::AutopilotConfig;
    use aerolink_shared::{seal_command, MemoryKeyStore, Sm4Key};
    use mavlink::ardupilotmega::{MavCmd, MavMessage, SET_POSITION_TARGET_LOCAL_NED_DATA};
    use std::collections::HashMap;

    fn executor_with_key(
        key: Option<Sm4Key>,
    ) -> (Arc<LoopbackLink>, FlightExecutor) {
        let link = Arc::new(LoopbackLink::new());
        let config = AutopilotConfig {
            takeoff_timeout: Duration::from_millis(200),
            land_timeout: Duration::from_millis(200),
            ack_timeout: Duration::from_millis(150),
            mission_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(10),
            ..AutopilotConfig::default()
        };
        let autopilot = Arc::new(Autopilot::with_connection(link.clone(), config));
        let state = Arc::new(VehicleState::new());
        let store = match key {
            Some(key) => MemoryKeyStore::with_keys(HashMap::from([("alpha".to_string(), key)])),
            None => MemoryKeyStore::new(),
        };
        let executor = FlightExecutor::new(autopilot, state, Arc::new(store), "alpha");
        (link, executor)
    }

    fn service_envelope(package: CipherEnvelope) -> Envelope {
        Envelope::new("alpha", "flightControl", DataType::Service, package)
    }

    fn velocity_of(msg: &MavMessage) -> Option<&SET_POSITION_TARGET_LOCAL_NED_DATA> {
        match msg {
            MavMessage::SET_POSITION_TARGET_LOCAL_NED(target) => Some(target),
            _ => None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn takeoff_while_airborne_is_refused() {
        let (link, mut executor) = executor_with_key(None);
        executor.airborne = true;

        let command = FlightCommand::instruction(SpecialInstruction::TakeOff);
        let package = CipherEnvelope::plain(&command).unwrap();
        let report = executor.handle_envelope(service_envelope(package)).await;

        assert!(!report.is_success());
        assert!(link.sent_messages().is_empty());
        assert!(executor.airborne());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn undecryptable_command_is_dropped_not_executed() {
        let (link, mut executor) = executor_with_key(Some(Sm4Key::new([1u8; 16])));
        let wrong_key = Sm4Key::new([2u8; 16]);
        let sealed =
            seal_command(&wrong_key, &FlightCommand::instruction(SpecialInstruction::Land))
                .unwrap();

        let report = executor
            .handle_envelope(service_envelope(CipherEnvelope::sealed(sealed)))
            .await;

        assert!(!report.is_success());
        assert!(link.sent_messages().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn encrypted_command_executes_after_opening() {
        let key = Sm4Key::new([9u8; 16]);
        let (link, mut executor) = executor_with_key(Some(key));
        let command = FlightCommand {
            x: 4.0,
            y: 0.0,
            z: 0.0,
            special_instruction: SpecialInstruction::None,
        };
        let sealed = seal_command(&key, &command).unwrap();

        let report = executor
            .handle_envelope(service_envelope(CipherEnvelope::sealed(sealed)))
            .await;
        assert!(report.is_success());

        let sent = link.sent_messages();
        // DO_SET_MODE then the position set-point.
        assert_eq!(sent.len(), 2);
        let target = velocity_of(&sent[1]).unwrap();
        assert_eq!(target.x, 4.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn motion_session_ticks_and_stops_with_one_trailing_zero() {
        let (link, mut executor) = executor_with_key(None);
        let start = FlightCommand {
            x: 1.5,
            y: 0.0,
            z: 0.0,
            special_instruction: SpecialInstruction::ContinueStart,
        };
        let report = executor
            .handle_envelope(service_envelope(CipherEnvelope::plain(&start).unwrap()))
            .await;
        assert!(report.is_success());

        tokio::time::sleep(Duration::from_millis(250)).await;
        let moving = link
            .sent_messages()
            .iter()
            .filter_map(velocity_of)
            .filter(|t| t.vx == 1.5)
            .count();
        assert!(moving >= 2, "expected repeated set-points, saw {moving}");

        let stop = FlightCommand::instruction(SpecialInstruction::ContinueStop);
        let report = executor
            .handle_envelope(service_envelope(CipherEnvelope::plain(&stop).unwrap()))
            .await;
        assert!(report.is_success());
        tokio::time::sleep(Duration::from_millis(200)).await;

        let sent = link.sent_messages();
        let zeros = sent
            .iter()
            .filter_map(velocity_of)
            .filter(|t| t.vx == 0.0 && t.vy == 0.0 && t.vz == 0.0)
            .count();
        assert_eq!(zeros, 1);
        // Nothing moves after the trailing zero.
        let after = sent.len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(link.sent_messages().len(), after);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_without_a_session_still_succeeds() {
        let (link, mut executor) = executor_with_key(None);
        let stop = FlightCommand::instruction(SpecialInstruction::ContinueStop);
        let report = executor
            .handle_envelope(service_envelope(CipherEnvelope::plain(&stop).unwrap()))
            .await;
        assert!(report.is_success());
        assert!(link.sent_messages().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_mission_is_rejected() {
        let (link, mut executor) = executor_with_key(None);
        let package = CipherEnvelope::plain(&MissionPayload { waypoints: vec![] }).unwrap();
        let envelope = Envelope::new("alpha", "flightControl", DataType::Plan, package);
        let report = executor.handle_envelope(envelope).await;
        assert!(!report.is_success());
        assert!(link.sent_messages().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn takeoff_without_gps_fix_fails() {
        let (link, mut executor) = executor_with_key(None);
        let command = FlightCommand::instruction(SpecialInstruction::TakeOff);
        let package = CipherEnvelope::plain(&command).unwrap();

        let report = executor.handle_envelope(service_envelope(package)).await;
        assert!(!report.is_success());
        assert!(!executor.airborne());
        // Mode change went out, but never the arm or takeoff commands.
        let sent = link.sent_messages();
        assert!(sent.iter().all(|msg| match msg {
            MavMessage::COMMAND_LONG(cmd) => cmd.command == MavCmd::MAV_CMD_DO_SET_MODE,
            _ => false,
        }));
    }
}
